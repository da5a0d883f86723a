//! Conditional Rule Guard
//!
//! A rule has one trigger field (`if.field`) and a list of actions, each
//! naming target fields (`then[].targets`). A rule that targets its own
//! trigger would feed back into itself on every change.
//!
//! Only the single-rule case is detected. A cycle spanning several rules
//! (A drives B, B drives A) passes this guard.

use serde_json::Value;

/// Trigger field of a rule definition, if it is well formed.
pub fn trigger_field(definition: &Value) -> Option<&str> {
    definition.get("if")?.get("field")?.as_str().filter(|f| !f.is_empty())
}

/// All target field names across the rule's actions, in order.
pub fn target_fields(definition: &Value) -> Vec<&str> {
    let Some(actions) = definition.get("then").and_then(Value::as_array) else {
        return vec![];
    };
    actions
        .iter()
        .filter_map(|action| action.get("targets").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .collect()
}

/// True iff the trigger field appears among any action's targets.
///
/// Malformed definitions are not self-referential.
pub fn is_self_referential(definition: &Value) -> bool {
    match trigger_field(definition) {
        Some(trigger) => target_fields(definition).contains(&trigger),
        None => false,
    }
}
