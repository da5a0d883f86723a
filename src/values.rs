//! Display values for stored field data

use crate::templates::FieldDefinition;

/// Delimiter between components of a stored multi-valued choice.
pub const STORED_DELIMITER: char = ',';
/// Delimiter between components in rendered output.
pub const DISPLAY_DELIMITER: &str = ", ";

/// Convert a stored value into the text shown in documents.
///
/// Missing or empty values fall back to the field default, then to "".
/// Choice fields flagged to export labels map each value to its option
/// label; values without a matching option pass through unchanged.
pub fn resolve_display_value(field: &FieldDefinition, raw: Option<&str>) -> String {
    let raw = match raw.filter(|v| !v.is_empty()) {
        Some(v) => v,
        None => field.default_value.as_deref().unwrap_or(""),
    };

    if raw.is_empty() || !field.field_type.is_choice() || !field.export_as_label_in_document {
        return raw.to_string();
    }

    if field.field_type.is_multi_valued() {
        raw.split(STORED_DELIMITER)
            .map(|part| label_for(field, part.trim()))
            .collect::<Vec<_>>()
            .join(DISPLAY_DELIMITER)
    } else {
        label_for(field, raw).to_string()
    }
}

fn label_for<'a>(field: &'a FieldDefinition, value: &'a str) -> &'a str {
    field
        .options
        .iter()
        .find(|opt| opt.value == value)
        .map_or(value, |opt| opt.label.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{ChoiceOption, FieldType};

    fn field(field_type: FieldType, export_as_label: bool) -> FieldDefinition {
        FieldDefinition {
            id: 1,
            sheet_id: 1,
            name: "choice".into(),
            label: "Choice".into(),
            field_type,
            options: vec![
                ChoiceOption { label: "A".into(), value: "a".into() },
                ChoiceOption { label: "B".into(), value: "b".into() },
            ],
            default_value: None,
            help_tip: None,
            export_as_label_in_document: export_as_label,
            display_order: 0,
        }
    }

    #[test]
    fn test_label_lookup() {
        let f = field(FieldType::Select, true);
        assert_eq!(resolve_display_value(&f, Some("a")), "A");
        assert_eq!(resolve_display_value(&f, Some("c")), "c");
    }

    #[test]
    fn test_flag_off_returns_raw_value() {
        let f = field(FieldType::Radio, false);
        assert_eq!(resolve_display_value(&f, Some("a")), "a");
    }

    #[test]
    fn test_non_choice_returns_raw_value() {
        let f = field(FieldType::Text, true);
        assert_eq!(resolve_display_value(&f, Some("a")), "a");
    }

    #[test]
    fn test_multi_valued_components() {
        let f = field(FieldType::CheckboxGroup, true);
        assert_eq!(resolve_display_value(&f, Some("a,b,z")), "A, B, z");
    }

    #[test]
    fn test_default_fallback() {
        let mut f = field(FieldType::Select, true);
        assert_eq!(resolve_display_value(&f, None), "");
        f.default_value = Some("b".into());
        assert_eq!(resolve_display_value(&f, None), "B");
        assert_eq!(resolve_display_value(&f, Some("")), "B");
    }
}
