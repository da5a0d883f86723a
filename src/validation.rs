//! Submission Validation - Rule/Policy Separation
//!
//! Rules produce structured violations for one field value.
//! Policy: only `Error` violations make a submission invalid.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::project::Record;
use crate::resolver::{ResolvedField, ResolvedSheet};
use crate::templates::{SheetId, SheetKind, ValidationRule};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub field: String,
    /// Zero-based row for dynamic-table submissions
    #[serde(default)]
    pub row: Option<usize>,
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub sheet_id: SheetId,
    pub violations: Vec<ValidationViolation>,
}

impl ValidationResult {
    fn from_violations(sheet_id: SheetId, violations: Vec<ValidationViolation>) -> Self {
        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        Self { valid, sheet_id, violations }
    }

    pub fn has_errors(&self) -> bool {
        !self.valid
    }
}

/// Configured rule row of `rule_type` on a field.
fn configured<'a>(field: &'a ResolvedField, rule_type: &str) -> Option<&'a ValidationRule> {
    field.validation_rules.iter().find(|r| r.rule_type == rule_type)
}

/// Boolean rules are stored as the string "True".
fn flag(field: &ResolvedField, rule_type: &str) -> bool {
    configured(field, rule_type)
        .and_then(|r| r.rule_value.as_deref())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn violation(field: &ResolvedField, rule: &str, default_message: String) -> ValidationViolation {
    let message = configured(field, rule)
        .and_then(|r| r.message.clone())
        .unwrap_or(default_message);
    ValidationViolation {
        field: field.field.name.clone(),
        row: None,
        rule: rule.to_string(),
        severity: ViolationSeverity::Error,
        message,
        expected: None,
        actual: None,
        remediation: vec![],
    }
}

/// Submission rule trait - produces violations for one value
pub trait SubmissionRule {
    fn name(&self) -> &'static str;
    fn validate(&self, field: &ResolvedField, value: &str) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

/// `required`, unless the field is also `disabled`
pub struct RequiredRule;

impl SubmissionRule for RequiredRule {
    fn name(&self) -> &'static str { "required" }

    fn validate(&self, field: &ResolvedField, value: &str) -> Vec<ValidationViolation> {
        if !flag(field, "required") || flag(field, "disabled") || !value.trim().is_empty() {
            return vec![];
        }
        let mut v = violation(field, self.name(), format!("{} is required", field.field.label));
        v.remediation = vec![format!("Fill in {}", field.field.label)];
        vec![v]
    }
}

/// `minLength` / `maxLength`, counted in characters
pub struct LengthRule;

impl SubmissionRule for LengthRule {
    fn name(&self) -> &'static str { "length" }

    fn validate(&self, field: &ResolvedField, value: &str) -> Vec<ValidationViolation> {
        if value.is_empty() {
            return vec![];
        }
        let len = value.chars().count();
        let mut violations = vec![];
        for rule_type in ["minLength", "maxLength"] {
            let Some(limit) = configured(field, rule_type)
                .and_then(|r| r.rule_value.as_deref())
                .and_then(|v| v.trim().parse::<usize>().ok())
            else {
                continue;
            };
            let broken = if rule_type == "minLength" { len < limit } else { len > limit };
            if broken {
                let mut v = violation(field, rule_type, format!("{} has {} characters", field.field.label, len));
                v.expected = Some(format!("{} {}", rule_type, limit));
                v.actual = Some(len.to_string());
                violations.push(v);
            }
        }
        violations
    }
}

/// `pattern`, matched against the whole value
pub struct PatternRule;

impl SubmissionRule for PatternRule {
    fn name(&self) -> &'static str { "pattern" }

    fn validate(&self, field: &ResolvedField, value: &str) -> Vec<ValidationViolation> {
        let Some(pattern) = configured(field, self.name()).and_then(|r| r.rule_value.as_deref()) else {
            return vec![];
        };
        if value.is_empty() || pattern.is_empty() {
            return vec![];
        }
        match Regex::new(&format!("^(?:{})$", pattern)) {
            Ok(re) if re.is_match(value) => vec![],
            Ok(_) => {
                let mut v = violation(field, self.name(), format!("{} has an invalid format", field.field.label));
                v.expected = Some(pattern.to_string());
                v.actual = Some(value.to_string());
                vec![v]
            }
            Err(e) => {
                warn!(field = %field.field.name, %pattern, error = %e, "unusable pattern rule");
                let mut v = violation(field, self.name(), format!("Pattern for {} cannot be compiled", field.field.label));
                v.severity = ViolationSeverity::Warning;
                v.remediation = vec!["Fix the pattern in the field's validation rules".to_string()];
                vec![v]
            }
        }
    }
}

/// Text and textarea values reject ASCII and ideographic spaces unless allowed
pub struct SpaceRule;

const IDEOGRAPHIC_SPACE: char = '\u{3000}';

impl SubmissionRule for SpaceRule {
    fn name(&self) -> &'static str { "space" }

    fn validate(&self, field: &ResolvedField, value: &str) -> Vec<ValidationViolation> {
        if !field.field.field_type.is_free_text() {
            return vec![];
        }
        let mut violations = vec![];
        if value.contains(' ') && !flag(field, "allowEnglishSpace") {
            violations.push(violation(
                field,
                "allowEnglishSpace",
                format!("{} may not contain spaces", field.field.label),
            ));
        }
        if value.contains(IDEOGRAPHIC_SPACE) && !flag(field, "allowChineseSpace") {
            violations.push(violation(
                field,
                "allowChineseSpace",
                format!("{} may not contain full-width spaces", field.field.label),
            ));
        }
        violations
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn SubmissionRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredRule),
                Box::new(LengthRule),
                Box::new(PatternRule),
                Box::new(SpaceRule),
            ],
        }
    }

    fn check(&self, field: &ResolvedField, value: &str, row: Option<usize>, out: &mut Vec<ValidationViolation>) {
        for rule in &self.rules {
            out.extend(rule.validate(field, value).into_iter().map(|mut v| {
                v.row = row;
                v
            }));
        }
    }

    /// Validate a fixed-form submission. Missing keys count as empty.
    pub fn validate_form(&self, sheet: &ResolvedSheet, values: &Record) -> ValidationResult {
        let mut violations = vec![];
        for field in &sheet.fields {
            let value = values.get(&field.field.name).map_or("", String::as_str);
            self.check(field, value, None, &mut violations);
        }
        ValidationResult::from_violations(sheet.sheet.id, violations)
    }

    /// Validate dynamic-table rows. Blank rows are skipped since they are
    /// never stored.
    pub fn validate_rows(&self, sheet: &ResolvedSheet, rows: &[Record]) -> ValidationResult {
        let mut violations = vec![];
        for (i, row) in rows.iter().enumerate() {
            if crate::project::is_blank_record(row) {
                continue;
            }
            for field in &sheet.fields {
                let value = row.get(&field.field.name).map_or("", String::as_str);
                self.check(field, value, Some(i), &mut violations);
            }
        }
        ValidationResult::from_violations(sheet.sheet.id, violations)
    }

    /// Dispatch on the sheet kind: a JSON object for forms, an array for tables.
    pub fn validate_payload(&self, sheet: &ResolvedSheet, payload: &serde_json::Value) -> Result<ValidationResult, serde_json::Error> {
        Ok(match sheet.sheet.kind {
            SheetKind::FixedForm => self.validate_form(sheet, &Record::deserialize(payload)?),
            SheetKind::DynamicTable => self.validate_rows(sheet, &Vec::<Record>::deserialize(payload)?),
        })
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{FieldDefinition, FieldType, SheetDefinition};

    fn field(name: &str, field_type: FieldType, rules: &[(&str, &str)]) -> ResolvedField {
        ResolvedField {
            field: FieldDefinition {
                id: 1,
                sheet_id: 1,
                name: name.into(),
                label: name.to_uppercase(),
                field_type,
                options: vec![],
                default_value: None,
                help_tip: None,
                export_as_label_in_document: false,
                display_order: 0,
            },
            validation_rules: rules
                .iter()
                .enumerate()
                .map(|(i, (t, v))| ValidationRule {
                    id: i as i64,
                    field_id: 1,
                    rule_type: t.to_string(),
                    rule_value: Some(v.to_string()),
                    message: None,
                })
                .collect(),
        }
    }

    fn sheet(kind: SheetKind, fields: Vec<ResolvedField>) -> ResolvedSheet {
        ResolvedSheet {
            sheet: SheetDefinition {
                id: 9,
                section_id: 1,
                name: "S".into(),
                kind,
                display_order: 0,
                model_identifier: None,
                chapter_asset_id: None,
            },
            fields,
            conditional_rules: vec![],
            chapter: None,
        }
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_required_respects_disabled() {
        let s = sheet(SheetKind::FixedForm, vec![
            field("a", FieldType::Number, &[("required", "True")]),
            field("b", FieldType::Number, &[("required", "True"), ("disabled", "True")]),
        ]);
        let result = Validator::new().validate_form(&s, &record(&[("a", " ")]));
        assert!(!result.valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].field, "a");
    }

    #[test]
    fn test_length_counts_characters() {
        let s = sheet(SheetKind::FixedForm, vec![field("code", FieldType::Number, &[("minLength", "2"), ("maxLength", "3")])]);
        let v = Validator::new();
        assert!(v.validate_form(&s, &record(&[("code", "项目")])).valid);
        assert!(!v.validate_form(&s, &record(&[("code", "1")])).valid);
        let long = v.validate_form(&s, &record(&[("code", "1234")]));
        assert_eq!(long.violations[0].rule, "maxLength");
        // Empty values are the required rule's concern
        assert!(v.validate_form(&s, &record(&[])).valid);
    }

    #[test]
    fn test_pattern_is_anchored() {
        let s = sheet(SheetKind::FixedForm, vec![field("zip", FieldType::Number, &[("pattern", r"\d{3}")])]);
        let v = Validator::new();
        assert!(v.validate_form(&s, &record(&[("zip", "123")])).valid);
        assert!(!v.validate_form(&s, &record(&[("zip", "1234")])).valid);
    }

    #[test]
    fn test_bad_pattern_warns_without_blocking() {
        let s = sheet(SheetKind::FixedForm, vec![field("x", FieldType::Number, &[("pattern", "(")])]);
        let result = Validator::new().validate_form(&s, &record(&[("x", "1")]));
        assert!(result.valid);
        assert_eq!(result.violations[0].severity, ViolationSeverity::Warning);
    }

    #[test]
    fn test_spaces_need_explicit_permission() {
        let v = Validator::new();
        let strict = sheet(SheetKind::FixedForm, vec![field("t", FieldType::Text, &[])]);
        let result = v.validate_form(&strict, &record(&[("t", "a b\u{3000}c")]));
        let rules: Vec<_> = result.violations.iter().map(|v| v.rule.as_str()).collect();
        assert_eq!(rules, ["allowEnglishSpace", "allowChineseSpace"]);

        let relaxed = sheet(SheetKind::FixedForm, vec![field("t", FieldType::Textarea, &[("allowEnglishSpace", "True")])]);
        assert!(v.validate_form(&relaxed, &record(&[("t", "a b")])).valid);

        let number = sheet(SheetKind::FixedForm, vec![field("n", FieldType::Number, &[])]);
        assert!(v.validate_form(&number, &record(&[("n", "1 2")])).valid);
    }

    #[test]
    fn test_rows_report_index_and_skip_blank_rows() {
        let s = sheet(SheetKind::DynamicTable, vec![field("name", FieldType::Text, &[("required", "True")])]);
        let rows = vec![record(&[("name", "ok")]), record(&[("name", "")]), record(&[("name", "a b")])];
        let result = Validator::new().validate_rows(&s, &rows);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].row, Some(2));
    }

    #[test]
    fn test_payload_dispatch() {
        let s = sheet(SheetKind::DynamicTable, vec![field("name", FieldType::Text, &[])]);
        let result = Validator::new().validate_payload(&s, &serde_json::json!([{"name": "x"}])).unwrap();
        assert!(result.valid);
        assert!(Validator::new().validate_payload(&s, &serde_json::json!({"name": "x"})).is_err());
    }
}
