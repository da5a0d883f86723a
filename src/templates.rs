//! Template Tree - Versioned Form and Document Definitions
//!
//! Template -> Section -> SheetDefinition -> FieldDefinition -> ValidationRule.
//! Sections own chapter assets; a sheet may claim at most one of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TemplateId = i64;
pub type SectionId = i64;
pub type SheetId = i64;
pub type FieldId = i64;
pub type ChapterId = i64;
pub type RuleId = i64;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    #[default]
    Draft,
    Published,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub status: TemplateStatus,
    #[serde(default = "default_true")]
    pub is_latest: bool,
    /// Version this one was cloned from
    #[serde(default)]
    pub parent_id: Option<TemplateId>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool { true }

impl Template {
    pub fn is_published(&self) -> bool {
        self.status == TemplateStatus::Published
    }

    /// The one version end users fill data against
    pub fn is_active(&self) -> bool {
        self.is_published() && self.is_latest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub template_id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub display_order: i32,
}

/// An externally authored document fragment bound to a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterAsset {
    pub id: ChapterId,
    pub section_id: SectionId,
    pub filename: String,
    /// Opaque key understood by the asset source
    pub storage_locator: String,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    FixedForm,
    DynamicTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetDefinition {
    pub id: SheetId,
    pub section_id: SectionId,
    pub name: String,
    pub kind: SheetKind,
    #[serde(default)]
    pub display_order: i32,
    /// Record-shape identity of a dynamic table
    #[serde(default)]
    pub model_identifier: Option<String>,
    #[serde(default)]
    pub chapter_asset_id: Option<ChapterId>,
}

impl SheetDefinition {
    /// Identity used in `{{table_<identity>}}` slots.
    pub fn table_identity(&self) -> &str {
        self.model_identifier
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    Select,
    Radio,
    Checkbox,
    SelectMultiple,
    CheckboxGroup,
    Other(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Select => "select",
            FieldType::Radio => "radio",
            FieldType::Checkbox => "checkbox",
            FieldType::SelectMultiple => "select-multiple",
            FieldType::CheckboxGroup => "checkbox-group",
            FieldType::Other(s) => s,
        }
    }

    pub fn is_choice(&self) -> bool {
        matches!(
            self,
            FieldType::Select
                | FieldType::Radio
                | FieldType::Checkbox
                | FieldType::SelectMultiple
                | FieldType::CheckboxGroup
        )
    }

    pub fn is_multi_valued(&self) -> bool {
        matches!(self, FieldType::SelectMultiple | FieldType::CheckboxGroup)
    }

    pub fn is_free_text(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::Textarea)
    }
}

impl From<&str> for FieldType {
    fn from(s: &str) -> Self {
        match s {
            "text" => FieldType::Text,
            "textarea" => FieldType::Textarea,
            "number" => FieldType::Number,
            "date" => FieldType::Date,
            "select" => FieldType::Select,
            "radio" => FieldType::Radio,
            "checkbox" => FieldType::Checkbox,
            "select-multiple" => FieldType::SelectMultiple,
            "checkbox-group" => FieldType::CheckboxGroup,
            other => FieldType::Other(other.to_string()),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FieldType::from(s.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: FieldId,
    pub sheet_id: SheetId,
    /// Immutable, unique within the sheet; doubles as the placeholder name
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Vec<ChoiceOption>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub help_tip: Option<String>,
    #[serde(default)]
    pub export_as_label_in_document: bool,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: RuleId,
    pub field_id: FieldId,
    pub rule_type: String,
    #[serde(default)]
    pub rule_value: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalRule {
    pub id: RuleId,
    pub sheet_id: SheetId,
    pub name: String,
    /// Semi-structured `{ "if": {...}, "then": [...] }` object
    pub definition: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_round_trips_unknown_names() {
        let t: FieldType = serde_json::from_str(r#""signature""#).unwrap();
        assert_eq!(t, FieldType::Other("signature".into()));
        assert_eq!(serde_json::to_string(&t).unwrap(), r#""signature""#);
    }

    #[test]
    fn test_choice_classification() {
        assert!(FieldType::Radio.is_choice());
        assert!(!FieldType::Radio.is_multi_valued());
        assert!(FieldType::CheckboxGroup.is_multi_valued());
        assert!(!FieldType::Text.is_choice());
    }

    #[test]
    fn test_table_identity_prefers_model_identifier() {
        let mut sheet = SheetDefinition {
            id: 1,
            section_id: 1,
            name: "bidders".into(),
            kind: SheetKind::DynamicTable,
            display_order: 0,
            model_identifier: Some("bidder_list".into()),
            chapter_asset_id: None,
        };
        assert_eq!(sheet.table_identity(), "bidder_list");
        sheet.model_identifier = None;
        assert_eq!(sheet.table_identity(), "bidders");
    }
}
