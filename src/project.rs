//! Project Data - Per-project values filled against a template version

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::templates::SheetId;

pub type ProjectId = i64;

/// One dynamic-table entry, keyed by field name in entry order.
pub type Record = IndexMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub number: String,
    /// Name of the template the project is filled against
    pub template_name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Filename offered for the composed document.
    pub fn export_filename(&self) -> String {
        let safe: String = self
            .name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
            .collect();
        let safe = safe.trim_end();
        if safe.is_empty() {
            format!("project_{}_export.docx", self.id)
        } else {
            format!("{}_export.docx", safe)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixedFormValue {
    pub project_id: ProjectId,
    pub sheet_id: SheetId,
    pub field_name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DynamicTableRow {
    pub project_id: ProjectId,
    pub sheet_id: SheetId,
    pub record: Record,
    #[serde(default)]
    pub display_order: i32,
}

/// A record whose every value is blank carries no data.
pub fn is_blank_record(record: &Record) -> bool {
    record.values().all(|v| v.trim().is_empty())
}
