//! Composition Diagnostics
//!
//! Conditions that degrade one chapter or one placeholder. They never stop a
//! composition; they are reported next to the output for template authors.

use serde::{Deserialize, Serialize};

use crate::templates::ChapterId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCode {
    FragmentUnreadable,
    TablePlaceholderAbsent,
    PlaceholderUnresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub chapter: Option<ChapterId>,
    #[serde(default)]
    pub remediation: Vec<String>,
}

impl Diagnostic {
    pub fn fragment_unreadable(chapter: ChapterId, filename: &str, reason: &str) -> Self {
        Self {
            code: DiagnosticCode::FragmentUnreadable,
            severity: Severity::Warning,
            message: format!("Chapter '{}' could not be read: {}", filename, reason),
            chapter: Some(chapter),
            remediation: vec!["Re-upload the chapter document".to_string()],
        }
    }

    pub fn table_placeholder_absent(chapter: ChapterId, token: &str, sheet_name: &str) -> Self {
        Self {
            code: DiagnosticCode::TablePlaceholderAbsent,
            severity: Severity::Warning,
            message: format!("No {} slot found for sheet '{}'; its rows were not rendered", token, sheet_name),
            chapter: Some(chapter),
            remediation: vec![format!("Add {} on its own line in the chapter", token)],
        }
    }

    pub fn placeholder_unresolved(chapter: ChapterId, name: &str) -> Self {
        Self {
            code: DiagnosticCode::PlaceholderUnresolved,
            severity: Severity::Info,
            message: format!("Placeholder {{{{{}}}}} has no matching field and was left as is", name),
            chapter: Some(chapter),
            remediation: vec!["Check the field name or remove the placeholder".to_string()],
        }
    }
}
