//! Table Injection - dynamic-table slots become real tables

use serde::{Deserialize, Serialize};

use crate::fragment::{Block, Document, Table, TableCell, TableRow};
use crate::project::Record;
use crate::templates::FieldDefinition;

/// One column of an injected table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Record key
    pub name: String,
    /// Header text
    pub label: String,
}

impl Column {
    pub fn new(name: &str, label: &str) -> Self {
        Self { name: name.to_string(), label: label.to_string() }
    }
}

impl From<&FieldDefinition> for Column {
    fn from(field: &FieldDefinition) -> Self {
        Self::new(&field.name, &field.label)
    }
}

/// Build a header row plus one row per record. Missing keys render empty.
pub fn build_table(records: &[Record], columns: &[Column], style: &str) -> Table {
    let header = TableRow {
        raw_properties: None,
        cells: columns.iter().map(|c| TableCell::text(c.label.as_str())).collect(),
    };
    let rows = records.iter().map(|record| TableRow {
        raw_properties: None,
        cells: columns
            .iter()
            .map(|c| TableCell::text(record.get(&c.name).map_or("", String::as_str)))
            .collect(),
    });

    Table {
        style: (!style.is_empty()).then(|| style.to_string()),
        borders: true,
        raw_properties: None,
        raw_grid: None,
        rows: std::iter::once(header).chain(rows).collect(),
    }
}

/// Replace the first body paragraph containing `placeholder` with a table.
///
/// The paragraph's text is cleared and the table is placed right after it.
/// With no records the table still carries its header row. Returns false
/// when no paragraph holds the placeholder.
pub fn inject_table(
    document: &mut Document,
    placeholder: &str,
    records: &[Record],
    columns: &[Column],
    style: &str,
) -> bool {
    let position = document.blocks.iter().position(|block| match block {
        Block::Paragraph(p) => p.text().contains(placeholder),
        Block::Table(_) => false,
    });
    let Some(index) = position else { return false };

    if let Block::Paragraph(p) = &mut document.blocks[index] {
        p.clear();
    }
    document
        .blocks
        .insert(index + 1, Block::Table(build_table(records, columns, style)));
    true
}
