//! Fragment Model - Word documents as explicit block/run lists
//!
//! A fragment is read from a `.docx` package into ordered blocks
//! (paragraphs and tables). Each paragraph is an ordered list of runs, a run
//! being one stretch of text with one formatting. Property elements read
//! from a source package are kept verbatim so re-written output carries the
//! original formatting, and so is every run child that is not text:
//! drawings, text boxes, field characters, note references, page breaks.

mod merge;
mod reader;
mod writer;

use std::collections::BTreeMap;

use thiserror::Error;

pub use reader::read_document_xml;
pub use writer::write_document_xml;

pub const MAIN_NAMESPACE: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const REL_NAMESPACE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Missing package part: {0}")]
    MissingPart(String),

    #[error("Malformed document XML: {0}")]
    Xml(String),

    #[error("Document part is not UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Character formatting of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: Option<String>,
    pub strike: bool,
    pub font: Option<String>,
    /// Half-points, as stored in `w:sz`
    pub size: Option<u32>,
    pub color: Option<String>,
    pub highlight: Option<String>,
    /// `w:rPr` exactly as read; written back instead of the fields above
    pub raw: Option<String>,
}

impl RunFormat {
    pub fn bold() -> Self {
        Self { bold: true, ..Self::default() }
    }

    pub fn italic() -> Self {
        Self { italic: true, ..Self::default() }
    }
}

/// Source XML a run carries instead of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embedded {
    /// Child of `w:r`: drawing, field character, note reference, page break
    Inline(String),
    /// Paragraph child outside any run: bookmark, math, simple field, deletion
    Standalone(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Run {
    pub format: RunFormat,
    pub text: String,
    /// Runs with embedded content have no text
    pub embedded: Option<Embedded>,
    /// Start tag of the enclosing `w:hyperlink`, verbatim
    pub link: Option<String>,
}

impl Run {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    pub fn formatted(text: impl Into<String>, format: RunFormat) -> Self {
        Self { format, text: text.into(), ..Self::default() }
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded.is_some()
    }
}

/// Text as a part may hold it: line endings folded to `\n`, characters
/// XML 1.0 forbids removed.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .filter_map(|c| match c {
            '\r' => Some('\n'),
            '\t' | '\n' => Some(c),
            '\u{FFFE}' | '\u{FFFF}' => None,
            c if (c as u32) < 0x20 => None,
            c => Some(c),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    pub style: Option<String>,
    pub alignment: Option<String>,
    /// `w:pPr` exactly as read
    pub raw_properties: Option<String>,
    pub runs: Vec<Run>,
}

impl Paragraph {
    pub fn new(text: impl Into<String>) -> Self {
        Self { runs: vec![Run::new(text)], ..Self::default() }
    }

    pub fn from_runs(runs: Vec<Run>) -> Self {
        Self { runs, ..Self::default() }
    }

    pub fn with_style(mut self, style: &str) -> Self {
        self.style = Some(style.to_string());
        self
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// Remove all text while keeping paragraph properties and embedded
    /// content such as bookmarks.
    pub fn clear(&mut self) {
        self.runs.retain(Run::is_embedded);
    }

    /// Heading level from the paragraph style, if it names one.
    pub fn heading_level(&self) -> Option<u8> {
        let style = self.style.as_deref()?.to_ascii_lowercase().replace(' ', "");
        if style == "title" {
            return Some(1);
        }
        let level = style.strip_prefix("heading")?.parse::<u8>().ok()?;
        (1..=6).contains(&level).then_some(level)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCell {
    pub raw_properties: Option<String>,
    pub blocks: Vec<Block>,
}

impl TableCell {
    pub fn text(text: impl Into<String>) -> Self {
        Self { raw_properties: None, blocks: vec![Block::Paragraph(Paragraph::new(text))] }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRow {
    pub raw_properties: Option<String>,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub style: Option<String>,
    /// Emit single-line borders when properties are synthesized
    pub borders: bool,
    pub raw_properties: Option<String>,
    pub raw_grid: Option<String>,
    pub rows: Vec<TableRow>,
}

impl Table {
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(|r| r.cells.len()).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
}

/// Body of a word-processing document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// Namespace declarations of the root element, prefix -> uri
    pub namespaces: BTreeMap<String, String>,
    pub blocks: Vec<Block>,
    /// Body-level `w:sectPr`, verbatim
    pub section_properties: Option<String>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_paragraph(&mut self, paragraph: Paragraph) {
        self.blocks.push(Block::Paragraph(paragraph));
    }

    /// Append another document's blocks, keeping this document's section
    /// properties. Namespaces declared only by `other` are carried over.
    pub fn append(&mut self, other: Document) {
        for (prefix, uri) in other.namespaces {
            self.namespaces.entry(prefix).or_insert(uri);
        }
        self.blocks.extend(other.blocks);
    }

    /// Visit every paragraph: body paragraphs and those inside table cells.
    pub fn for_each_paragraph_mut(&mut self, f: &mut impl FnMut(&mut Paragraph)) {
        visit_blocks_mut(&mut self.blocks, f);
    }

    pub fn for_each_paragraph(&self, f: &mut impl FnMut(&Paragraph)) {
        visit_blocks(&self.blocks, f);
    }

    /// Visit every verbatim XML slice of the blocks. Section properties are
    /// not visited.
    pub fn for_each_raw_mut(&mut self, f: &mut impl FnMut(&mut String)) {
        visit_raw_mut(&mut self.blocks, f);
    }

    /// Paragraph texts in reading order, one per line.
    pub fn text(&self) -> String {
        let mut lines = vec![];
        self.for_each_paragraph(&mut |p| lines.push(p.text()));
        lines.join("\n")
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Table(t) => Some(t),
            Block::Paragraph(_) => None,
        })
    }
}

fn visit_blocks_mut(blocks: &mut [Block], f: &mut impl FnMut(&mut Paragraph)) {
    for block in blocks {
        match block {
            Block::Paragraph(p) => f(p),
            Block::Table(t) => {
                for row in &mut t.rows {
                    for cell in &mut row.cells {
                        visit_blocks_mut(&mut cell.blocks, f);
                    }
                }
            }
        }
    }
}

fn visit_raw_mut(blocks: &mut [Block], f: &mut impl FnMut(&mut String)) {
    for block in blocks {
        match block {
            Block::Paragraph(p) => {
                p.raw_properties.iter_mut().for_each(&mut *f);
                for run in &mut p.runs {
                    run.format.raw.iter_mut().for_each(&mut *f);
                    run.link.iter_mut().for_each(&mut *f);
                    match &mut run.embedded {
                        Some(Embedded::Inline(raw)) | Some(Embedded::Standalone(raw)) => f(raw),
                        None => {}
                    }
                }
            }
            Block::Table(t) => {
                t.raw_properties.iter_mut().for_each(&mut *f);
                t.raw_grid.iter_mut().for_each(&mut *f);
                for row in &mut t.rows {
                    row.raw_properties.iter_mut().for_each(&mut *f);
                    for cell in &mut row.cells {
                        cell.raw_properties.iter_mut().for_each(&mut *f);
                        visit_raw_mut(&mut cell.blocks, f);
                    }
                }
            }
        }
    }
}

fn visit_blocks(blocks: &[Block], f: &mut impl FnMut(&Paragraph)) {
    for block in blocks {
        match block {
            Block::Paragraph(p) => f(p),
            Block::Table(t) => {
                for row in &t.rows {
                    for cell in &row.cells {
                        visit_blocks(&cell.blocks, f);
                    }
                }
            }
        }
    }
}

/// A `.docx` package: the parsed main document plus every other part as bytes.
#[derive(Debug, Clone)]
pub struct Package {
    pub document: Document,
    parts: BTreeMap<String, Vec<u8>>,
}

impl Package {
    /// A fresh package with minimal styles around `document`.
    pub fn new(document: Document) -> Self {
        Self { document, parts: writer::default_parts() }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FragmentError> {
        let mut parts = reader::read_parts(bytes)?;
        let xml = parts
            .remove(DOCUMENT_PART)
            .ok_or_else(|| FragmentError::MissingPart(DOCUMENT_PART.to_string()))?;
        let document = read_document_xml(&String::from_utf8(xml)?)?;
        Ok(Self { document, parts })
    }

    /// Append another package's body after this one's, carrying over the
    /// styles, list definitions, notes and media it refers to.
    pub fn append(&mut self, other: Package) {
        merge::append_package(self, other);
    }

    /// Raw bytes of a part other than the main document.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts.get(name).map(Vec::as_slice)
    }

    /// Add or replace a part other than the main document.
    pub fn insert_part(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.parts.insert(name.into(), bytes.into());
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FragmentError> {
        writer::write_package(&self.parts, &self.document)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }
}
