//! `.docx` writing: main document XML and the zip container

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{Cursor, Write};

use quick_xml::escape::escape;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{
    normalize_text, Block, Document, Embedded, FragmentError, Paragraph, Run, RunFormat, Table, TableCell, DOCUMENT_PART,
    MAIN_NAMESPACE, REL_NAMESPACE,
};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:rPr><w:b/><w:sz w:val="32"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:rPr><w:b/><w:sz w:val="28"/></w:rPr></w:style><w:style w:type="table" w:default="1" w:styleId="TableNormal"><w:name w:val="Normal Table"/></w:style><w:style w:type="table" w:styleId="TableGrid"><w:name w:val="Table Grid"/><w:basedOn w:val="TableNormal"/><w:tblPr><w:tblBorders><w:top w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:left w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:bottom w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:right w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideH w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideV w:val="single" w:sz="4" w:space="0" w:color="auto"/></w:tblBorders></w:tblPr></w:style></w:styles>"#;

const BORDERS: &str = r#"<w:tblBorders><w:top w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:left w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:bottom w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:right w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideH w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideV w:val="single" w:sz="4" w:space="0" w:color="auto"/></w:tblBorders>"#;

/// Parts of a minimal package, minus the main document.
pub(crate) fn default_parts() -> BTreeMap<String, Vec<u8>> {
    [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", PACKAGE_RELS),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS),
        ("word/styles.xml", STYLES),
    ]
    .into_iter()
    .map(|(name, body)| (name.to_string(), body.as_bytes().to_vec()))
    .collect()
}

pub(crate) fn write_package(parts: &BTreeMap<String, Vec<u8>>, document: &Document) -> Result<Vec<u8>, FragmentError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // Content types conventionally lead the archive.
    let mut names: Vec<&String> = parts.keys().collect();
    names.sort_by_key(|name| name.as_str() != "[Content_Types].xml");

    for name in names {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&parts[name])?;
    }
    zip.start_file(DOCUMENT_PART, options)?;
    zip.write_all(write_document_xml(document).as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

/// Serialize a document body as `word/document.xml`.
pub fn write_document_xml(document: &Document) -> String {
    let mut namespaces = document.namespaces.clone();
    namespaces.entry("w".into()).or_insert_with(|| MAIN_NAMESPACE.into());
    namespaces.entry("r".into()).or_insert_with(|| REL_NAMESPACE.into());

    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push_str("\n<w:document");
    for (prefix, uri) in &namespaces {
        let _ = write!(out, r#" xmlns:{}="{}""#, prefix, escape(uri.as_str()));
    }
    out.push_str("><w:body>");
    write_blocks(&mut out, &document.blocks);
    if let Some(sect) = &document.section_properties {
        out.push_str(sect);
    }
    out.push_str("</w:body></w:document>");
    out
}

fn write_blocks(out: &mut String, blocks: &[Block]) {
    for block in blocks {
        match block {
            Block::Paragraph(p) => write_paragraph(out, p),
            Block::Table(t) => write_table(out, t),
        }
    }
}

fn write_paragraph(out: &mut String, p: &Paragraph) {
    out.push_str("<w:p>");
    match &p.raw_properties {
        Some(raw) => out.push_str(raw),
        None if p.style.is_some() || p.alignment.is_some() => {
            out.push_str("<w:pPr>");
            if let Some(style) = &p.style {
                let _ = write!(out, r#"<w:pStyle w:val="{}"/>"#, escape(style.as_str()));
            }
            if let Some(jc) = &p.alignment {
                let _ = write!(out, r#"<w:jc w:val="{}"/>"#, escape(jc.as_str()));
            }
            out.push_str("</w:pPr>");
        }
        None => {}
    }
    // Consecutive runs sharing a start tag go back into one hyperlink.
    let mut open_link: Option<&str> = None;
    for run in &p.runs {
        let link = run.link.as_deref();
        if link != open_link {
            if let Some(tag) = open_link {
                out.push_str(&closing_tag(tag));
            }
            if let Some(tag) = link {
                out.push_str(tag);
            }
            open_link = link;
        }
        write_run(out, run);
    }
    if let Some(tag) = open_link {
        out.push_str(&closing_tag(tag));
    }
    out.push_str("</w:p>");
}

fn closing_tag(start_tag: &str) -> String {
    let name: String = start_tag
        .trim_start_matches('<')
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
        .collect();
    format!("</{}>", name)
}

fn write_run(out: &mut String, run: &Run) {
    if let Some(Embedded::Standalone(raw)) = &run.embedded {
        out.push_str(raw);
        return;
    }
    out.push_str("<w:r>");
    match &run.format.raw {
        Some(raw) => out.push_str(raw),
        None => write_run_properties(out, &run.format),
    }
    if let Some(Embedded::Inline(raw)) = &run.embedded {
        out.push_str(raw);
    }
    for (i, line) in normalize_text(&run.text).split('\n').enumerate() {
        if i > 0 {
            out.push_str("<w:br/>");
        }
        for (j, piece) in line.split('\t').enumerate() {
            if j > 0 {
                out.push_str("<w:tab/>");
            }
            if !piece.is_empty() {
                let _ = write!(out, r#"<w:t xml:space="preserve">{}</w:t>"#, escape(piece));
            }
        }
    }
    out.push_str("</w:r>");
}

fn write_run_properties(out: &mut String, f: &RunFormat) {
    if *f == RunFormat::default() {
        return;
    }
    out.push_str("<w:rPr>");
    if let Some(font) = &f.font {
        let font = escape(font.as_str());
        let _ = write!(out, r#"<w:rFonts w:ascii="{0}" w:hAnsi="{0}" w:eastAsia="{0}"/>"#, font);
    }
    if f.bold {
        out.push_str("<w:b/>");
    }
    if f.italic {
        out.push_str("<w:i/>");
    }
    if f.strike {
        out.push_str("<w:strike/>");
    }
    if let Some(color) = &f.color {
        let _ = write!(out, r#"<w:color w:val="{}"/>"#, escape(color.as_str()));
    }
    if let Some(size) = f.size {
        let _ = write!(out, r#"<w:sz w:val="{}"/>"#, size);
    }
    if let Some(highlight) = &f.highlight {
        let _ = write!(out, r#"<w:highlight w:val="{}"/>"#, escape(highlight.as_str()));
    }
    if let Some(u) = &f.underline {
        let _ = write!(out, r#"<w:u w:val="{}"/>"#, escape(u.as_str()));
    }
    out.push_str("</w:rPr>");
}

fn write_table(out: &mut String, t: &Table) {
    out.push_str("<w:tbl>");
    match &t.raw_properties {
        Some(raw) => out.push_str(raw),
        None => {
            out.push_str("<w:tblPr>");
            if let Some(style) = &t.style {
                let _ = write!(out, r#"<w:tblStyle w:val="{}"/>"#, escape(style.as_str()));
            }
            out.push_str(r#"<w:tblW w:w="0" w:type="auto"/>"#);
            if t.borders {
                out.push_str(BORDERS);
            }
            out.push_str("</w:tblPr>");
        }
    }
    match &t.raw_grid {
        Some(raw) => out.push_str(raw),
        None => {
            out.push_str("<w:tblGrid>");
            for _ in 0..t.column_count() {
                out.push_str("<w:gridCol/>");
            }
            out.push_str("</w:tblGrid>");
        }
    }
    for row in &t.rows {
        out.push_str("<w:tr>");
        if let Some(raw) = &row.raw_properties {
            out.push_str(raw);
        }
        for cell in &row.cells {
            write_cell(out, cell);
        }
        out.push_str("</w:tr>");
    }
    out.push_str("</w:tbl>");
}

fn write_cell(out: &mut String, cell: &TableCell) {
    out.push_str("<w:tc>");
    match &cell.raw_properties {
        Some(raw) => out.push_str(raw),
        None => out.push_str(r#"<w:tcPr><w:tcW w:w="0" w:type="auto"/></w:tcPr>"#),
    }
    write_blocks(out, &cell.blocks);
    // A cell must end with a paragraph.
    if !matches!(cell.blocks.last(), Some(Block::Paragraph(_))) {
        out.push_str("<w:p/>");
    }
    out.push_str("</w:tc>");
}
