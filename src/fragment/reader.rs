//! `.docx` reading: zip container and the main document part

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::PrefixDeclaration;
use quick_xml::Reader;
use zip::ZipArchive;

use super::{Block, Document, Embedded, FragmentError, Paragraph, Run, Table, TableCell, TableRow};

/// Every file part of the package, keyed by its path inside the archive.
pub(crate) fn read_parts(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, FragmentError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut parts = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        parts.insert(name, buf);
    }
    Ok(parts)
}

/// Parse `word/document.xml` into blocks and runs.
pub fn read_document_xml(xml: &str) -> Result<Document, FragmentError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text_start = false;
    reader.config_mut().trim_text_end = false;

    let mut parser = BodyParser::new(xml);
    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(xml_error)?;
        let end = reader.buffer_position() as usize;
        match event {
            Event::Start(e) => parser.open(&e, start..end, false)?,
            Event::Empty(e) => {
                parser.open(&e, start..end, true)?;
                parser.close(end)?;
            }
            Event::End(_) => parser.close(end)?,
            Event::Text(t) if parser.in_text => {
                let text = t.unescape().map_err(xml_error)?;
                parser.push_text(&text);
            }
            Event::CData(c) if parser.in_text => {
                parser.push_text(&String::from_utf8_lossy(&c));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !parser.path.is_empty() {
        return Err(FragmentError::Xml("unexpected end of document".into()));
    }
    Ok(parser.doc)
}

pub(super) fn xml_error(err: impl std::fmt::Display) -> FragmentError {
    FragmentError::Xml(err.to_string())
}

/// Paragraph children whose runs are read as the paragraph's own. The
/// wrapper itself is not kept.
const FLATTENED: &[&[u8]] = &[b"ins", b"moveTo", b"smartTag", b"sdt", b"customXml", b"dir", b"bdo", b"proofErr"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    ParagraphProps,
    RunProps,
    TableProps,
    TableGrid,
    RowProps,
    CellProps,
    Section,
    /// Non-text run child, kept whole
    Embedded,
    /// Paragraph child outside any run, kept whole
    Standalone,
}

impl Capture {
    /// Elements inside are copied, not interpreted.
    fn is_verbatim(self) -> bool {
        matches!(self, Capture::Embedded | Capture::Standalone)
    }
}

enum Container {
    Table(Table),
    Row(TableRow),
    Cell(TableCell),
}

struct BodyParser<'a> {
    source: &'a str,
    doc: Document,
    /// Local names of the open elements
    path: Vec<Vec<u8>>,
    containers: Vec<Container>,
    paragraph: Option<Paragraph>,
    run: Option<Run>,
    /// Start tag of the open hyperlink
    link: Option<String>,
    in_text: bool,
    /// Kind, start offset and depth of the element being captured
    capture: Option<(Capture, usize, usize)>,
}

impl<'a> BodyParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            doc: Document::new(),
            path: vec![],
            containers: vec![],
            paragraph: None,
            run: None,
            link: None,
            in_text: false,
            capture: None,
        }
    }

    fn parent(&self) -> &[u8] {
        self.path.last().map_or(&[], Vec::as_slice)
    }

    fn grandparent(&self) -> &[u8] {
        if self.path.len() < 2 {
            return &[];
        }
        &self.path[self.path.len() - 2]
    }

    fn begin_capture(&mut self, kind: Capture, start: usize) {
        if self.capture.is_none() {
            self.capture = Some((kind, start, self.path.len()));
        }
    }

    fn open(&mut self, e: &BytesStart, span: Range<usize>, empty: bool) -> Result<(), FragmentError> {
        let name = e.local_name().as_ref().to_vec();
        if matches!(self.capture, Some((kind, _, _)) if kind.is_verbatim()) {
            self.path.push(name);
            return Ok(());
        }
        let parent = self.parent().to_vec();
        let line_break = name == b"br" && is_line_break(e)?;

        match name.as_slice() {
            b"document" if self.path.is_empty() => self.read_namespaces(e)?,
            // Only reachable for malformed input; text boxes are captured with their run.
            b"p" if self.paragraph.is_some() => self.begin_capture(Capture::Standalone, span.start),
            b"p" => self.paragraph = Some(Paragraph::default()),
            b"pPr" if parent == b"p" => self.begin_capture(Capture::ParagraphProps, span.start),
            b"pStyle" if parent == b"pPr" => {
                let style = attr_value(e, b"val")?;
                if let Some(p) = self.paragraph.as_mut() {
                    p.style = style;
                }
            }
            b"jc" if parent == b"pPr" => {
                let alignment = attr_value(e, b"val")?;
                if let Some(p) = self.paragraph.as_mut() {
                    p.alignment = alignment;
                }
            }
            b"hyperlink" if parent == b"p" && !empty => self.link = Some(self.source[span].to_string()),
            b"r" if self.paragraph.is_some() => self.run = Some(Run { link: self.link.clone(), ..Run::default() }),
            _ if parent == b"p" && !FLATTENED.contains(&name.as_slice()) => {
                self.begin_capture(Capture::Standalone, span.start)
            }
            b"rPr" if parent == b"r" => self.begin_capture(Capture::RunProps, span.start),
            _ if parent == b"rPr" && self.grandparent() == b"r" => self.read_run_property(&name, e)?,
            b"t" if parent == b"r" => self.in_text = true,
            b"tab" if parent == b"r" => self.push_text("\t"),
            b"cr" if parent == b"r" => self.push_text("\n"),
            b"br" if parent == b"r" && line_break => self.push_text("\n"),
            // Layout cache written by Word; regenerated on open.
            b"lastRenderedPageBreak" if parent == b"r" => {}
            _ if parent == b"r" => self.begin_capture(Capture::Embedded, span.start),
            b"tbl" => self.containers.push(Container::Table(Table::default())),
            b"tblPr" if parent == b"tbl" => self.begin_capture(Capture::TableProps, span.start),
            b"tblStyle" if parent == b"tblPr" => {
                let style = attr_value(e, b"val")?;
                if let Some(Container::Table(t)) = self.containers.last_mut() {
                    t.style = style;
                }
            }
            b"tblGrid" if parent == b"tbl" => self.begin_capture(Capture::TableGrid, span.start),
            b"tr" => self.containers.push(Container::Row(TableRow::default())),
            b"trPr" if parent == b"tr" => self.begin_capture(Capture::RowProps, span.start),
            b"tc" => self.containers.push(Container::Cell(TableCell::default())),
            b"tcPr" if parent == b"tc" => self.begin_capture(Capture::CellProps, span.start),
            b"sectPr" if parent == b"body" => self.begin_capture(Capture::Section, span.start),
            _ => {}
        }

        self.path.push(name);
        Ok(())
    }

    fn close(&mut self, end: usize) -> Result<(), FragmentError> {
        let name = self.path.pop().ok_or_else(|| xml_error("unbalanced end tag"))?;

        if let Some((kind, start, depth)) = self.capture {
            if self.path.len() == depth {
                self.capture = None;
                let raw = self.source[start..end].to_string();
                self.store_capture(kind, raw);
                return Ok(());
            }
            if kind.is_verbatim() {
                return Ok(());
            }
        }

        match name.as_slice() {
            b"t" => self.in_text = false,
            b"r" => {
                if let (Some(run), Some(p)) = (self.run.take(), self.paragraph.as_mut()) {
                    if !run.text.is_empty() {
                        p.runs.push(run);
                    }
                }
            }
            b"hyperlink" => self.link = None,
            b"p" => {
                let paragraph = self.paragraph.take().ok_or_else(|| xml_error("unbalanced paragraph"))?;
                self.place_block(Block::Paragraph(paragraph));
            }
            b"tbl" => match self.containers.pop() {
                Some(Container::Table(table)) => self.place_block(Block::Table(table)),
                _ => return Err(xml_error("unbalanced table")),
            },
            b"tr" => match (self.containers.pop(), self.containers.last_mut()) {
                (Some(Container::Row(row)), Some(Container::Table(table))) => table.rows.push(row),
                _ => return Err(xml_error("table row outside table")),
            },
            b"tc" => match (self.containers.pop(), self.containers.last_mut()) {
                (Some(Container::Cell(cell)), Some(Container::Row(row))) => row.cells.push(cell),
                _ => return Err(xml_error("table cell outside row")),
            },
            _ => {}
        }
        Ok(())
    }

    fn store_capture(&mut self, kind: Capture, raw: String) {
        match kind {
            Capture::ParagraphProps => {
                if let Some(p) = self.paragraph.as_mut() {
                    p.raw_properties = Some(raw);
                }
            }
            Capture::RunProps => {
                if let Some(run) = self.run.as_mut() {
                    run.format.raw = Some(raw);
                }
            }
            Capture::TableProps | Capture::TableGrid => {
                if let Some(Container::Table(t)) = self.containers.last_mut() {
                    if kind == Capture::TableProps {
                        t.raw_properties = Some(raw);
                    } else {
                        t.raw_grid = Some(raw);
                    }
                }
            }
            Capture::RowProps => {
                if let Some(Container::Row(r)) = self.containers.last_mut() {
                    r.raw_properties = Some(raw);
                }
            }
            Capture::CellProps => {
                if let Some(Container::Cell(c)) = self.containers.last_mut() {
                    c.raw_properties = Some(raw);
                }
            }
            Capture::Section => self.doc.section_properties = Some(raw),
            // Text read so far becomes its own run, so the run splits
            // around the embedded element with the same formatting.
            Capture::Embedded => {
                let (Some(run), Some(p)) = (self.run.as_mut(), self.paragraph.as_mut()) else { return };
                let object = Run {
                    format: run.format.clone(),
                    text: String::new(),
                    embedded: Some(Embedded::Inline(raw)),
                    link: run.link.clone(),
                };
                let text = std::mem::take(&mut run.text);
                if !text.is_empty() {
                    p.runs.push(Run { text, embedded: None, ..object.clone() });
                }
                p.runs.push(object);
            }
            Capture::Standalone => {
                if let Some(p) = self.paragraph.as_mut() {
                    p.runs.push(Run { embedded: Some(Embedded::Standalone(raw)), ..Run::default() });
                }
            }
        }
    }

    fn place_block(&mut self, block: Block) {
        match self.containers.last_mut() {
            Some(Container::Cell(cell)) => cell.blocks.push(block),
            Some(_) => {}
            None => self.doc.blocks.push(block),
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(run) = self.run.as_mut() {
            run.text.push_str(text);
        }
    }

    fn read_namespaces(&mut self, e: &BytesStart) -> Result<(), FragmentError> {
        for attr in e.attributes() {
            let attr = attr.map_err(xml_error)?;
            if let Some(PrefixDeclaration::Named(prefix)) = attr.key.as_namespace_binding() {
                let uri = attr.unescape_value().map_err(xml_error)?.into_owned();
                self.doc.namespaces.insert(String::from_utf8_lossy(prefix).into_owned(), uri);
            }
        }
        Ok(())
    }

    fn read_run_property(&mut self, name: &[u8], e: &BytesStart) -> Result<(), FragmentError> {
        let val = attr_value(e, b"val")?;
        let Some(run) = self.run.as_mut() else { return Ok(()) };
        let format = &mut run.format;
        match name {
            b"b" => format.bold = is_on(val.as_deref()),
            b"i" => format.italic = is_on(val.as_deref()),
            b"strike" => format.strike = is_on(val.as_deref()),
            b"u" => format.underline = val.filter(|v| v != "none").or_else(|| Some("single".into())),
            b"sz" => format.size = val.and_then(|v| v.parse().ok()),
            b"color" => format.color = val.filter(|v| v != "auto"),
            b"highlight" => format.highlight = val.filter(|v| v != "none"),
            b"rFonts" => {
                format.font = match attr_value(e, b"ascii")? {
                    Some(font) => Some(font),
                    None => attr_value(e, b"eastAsia")?,
                };
            }
            _ => {}
        }
        Ok(())
    }
}

/// Plain line breaks read as `\n`; page and column breaks are embedded.
fn is_line_break(e: &BytesStart) -> Result<bool, FragmentError> {
    let kind = attr_value(e, b"type")?;
    Ok(matches!(kind.as_deref(), None | Some("textWrapping")) && attr_value(e, b"clear")?.is_none())
}

/// OOXML on/off property: absent `val` means on.
fn is_on(val: Option<&str>) -> bool {
    !matches!(val, Some("0") | Some("false") | Some("off"))
}

fn attr_value(e: &BytesStart, local: &[u8]) -> Result<Option<String>, FragmentError> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.local_name().as_ref() == local {
            let value = attr.unescape_value().map_err(xml_error)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
