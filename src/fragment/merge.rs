//! Package merging for appended chapters
//!
//! An appended body keeps what it refers to: styles the base lacks, list
//! definitions, footnotes and endnotes, and the relationships behind
//! hyperlinks and embedded media. Ids taken from the appended package are
//! renumbered into the base's id space and rewritten in its body.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::OnceLock;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::PrefixDeclaration;
use quick_xml::Reader;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use super::reader::xml_error;
use super::{FragmentError, Package};

pub(super) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub(super) const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";

const EMPTY_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;

const REL_TYPE_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/";

/// Relationship types whose target part is copied along with the body.
const MEDIA_TYPES: &[&str] = &["image", "media", "video", "audio", "oleObject", "package", "hdphoto"];

struct PartKind {
    /// Last segment of the relationship type
    rel: &'static str,
    content_type: &'static str,
    default_path: &'static str,
}

const STYLES: PartKind = PartKind {
    rel: "styles",
    content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml",
    default_path: "word/styles.xml",
};

const NUMBERING: PartKind = PartKind {
    rel: "numbering",
    content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml",
    default_path: "word/numbering.xml",
};

const FOOTNOTES: PartKind = PartKind {
    rel: "footnotes",
    content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.footnotes+xml",
    default_path: "word/footnotes.xml",
};

const ENDNOTES: PartKind = PartKind {
    rel: "endnotes",
    content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.endnotes+xml",
    default_path: "word/endnotes.xml",
};

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("merge pattern is valid"))
}

fn num_ref_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    pattern(&P, r#"(<(?:\w+:)?numId\s+(?:\w+:)?val=")([^"]*)(")"#)
}

fn abstract_ref_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    pattern(&P, r#"(<(?:\w+:)?abstractNumId\s+(?:\w+:)?val=")([^"]*)(")"#)
}

fn abstract_attr_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    pattern(&P, r#"(\s(?:\w+:)?abstractNumId=")([^"]*)(")"#)
}

fn num_attr_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    pattern(&P, r#"(\s(?:\w+:)?numId=")([^"]*)(")"#)
}

fn id_attr_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    pattern(&P, r#"(\s(?:\w+:)?id=")([^"]*)(")"#)
}

fn footnote_ref_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    pattern(&P, r#"(<(?:\w+:)?footnoteReference\b[^>]*?\s(?:\w+:)?id=")([^"]*)(")"#)
}

fn endnote_ref_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    pattern(&P, r#"(<(?:\w+:)?endnoteReference\b[^>]*?\s(?:\w+:)?id=")([^"]*)(")"#)
}

fn rel_ref_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    pattern(&P, r#"(\br:(?:id|embed|link|pict|dm|lo|qs|cs)=")([^"]*)(")"#)
}

/// Old id to new id, per id space.
#[derive(Debug, Default)]
struct IdMaps {
    numbering: HashMap<String, String>,
    footnotes: HashMap<String, String>,
    endnotes: HashMap<String, String>,
    relationships: HashMap<String, String>,
}

impl IdMaps {
    fn apply(&self, raw: &str) -> String {
        let raw = remap(num_ref_pattern(), raw, &self.numbering);
        let raw = remap(footnote_ref_pattern(), &raw, &self.footnotes);
        let raw = remap(endnote_ref_pattern(), &raw, &self.endnotes);
        remap(rel_ref_pattern(), &raw, &self.relationships)
    }
}

/// Rewrite group 2 of every match found in `map`.
fn remap(pattern: &Regex, text: &str, map: &HashMap<String, String>) -> String {
    if map.is_empty() {
        return text.to_string();
    }
    pattern
        .replace_all(text, |caps: &Captures| {
            let id = &caps[2];
            format!("{}{}{}", &caps[1], map.get(id).map_or(id, String::as_str), &caps[3])
        })
        .into_owned()
}

/// Set group 2 of the first match to `value`.
fn set_first(pattern: &Regex, text: &str, value: &str) -> String {
    pattern
        .replacen(text, 1, |caps: &Captures| format!("{}{}{}", &caps[1], value, &caps[3]))
        .into_owned()
}

pub(super) fn append_package(base: &mut Package, mut other: Package) {
    let mut referenced = HashSet::new();
    other.document.for_each_raw_mut(&mut |raw| {
        referenced.extend(rel_ref_pattern().captures_iter(raw.as_str()).map(|c| c[2].to_string()));
    });

    let mut ids = IdMaps::default();
    if let Err(e) = merge_parts(base, &other, &referenced, &mut ids) {
        warn!(error = %e, "chapter parts not fully merged; appending body as is");
    }
    other.document.for_each_raw_mut(&mut |raw| *raw = ids.apply(raw.as_str()));
    base.document.append(other.document);
}

fn merge_parts(
    base: &mut Package,
    other: &Package,
    referenced: &HashSet<String>,
    ids: &mut IdMaps,
) -> Result<(), FragmentError> {
    ids.numbering = merge_numbering(base, other)?;
    merge_styles(base, other, &ids.numbering)?;
    ids.footnotes = merge_notes(base, other, &FOOTNOTES, "footnote")?;
    ids.endnotes = merge_notes(base, other, &ENDNOTES, "endnote")?;
    ids.relationships = merge_relationships(base, other, referenced)?;
    Ok(())
}

// --- XML outline ---

/// A direct child of the root element.
struct Child {
    name: String,
    /// Attribute local name to value
    attrs: HashMap<String, String>,
    span: Range<usize>,
}

impl Child {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Root element and its direct children, located by byte offset.
struct Outline {
    root_tag: Range<usize>,
    /// Offset of the root end tag
    root_end: usize,
    namespaces: BTreeMap<String, String>,
    children: Vec<Child>,
}

impl Outline {
    fn parse(xml: &str) -> Result<Self, FragmentError> {
        let mut reader = Reader::from_str(xml);
        let mut depth = 0usize;
        let mut root_tag = None;
        let mut root_end = None;
        let mut namespaces = BTreeMap::new();
        let mut children = vec![];
        let mut open: Option<(String, HashMap<String, String>, usize)> = None;

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader.read_event().map_err(xml_error)?;
            let end = reader.buffer_position() as usize;
            match event {
                Event::Start(e) => {
                    if depth == 0 {
                        root_tag = Some(start..end);
                        namespaces = namespace_declarations(&e)?;
                    } else if depth == 1 {
                        open = Some((local_name(&e), attributes(&e)?, start));
                    }
                    depth += 1;
                }
                Event::Empty(e) if depth == 1 => {
                    children.push(Child { name: local_name(&e), attrs: attributes(&e)?, span: start..end });
                }
                Event::End(_) => {
                    depth = depth.checked_sub(1).ok_or_else(|| xml_error("unbalanced end tag"))?;
                    if depth == 1 {
                        if let Some((name, attrs, from)) = open.take() {
                            children.push(Child { name, attrs, span: from..end });
                        }
                    } else if depth == 0 {
                        root_end = Some(start);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match (root_tag, root_end) {
            (Some(root_tag), Some(root_end)) => Ok(Self { root_tag, root_end, namespaces, children }),
            _ => Err(xml_error("part has no root element to merge into")),
        }
    }

    fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Child> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Largest numeric `attr` among `name` children.
    fn max_id(&self, name: &str, attr: &str) -> Option<i64> {
        self.named(name).filter_map(|c| c.attr(attr)?.parse().ok()).max()
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart) -> Result<HashMap<String, String>, FragmentError> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        attrs.insert(key, attr.unescape_value().map_err(xml_error)?.into_owned());
    }
    Ok(attrs)
}

fn namespace_declarations(e: &BytesStart) -> Result<BTreeMap<String, String>, FragmentError> {
    let mut namespaces = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if let Some(PrefixDeclaration::Named(prefix)) = attr.key.as_namespace_binding() {
            let uri = attr.unescape_value().map_err(xml_error)?.into_owned();
            namespaces.insert(String::from_utf8_lossy(prefix).into_owned(), uri);
        }
    }
    Ok(namespaces)
}

/// `ours` with `inserts` placed at their offsets, plus the namespace
/// declarations of `theirs` that the root of `ours` lacks.
fn rebuild(ours: &str, outline: &Outline, theirs: Option<&Outline>, mut inserts: Vec<(usize, String)>) -> String {
    let declarations: String = theirs
        .map(|t| {
            t.namespaces
                .iter()
                .filter(|(prefix, _)| !outline.namespaces.contains_key(*prefix))
                .map(|(prefix, uri)| format!(r#" xmlns:{}="{}""#, prefix, escape(uri.as_str())))
                .collect()
        })
        .unwrap_or_default();
    if !declarations.is_empty() {
        inserts.push((outline.root_tag.end - 1, declarations));
    }
    inserts.sort_by_key(|(at, _)| *at);

    let mut out = String::with_capacity(ours.len() + inserts.iter().map(|(_, s)| s.len()).sum::<usize>());
    let mut last = 0;
    for (at, text) in &inserts {
        out.push_str(&ours[last..*at]);
        out.push_str(text);
        last = *at;
    }
    out.push_str(&ours[last..]);
    out
}

// --- parts and relationships ---

fn text_part(package: &Package, path: &str) -> Result<Option<String>, FragmentError> {
    Ok(match package.parts.get(path) {
        Some(bytes) => Some(String::from_utf8(bytes.clone())?),
        None => None,
    })
}

struct Relationship {
    id: String,
    rel_type: String,
    target: String,
    external: bool,
}

fn relationships(package: &Package) -> Result<Vec<Relationship>, FragmentError> {
    let Some(xml) = text_part(package, DOCUMENT_RELS_PART)? else { return Ok(vec![]) };
    let outline = Outline::parse(&xml)?;
    Ok(outline
        .named("Relationship")
        .filter_map(|c| {
            Some(Relationship {
                id: c.attr("Id")?.to_string(),
                rel_type: c.attr("Type")?.to_string(),
                target: c.attr("Target")?.to_string(),
                external: c.attr("TargetMode") == Some("External"),
            })
        })
        .collect())
}

/// Package path of a target given relative to `word/`.
fn resolve_target(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments = vec!["word"];
    for segment in target.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Target relative to `word/` for a package path.
fn relative_target(path: &str) -> String {
    match path.strip_prefix("word/") {
        Some(relative) => relative.to_string(),
        None => format!("/{}", path),
    }
}

fn is_type(rel: &Relationship, suffix: &str) -> bool {
    rel.rel_type.rsplit('/').next() == Some(suffix)
}

/// Path and content of the part of `kind` the main document points at.
fn locate(package: &Package, kind: &PartKind) -> Result<Option<(String, String)>, FragmentError> {
    let rels = relationships(package)?;
    let Some(rel) = rels.iter().find(|r| !r.external && is_type(r, kind.rel)) else { return Ok(None) };
    let path = resolve_target(&rel.target);
    Ok(text_part(package, &path)?.map(|xml| (path, xml)))
}

fn unique_path(package: &Package, wanted: &str) -> String {
    if !package.parts.contains_key(wanted) {
        return wanted.to_string();
    }
    let (stem, ext) = match wanted.rfind('.') {
        Some(dot) if !wanted[dot..].contains('/') => (&wanted[..dot], &wanted[dot..]),
        _ => (wanted, ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{}{}{}", stem, n, ext);
        if !package.parts.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn add_relationship(base: &mut Package, rel_type: &str, target: &str, external: bool) -> Result<String, FragmentError> {
    let xml = text_part(base, DOCUMENT_RELS_PART)?.unwrap_or_else(|| EMPTY_RELS.to_string());
    let outline = Outline::parse(&xml)?;
    let taken: HashSet<&str> = outline.children.iter().filter_map(|c| c.attr("Id")).collect();
    let mut n = outline.children.len() + 1;
    let id = loop {
        let id = format!("rId{}", n);
        if !taken.contains(id.as_str()) {
            break id;
        }
        n += 1;
    };

    let mode = if external { r#" TargetMode="External""# } else { "" };
    let element = format!(
        r#"<Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
        id,
        escape(rel_type),
        escape(target),
        mode
    );
    let merged = rebuild(&xml, &outline, None, vec![(outline.root_end, element)]);
    base.parts.insert(DOCUMENT_RELS_PART.to_string(), merged.into_bytes());
    Ok(id)
}

/// Content type of a part as `package` declares it.
fn declared_content_type(package: &Package, path: &str) -> Result<Option<String>, FragmentError> {
    let Some(xml) = text_part(package, CONTENT_TYPES_PART)? else { return Ok(None) };
    let outline = Outline::parse(&xml)?;
    let part_name = format!("/{}", path);
    if let Some(o) = outline.named("Override").find(|c| c.attr("PartName") == Some(part_name.as_str())) {
        return Ok(o.attr("ContentType").map(str::to_string));
    }
    let ext = extension(path);
    let content_type = outline
        .named("Default")
        .find(|c| c.attr("Extension").is_some_and(|e| e.eq_ignore_ascii_case(&ext)))
        .and_then(|c| c.attr("ContentType").map(str::to_string));
    Ok(content_type)
}

/// Content type for a media part its package left undeclared.
fn media_content_type(path: &str) -> &'static str {
    match extension(path).as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "emf" => "image/x-emf",
        "wmf" => "image/x-wmf",
        _ => "application/octet-stream",
    }
}

fn extension(path: &str) -> String {
    path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default()
}

/// Make sure `base` declares a content type for `path`.
fn declare_content_type(base: &mut Package, path: &str, content_type: &str, as_override: bool) -> Result<(), FragmentError> {
    if declared_content_type(base, path)?.is_some() {
        return Ok(());
    }
    let Some(xml) = text_part(base, CONTENT_TYPES_PART)? else {
        return Err(FragmentError::MissingPart(CONTENT_TYPES_PART.to_string()));
    };
    let outline = Outline::parse(&xml)?;
    let element = if as_override {
        format!(r#"<Override PartName="/{}" ContentType="{}"/>"#, escape(path), escape(content_type))
    } else {
        format!(r#"<Default Extension="{}" ContentType="{}"/>"#, escape(extension(path).as_str()), escape(content_type))
    };
    let merged = rebuild(&xml, &outline, None, vec![(outline.root_end, element)]);
    base.parts.insert(CONTENT_TYPES_PART.to_string(), merged.into_bytes());
    Ok(())
}

/// Take over a whole part the base does not have.
fn adopt_part(base: &mut Package, kind: &PartKind, xml: String) -> Result<(), FragmentError> {
    let path = unique_path(base, kind.default_path);
    add_relationship(base, &format!("{}{}", REL_TYPE_BASE, kind.rel), &relative_target(&path), false)?;
    declare_content_type(base, &path, kind.content_type, true)?;
    debug!(part = %path, "adopted part from appended chapter");
    base.parts.insert(path, xml.into_bytes());
    Ok(())
}

// --- merges ---

/// Renumber the appended list definitions after the base's. Returns the
/// `numId` mapping.
fn merge_numbering(base: &mut Package, other: &Package) -> Result<HashMap<String, String>, FragmentError> {
    let Some((_, theirs)) = locate(other, &NUMBERING)? else { return Ok(HashMap::new()) };
    let Some((path, ours)) = locate(base, &NUMBERING)? else {
        adopt_part(base, &NUMBERING, theirs)?;
        return Ok(HashMap::new());
    };
    let ours_outline = Outline::parse(&ours)?;
    let theirs_outline = Outline::parse(&theirs)?;

    let mut next_abstract = ours_outline.max_id("abstractNum", "abstractNumId").map_or(0, |m| m + 1);
    let mut abstract_ids = HashMap::new();
    let mut abstracts = String::new();
    for child in theirs_outline.named("abstractNum") {
        let Some(old) = child.attr("abstractNumId") else { continue };
        let new = next_abstract.to_string();
        next_abstract += 1;
        abstracts.push_str(&set_first(abstract_attr_pattern(), &theirs[child.span.clone()], &new));
        abstract_ids.insert(old.to_string(), new);
    }

    let mut next_num = ours_outline.max_id("num", "numId").map_or(1, |m| m + 1);
    let mut num_ids = HashMap::new();
    let mut nums = String::new();
    for child in theirs_outline.named("num") {
        let Some(old) = child.attr("numId") else { continue };
        let new = next_num.to_string();
        next_num += 1;
        let element = set_first(num_attr_pattern(), &theirs[child.span.clone()], &new);
        nums.push_str(&remap(abstract_ref_pattern(), &element, &abstract_ids));
        num_ids.insert(old.to_string(), new);
    }

    // Definitions precede instances; cleanup marker stays last.
    let abstracts_at = ours_outline.named("num").next().map_or(ours_outline.root_end, |c| c.span.start);
    let nums_at = ours_outline
        .named("numIdMacAtCleanup")
        .next()
        .map_or(ours_outline.root_end, |c| c.span.start);
    let merged = rebuild(&ours, &ours_outline, Some(&theirs_outline), vec![(abstracts_at, abstracts), (nums_at, nums)]);
    base.parts.insert(path, merged.into_bytes());
    debug!(lists = num_ids.len(), "merged list definitions");
    Ok(num_ids)
}

/// Copy styles whose id the base does not define. A style id both define
/// keeps the base's definition.
fn merge_styles(base: &mut Package, other: &Package, num_ids: &HashMap<String, String>) -> Result<(), FragmentError> {
    let Some((_, theirs)) = locate(other, &STYLES)? else { return Ok(()) };
    let Some((path, ours)) = locate(base, &STYLES)? else {
        return adopt_part(base, &STYLES, remap(num_ref_pattern(), &theirs, num_ids));
    };
    let ours_outline = Outline::parse(&ours)?;
    let theirs_outline = Outline::parse(&theirs)?;

    let known: HashSet<&str> = ours_outline.named("style").filter_map(|c| c.attr("styleId")).collect();
    let mut added = String::new();
    let mut count = 0;
    for child in theirs_outline.named("style") {
        match child.attr("styleId") {
            Some(id) if !known.contains(id) => {
                added.push_str(&remap(num_ref_pattern(), &theirs[child.span.clone()], num_ids));
                count += 1;
            }
            _ => {}
        }
    }
    if count == 0 {
        return Ok(());
    }
    let merged = rebuild(&ours, &ours_outline, Some(&theirs_outline), vec![(ours_outline.root_end, added)]);
    base.parts.insert(path, merged.into_bytes());
    debug!(styles = count, "merged styles");
    Ok(())
}

/// Renumber the appended notes after the base's. Separator notes are the
/// base's own.
fn merge_notes(
    base: &mut Package,
    other: &Package,
    kind: &PartKind,
    element: &str,
) -> Result<HashMap<String, String>, FragmentError> {
    let Some((_, theirs)) = locate(other, kind)? else { return Ok(HashMap::new()) };
    let Some((path, ours)) = locate(base, kind)? else {
        adopt_part(base, kind, theirs)?;
        return Ok(HashMap::new());
    };
    let ours_outline = Outline::parse(&ours)?;
    let theirs_outline = Outline::parse(&theirs)?;

    let mut next = ours_outline.max_id(element, "id").map_or(1, |m| m.max(0) + 1);
    let mut ids = HashMap::new();
    let mut added = String::new();
    for child in theirs_outline.named(element) {
        if child.attr("type").is_some_and(|t| t != "normal") {
            continue;
        }
        let Some(old) = child.attr("id") else { continue };
        let new = next.to_string();
        next += 1;
        added.push_str(&set_first(id_attr_pattern(), &theirs[child.span.clone()], &new));
        ids.insert(old.to_string(), new);
    }
    if ids.is_empty() {
        return Ok(ids);
    }
    let merged = rebuild(&ours, &ours_outline, Some(&theirs_outline), vec![(ours_outline.root_end, added)]);
    base.parts.insert(path, merged.into_bytes());
    Ok(ids)
}

/// Re-create the relationships the appended body uses: external targets as
/// they are, media parts copied under a free name.
fn merge_relationships(
    base: &mut Package,
    other: &Package,
    referenced: &HashSet<String>,
) -> Result<HashMap<String, String>, FragmentError> {
    let mut ids = HashMap::new();
    for rel in relationships(other)?.iter().filter(|r| referenced.contains(&r.id)) {
        let target = if rel.external {
            rel.target.clone()
        } else if MEDIA_TYPES.iter().any(|t| is_type(rel, t)) {
            let source = resolve_target(&rel.target);
            let Some(bytes) = other.parts.get(&source).cloned() else {
                warn!(part = %source, "relationship target missing from chapter");
                continue;
            };
            let path = unique_path(base, &source);
            let content_type = declared_content_type(other, &source)?
                .unwrap_or_else(|| media_content_type(&source).to_string());
            declare_content_type(base, &path, &content_type, false)?;
            base.parts.insert(path.clone(), bytes);
            relative_target(&path)
        } else {
            debug!(rel_type = %rel.rel_type, id = %rel.id, "relationship type not carried over");
            continue;
        };
        let id = add_relationship(base, &rel.rel_type, &target, rel.external)?;
        ids.insert(rel.id.clone(), id);
    }
    Ok(ids)
}
