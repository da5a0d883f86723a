//! Contract Invariant Tests
//!
//! These tests verify the composition guarantees end to end, with chapter
//! documents and the store snapshot on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use docforge_core::{
    fragment::{read_document_xml, Block, Paragraph, Run, RunFormat},
    store::NewField,
    CompositionPipeline, Document, EngineConfig, FieldType, FsAssetSource, MemoryStore, Package,
    SheetKind, StoreError, TemplateStatus, TemplateStore,
};

fn write_chapter(dir: &Path, name: &str, paragraphs: Vec<Paragraph>) {
    let mut doc = Document::new();
    for p in paragraphs {
        doc.push_paragraph(p);
    }
    fs::write(dir.join(name), Package::new(doc).to_bytes().unwrap()).unwrap();
}

struct Setup {
    dir: TempDir,
    store: MemoryStore,
    template: i64,
    form: i64,
    table: i64,
}

/// Two sections: a fixed form bound to `a.docx`, a dynamic table bound to `b.docx`.
fn setup() -> Setup {
    let dir = TempDir::new().unwrap();
    let mut store = MemoryStore::new();
    let template = store.create_template("Tender").unwrap();

    let first = store.add_section(template, "General", 0).unwrap();
    let second = store.add_section(template, "Bidders", 1).unwrap();
    let a = store.add_chapter(first, "a.docx", "a.docx", 0).unwrap();
    let b = store.add_chapter(second, "b.docx", "b.docx", 0).unwrap();

    let form = store.add_sheet(first, "General", SheetKind::FixedForm, 0, None).unwrap();
    store.link_chapter(form, Some(a)).unwrap();
    store.add_field(NewField::new(form, "client", "Client", FieldType::Text, 0)).unwrap();
    store.add_field(NewField::new(form, "budget", "Budget", FieldType::Number, 1)).unwrap();
    store
        .add_field(
            NewField::new(form, "method", "Method", FieldType::Select, 2)
                .with_options(&[("Open tender", "open"), ("Invited", "invited")], true),
        )
        .unwrap();
    store
        .add_field(
            NewField::new(form, "scope", "Scope", FieldType::CheckboxGroup, 3)
                .with_options(&[("Design", "d"), ("Build", "b")], true),
        )
        .unwrap();
    store
        .add_field(
            NewField::new(form, "raw_choice", "Raw", FieldType::Radio, 4)
                .with_options(&[("Yes", "y")], false),
        )
        .unwrap();

    let table = store.add_sheet(second, "Bidders", SheetKind::DynamicTable, 0, Some("bidders")).unwrap();
    store.link_chapter(table, Some(b)).unwrap();
    store.add_field(NewField::new(table, "company", "Company", FieldType::Text, 0)).unwrap();
    store.add_field(NewField::new(table, "amount", "Amount", FieldType::Number, 1)).unwrap();
    store.set_status(template, TemplateStatus::Published).unwrap();

    write_chapter(
        dir.path(),
        "a.docx",
        vec![
            Paragraph::new("General").with_style("Heading1"),
            Paragraph::new("client={{client}}"),
            Paragraph::new("budget={{budget}}"),
            Paragraph::new("method={{method}}"),
            Paragraph::new("scope={{scope}}"),
            Paragraph::new("raw_choice={{raw_choice}}"),
        ],
    );
    write_chapter(dir.path(), "b.docx", vec![Paragraph::new("Bidders"), Paragraph::new("{{table_bidders}}")]);

    Setup { dir, store, template, form, table }
}

/// Raw text of one part of a `.docx`.
fn part_text(docx: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(docx)).unwrap();
    let mut text = String::new();
    archive.by_name(name).unwrap().read_to_string(&mut text).unwrap();
    text
}

fn pipeline(setup: Setup) -> (CompositionPipeline<MemoryStore, FsAssetSource>, TempDir) {
    let assets = FsAssetSource::new(setup.dir.path());
    (CompositionPipeline::new(setup.store, assets, EngineConfig::default()), setup.dir)
}

fn compose_text(p: &CompositionPipeline<MemoryStore, FsAssetSource>, project: i64) -> Document {
    let out = p.compose(project, "Tender").expect("composition succeeds");
    Package::from_bytes(&out.bytes).expect("output is a readable package").document
}

#[test]
fn invariant_stored_values_round_trip_through_composition() {
    let mut s = setup();
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    let stored = [("client", "ACME Ltd"), ("budget", "1200"), ("method", "open"), ("scope", "d,b"), ("raw_choice", "y")];
    s.store.save_fixed_form(project, s.form, stored).unwrap();
    let (p, _dir) = pipeline(s);

    let text = compose_text(&p, project).text();
    let extracted: BTreeMap<&str, &str> = text.lines().filter_map(|l| l.split_once('=')).collect();

    assert_eq!(extracted["client"], "ACME Ltd");
    assert_eq!(extracted["budget"], "1200");
    // Labels only where the field asks for them
    assert_eq!(extracted["method"], "Open tender");
    assert_eq!(extracted["scope"], "Design, Build");
    assert_eq!(extracted["raw_choice"], "y");
}

#[test]
fn invariant_split_token_keeps_neighbouring_formatting() {
    let mut s = setup();
    write_chapter(
        s.dir.path(),
        "a.docx",
        vec![Paragraph::from_runs(vec![
            Run::formatted("Dear {{cli", RunFormat::bold()),
            Run::formatted("ent}}, welcome", RunFormat::italic()),
        ])],
    );
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    s.store.save_fixed_form(project, s.form, [("client", "ACME")]).unwrap();
    let (p, _dir) = pipeline(s);

    let doc = compose_text(&p, project);
    let Block::Paragraph(para) = &doc.blocks[0] else { panic!("expected paragraph") };
    assert_eq!(para.text(), "Dear ACME, welcome");
    assert_eq!(para.runs.len(), 2);
    assert_eq!(para.runs[0].text, "Dear ACME");
    assert!(para.runs[0].format.bold && !para.runs[0].format.italic);
    assert_eq!(para.runs[1].text, ", welcome");
    assert!(para.runs[1].format.italic && !para.runs[1].format.bold);
}

#[test]
fn invariant_empty_table_keeps_header_row() {
    let mut s = setup();
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    let (p, _dir) = pipeline(s);

    let doc = compose_text(&p, project);
    let tables: Vec<_> = doc.tables().collect();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].rows.len(), 1);
    assert_eq!(tables[0].column_count(), 2);
    assert!(!doc.text().contains("{{table_bidders}}"));
}

#[test]
fn invariant_table_rows_follow_stored_order() {
    let mut s = setup();
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    let rows = vec![
        [("company", "Zeta"), ("amount", "5")],
        [("company", ""), ("amount", "")],
        [("company", "Alpha"), ("amount", "7")],
    ]
    .into_iter()
    .map(|r| r.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    .collect();
    assert_eq!(s.store.save_table_rows(project, s.table, rows).unwrap(), 2);
    let (p, _dir) = pipeline(s);

    let doc = compose_text(&p, project);
    let table = doc.tables().next().unwrap();
    assert_eq!(table.rows.len(), 3);
    let first_cells: Vec<String> = table.rows.iter().map(|r| match &r.cells[0].blocks[0] {
        Block::Paragraph(p) => p.text(),
        Block::Table(_) => String::new(),
    }).collect();
    assert_eq!(first_cells, ["Company", "Zeta", "Alpha"]);
}

#[test]
fn invariant_missing_chapter_becomes_warning() {
    let mut s = setup();
    fs::remove_file(s.dir.path().join("b.docx")).unwrap();
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    s.store.save_fixed_form(project, s.form, [("client", "ACME")]).unwrap();
    let (p, _dir) = pipeline(s);

    let out = p.compose(project, "Tender").expect("missing chapter is not fatal");
    let text = Package::from_bytes(&out.bytes).unwrap().document.text();
    assert!(text.contains("client=ACME"));
    assert!(text.contains("Warning"));
    assert!(text.contains("b.docx"));
    assert_eq!(out.manifest.diagnostics[0].code, docforge_core::DiagnosticCode::FragmentUnreadable);
}

#[test]
fn invariant_zero_chapters_yield_explanatory_document() {
    let mut store = MemoryStore::new();
    let t = store.create_template("Empty").unwrap();
    store.add_section(t, "Only", 0).unwrap();
    store.set_status(t, TemplateStatus::Published).unwrap();
    let project = store.add_project("P", "1", "Empty");
    let dir = TempDir::new().unwrap();
    let p = CompositionPipeline::new(store, FsAssetSource::new(dir.path()), EngineConfig::default());

    let out = p.compose(project, "Empty").expect("empty template still composes");
    let doc = Package::from_bytes(&out.bytes).unwrap().document;
    assert_eq!(doc.blocks.len(), 1);
    assert!(!doc.text().is_empty());
}

#[test]
fn invariant_unknown_template_is_the_only_hard_stop() {
    let mut s = setup();
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    let (p, _dir) = pipeline(s);
    assert!(matches!(p.compose(project, "Missing"), Err(docforge_core::ComposeError::TemplateNotFound(_))));
    assert!(p.render_preview(None, "Missing").is_err());
}

#[test]
fn invariant_composition_is_read_only() {
    let mut s = setup();
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    s.store.save_fixed_form(project, s.form, [("client", "ACME")]).unwrap();
    let before = s.store.to_json().unwrap();
    let (p, _dir) = pipeline(s);

    p.compose(project, "Tender").unwrap();
    p.render_preview(Some(project), "Tender").unwrap();
    p.render_preview(None, "Tender").unwrap();
    assert_eq!(p.store().to_json().unwrap(), before);
}

#[test]
fn invariant_self_referential_rules_never_persist() {
    let mut s = setup();
    let rejected = s.store.add_conditional_rule(
        s.form,
        "loop",
        json!({"if": {"field": "x"}, "then": [{"targets": ["x", "y"]}]}),
    );
    assert!(matches!(rejected, Err(StoreError::SelfReferentialRule(_))));
    let accepted = s.store.add_conditional_rule(
        s.form,
        "ok",
        json!({"if": {"field": "x"}, "then": [{"targets": ["y"]}]}),
    );
    assert!(accepted.is_ok());
    assert_eq!(s.store.conditional_rules(s.form).len(), 1);
}

#[test]
fn invariant_snapshot_on_disk_reproduces_job_hash() {
    let mut s = setup();
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    s.store.save_fixed_form(project, s.form, [("client", "ACME")]).unwrap();
    let snapshot = s.dir.path().join("store.json");
    s.store.save(&snapshot).unwrap();

    let reloaded = MemoryStore::load(&snapshot).unwrap();
    let first = CompositionPipeline::new(reloaded, FsAssetSource::new(s.dir.path()), EngineConfig::default());
    let (second, _dir) = pipeline(s);

    let a = first.compose(project, "Tender").unwrap().manifest;
    let b = second.compose(project, "Tender").unwrap().manifest;
    assert_eq!(a.job_hash, b.job_hash);
}

#[test]
fn invariant_cloned_version_composes_after_activation() {
    let mut s = setup();
    let clone = s.store.clone_version(s.template).unwrap();
    s.store.set_status(clone, TemplateStatus::Published).unwrap();

    let versions = s.store.templates_named("Tender");
    assert_eq!(versions.iter().filter(|t| t.is_latest).count(), 1);
    assert_eq!(versions.iter().filter(|t| t.is_published()).count(), 1);

    // Data keyed to the old version's sheets does not carry over
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    s.store.save_fixed_form(project, s.form, [("client", "ACME")]).unwrap();
    let (p, _dir) = pipeline(s);

    let out = p.compose(project, "Tender").unwrap();
    assert_eq!(out.manifest.template_id, clone);
    assert_eq!(out.manifest.template_version, 2);
    let text = Package::from_bytes(&out.bytes).unwrap().document.text();
    assert!(text.contains("client="));
    assert!(!text.contains("ACME"));
}

#[test]
fn invariant_preview_marks_every_placeholder() {
    let s = setup();
    let (p, _dir) = pipeline(s);
    let html = p.render_preview(None, "Tender").unwrap();
    for name in ["client", "budget", "method", "scope", "raw_choice"] {
        assert!(html.contains(&format!("<span data-placeholder-for=\"{}\">**********</span>", name)));
    }
    assert!(html.contains("<hr class=\"chapter-divider\"/>"));
}

/// Body of a chapter as Word saves it: styled paragraph, page break, inline
/// picture, hyperlink, page field, text box with its VML fallback.
const WORD_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:mc="http://schemas.openxmlformats.org/markup-compatibility/2006" xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:wps="http://schemas.microsoft.com/office/word/2010/wordprocessingShape"><w:body>
<w:p><w:pPr><w:pStyle w:val="BidderNote"/></w:pPr><w:r><w:t xml:space="preserve">Prepared for {{client}}</w:t></w:r><w:r><w:br w:type="page"/></w:r></w:p>
<w:p><w:r><w:drawing><wp:inline><a:graphic><a:graphicData><a:blip r:embed="rId7"/></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>
<w:p><w:hyperlink r:id="rId8" w:history="1"><w:r><w:t>Tender portal</w:t></w:r></w:hyperlink></w:p>
<w:p><w:r><w:fldChar w:fldCharType="begin"/></w:r><w:r><w:instrText xml:space="preserve"> PAGE </w:instrText></w:r><w:r><w:fldChar w:fldCharType="separate"/></w:r><w:r><w:t>1</w:t></w:r><w:r><w:fldChar w:fldCharType="end"/></w:r></w:p>
<w:p><w:r><mc:AlternateContent><mc:Choice Requires="wps"><w:drawing><wps:txbx><w:txbxContent><w:p><w:r><w:t>Boxed note</w:t></w:r></w:p></w:txbxContent></wps:txbx></w:drawing></mc:Choice><mc:Fallback><w:pict><w:txbxContent><w:p><w:r><w:t>Boxed note</w:t></w:r></w:p></w:txbxContent></w:pict></mc:Fallback></mc:AlternateContent></w:r></w:p>
<w:p><w:r><w:t>{{table_bidders}}</w:t></w:r></w:p>
<w:sectPr/></w:body></w:document>"#;

const WORD_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId7" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/><Relationship Id="rId8" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://tenders.example.org/portal" TargetMode="External"/></Relationships>"#;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nchapter picture";

fn write_word_chapter(dir: &Path, name: &str) {
    let mut package = Package::new(read_document_xml(WORD_BODY).unwrap());
    let styles = String::from_utf8(package.part("word/styles.xml").unwrap().to_vec()).unwrap().replace(
        "</w:styles>",
        r#"<w:style w:type="paragraph" w:customStyle="1" w:styleId="BidderNote"><w:name w:val="Bidder Note"/><w:basedOn w:val="Normal"/><w:rPr><w:i/></w:rPr></w:style></w:styles>"#,
    );
    let content_types = String::from_utf8(package.part("[Content_Types].xml").unwrap().to_vec())
        .unwrap()
        .replace("<Default Extension=\"xml\"", "<Default Extension=\"png\" ContentType=\"image/png\"/><Default Extension=\"xml\"");
    package.insert_part("word/styles.xml", styles);
    package.insert_part("[Content_Types].xml", content_types);
    package.insert_part("word/_rels/document.xml.rels", WORD_RELS);
    package.insert_part("word/media/image1.png", PNG);
    fs::write(dir.join(name), package.to_bytes().unwrap()).unwrap();
}

#[test]
fn invariant_word_content_survives_as_later_chapter() {
    let mut s = setup();
    write_word_chapter(s.dir.path(), "b.docx");
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    s.store.save_fixed_form(project, s.form, [("client", "ACME")]).unwrap();
    let (p, _dir) = pipeline(s);

    let out = p.compose(project, "Tender").unwrap();
    let body = part_text(&out.bytes, "word/document.xml");
    assert!(body.contains("Prepared for ACME"));
    assert!(body.contains(r#"<w:pStyle w:val="BidderNote"/>"#));
    assert!(body.contains(r#"<w:br w:type="page"/>"#));
    assert!(body.contains(r#"w:fldCharType="begin""#));
    assert!(body.contains(r#"<w:instrText xml:space="preserve"> PAGE </w:instrText>"#));
    assert_eq!(body.matches("<mc:AlternateContent>").count(), 1);
    assert_eq!(body.matches("Boxed note").count(), 2);
    assert!(body.contains("xmlns:wps="));

    // Relationship ids now point into the composed package.
    assert!(body.contains(r#"<a:blip r:embed="rId2"/>"#));
    assert!(body.contains(r#"<w:hyperlink r:id="rId3" w:history="1"><w:r><w:t xml:space="preserve">Tender portal</w:t></w:r></w:hyperlink>"#));
    let rels = part_text(&out.bytes, "word/_rels/document.xml.rels");
    assert!(rels.contains(r#"Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png""#));
    assert!(rels.contains(r#"Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://tenders.example.org/portal" TargetMode="External""#));

    let merged = Package::from_bytes(&out.bytes).unwrap();
    assert_eq!(merged.part("word/media/image1.png"), Some(PNG));
    assert!(part_text(&out.bytes, "word/styles.xml").contains(r#"w:styleId="BidderNote""#));
    assert!(part_text(&out.bytes, "[Content_Types].xml").contains(r#"<Default Extension="png" ContentType="image/png"/>"#));
    assert_eq!(merged.document.tables().count(), 1);
}

#[test]
fn invariant_control_characters_in_values_yield_valid_xml() {
    let mut s = setup();
    let project = s.store.add_project("Bridge", "B-1", "Tender");
    s.store.save_fixed_form(project, s.form, [("client", "ACME\r\nLtd\u{1}\u{b}")]).unwrap();
    let (p, _dir) = pipeline(s);

    let out = p.compose(project, "Tender").unwrap();
    let body = part_text(&out.bytes, "word/document.xml");
    assert!(!body.contains('\r'));
    assert!(!body.chars().any(|c| (c as u32) < 0x20 && c != '\n' && c != '\t'));
    assert!(body.contains(r#"<w:t xml:space="preserve">client=ACME</w:t><w:br/><w:t xml:space="preserve">Ltd</w:t>"#));
    assert!(compose_text(&p, project).text().contains("client=ACME\nLtd"));
}
