//! Preview Renderer - HTML twin of the composer
//!
//! Chapters are converted to HTML in chapter order. Scalar placeholders are
//! not resolved in place; each becomes
//! `<span data-placeholder-for="name">shown value</span>` so a client can
//! update values without a re-render. Without a project every placeholder
//! shows the configured mask.

use std::collections::HashMap;
use std::fmt::Write;

use quick_xml::escape::escape;
use tracing::{debug, warn};

use crate::assets::AssetSource;
use crate::compose::{build_placeholder_map, table_columns, table_records, ComposeError};
use crate::config::EngineConfig;
use crate::fragment::{normalize_text, Block, Document, Package, Paragraph, Run, Table};
use crate::placeholder::{coalesce_tokens, find_tokens, is_table_slot, table_token, token, PlaceholderMap};
use crate::project::{ProjectId, Record};
use crate::resolver::{resolve, resolve_sheet, ResolvedSheet};
use crate::store::{ProjectDataStore, TemplateStore};
use crate::table::inject_table;
use crate::templates::{SheetId, SheetKind};
use crate::values::resolve_display_value;

pub struct PreviewRenderer<'a, S: ?Sized, A: ?Sized> {
    store: &'a S,
    assets: &'a A,
    config: &'a EngineConfig,
}

impl<'a, S, A> PreviewRenderer<'a, S, A>
where
    S: TemplateStore + ProjectDataStore + ?Sized,
    A: AssetSource + ?Sized,
{
    pub fn new(store: &'a S, assets: &'a A, config: &'a EngineConfig) -> Self {
        Self { store, assets, config }
    }

    /// Every chapter of the active template, separated by the divider.
    pub fn render_preview(&self, project_id: Option<ProjectId>, template_name: &str) -> Result<String, ComposeError> {
        let tree = resolve(self.store, template_name)?;
        let values = self.project_values(project_id, |store, project| build_placeholder_map(store, &tree, project))?;

        let chapters: Vec<String> = tree
            .chapter_order()
            .into_iter()
            .map(|binding| self.render_chapter(binding.sheet, project_id, values.as_ref()))
            .collect();
        debug!(template = template_name, chapters = chapters.len(), "rendered preview");

        if chapters.is_empty() {
            return Ok(format!(
                "<p class=\"chapter-empty\">{}</p>",
                escape(self.config.compose.empty_document_text.as_str())
            ));
        }
        Ok(chapters.join(&self.config.preview.divider))
    }

    /// One sheet: its chapter if it has one, else its form structure.
    pub fn render_sheet_preview(&self, sheet_id: SheetId, project_id: Option<ProjectId>) -> Result<String, ComposeError> {
        let sheet = self.store.sheet(sheet_id).ok_or(ComposeError::SheetNotFound(sheet_id))?;
        let sheet = resolve_sheet(self.store, sheet);

        let values = self.project_values(project_id, |store, project| {
            let mut map = PlaceholderMap::new();
            let stored: HashMap<String, String> = store
                .fixed_values(project, sheet.sheet.id)
                .into_iter()
                .map(|v| (v.field_name, v.value))
                .collect();
            for field in sheet.field_definitions() {
                map.insert(field.name.as_str(), resolve_display_value(field, stored.get(&field.name).map(String::as_str)));
            }
            map
        })?;

        if sheet.chapter.is_some() {
            return Ok(self.render_chapter(&sheet, project_id, values.as_ref()));
        }
        Ok(match sheet.sheet.kind {
            SheetKind::FixedForm => self.form_structure(&sheet, values.as_ref()),
            SheetKind::DynamicTable => {
                let records = project_id.map(|p| table_records(self.store, p, &sheet)).unwrap_or_default();
                self.table_structure(&sheet, &records)
            }
        })
    }

    fn project_values(
        &self,
        project_id: Option<ProjectId>,
        build: impl FnOnce(&S, ProjectId) -> PlaceholderMap,
    ) -> Result<Option<PlaceholderMap>, ComposeError> {
        match project_id {
            None => Ok(None),
            Some(id) => {
                self.store.project(id).ok_or(ComposeError::ProjectNotFound(id))?;
                Ok(Some(build(self.store, id)))
            }
        }
    }

    fn render_chapter(&self, sheet: &ResolvedSheet, project_id: Option<ProjectId>, values: Option<&PlaceholderMap>) -> String {
        let Some(chapter) = sheet.chapter.as_ref() else { return String::new() };

        let package = self
            .assets
            .open(&chapter.storage_locator)
            .map_err(|e| e.to_string())
            .and_then(|bytes| Package::from_bytes(&bytes).map_err(|e| e.to_string()));
        let mut document = match package {
            Ok(package) => package.document,
            Err(reason) => {
                warn!(chapter = chapter.id, file = %chapter.filename, %reason, "chapter unreadable in preview");
                return format!(
                    "<div class=\"chapter-warning\">{}</div>",
                    escape(self.config.compose.missing_chapter_message(&chapter.filename).as_str())
                );
            }
        };

        document.for_each_paragraph_mut(&mut |p| coalesce_tokens(p));

        if sheet.is_table() {
            let columns = table_columns(sheet, &self.config.schemas);
            let records = match project_id {
                Some(project) => table_records(self.store, project, sheet),
                // One row of column placeholders, masked like every other value
                None => vec![columns.iter().map(|c| (c.name.clone(), token(&c.name))).collect::<Record>()],
            };
            let slot = table_token(sheet.sheet.table_identity());
            if !inject_table(&mut document, &slot, &records, &columns, &self.config.compose.table_style) {
                debug!(chapter = chapter.id, %slot, "table placeholder absent in preview");
            }
        }

        let mut html = String::new();
        let _ = write!(html, "<section class=\"chapter\" data-chapter-id=\"{}\">", chapter.id);
        self.write_blocks(&mut html, &document, values);
        html.push_str("</section>");
        html
    }

    fn write_blocks(&self, html: &mut String, document: &Document, values: Option<&PlaceholderMap>) {
        for block in &document.blocks {
            self.write_block(html, block, values);
        }
    }

    fn write_block(&self, html: &mut String, block: &Block, values: Option<&PlaceholderMap>) {
        match block {
            Block::Paragraph(p) => self.write_paragraph(html, p, values),
            Block::Table(t) => self.write_table(html, t, values),
        }
    }

    fn write_paragraph(&self, html: &mut String, paragraph: &Paragraph, values: Option<&PlaceholderMap>) {
        let tag = match paragraph.heading_level() {
            Some(level) => format!("h{}", level),
            None => "p".to_string(),
        };
        let align = match paragraph.alignment.as_deref() {
            Some("center") => " style=\"text-align:center\"",
            Some("right") | Some("end") => " style=\"text-align:right\"",
            Some("both") => " style=\"text-align:justify\"",
            _ => "",
        };
        let _ = write!(html, "<{}{}>", tag, align);
        for run in &paragraph.runs {
            self.write_run(html, run, values);
        }
        let _ = write!(html, "</{}>", tag);
    }

    fn write_run(&self, html: &mut String, run: &Run, values: Option<&PlaceholderMap>) {
        // Drawings, fields and text boxes have no HTML rendering.
        if run.is_embedded() {
            return;
        }
        let f = &run.format;
        let underline = f.underline.as_deref().is_some_and(|u| u != "none");
        let tags: Vec<&str> = [(f.bold, "strong"), (f.italic, "em"), (underline, "u"), (f.strike, "s")]
            .into_iter()
            .filter_map(|(on, tag)| on.then_some(tag))
            .collect();

        for tag in &tags {
            let _ = write!(html, "<{}>", tag);
        }
        let mut last = 0;
        for m in find_tokens(&run.text) {
            if is_table_slot(&m.name) {
                continue;
            }
            push_text(html, &run.text[last..m.start]);
            let _ = write!(
                html,
                "<span data-placeholder-for=\"{}\">{}</span>",
                escape(m.name.as_str()),
                escape(self.shown_value(&m.name, values).as_str())
            );
            last = m.end;
        }
        push_text(html, &run.text[last..]);
        for tag in tags.iter().rev() {
            let _ = write!(html, "</{}>", tag);
        }
    }

    /// Mask without a project or for an empty value; the token itself for
    /// names that are not fields.
    fn shown_value(&self, name: &str, values: Option<&PlaceholderMap>) -> String {
        match values.map(|v| v.get(name)) {
            None => self.config.preview.mask.clone(),
            Some(Some(value)) if !value.is_empty() => value.to_string(),
            Some(Some(_)) => self.config.preview.mask.clone(),
            Some(None) => token(name),
        }
    }

    fn write_table(&self, html: &mut String, table: &Table, values: Option<&PlaceholderMap>) {
        html.push_str("<table class=\"docforge-table\">");
        for row in &table.rows {
            html.push_str("<tr>");
            for cell in &row.cells {
                html.push_str("<td>");
                for block in &cell.blocks {
                    self.write_block(html, block, values);
                }
                html.push_str("</td>");
            }
            html.push_str("</tr>");
        }
        html.push_str("</table>");
    }

    fn form_structure(&self, sheet: &ResolvedSheet, values: Option<&PlaceholderMap>) -> String {
        let mut html = String::from("<ul class=\"sheet-preview\">");
        for field in sheet.field_definitions() {
            let _ = write!(
                html,
                "<li><strong>{}</strong>: <span data-placeholder-for=\"{}\">{}</span></li>",
                escape(field.label.as_str()),
                escape(field.name.as_str()),
                escape(self.shown_value(&field.name, values).as_str())
            );
        }
        html.push_str("</ul>");
        html
    }

    fn table_structure(&self, sheet: &ResolvedSheet, records: &[Record]) -> String {
        let columns = table_columns(sheet, &self.config.schemas);
        let mut html = String::from("<table class=\"docforge-table\"><thead><tr><th>#</th>");
        for column in &columns {
            let _ = write!(html, "<th>{}</th>", escape(column.label.as_str()));
        }
        html.push_str("</tr></thead><tbody>");
        if records.is_empty() {
            let _ = write!(html, "<tr><td colspan=\"{}\">No data</td></tr>", columns.len() + 1);
        }
        for (i, record) in records.iter().enumerate() {
            let _ = write!(html, "<tr><td>{}</td>", i + 1);
            for column in &columns {
                let value = record.get(&column.name).map_or("", String::as_str);
                let _ = write!(html, "<td>{}</td>", escape(value));
            }
            html.push_str("</tr>");
        }
        html.push_str("</tbody></table>");
        html
    }
}

fn push_text(html: &mut String, text: &str) {
    for (i, line) in normalize_text(text).split('\n').enumerate() {
        if i > 0 {
            html.push_str("<br/>");
        }
        html.push_str(&escape(line));
    }
}
