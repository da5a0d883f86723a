//! Document Composer - chapters in order, substituted, merged into one package
//!
//! The first readable chapter supplies the base package (styles, numbering,
//! section properties). Later chapters append their blocks to it, bringing
//! along the styles, lists, notes and media those blocks refer to. A chapter
//! that cannot be read becomes one warning paragraph; nothing short of a
//! missing template or project stops a composition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assets::AssetSource;
use crate::config::{EngineConfig, SchemaRegistry};
use crate::diagnostics::Diagnostic;
use crate::fragment::{Document, FragmentError, Package, Paragraph, Run, RunFormat};
use crate::hashing::{compute_job_hash, compute_manifest_hash, sha256_hex};
use crate::placeholder::{substitute_text, table_token, PlaceholderMap};
use crate::project::{ProjectId, Record};
use crate::resolver::{resolve, ChapterBinding, ResolvedSheet, ResolvedTemplate};
use crate::store::{ProjectDataStore, StoreError, TemplateStore};
use crate::table::{inject_table, Column};
use crate::templates::{ChapterAsset, ChapterId, SheetId, SheetKind, TemplateId};
use crate::values::resolve_display_value;
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Sheet not found: {0}")]
    SheetNotFound(SheetId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Output document error: {0}")]
    Output(#[from] FragmentError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Composed,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterOutcome {
    pub chapter_id: ChapterId,
    pub sheet_id: SheetId,
    pub filename: String,
    pub status: ChapterStatus,
    pub placeholders_replaced: usize,
    pub table_injected: bool,
}

/// Audit record of one composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionManifest {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
    pub template_id: TemplateId,
    pub template_name: String,
    pub template_version: u32,
    pub project_id: ProjectId,
    pub filename: String,
    pub chapters: Vec<ChapterOutcome>,
    pub diagnostics: Vec<Diagnostic>,
    /// SHA-256 of the output bytes
    pub document_hash: String,
    /// Same inputs, same hash
    pub job_hash: String,
    pub manifest_hash: String,
}

#[derive(Debug, Clone)]
pub struct ComposedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub manifest: CompositionManifest,
}

/// Global placeholder map over every fixed-form sheet of the tree.
///
/// Keys are bare field names; a later sheet wins on a duplicate name. Every
/// defined field gets an entry, empty when it has neither value nor default.
pub fn build_placeholder_map<P: ProjectDataStore + ?Sized>(
    store: &P,
    tree: &ResolvedTemplate,
    project_id: ProjectId,
) -> PlaceholderMap {
    let mut map = PlaceholderMap::new();
    for sheet in tree.sheets().filter(|s| s.sheet.kind == SheetKind::FixedForm) {
        let stored: HashMap<String, String> = store
            .fixed_values(project_id, sheet.sheet.id)
            .into_iter()
            .map(|v| (v.field_name, v.value))
            .collect();
        for field in sheet.field_definitions() {
            let raw = stored.get(&field.name).map(String::as_str);
            map.insert(field.name.as_str(), resolve_display_value(field, raw));
        }
    }
    map
}

/// Columns of a dynamic table: the registered schema if any, else its fields.
pub fn table_columns(sheet: &ResolvedSheet, schemas: &SchemaRegistry) -> Vec<Column> {
    let registered = sheet
        .sheet
        .model_identifier
        .as_deref()
        .and_then(|id| schemas.get(id));
    match registered {
        Some(schema) => schema.columns.clone(),
        None => sheet.field_definitions().map(Column::from).collect(),
    }
}

pub fn table_records<P: ProjectDataStore + ?Sized>(store: &P, project_id: ProjectId, sheet: &ResolvedSheet) -> Vec<Record> {
    store
        .table_rows(project_id, sheet.sheet.id)
        .into_iter()
        .map(|row| row.record)
        .collect()
}

/// Visible stand-in for a chapter that could not be read.
pub fn warning_paragraph(text: &str) -> Paragraph {
    let format = RunFormat { bold: true, color: Some("C00000".to_string()), ..RunFormat::default() };
    Paragraph::from_runs(vec![Run::formatted(text, format)])
}

pub struct Composer<'a, S: ?Sized, A: ?Sized> {
    store: &'a S,
    assets: &'a A,
    config: &'a EngineConfig,
}

impl<'a, S, A> Composer<'a, S, A>
where
    S: TemplateStore + ProjectDataStore + ?Sized,
    A: AssetSource + ?Sized,
{
    pub fn new(store: &'a S, assets: &'a A, config: &'a EngineConfig) -> Self {
        Self { store, assets, config }
    }

    pub fn compose(&self, project_id: ProjectId, template_name: &str) -> Result<ComposedDocument, ComposeError> {
        let tree = resolve(self.store, template_name)?;
        let project = self.store.project(project_id).ok_or(ComposeError::ProjectNotFound(project_id))?;
        let placeholders = build_placeholder_map(self.store, &tree, project_id);

        let mut base: Option<Package> = None;
        let mut chapters = vec![];
        let mut diagnostics = vec![];

        let order = tree.chapter_order();
        info!(project_id, template = template_name, chapters = order.len(), "composing document");

        for binding in order {
            let outcome = match self.load_fragment(binding.chapter) {
                Ok(mut package) => {
                    let fragment = std::mem::take(&mut package.document);
                    let (document, outcome) =
                        self.compose_chapter(fragment, binding, project_id, &placeholders, &mut diagnostics);
                    package.document = document;
                    match base.as_mut() {
                        Some(existing) => existing.append(package),
                        None => base = Some(package),
                    }
                    outcome
                }
                Err(reason) => {
                    let chapter = binding.chapter;
                    warn!(chapter = chapter.id, file = %chapter.filename, %reason, "chapter unreadable");
                    diagnostics.push(Diagnostic::fragment_unreadable(chapter.id, &chapter.filename, &reason));
                    let warning = warning_paragraph(&self.config.compose.missing_chapter_message(&chapter.filename));
                    base.get_or_insert_with(|| Package::new(Document::new()))
                        .document
                        .push_paragraph(warning);
                    outcome_for(binding, ChapterStatus::Missing)
                }
            };
            chapters.push(outcome);
        }

        let package = base.unwrap_or_else(|| {
            debug!(template = template_name, "no chapters; emitting placeholder document");
            let mut document = Document::new();
            document.push_paragraph(Paragraph::new(self.config.compose.empty_document_text.as_str()));
            Package::new(document)
        });

        let bytes = package.to_bytes()?;
        let filename = project.export_filename();
        let job_hash = compute_job_hash(tree.template.id, tree.template.version, project_id, &placeholders, ENGINE_VERSION)?;

        let mut manifest = CompositionManifest {
            job_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            template_id: tree.template.id,
            template_name: tree.template.name.clone(),
            template_version: tree.template.version,
            project_id,
            filename: filename.clone(),
            chapters,
            diagnostics,
            document_hash: sha256_hex(&bytes),
            job_hash,
            manifest_hash: String::new(),
        };
        manifest.manifest_hash = compute_manifest_hash(&manifest)?;

        info!(project_id, bytes = bytes.len(), hash = %manifest.document_hash, "document composed");
        Ok(ComposedDocument { filename, bytes, manifest })
    }

    fn load_fragment(&self, chapter: &ChapterAsset) -> Result<Package, String> {
        let bytes = self.assets.open(&chapter.storage_locator).map_err(|e| e.to_string())?;
        Package::from_bytes(&bytes).map_err(|e| e.to_string())
    }

    fn compose_chapter(
        &self,
        mut document: Document,
        binding: ChapterBinding<'_>,
        project_id: ProjectId,
        placeholders: &PlaceholderMap,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> (Document, ChapterOutcome) {
        let chapter_id = binding.chapter.id;
        let substitution = substitute_text(&mut document, placeholders);
        for name in &substitution.unresolved {
            debug!(chapter = chapter_id, placeholder = %name, "placeholder left unresolved");
            diagnostics.push(Diagnostic::placeholder_unresolved(chapter_id, name));
        }

        let mut outcome = outcome_for(binding, ChapterStatus::Composed);
        outcome.placeholders_replaced = substitution.replaced;

        if binding.sheet.is_table() {
            let token = table_token(binding.sheet.sheet.table_identity());
            let records = table_records(self.store, project_id, binding.sheet);
            let columns = table_columns(binding.sheet, &self.config.schemas);
            outcome.table_injected =
                inject_table(&mut document, &token, &records, &columns, &self.config.compose.table_style);
            if outcome.table_injected {
                debug!(chapter = chapter_id, rows = records.len(), "table injected");
            } else {
                warn!(chapter = chapter_id, %token, "table placeholder absent; rows not rendered");
                diagnostics.push(Diagnostic::table_placeholder_absent(chapter_id, &token, &binding.sheet.sheet.name));
            }
        }
        (document, outcome)
    }
}

fn outcome_for(binding: ChapterBinding<'_>, status: ChapterStatus) -> ChapterOutcome {
    ChapterOutcome {
        chapter_id: binding.chapter.id,
        sheet_id: binding.sheet.sheet.id,
        filename: binding.chapter.filename.clone(),
        status,
        placeholders_replaced: 0,
        table_injected: false,
    }
}
