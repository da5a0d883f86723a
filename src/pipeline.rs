//! Composition Pipeline - Single Entry Point
//!
//! Everything the data-entry UI, the admin UI and the CLI need goes through
//! here. Composition and preview only read the store.

use serde_json::Value;
use tracing::debug;

use crate::assets::AssetSource;
use crate::compose::{ComposeError, ComposedDocument, Composer};
use crate::config::EngineConfig;
use crate::preview::PreviewRenderer;
use crate::project::ProjectId;
use crate::resolver::{published_templates, resolve, resolve_sheet, ResolvedTemplate};
use crate::rules::is_self_referential;
use crate::store::{ProjectDataStore, TemplateStore};
use crate::templates::{SheetId, Template};
use crate::validation::{ValidationResult, Validator};

pub struct CompositionPipeline<S, A> {
    store: S,
    assets: A,
    config: EngineConfig,
    validator: Validator,
}

impl<S, A> CompositionPipeline<S, A>
where
    S: TemplateStore + ProjectDataStore,
    A: AssetSource,
{
    pub fn new(store: S, assets: A, config: EngineConfig) -> Self {
        Self { store, assets, config, validator: Validator::new() }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Admin mutations (clone, publish, activate) go through the store directly.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Form configuration of the active version of `template_name`.
    pub fn resolve_forms(&self, template_name: &str) -> Result<ResolvedTemplate, ComposeError> {
        resolve(&self.store, template_name)
    }

    pub fn published_templates(&self) -> Vec<Template> {
        published_templates(&self.store)
    }

    pub fn compose(&self, project_id: ProjectId, template_name: &str) -> Result<ComposedDocument, ComposeError> {
        Composer::new(&self.store, &self.assets, &self.config).compose(project_id, template_name)
    }

    pub fn render_preview(&self, project_id: Option<ProjectId>, template_name: &str) -> Result<String, ComposeError> {
        PreviewRenderer::new(&self.store, &self.assets, &self.config).render_preview(project_id, template_name)
    }

    pub fn render_sheet_preview(&self, sheet_id: SheetId, project_id: Option<ProjectId>) -> Result<String, ComposeError> {
        PreviewRenderer::new(&self.store, &self.assets, &self.config).render_sheet_preview(sheet_id, project_id)
    }

    /// Check a submission for one sheet: an object for fixed forms, an array
    /// of records for dynamic tables.
    pub fn validate_submission(&self, sheet_id: SheetId, payload: &Value) -> Result<ValidationResult, ComposeError> {
        let sheet = self.store.sheet(sheet_id).ok_or(ComposeError::SheetNotFound(sheet_id))?;
        let sheet = resolve_sheet(&self.store, sheet);
        let result = self.validator.validate_payload(&sheet, payload)?;
        debug!(sheet_id, valid = result.valid, violations = result.violations.len(), "validated submission");
        Ok(result)
    }

    /// True when a conditional rule would trigger itself.
    pub fn check_rule(&self, definition: &Value) -> bool {
        is_self_referential(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;
    use crate::store::{MemoryStore, NewField};
    use crate::templates::{FieldType, SheetKind, TemplateStatus};
    use serde_json::json;

    fn pipeline() -> (CompositionPipeline<MemoryStore, MemoryAssets>, SheetId) {
        let mut store = MemoryStore::new();
        let t = store.create_template("Tender").unwrap();
        let s = store.add_section(t, "Main", 0).unwrap();
        let sheet = store.add_sheet(s, "Basics", SheetKind::FixedForm, 0, None).unwrap();
        let f = store.add_field(NewField::new(sheet, "title", "Title", FieldType::Text, 0)).unwrap();
        store.add_validation_rule(f, "required", Some("True"), Some("Title please")).unwrap();
        store.set_status(t, TemplateStatus::Published).unwrap();
        (CompositionPipeline::new(store, MemoryAssets::new(), EngineConfig::default()), sheet)
    }

    #[test]
    fn test_validate_submission_uses_stored_rules() {
        let (p, sheet) = pipeline();
        let result = p.validate_submission(sheet, &json!({"title": ""})).unwrap();
        assert!(!result.valid);
        assert_eq!(result.violations[0].message, "Title please");
        assert!(p.validate_submission(sheet, &json!({"title": "Bridge"})).unwrap().valid);
        assert!(matches!(p.validate_submission(404, &json!({})), Err(ComposeError::SheetNotFound(404))));
    }

    #[test]
    fn test_zero_chapter_template_still_composes() {
        let (mut p, _) = pipeline();
        let project = p.store_mut().add_project("", "1", "Tender");
        let out = p.compose(project, "Tender").unwrap();
        assert_eq!(out.filename, format!("project_{}_export.docx", project));
        let doc = crate::fragment::Package::from_bytes(&out.bytes).unwrap().document;
        assert_eq!(doc.text(), p.config().compose.empty_document_text);
    }

    #[test]
    fn test_listing_and_rule_check() {
        let (p, _) = pipeline();
        assert_eq!(p.published_templates().len(), 1);
        assert_eq!(p.resolve_forms("Tender").unwrap().sections.len(), 1);
        assert!(p.check_rule(&json!({"if": {"field": "x"}, "then": [{"targets": ["x"]}]})));
    }
}
