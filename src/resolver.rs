//! Template Resolver - published+latest lookup and ordered tree materialization

use serde::Serialize;
use tracing::{debug, warn};

use crate::compose::ComposeError;
use crate::store::TemplateStore;
use crate::templates::{
    ChapterAsset, ConditionalRule, FieldDefinition, Section, SheetDefinition, SheetId, SheetKind,
    Template, ValidationRule,
};

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedField {
    #[serde(flatten)]
    pub field: FieldDefinition,
    pub validation_rules: Vec<ValidationRule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSheet {
    #[serde(flatten)]
    pub sheet: SheetDefinition,
    pub fields: Vec<ResolvedField>,
    /// Only populated for fixed-form sheets
    pub conditional_rules: Vec<ConditionalRule>,
    pub chapter: Option<ChapterAsset>,
}

impl ResolvedSheet {
    pub fn is_table(&self) -> bool {
        self.sheet.kind == SheetKind::DynamicTable
    }

    pub fn field_definitions(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().map(|f| &f.field)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSection {
    #[serde(flatten)]
    pub section: Section,
    pub chapters: Vec<ChapterAsset>,
    pub sheets: Vec<ResolvedSheet>,
}

/// The active version of a template with its ordered tree.
///
/// Serialized, this is the form configuration the data-entry UI renders.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTemplate {
    #[serde(flatten)]
    pub template: Template,
    pub sections: Vec<ResolvedSection>,
}

/// A chapter together with the sheet that claims it.
#[derive(Debug, Clone, Copy)]
pub struct ChapterBinding<'a> {
    pub sheet: &'a ResolvedSheet,
    pub chapter: &'a ChapterAsset,
}

impl ResolvedTemplate {
    pub fn sheets(&self) -> impl Iterator<Item = &ResolvedSheet> {
        self.sections.iter().flat_map(|s| s.sheets.iter())
    }

    pub fn sheet(&self, id: SheetId) -> Option<&ResolvedSheet> {
        self.sheets().find(|s| s.sheet.id == id)
    }

    /// Sheets carrying a chapter, in section order then sheet order.
    pub fn chapter_order(&self) -> Vec<ChapterBinding<'_>> {
        self.sheets()
            .filter_map(|sheet| sheet.chapter.as_ref().map(|chapter| ChapterBinding { sheet, chapter }))
            .collect()
    }
}

/// Materialize the one version of `name` that is published and latest.
pub fn resolve<S: TemplateStore + ?Sized>(store: &S, name: &str) -> Result<ResolvedTemplate, ComposeError> {
    let mut active: Vec<Template> = store.templates_named(name).into_iter().filter(Template::is_active).collect();
    if active.len() > 1 {
        warn!(template = name, count = active.len(), "more than one active version; using the highest");
    }
    let template = active.pop().ok_or_else(|| ComposeError::TemplateNotFound(name.to_string()))?;
    debug!(template = name, id = template.id, version = template.version, "resolved template");
    Ok(materialize(store, template))
}

/// Build the ordered tree under an already selected template row.
pub fn materialize<S: TemplateStore + ?Sized>(store: &S, template: Template) -> ResolvedTemplate {
    let sections = store
        .sections(template.id)
        .into_iter()
        .map(|section| {
            let sheets = store
                .sheets(section.id)
                .into_iter()
                .map(|sheet| resolve_sheet(store, sheet))
                .collect();
            ResolvedSection { chapters: store.chapters(section.id), section, sheets }
        })
        .collect();
    ResolvedTemplate { template, sections }
}

pub(crate) fn resolve_sheet<S: TemplateStore + ?Sized>(store: &S, sheet: SheetDefinition) -> ResolvedSheet {
    let fields = store
        .fields(sheet.id)
        .into_iter()
        .map(|field| ResolvedField { validation_rules: store.validation_rules(field.id), field })
        .collect();
    let conditional_rules = match sheet.kind {
        SheetKind::FixedForm => store.conditional_rules(sheet.id),
        SheetKind::DynamicTable => vec![],
    };
    let chapter = sheet.chapter_asset_id.and_then(|id| {
        let chapter = store.chapter(id);
        if chapter.is_none() {
            warn!(sheet = sheet.id, chapter = id, "sheet links a chapter that no longer exists");
        }
        chapter
    });
    ResolvedSheet { sheet, fields, conditional_rules, chapter }
}

/// Names of templates whose latest version is published, in display order.
pub fn published_templates<S: TemplateStore + ?Sized>(store: &S) -> Vec<Template> {
    store.latest_templates().into_iter().filter(Template::is_published).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewField};
    use crate::templates::{FieldType, TemplateStatus};
    use serde_json::json;

    fn build() -> (MemoryStore, i64) {
        let mut store = MemoryStore::new();
        let t = store.create_template("Tender").unwrap();
        let late = store.add_section(t, "Late", 2).unwrap();
        let early = store.add_section(t, "Early", 1).unwrap();

        let c_late = store.add_chapter(late, "late.docx", "late.docx", 0).unwrap();
        let c_early = store.add_chapter(early, "early.docx", "early.docx", 0).unwrap();

        let s_late = store.add_sheet(late, "Bidders", SheetKind::DynamicTable, 0, Some("bidders")).unwrap();
        let s_early_b = store.add_sheet(early, "Second", SheetKind::FixedForm, 5, None).unwrap();
        let s_early_a = store.add_sheet(early, "First", SheetKind::FixedForm, 1, None).unwrap();
        store.link_chapter(s_late, Some(c_late)).unwrap();
        store.link_chapter(s_early_b, Some(c_early)).unwrap();

        store.add_field(NewField::new(s_early_a, "z", "Z", FieldType::Text, 2)).unwrap();
        let a = store.add_field(NewField::new(s_early_a, "a", "A", FieldType::Text, 1)).unwrap();
        store.add_validation_rule(a, "required", Some("True"), None).unwrap();
        store
            .add_conditional_rule(s_early_a, "toggle", json!({"if": {"field": "a"}, "then": [{"targets": ["z"]}]}))
            .unwrap();
        store.set_status(t, TemplateStatus::Published).unwrap();
        (store, t)
    }

    #[test]
    fn test_tree_is_ordered_by_display_order() {
        let (store, _) = build();
        let tree = resolve(&store, "Tender").unwrap();
        let names: Vec<_> = tree.sections.iter().map(|s| s.section.name.as_str()).collect();
        assert_eq!(names, ["Early", "Late"]);
        let sheets: Vec<_> = tree.sheets().map(|s| s.sheet.name.as_str()).collect();
        assert_eq!(sheets, ["First", "Second", "Bidders"]);
        let fields: Vec<_> = tree.sheets().next().unwrap().field_definitions().map(|f| f.name.as_str()).collect();
        assert_eq!(fields, ["a", "z"]);
    }

    #[test]
    fn test_chapter_order_follows_sections_then_sheets() {
        let (store, _) = build();
        let tree = resolve(&store, "Tender").unwrap();
        let order: Vec<_> = tree.chapter_order().iter().map(|b| b.chapter.filename.clone()).collect();
        assert_eq!(order, ["early.docx", "late.docx"]);
        assert!(tree.chapter_order()[1].sheet.is_table());
    }

    #[test]
    fn test_draft_only_template_is_not_found() {
        let (mut store, t) = build();
        store.clone_version(t).unwrap();
        // The published row is no longer latest
        assert!(matches!(resolve(&store, "Tender"), Err(ComposeError::TemplateNotFound(_))));
        assert!(matches!(resolve(&store, "Nope"), Err(ComposeError::TemplateNotFound(_))));
    }

    #[test]
    fn test_form_config_carries_rules() {
        let (store, _) = build();
        let tree = resolve(&store, "Tender").unwrap();
        let json = serde_json::to_value(&tree).unwrap();
        let first = &json["sections"][0]["sheets"][0];
        assert_eq!(first["kind"], "fixed_form");
        assert_eq!(first["fields"][0]["validation_rules"][0]["rule_type"], "required");
        assert_eq!(first["conditional_rules"][0]["name"], "toggle");
        assert_eq!(json["sections"][1]["sheets"][0]["conditional_rules"], json!([]));
        assert_eq!(json["name"], "Tender");
    }

    #[test]
    fn test_published_templates_lists_active_names() {
        let (mut store, _) = build();
        store.create_template("Draft only").unwrap();
        let names: Vec<_> = published_templates(&store).into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["Tender"]);
    }
}
