//! Template and Project Stores
//!
//! Read interfaces consumed by the composition engine, plus an in-memory
//! snapshot store that owns the version state machine. Every mutation runs
//! under one `&mut self` borrow, so the single-latest and single-published
//! invariants per template name hold between calls.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::project::{is_blank_record, DynamicTableRow, FixedFormValue, Project, ProjectId, Record};
use crate::rules::is_self_referential;
use crate::templates::{
    ChapterAsset, ChapterId, ConditionalRule, FieldDefinition, FieldId, FieldType, RuleId, Section,
    SectionId, SheetDefinition, SheetId, SheetKind, Template, TemplateId, TemplateStatus,
    ValidationRule,
};
use crate::STORE_FORMAT_VERSION;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown template id: {0}")]
    UnknownTemplate(TemplateId),

    #[error("Unknown section id: {0}")]
    UnknownSection(SectionId),

    #[error("Unknown sheet id: {0}")]
    UnknownSheet(SheetId),

    #[error("Unknown chapter id: {0}")]
    UnknownChapter(ChapterId),

    #[error("Unknown project id: {0}")]
    UnknownProject(ProjectId),

    #[error("Unknown field id: {0}")]
    UnknownField(FieldId),

    #[error("Unknown rule id: {0}")]
    UnknownRule(RuleId),

    #[error("Template name must not be empty")]
    BlankName,

    #[error("Template '{0}' already exists")]
    DuplicateTemplate(String),

    #[error("Field '{name}' already exists in sheet {sheet}")]
    DuplicateField { sheet: SheetId, name: String },

    #[error("Cannot delete V{version} of '{name}': it is the latest version")]
    LatestVersion { name: String, version: u32 },

    #[error("Cannot delete V{version} of '{name}': it is the published version")]
    PublishedVersion { name: String, version: u32 },

    #[error("Template '{0}' still has a published version")]
    HasPublishedVersion(String),

    #[error("Chapter {chapter} is already linked to sheet {sheet}")]
    ChapterAlreadyLinked { chapter: ChapterId, sheet: SheetId },

    #[error("Chapter {chapter} does not belong to the template of sheet {sheet}")]
    ChapterOutsideTemplate { chapter: ChapterId, sheet: SheetId },

    #[error("Sheet {sheet} is not a {expected:?} sheet")]
    WrongSheetKind { sheet: SheetId, expected: SheetKind },

    #[error("Conditional rule '{0}' targets its own trigger field")]
    SelfReferentialRule(String),

    #[error("Snapshot format {found} is not supported (engine reads {supported})")]
    IncompatibleFormat { found: String, supported: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read access to the template tree. Lists come back in `display_order`.
pub trait TemplateStore {
    fn template(&self, id: TemplateId) -> Option<Template>;
    fn templates_named(&self, name: &str) -> Vec<Template>;
    fn latest_templates(&self) -> Vec<Template>;
    fn sections(&self, template_id: TemplateId) -> Vec<Section>;
    fn chapters(&self, section_id: SectionId) -> Vec<ChapterAsset>;
    fn chapter(&self, id: ChapterId) -> Option<ChapterAsset>;
    fn sheets(&self, section_id: SectionId) -> Vec<SheetDefinition>;
    fn sheet(&self, id: SheetId) -> Option<SheetDefinition>;
    fn fields(&self, sheet_id: SheetId) -> Vec<FieldDefinition>;
    fn validation_rules(&self, field_id: FieldId) -> Vec<ValidationRule>;
    /// Ordered by id
    fn conditional_rules(&self, sheet_id: SheetId) -> Vec<ConditionalRule>;
}

/// Read access to the data filled in for projects.
pub trait ProjectDataStore {
    fn project(&self, id: ProjectId) -> Option<Project>;
    fn fixed_values(&self, project_id: ProjectId, sheet_id: SheetId) -> Vec<FixedFormValue>;
    /// Ordered by `display_order`
    fn table_rows(&self, project_id: ProjectId, sheet_id: SheetId) -> Vec<DynamicTableRow>;
}

pub fn supported_format() -> semver::Version {
    // Constant is checked by `test_supported_format_parses`.
    semver::Version::parse(STORE_FORMAT_VERSION).unwrap_or_else(|_| semver::Version::new(1, 0, 0))
}

/// Serializable content of a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: semver::Version,
    #[serde(default = "first_id")]
    pub next_id: i64,
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub chapters: Vec<ChapterAsset>,
    #[serde(default)]
    pub sheets: Vec<SheetDefinition>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub conditional_rules: Vec<ConditionalRule>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub fixed_values: Vec<FixedFormValue>,
    #[serde(default)]
    pub table_rows: Vec<DynamicTableRow>,
}

fn first_id() -> i64 { 1 }

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            format_version: supported_format(),
            next_id: first_id(),
            templates: vec![],
            sections: vec![],
            chapters: vec![],
            sheets: vec![],
            fields: vec![],
            validation_rules: vec![],
            conditional_rules: vec![],
            projects: vec![],
            fixed_values: vec![],
            table_rows: vec![],
        }
    }
}

/// In-memory store backed by a JSON snapshot.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    data: Snapshot,
}

fn ordered<T: Clone>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> (i32, i64)) -> Vec<T> {
    let mut out: Vec<T> = items.collect();
    out.sort_by_key(|item| key(item));
    out
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(data: Snapshot) -> Result<Self, StoreError> {
        let supported = supported_format();
        if data.format_version.major != supported.major || data.format_version > supported {
            return Err(StoreError::IncompatibleFormat {
                found: data.format_version.to_string(),
                supported: supported.to_string(),
            });
        }
        let mut store = Self { data };
        // Ids in hand-edited snapshots may run ahead of the counter.
        let max_id = store.max_id();
        if store.data.next_id <= max_id {
            store.data.next_id = max_id + 1;
        }
        Ok(store)
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        Self::from_snapshot(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path)?;
        let store = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            templates = store.data.templates.len(),
            projects = store.data.projects.len(),
            "loaded store snapshot"
        );
        Ok(store)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.data)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        fs::write(path, self.to_json()?)?;
        debug!(path = %path.display(), "saved store snapshot");
        Ok(())
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.data
    }

    fn max_id(&self) -> i64 {
        let d = &self.data;
        d.templates.iter().map(|t| t.id)
            .chain(d.sections.iter().map(|s| s.id))
            .chain(d.chapters.iter().map(|c| c.id))
            .chain(d.sheets.iter().map(|s| s.id))
            .chain(d.fields.iter().map(|f| f.id))
            .chain(d.validation_rules.iter().map(|r| r.id))
            .chain(d.conditional_rules.iter().map(|r| r.id))
            .chain(d.projects.iter().map(|p| p.id))
            .max()
            .unwrap_or(0)
    }

    fn allocate(&mut self) -> i64 {
        let id = self.data.next_id;
        self.data.next_id += 1;
        id
    }

    fn template_mut(&mut self, id: TemplateId) -> Result<&mut Template, StoreError> {
        self.data.templates.iter_mut().find(|t| t.id == id).ok_or(StoreError::UnknownTemplate(id))
    }

    fn template_of_section(&self, section_id: SectionId) -> Option<TemplateId> {
        self.data.sections.iter().find(|s| s.id == section_id).map(|s| s.template_id)
    }

    // --- Template version state machine ---

    /// Create version 1 of a new template name as the latest draft.
    pub fn create_template(&mut self, name: &str) -> Result<TemplateId, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::BlankName);
        }
        if self.data.templates.iter().any(|t| t.name == name && t.is_latest) {
            return Err(StoreError::DuplicateTemplate(name.to_string()));
        }
        let display_order = self.data.templates.iter()
            .filter(|t| t.is_latest)
            .map(|t| t.display_order)
            .max()
            .map_or(0, |m| m + 1);
        let id = self.allocate();
        self.data.templates.push(Template {
            id,
            name: name.to_string(),
            version: 1,
            status: TemplateStatus::Draft,
            is_latest: true,
            parent_id: None,
            display_order,
            created_at: chrono::Utc::now(),
        });
        info!(template_id = id, name, "created template");
        Ok(id)
    }

    /// Deep-copy a version into a new latest draft with fresh ids throughout.
    pub fn clone_version(&mut self, template_id: TemplateId) -> Result<TemplateId, StoreError> {
        let source = self.template(template_id).ok_or(StoreError::UnknownTemplate(template_id))?;
        let next_version = self.data.templates.iter()
            .filter(|t| t.name == source.name)
            .map(|t| t.version)
            .max()
            .unwrap_or(0) + 1;

        for t in self.data.templates.iter_mut().filter(|t| t.name == source.name) {
            t.is_latest = false;
        }

        let new_id = self.allocate();
        self.data.templates.push(Template {
            id: new_id,
            name: source.name.clone(),
            version: next_version,
            status: TemplateStatus::Draft,
            is_latest: true,
            parent_id: Some(source.id),
            display_order: source.display_order,
            created_at: chrono::Utc::now(),
        });

        let mut chapter_map: HashMap<ChapterId, ChapterId> = HashMap::new();
        let mut new_sheets: Vec<SheetId> = vec![];

        for section in self.sections(source.id) {
            let section_id = self.allocate();
            self.data.sections.push(Section { id: section_id, template_id: new_id, ..section.clone() });

            for chapter in self.chapters(section.id) {
                let chapter_id = self.allocate();
                chapter_map.insert(chapter.id, chapter_id);
                self.data.chapters.push(ChapterAsset { id: chapter_id, section_id, ..chapter });
            }

            for sheet in self.sheets(section.id) {
                let sheet_id = self.allocate();
                new_sheets.push(sheet_id);
                let fields = self.fields(sheet.id);
                let rules = self.conditional_rules(sheet.id);
                self.data.sheets.push(SheetDefinition { id: sheet_id, section_id, ..sheet });

                for field in fields {
                    let field_id = self.allocate();
                    let validation = self.validation_rules(field.id);
                    self.data.fields.push(FieldDefinition { id: field_id, sheet_id, ..field });
                    for rule in validation {
                        let rule_id = self.allocate();
                        self.data.validation_rules.push(ValidationRule { id: rule_id, field_id, ..rule });
                    }
                }
                for rule in rules {
                    let rule_id = self.allocate();
                    self.data.conditional_rules.push(ConditionalRule { id: rule_id, sheet_id, ..rule });
                }
            }
        }

        for sheet in self.data.sheets.iter_mut().filter(|s| new_sheets.contains(&s.id)) {
            sheet.chapter_asset_id = sheet.chapter_asset_id.and_then(|old| chapter_map.get(&old).copied());
        }

        info!(
            source_id = source.id,
            template_id = new_id,
            name = %source.name,
            version = next_version,
            "cloned template version"
        );
        Ok(new_id)
    }

    /// Publishing demotes every other version of the same name to draft.
    pub fn set_status(&mut self, template_id: TemplateId, status: TemplateStatus) -> Result<(), StoreError> {
        let name = self.template_mut(template_id)?.name.clone();
        if status == TemplateStatus::Published {
            for t in self.data.templates.iter_mut().filter(|t| t.name == name && t.id != template_id) {
                t.status = TemplateStatus::Draft;
            }
        }
        self.template_mut(template_id)?.status = status;
        info!(template_id, name = %name, ?status, "template status changed");
        Ok(())
    }

    /// Make one version the latest for its name.
    pub fn activate(&mut self, template_id: TemplateId) -> Result<(), StoreError> {
        let name = self.template_mut(template_id)?.name.clone();
        for t in self.data.templates.iter_mut().filter(|t| t.name == name) {
            t.is_latest = t.id == template_id;
        }
        info!(template_id, name = %name, "activated template version");
        Ok(())
    }

    pub fn delete_version(&mut self, template_id: TemplateId) -> Result<(), StoreError> {
        let template = self.template(template_id).ok_or(StoreError::UnknownTemplate(template_id))?;
        if template.is_latest {
            return Err(StoreError::LatestVersion { name: template.name, version: template.version });
        }
        if template.is_published() {
            return Err(StoreError::PublishedVersion { name: template.name, version: template.version });
        }
        self.remove_subtree(template_id);
        info!(template_id, name = %template.name, version = template.version, "deleted template version");
        Ok(())
    }

    pub fn delete_by_name(&mut self, name: &str) -> Result<usize, StoreError> {
        let versions = self.templates_named(name);
        if versions.iter().any(Template::is_published) {
            return Err(StoreError::HasPublishedVersion(name.to_string()));
        }
        for t in &versions {
            self.remove_subtree(t.id);
        }
        info!(name, versions = versions.len(), "deleted template");
        Ok(versions.len())
    }

    fn remove_subtree(&mut self, template_id: TemplateId) {
        let d = &mut self.data;
        let sections: Vec<SectionId> = d.sections.iter().filter(|s| s.template_id == template_id).map(|s| s.id).collect();
        let sheets: Vec<SheetId> = d.sheets.iter().filter(|s| sections.contains(&s.section_id)).map(|s| s.id).collect();
        let fields: Vec<FieldId> = d.fields.iter().filter(|f| sheets.contains(&f.sheet_id)).map(|f| f.id).collect();

        d.validation_rules.retain(|r| !fields.contains(&r.field_id));
        d.conditional_rules.retain(|r| !sheets.contains(&r.sheet_id));
        d.fields.retain(|f| !sheets.contains(&f.sheet_id));
        d.sheets.retain(|s| !sections.contains(&s.section_id));
        d.chapters.retain(|c| !sections.contains(&c.section_id));
        d.sections.retain(|s| s.template_id != template_id);
        d.templates.retain(|t| t.id != template_id);
    }

    // --- Tree building (admin CRUD surface) ---

    pub fn add_section(&mut self, template_id: TemplateId, name: &str, display_order: i32) -> Result<SectionId, StoreError> {
        self.template_mut(template_id)?;
        let id = self.allocate();
        self.data.sections.push(Section { id, template_id, name: name.to_string(), display_order });
        Ok(id)
    }

    pub fn add_chapter(
        &mut self,
        section_id: SectionId,
        filename: &str,
        storage_locator: &str,
        display_order: i32,
    ) -> Result<ChapterId, StoreError> {
        self.template_of_section(section_id).ok_or(StoreError::UnknownSection(section_id))?;
        let id = self.allocate();
        self.data.chapters.push(ChapterAsset {
            id,
            section_id,
            filename: filename.to_string(),
            storage_locator: storage_locator.to_string(),
            display_order,
        });
        Ok(id)
    }

    pub fn add_sheet(
        &mut self,
        section_id: SectionId,
        name: &str,
        kind: SheetKind,
        display_order: i32,
        model_identifier: Option<&str>,
    ) -> Result<SheetId, StoreError> {
        self.template_of_section(section_id).ok_or(StoreError::UnknownSection(section_id))?;
        let id = self.allocate();
        self.data.sheets.push(SheetDefinition {
            id,
            section_id,
            name: name.to_string(),
            kind,
            display_order,
            model_identifier: model_identifier.map(str::to_string),
            chapter_asset_id: None,
        });
        Ok(id)
    }

    /// Bind a chapter to a sheet. A chapter may be claimed by one sheet only.
    pub fn link_chapter(&mut self, sheet_id: SheetId, chapter_id: Option<ChapterId>) -> Result<(), StoreError> {
        let sheet = self.sheet(sheet_id).ok_or(StoreError::UnknownSheet(sheet_id))?;
        if let Some(chapter_id) = chapter_id {
            let chapter = self.chapter(chapter_id).ok_or(StoreError::UnknownChapter(chapter_id))?;
            if self.template_of_section(chapter.section_id) != self.template_of_section(sheet.section_id) {
                return Err(StoreError::ChapterOutsideTemplate { chapter: chapter_id, sheet: sheet_id });
            }
            if let Some(holder) = self.data.sheets.iter()
                .find(|s| s.id != sheet_id && s.chapter_asset_id == Some(chapter_id))
            {
                return Err(StoreError::ChapterAlreadyLinked { chapter: chapter_id, sheet: holder.id });
            }
        }
        if let Some(s) = self.data.sheets.iter_mut().find(|s| s.id == sheet_id) {
            s.chapter_asset_id = chapter_id;
        }
        Ok(())
    }

    pub fn add_field(&mut self, field: NewField) -> Result<FieldId, StoreError> {
        self.sheet(field.sheet_id).ok_or(StoreError::UnknownSheet(field.sheet_id))?;
        if self.data.fields.iter().any(|f| f.sheet_id == field.sheet_id && f.name == field.name) {
            return Err(StoreError::DuplicateField { sheet: field.sheet_id, name: field.name });
        }
        let id = self.allocate();
        self.data.fields.push(FieldDefinition {
            id,
            sheet_id: field.sheet_id,
            name: field.name,
            label: field.label,
            field_type: field.field_type,
            options: field.options,
            default_value: field.default_value,
            help_tip: None,
            export_as_label_in_document: field.export_as_label,
            display_order: field.display_order,
        });
        Ok(id)
    }

    pub fn add_validation_rule(
        &mut self,
        field_id: FieldId,
        rule_type: &str,
        rule_value: Option<&str>,
        message: Option<&str>,
    ) -> Result<RuleId, StoreError> {
        if !self.data.fields.iter().any(|f| f.id == field_id) {
            return Err(StoreError::UnknownField(field_id));
        }
        let id = self.allocate();
        self.data.validation_rules.push(ValidationRule {
            id,
            field_id,
            rule_type: rule_type.to_string(),
            rule_value: rule_value.map(str::to_string),
            message: message.map(str::to_string),
        });
        Ok(id)
    }

    /// Rejects rules whose trigger field is also one of their targets.
    pub fn add_conditional_rule(
        &mut self,
        sheet_id: SheetId,
        name: &str,
        definition: serde_json::Value,
    ) -> Result<RuleId, StoreError> {
        self.sheet(sheet_id).ok_or(StoreError::UnknownSheet(sheet_id))?;
        if is_self_referential(&definition) {
            return Err(StoreError::SelfReferentialRule(name.to_string()));
        }
        let id = self.allocate();
        self.data.conditional_rules.push(ConditionalRule { id, sheet_id, name: name.to_string(), definition });
        Ok(id)
    }

    pub fn update_conditional_rule(&mut self, rule_id: RuleId, definition: serde_json::Value) -> Result<(), StoreError> {
        let rule = self.data.conditional_rules.iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or(StoreError::UnknownRule(rule_id))?;
        if is_self_referential(&definition) {
            return Err(StoreError::SelfReferentialRule(rule.name.clone()));
        }
        rule.definition = definition;
        Ok(())
    }

    // --- Project data ---

    pub fn add_project(&mut self, name: &str, number: &str, template_name: &str) -> ProjectId {
        let id = self.allocate();
        self.data.projects.push(Project {
            id,
            name: name.to_string(),
            number: number.to_string(),
            template_name: template_name.to_string(),
            created_at: chrono::Utc::now(),
        });
        id
    }

    pub fn delete_project(&mut self, project_id: ProjectId) -> Result<(), StoreError> {
        if !self.data.projects.iter().any(|p| p.id == project_id) {
            return Err(StoreError::UnknownProject(project_id));
        }
        self.data.fixed_values.retain(|v| v.project_id != project_id);
        self.data.table_rows.retain(|r| r.project_id != project_id);
        self.data.projects.retain(|p| p.id != project_id);
        Ok(())
    }

    /// Replace a fixed-form sheet's values. Empty values are not stored.
    pub fn save_fixed_form<'a>(
        &mut self,
        project_id: ProjectId,
        sheet_id: SheetId,
        values: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<usize, StoreError> {
        self.expect_sheet(project_id, sheet_id, SheetKind::FixedForm)?;
        self.data.fixed_values.retain(|v| !(v.project_id == project_id && v.sheet_id == sheet_id));
        let before = self.data.fixed_values.len();
        for (field_name, value) in values {
            if value.is_empty() {
                continue;
            }
            self.data.fixed_values.push(FixedFormValue {
                project_id,
                sheet_id,
                field_name: field_name.to_string(),
                value: value.to_string(),
            });
        }
        let stored = self.data.fixed_values.len() - before;
        debug!(project_id, sheet_id, stored, "saved fixed form");
        Ok(stored)
    }

    /// Replace a dynamic table's rows. Blank records are dropped.
    pub fn save_table_rows(
        &mut self,
        project_id: ProjectId,
        sheet_id: SheetId,
        records: Vec<Record>,
    ) -> Result<usize, StoreError> {
        self.expect_sheet(project_id, sheet_id, SheetKind::DynamicTable)?;
        self.data.table_rows.retain(|r| !(r.project_id == project_id && r.sheet_id == sheet_id));
        let mut order = 0;
        for record in records.into_iter().filter(|r| !is_blank_record(r)) {
            self.data.table_rows.push(DynamicTableRow { project_id, sheet_id, record, display_order: order });
            order += 1;
        }
        debug!(project_id, sheet_id, rows = order, "saved table rows");
        Ok(order as usize)
    }

    fn expect_sheet(&self, project_id: ProjectId, sheet_id: SheetId, kind: SheetKind) -> Result<(), StoreError> {
        if !self.data.projects.iter().any(|p| p.id == project_id) {
            return Err(StoreError::UnknownProject(project_id));
        }
        let sheet = self.sheet(sheet_id).ok_or(StoreError::UnknownSheet(sheet_id))?;
        if sheet.kind != kind {
            return Err(StoreError::WrongSheetKind { sheet: sheet_id, expected: kind });
        }
        Ok(())
    }
}

/// Field creation payload.
#[derive(Debug, Clone)]
pub struct NewField {
    pub sheet_id: SheetId,
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub options: Vec<crate::templates::ChoiceOption>,
    pub default_value: Option<String>,
    pub export_as_label: bool,
    pub display_order: i32,
}

impl NewField {
    pub fn new(sheet_id: SheetId, name: &str, label: &str, field_type: FieldType, display_order: i32) -> Self {
        Self {
            sheet_id,
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            options: vec![],
            default_value: None,
            export_as_label: false,
            display_order,
        }
    }

    pub fn with_options(mut self, options: &[(&str, &str)], export_as_label: bool) -> Self {
        self.options = options
            .iter()
            .map(|(label, value)| crate::templates::ChoiceOption {
                label: label.to_string(),
                value: value.to_string(),
            })
            .collect();
        self.export_as_label = export_as_label;
        self
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default_value = Some(default.to_string());
        self
    }
}

impl TemplateStore for MemoryStore {
    fn template(&self, id: TemplateId) -> Option<Template> {
        self.data.templates.iter().find(|t| t.id == id).cloned()
    }

    fn templates_named(&self, name: &str) -> Vec<Template> {
        let mut out: Vec<Template> = self.data.templates.iter().filter(|t| t.name == name).cloned().collect();
        out.sort_by_key(|t| t.version);
        out
    }

    fn latest_templates(&self) -> Vec<Template> {
        ordered(self.data.templates.iter().filter(|t| t.is_latest).cloned(), |t| (t.display_order, t.id))
    }

    fn sections(&self, template_id: TemplateId) -> Vec<Section> {
        ordered(
            self.data.sections.iter().filter(|s| s.template_id == template_id).cloned(),
            |s| (s.display_order, s.id),
        )
    }

    fn chapters(&self, section_id: SectionId) -> Vec<ChapterAsset> {
        ordered(
            self.data.chapters.iter().filter(|c| c.section_id == section_id).cloned(),
            |c| (c.display_order, c.id),
        )
    }

    fn chapter(&self, id: ChapterId) -> Option<ChapterAsset> {
        self.data.chapters.iter().find(|c| c.id == id).cloned()
    }

    fn sheets(&self, section_id: SectionId) -> Vec<SheetDefinition> {
        ordered(
            self.data.sheets.iter().filter(|s| s.section_id == section_id).cloned(),
            |s| (s.display_order, s.id),
        )
    }

    fn sheet(&self, id: SheetId) -> Option<SheetDefinition> {
        self.data.sheets.iter().find(|s| s.id == id).cloned()
    }

    fn fields(&self, sheet_id: SheetId) -> Vec<FieldDefinition> {
        ordered(
            self.data.fields.iter().filter(|f| f.sheet_id == sheet_id).cloned(),
            |f| (f.display_order, f.id),
        )
    }

    fn validation_rules(&self, field_id: FieldId) -> Vec<ValidationRule> {
        ordered(self.data.validation_rules.iter().filter(|r| r.field_id == field_id).cloned(), |r| (0, r.id))
    }

    fn conditional_rules(&self, sheet_id: SheetId) -> Vec<ConditionalRule> {
        ordered(self.data.conditional_rules.iter().filter(|r| r.sheet_id == sheet_id).cloned(), |r| (0, r.id))
    }
}

impl ProjectDataStore for MemoryStore {
    fn project(&self, id: ProjectId) -> Option<Project> {
        self.data.projects.iter().find(|p| p.id == id).cloned()
    }

    fn fixed_values(&self, project_id: ProjectId, sheet_id: SheetId) -> Vec<FixedFormValue> {
        self.data.fixed_values.iter()
            .filter(|v| v.project_id == project_id && v.sheet_id == sheet_id)
            .cloned()
            .collect()
    }

    fn table_rows(&self, project_id: ProjectId, sheet_id: SheetId) -> Vec<DynamicTableRow> {
        let mut rows: Vec<DynamicTableRow> = self.data.table_rows.iter()
            .filter(|r| r.project_id == project_id && r.sheet_id == sheet_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.display_order);
        rows
    }
}
