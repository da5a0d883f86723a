//! Engine Configuration
//!
//! Sources, highest priority last:
//! 1. Built-in defaults
//! 2. `docforge.toml` in the working directory, or an explicit file
//! 3. Environment variables (`DOCFORGE_*`, `__` separates nested keys)
//!
//! `DOCFORGE_PREVIEW__MASK` maps to `preview.mask`, and so on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::table::Column;

pub const DEFAULT_CONFIG_FILE: &str = "docforge.toml";
pub const ENV_PREFIX: &str = "DOCFORGE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

fn default_mask() -> String {
    "**********".to_string()
}

fn default_divider() -> String {
    r#"<hr class="chapter-divider"/>"#.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreviewConfig {
    /// Shown in place of values when no project data exists
    #[serde(default = "default_mask")]
    pub mask: String,

    /// Markup placed between chapters
    #[serde(default = "default_divider")]
    pub divider: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { mask: default_mask(), divider: default_divider() }
    }
}

fn default_table_style() -> String {
    "TableGrid".to_string()
}

fn default_empty_document_text() -> String {
    "This template has no chapters to export.".to_string()
}

fn default_missing_chapter_text() -> String {
    "[Warning: chapter '{filename}' could not be loaded]".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComposeConfig {
    /// Table style id applied to injected tables
    #[serde(default = "default_table_style")]
    pub table_style: String,

    /// Sole paragraph of a document composed from zero chapters
    #[serde(default = "default_empty_document_text")]
    pub empty_document_text: String,

    /// Replaces an unreadable chapter; `{filename}` is substituted
    #[serde(default = "default_missing_chapter_text")]
    pub missing_chapter_text: String,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            table_style: default_table_style(),
            empty_document_text: default_empty_document_text(),
            missing_chapter_text: default_missing_chapter_text(),
        }
    }
}

impl ComposeConfig {
    pub fn missing_chapter_message(&self, filename: &str) -> String {
        self.missing_chapter_text.replace("{filename}", filename)
    }
}

/// Record shape of a known dynamic-table model.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RecordSchema {
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// Model identifier -> record schema.
///
/// Sheets whose `model_identifier` is registered take their table columns
/// from here instead of from their field definitions.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, RecordSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model_identifier: &str, columns: Vec<Column>) {
        self.schemas.insert(model_identifier.to_string(), RecordSchema { columns });
    }

    pub fn get(&self, model_identifier: &str) -> Option<&RecordSchema> {
        self.schemas.get(model_identifier)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (id, schema) in &self.schemas {
            if schema.columns.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("schemas.{}", id),
                    reason: "at least one column is required".to_string(),
                });
            }
            let mut seen = std::collections::BTreeSet::new();
            if let Some(dup) = schema.columns.iter().find(|c| !seen.insert(c.name.as_str())) {
                return Err(ConfigError::InvalidValue {
                    field: format!("schemas.{}", id),
                    reason: format!("duplicate column '{}'", dup.name),
                });
            }
        }
        Ok(())
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("docforge-store.json")
}

fn default_assets_root() -> PathBuf {
    PathBuf::from("assets")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// JSON snapshot holding templates and project data
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Base directory for chapter storage locators
    #[serde(default = "default_assets_root")]
    pub assets_root: PathBuf,

    #[serde(default)]
    pub preview: PreviewConfig,

    #[serde(default)]
    pub compose: ComposeConfig,

    #[serde(default)]
    pub schemas: SchemaRegistry,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            assets_root: default_assets_root(),
            preview: PreviewConfig::default(),
            compose: ComposeConfig::default(),
            schemas: SchemaRegistry::default(),
        }
    }
}

impl EngineConfig {
    /// Load from defaults, the config file and the environment.
    ///
    /// An explicit `file` must exist; the default `docforge.toml` is optional.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = file {
            if !path.exists() {
                return Err(ConfigError::InvalidValue {
                    field: "config".to_string(),
                    reason: format!("{} does not exist", path.display()),
                });
            }
        }
        let config: Self = Self::figment(file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the provider chain.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let path = file.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compose.table_style.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "compose.table_style".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.schemas.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.preview.mask, "**********");
        assert_eq!(config.compose.table_style, "TableGrid");
        assert!(config.schemas.is_empty());
        assert_eq!(
            config.compose.missing_chapter_message("b.docx"),
            "[Warning: chapter 'b.docx' could not be loaded]"
        );
    }

    #[test]
    fn test_toml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                    assets_root = "chapters"

                    [preview]
                    mask = "????"

                    [schemas.bidders]
                    columns = [
                        { name = "company", label = "Company" },
                        { name = "amount", label = "Amount" },
                    ]
                "#,
            )?;
            jail.set_env("DOCFORGE_PREVIEW__MASK", "~~~");
            jail.set_env("DOCFORGE_COMPOSE__TABLE_STYLE", "LightList");

            let config = EngineConfig::load(None).expect("config loads");
            assert_eq!(config.assets_root, PathBuf::from("chapters"));
            assert_eq!(config.preview.mask, "~~~");
            assert_eq!(config.compose.table_style, "LightList");
            assert_eq!(config.preview.divider, default_divider());
            let schema = config.schemas.get("bidders").expect("registered");
            assert_eq!(schema.columns[1], Column::new("amount", "Amount"));
            Ok(())
        });
    }

    #[test]
    fn test_file_values_apply_verbatim() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#####"
                    [preview]
                    mask = "####"
                    divider = "<hr/>"
                "#####,
            )?;
            let config = EngineConfig::load(None).expect("config loads");
            assert_eq!(config.preview.mask, "####");
            assert_eq!(config.preview.divider, "<hr/>");
            assert_eq!(config.compose.table_style, "TableGrid");
            Ok(())
        });
    }

    #[test]
    fn test_rejects_empty_schema() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[schemas.empty]\ncolumns = []\n")?;
            let err = EngineConfig::load(Some(Path::new("custom.toml"))).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        Jail::expect_with(|_jail| {
            assert!(EngineConfig::load(Some(Path::new("nope.toml"))).is_err());
            Ok(())
        });
    }
}
