//! DocForge Core - Template-Driven Document Composition
//!
//! # Ground Rules
//! 1. Templates are versioned; one published, latest version per name is live
//! 2. Placeholders are rewritten at run level; untouched text keeps its formatting
//! 3. Unresolved placeholders stay verbatim
//! 4. One bad chapter never loses the whole document
//! 5. Composition and preview never write to the store

pub mod templates;
pub mod project;
pub mod store;
pub mod rules;
pub mod values;
pub mod fragment;
pub mod placeholder;
pub mod table;
pub mod diagnostics;
pub mod resolver;
pub mod assets;
pub mod config;
pub mod hashing;
pub mod validation;
pub mod compose;
pub mod preview;
pub mod pipeline;

pub use templates::{FieldDefinition, FieldType, SheetDefinition, SheetKind, Template, TemplateStatus};
pub use project::{Project, ProjectId, Record};
pub use store::{MemoryStore, ProjectDataStore, StoreError, TemplateStore};
pub use rules::is_self_referential;
pub use values::resolve_display_value;
pub use fragment::{Document, FragmentError, Package};
pub use placeholder::{substitute_text, PlaceholderMap};
pub use table::{inject_table, Column};
pub use diagnostics::{Diagnostic, DiagnosticCode};
pub use resolver::{resolve, ResolvedTemplate};
pub use assets::{AssetError, AssetSource, FsAssetSource, MemoryAssets};
pub use config::{ConfigError, EngineConfig, SchemaRegistry};
pub use hashing::{canonical_json, compute_job_hash, compute_manifest_hash};
pub use validation::{ValidationResult, ValidationViolation, Validator, ViolationSeverity};
pub use compose::{ComposeError, ComposedDocument, Composer, CompositionManifest};
pub use preview::PreviewRenderer;
pub use pipeline::CompositionPipeline;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Version of the JSON snapshot layout read and written by `MemoryStore`
pub const STORE_FORMAT_VERSION: &str = "1.0.0";
