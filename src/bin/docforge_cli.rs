//! DocForge CLI - Bridge interface for the web application
//!
//! Commands: templates, forms, validate, compose, preview, sheet-preview,
//! check-rule, clone, publish, activate
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation failure or a rejected rule, 1 on other errors

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use docforge_core::{
    CompositionPipeline, EngineConfig, FsAssetSource, MemoryStore, TemplateStatus,
    ENGINE_VERSION,
};

#[derive(Parser)]
#[command(name = "docforge-cli")]
#[command(about = "DocForge CLI - Template-Driven Document Composition")]
#[command(version = ENGINE_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./docforge.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr (DOCFORGE_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List published templates
    Templates,

    /// Form configuration of a template's active version
    Forms {
        #[arg(short, long)]
        template: String,
    },

    /// Validate a sheet submission
    Validate {
        #[arg(short, long)]
        sheet: i64,

        /// JSON object (fixed form) or array of records (dynamic table)
        #[arg(short, long)]
        payload: String,
    },

    /// Compose a project's document
    Compose {
        #[arg(short, long)]
        project: i64,

        #[arg(short, long)]
        template: String,

        /// Write the .docx here (a directory gets the suggested filename)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// HTML preview of a template, with or without project data
    Preview {
        #[arg(short, long)]
        template: String,

        #[arg(short, long)]
        project: Option<i64>,
    },

    /// HTML preview of a single sheet
    SheetPreview {
        #[arg(short, long)]
        sheet: i64,

        #[arg(short, long)]
        project: Option<i64>,
    },

    /// Check a conditional rule definition for self-reference
    CheckRule {
        /// JSON rule definition
        #[arg(short, long)]
        definition: String,
    },

    /// Clone a template version into a new draft
    Clone {
        #[arg(long)]
        template_id: i64,
    },

    /// Publish a template version
    Publish {
        #[arg(long)]
        template_id: i64,
    },

    /// Make a template version the latest
    Activate {
        #[arg(long)]
        template_id: i64,
    },
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("DOCFORGE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to initialize logging: {}", e);
    }
}

fn emit(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => println!("{}", json!({"success": false, "error": e.to_string()})),
    }
}

fn fail(error: impl ToString) -> ExitCode {
    emit(&json!({"success": false, "error": error.to_string()}));
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match EngineConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => return fail(format!("Failed to load config: {}", e)),
    };

    // Rule checks need no store.
    if let Commands::CheckRule { definition } = &cli.command {
        let definition: serde_json::Value = match serde_json::from_str(definition) {
            Ok(d) => d,
            Err(e) => return fail(format!("Invalid definition: {}", e)),
        };
        let self_referential = docforge_core::is_self_referential(&definition);
        emit(&json!({"self_referential": self_referential}));
        return if self_referential { ExitCode::from(2) } else { ExitCode::SUCCESS };
    }

    let store_path = config.store_path.clone();
    let store = match MemoryStore::load(&store_path) {
        Ok(s) => s,
        Err(e) => return fail(format!("Failed to load store {}: {}", store_path.display(), e)),
    };
    let assets = FsAssetSource::new(config.assets_root.clone());
    let mut pipeline = CompositionPipeline::new(store, assets, config);

    match cli.command {
        Commands::Templates => {
            let templates: Vec<_> = pipeline
                .published_templates()
                .iter()
                .map(|t| json!({
                    "id": t.id,
                    "name": t.name,
                    "version": t.version,
                    "display_order": t.display_order,
                }))
                .collect();
            emit(&templates);
            ExitCode::SUCCESS
        }

        Commands::Forms { template } => match pipeline.resolve_forms(&template) {
            Ok(tree) => {
                emit(&tree);
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },

        Commands::Validate { sheet, payload } => {
            let payload: serde_json::Value = match serde_json::from_str(&payload) {
                Ok(p) => p,
                Err(e) => return fail(format!("Invalid payload: {}", e)),
            };
            match pipeline.validate_submission(sheet, &payload) {
                Ok(result) => {
                    emit(&result);
                    if result.valid {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2) // Validation failure
                    }
                }
                Err(e) => fail(e),
            }
        }

        Commands::Compose { project, template, out } => {
            let document = match pipeline.compose(project, &template) {
                Ok(d) => d,
                Err(e) => return fail(e),
            };
            match out {
                Some(out) => {
                    let path = output_path(&out, &document.filename);
                    if let Err(e) = fs::write(&path, &document.bytes) {
                        return fail(format!("Failed to write {}: {}", path.display(), e));
                    }
                    info!(path = %path.display(), "document written");
                    emit(&json!({
                        "success": true,
                        "path": path,
                        "manifest": document.manifest,
                    }));
                }
                None => emit(&json!({
                    "success": true,
                    "filename": document.filename,
                    "manifest": document.manifest,
                    "document_base64": base64::engine::general_purpose::STANDARD.encode(&document.bytes),
                })),
            }
            ExitCode::SUCCESS
        }

        Commands::Preview { template, project } => match pipeline.render_preview(project, &template) {
            Ok(html) => {
                emit(&json!({"success": true, "html": html}));
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },

        Commands::SheetPreview { sheet, project } => match pipeline.render_sheet_preview(sheet, project) {
            Ok(html) => {
                emit(&json!({"success": true, "html": html}));
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },

        Commands::Clone { template_id } => {
            let result = pipeline.store_mut().clone_version(template_id);
            persist(&pipeline, &store_path, result.map(|id| json!({"success": true, "template_id": id})))
        }

        Commands::Publish { template_id } => {
            let result = pipeline.store_mut().set_status(template_id, TemplateStatus::Published);
            persist(&pipeline, &store_path, result.map(|_| json!({"success": true, "template_id": template_id})))
        }

        Commands::Activate { template_id } => {
            let result = pipeline.store_mut().activate(template_id);
            persist(&pipeline, &store_path, result.map(|_| json!({"success": true, "template_id": template_id})))
        }

        Commands::CheckRule { .. } => ExitCode::SUCCESS,
    }
}

fn output_path(out: &Path, filename: &str) -> PathBuf {
    if out.is_dir() {
        out.join(filename)
    } else {
        out.to_path_buf()
    }
}

fn persist<E: ToString>(
    pipeline: &CompositionPipeline<MemoryStore, FsAssetSource>,
    store_path: &Path,
    result: Result<serde_json::Value, E>,
) -> ExitCode {
    let output = match result {
        Ok(output) => output,
        Err(e) => return fail(e),
    };
    if let Err(e) = pipeline.store().save(store_path) {
        return fail(format!("Failed to save store: {}", e));
    }
    emit(&output);
    ExitCode::SUCCESS
}
