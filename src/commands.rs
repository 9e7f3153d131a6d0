//! CLI command implementations.
//!
//! Each `run_*` function backs one `atb` subcommand. Results go to stdout
//! (JSON where the output is structured); progress and diagnostics go
//! through `tracing` to stderr.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::{DispatchEngine, DispatchResult};
use crate::editor::ModuleEditor;
use crate::provision::{metadata_template, provision, FileBundle, ProvisionRequest};
use crate::registry::Registry;
use crate::schema::UploadedFile;
use crate::session::FormSession;
use crate::store::{self, DocumentStore};

fn open_registry(cfg: &Config) -> Result<Registry> {
    let store = store::from_config(cfg)?;
    Ok(Registry::new(store, cfg))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `atb catalog`: print the catalog tree, or a flat listing with `--flat`.
pub async fn run_catalog(cfg: &Config, flat: bool) -> Result<()> {
    let snapshot = open_registry(cfg)?.load().await?;
    if flat {
        for (path, schema) in snapshot.catalog.leaves() {
            let endpoint = snapshot
                .endpoints
                .get(&path.sub_module)
                .unwrap_or("(no endpoint)");
            println!(
                "{} / {} / {}  [{} params]  {}",
                path.category,
                path.group,
                path.sub_module,
                schema.parameters.len(),
                endpoint
            );
        }
        for (path, reason) in snapshot.catalog.invalid_leaves() {
            println!(
                "{} / {} / {}  [invalid schema: {}]",
                path.category, path.group, path.sub_module, reason
            );
        }
        return Ok(());
    }
    print_json(&snapshot.catalog)
}

/// `atb endpoints`
pub async fn run_endpoints(cfg: &Config) -> Result<()> {
    let endpoints = open_registry(cfg)?.fetch_endpoints().await?.value;
    print_json(&endpoints)
}

/// `atb metadata <sub-module>`
pub async fn run_metadata(cfg: &Config, sub_module: &str) -> Result<()> {
    let endpoints = open_registry(cfg)?.fetch_endpoints().await?.value;
    let engine = DispatchEngine::new(&cfg.dispatch)?;
    let metadata = engine.fetch_metadata(sub_module, &endpoints).await?;
    print_json(&metadata)
}

/// Options for `atb dispatch`.
pub struct DispatchArgs {
    pub sub_module: String,
    pub file: PathBuf,
    pub params: Vec<(String, String)>,
    pub query: Option<String>,
    pub out_dir: PathBuf,
    pub rename: Option<String>,
}

/// `atb dispatch`: submit one form and save the result.
pub async fn run_dispatch(cfg: &Config, args: DispatchArgs) -> Result<()> {
    let snapshot = open_registry(cfg)?.load().await?;
    let schema = snapshot.catalog.dispatchable(&args.sub_module)?;

    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut session = FormSession::new();
    session.select(args.sub_module.as_str());
    session.attach_file(UploadedFile::new(file_name, bytes))?;
    for (key, value) in args.params {
        session.set_value(key, value);
    }
    if let Some(query) = args.query {
        session.select_query_type(query);
    }

    let engine = DispatchEngine::new(&cfg.dispatch)?;
    let request = session.submit()?;
    let result = engine
        .dispatch(&request, schema, &snapshot.endpoints)
        .await?;

    if let DispatchResult::StructuredResult { json, .. } = &result {
        print_json(json)?;
    }
    let path = result
        .save_as(&args.out_dir, args.rename.as_deref())
        .with_context(|| format!("Failed to save result into {}", args.out_dir.display()))?;
    eprintln!("Saved {}", path.display());
    Ok(())
}

/// Options for `atb provision`.
pub struct ProvisionArgs {
    pub name: String,
    pub algorithm_type: String,
    pub category: String,
    pub schema: PathBuf,
    pub code: PathBuf,
    pub dockerfile: PathBuf,
    pub requirements: PathBuf,
    pub metadata: Option<PathBuf>,
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// `atb provision`: upload a module bundle and register it.
pub async fn run_provision(cfg: &Config, args: ProvisionArgs) -> Result<()> {
    let metadata = match &args.metadata {
        Some(path) => read_text(path)?,
        None => metadata_template(&args.name)?,
    };
    let request = ProvisionRequest {
        module_name: args.name.clone(),
        algorithm_type: args.algorithm_type,
        category: args.category,
        schema: read_text(&args.schema)?,
        files: FileBundle::standard(
            &args.name,
            &read_text(&args.code)?,
            &metadata,
            &read_text(&args.dockerfile)?,
            &read_text(&args.requirements)?,
        ),
    };

    let registry = open_registry(cfg)?;
    let report = provision(&registry, &request).await?;
    print_json(&report)
}

/// `atb reconcile [--repair]`. Exits non-zero when inconsistencies remain.
pub async fn run_reconcile(cfg: &Config, repair: bool) -> Result<()> {
    let report = open_registry(cfg)?.reconcile(repair).await?;
    print_json(&report)?;
    if !repair && !report.missing_endpoints.is_empty() {
        bail!(
            "{} catalog entries have no endpoint; rerun with --repair",
            report.missing_endpoints.len()
        );
    }
    Ok(())
}

fn open_editor(cfg: &Config) -> Result<(Arc<dyn DocumentStore>, ModuleEditor)> {
    let store = store::from_config(cfg)?;
    let editor = ModuleEditor::new(store.clone(), cfg)?;
    Ok((store, editor))
}

/// `atb editor list`
pub async fn run_editor_list(cfg: &Config) -> Result<()> {
    let (_, editor) = open_editor(cfg)?;
    for dir in editor.list_modules().await? {
        println!("{}", dir);
    }
    Ok(())
}

/// Accepts either a directory name or a sub-module name.
async fn resolve_dir(
    cfg: &Config,
    store: Arc<dyn DocumentStore>,
    editor: &ModuleEditor,
    target: &str,
) -> Result<String> {
    let endpoints = Registry::new(store, cfg).fetch_endpoints().await?.value;
    Ok(editor.resolve_dir(target, &endpoints).await?)
}

/// `atb editor show <module>`
pub async fn run_editor_show(cfg: &Config, target: &str) -> Result<()> {
    let (store, editor) = open_editor(cfg)?;
    let dir = resolve_dir(cfg, store, &editor, target).await?;
    let code = editor.read_code(&dir).await?;
    print!("{}", code.text);
    Ok(())
}

/// `atb editor save <module> <file>`
pub async fn run_editor_save(cfg: &Config, target: &str, file: &Path) -> Result<()> {
    let text = read_text(file)?;
    let (store, editor) = open_editor(cfg)?;
    let dir = resolve_dir(cfg, store, &editor, target).await?;
    let version = editor.save_code(&dir, &text).await?;
    println!("{}/{}.py saved at version {}", dir, dir, version);
    Ok(())
}

