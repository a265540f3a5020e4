pub mod config;
pub mod document;
pub mod error;
pub mod layers;
pub mod merge;
pub mod render;
pub mod source;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RunConfig;
use crate::document::Value;
use crate::error::{Result, TerraforgeError};
use crate::layers::{load_layers, parse_overrides, DataLayer};
use crate::merge::merge_layers;
use crate::render::{build_catalog, execute_plan, plan_render, RenderPlan, WrittenTree};
use crate::source::resolve_source;

/// The merged context together with the layers it was folded from.
#[derive(Debug, Clone)]
pub struct MergedContext {
    pub layers: Vec<DataLayer>,
    pub document: Value,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub plan: RenderPlan,
    /// `None` for a dry run.
    pub written: Option<WrittenTree>,
    pub output_dir: PathBuf,
    pub commit_sha: Option<String>,
    pub layer_count: usize,
}

/// Load every data file, append the `--set` overrides as a final layer,
/// and fold them into one context.
pub fn load_context(data_files: &[PathBuf], overrides: &[String]) -> Result<MergedContext> {
    let mut layers = load_layers(data_files)?;
    if let Some(layer) = parse_overrides(layers.len(), overrides)? {
        layers.push(layer);
    }

    let document = merge_layers(&layers);
    info!(layers = layers.len(), "merged data layers");
    if tracing::enabled!(tracing::Level::DEBUG) {
        debug!(
            "merged context:\n{}",
            serde_json::to_string_pretty(&document).unwrap_or_default()
        );
    }

    Ok(MergedContext { layers, document })
}

/// Run the whole pipeline: resolve the source, build the catalog while the
/// data layers load and merge, render everything, then write the output.
///
/// Nothing is written unless every entry rendered. A git clone made for the
/// run is removed before this returns, whatever the outcome.
pub async fn run(config: &RunConfig) -> Result<RunReport> {
    let descriptor = config.source.clone();
    let source = blocking("resolving template source", move || resolve_source(&descriptor)).await?;
    let root = source.root().to_path_buf();
    info!(root = %root.display(), "template source resolved");

    let suffix = config.template_suffix.clone();
    let data_files = config.data_files.clone();
    let overrides = config.overrides.clone();
    let (catalog, context) = tokio::join!(
        blocking("building template catalog", move || build_catalog(&root, &suffix)),
        blocking("loading data layers", move || load_context(&data_files, &overrides)),
    );
    let context = context?;
    let catalog = catalog?;
    info!(
        root = %catalog.root.display(),
        entries = catalog.len(),
        templates = catalog.templates().count(),
        "template catalog built"
    );

    let plan = plan_render(
        Arc::new(catalog),
        Arc::new(context.document),
        config.concurrency,
    )
    .await?;

    let written = if config.dry_run {
        info!(files = plan.files.len(), "dry run, nothing written");
        None
    } else {
        let plan = plan.clone();
        let output_dir = config.output_dir.clone();
        Some(blocking("writing output", move || execute_plan(&plan, &output_dir)).await?)
    };

    let commit_sha = source.commit_sha().map(String::from);
    if source.is_temporary() {
        debug!("removing temporary clone");
    }
    drop(source);

    Ok(RunReport {
        plan,
        written,
        output_dir: config.output_dir.clone(),
        commit_sha,
        layer_count: context.layers.len(),
    })
}

async fn blocking<T, F>(context: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TerraforgeError::Io {
            context: format!("{context}: background task failed"),
            source: std::io::Error::other(e.to_string()),
        })?
}
