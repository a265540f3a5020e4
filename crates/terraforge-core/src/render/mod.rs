pub mod catalog;
pub mod file;
pub mod writer;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tera::Context;
use tracing::{debug, info};

use crate::document::Value;
use crate::error::{RenderFailure, Result, TerraforgeError};

pub use catalog::{build_catalog, Catalog, CatalogEntry, EntryKind};
pub use file::{build_environment, render_entry, RenderedFile};
pub use writer::{execute_plan, WrittenTree};

/// Every output file of a run, rendered in memory and not yet written.
#[derive(Debug, Clone, Default)]
pub struct RenderPlan {
    /// Sorted by output path.
    pub files: Vec<RenderedFile>,
}

impl RenderPlan {
    pub fn rendered_count(&self) -> usize {
        self.files.iter().filter(|f| !f.is_copy).count()
    }

    pub fn copied_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_copy).count()
    }
}

/// Build the Tera context from the merged document.
pub fn build_context(document: &Value) -> Result<Context> {
    Context::from_value(document.clone()).map_err(|e| TerraforgeError::InvalidConfig {
        reason: format!("merged context is not a mapping: {e}"),
    })
}

/// Render every catalog entry against the merged context.
///
/// Every template is parsed once into a shared set, then entries are
/// rendered on the blocking pool with at most `concurrency` in flight.
/// Failures do not stop other entries: they are gathered and returned
/// together, sorted by file.
pub async fn plan_render(
    catalog: Arc<Catalog>,
    document: Arc<Value>,
    concurrency: usize,
) -> Result<RenderPlan> {
    let context = Arc::new(build_context(&document)?);

    let env_catalog = Arc::clone(&catalog);
    let (tera, mut failures) = tokio::task::spawn_blocking(move || build_environment(&env_catalog))
        .await
        .map_err(|e| TerraforgeError::Io {
            context: "loading templates: background task failed".to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;
    let tera = Arc::new(tera);
    let rejected: HashSet<String> = failures.iter().map(|f| f.file().to_string()).collect();
    let pending: Vec<usize> = (0..catalog.len())
        .filter(|&i| !rejected.contains(&catalog.entries[i].relative_path))
        .collect();
    info!(
        files = pending.len(),
        rejected = rejected.len(),
        concurrency,
        "rendering template catalog"
    );

    let outcomes: Vec<std::result::Result<RenderedFile, RenderFailure>> =
        stream::iter(pending)
            .map(|index| {
                let catalog = Arc::clone(&catalog);
                let tera = Arc::clone(&tera);
                let context = Arc::clone(&context);
                let document = Arc::clone(&document);
                async move {
                    let relative = catalog.entries[index].relative_path.clone();
                    tokio::task::spawn_blocking(move || {
                        let entry = &catalog.entries[index];
                        debug!(file = %entry.relative_path, kind = ?entry.kind, "rendering");
                        render_entry(entry, &tera, &context, &document)
                    })
                    .await
                    .unwrap_or_else(|join_err| {
                        Err(RenderFailure::Template {
                            file: relative,
                            detail: format!("render task failed: {join_err}"),
                        })
                    })
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

    let mut files = BTreeMap::new();
    for outcome in outcomes {
        match outcome {
            Ok(file) => {
                files.insert(file.relative_path.clone(), file);
            }
            Err(failure) => failures.push(failure),
        }
    }

    if !failures.is_empty() {
        failures.sort_by(|a, b| a.file().cmp(b.file()));
        return Err(TerraforgeError::RenderFailed { failures });
    }

    Ok(RenderPlan {
        files: files.into_values().collect(),
    })
}
