use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TerraforgeError};
use crate::render::RenderPlan;

/// What a plan left on disk.
#[derive(Debug)]
pub struct WrittenTree {
    pub output_dir: PathBuf,
    pub files_rendered: Vec<PathBuf>,
    pub files_copied: Vec<PathBuf>,
}

/// Write every file in the plan under `output_dir`, creating directories
/// as needed and overwriting existing files.
///
/// Stops at the first failure; files already written stay on disk.
pub fn execute_plan(plan: &RenderPlan, output_dir: &Path) -> Result<WrittenTree> {
    std::fs::create_dir_all(output_dir).map_err(|e| TerraforgeError::OutputWrite {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let mut files_rendered = Vec::new();
    let mut files_copied = Vec::new();

    for file in &plan.files {
        let rel: PathBuf = file.relative_path.split('/').collect();
        let dest = output_dir.join(&rel);

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TerraforgeError::OutputWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(&dest, &file.content).map_err(|e| TerraforgeError::OutputWrite {
            path: dest.clone(),
            source: e,
        })?;
        debug!(path = %dest.display(), bytes = file.content.len(), "wrote output");

        if file.is_copy {
            files_copied.push(rel);
        } else {
            files_rendered.push(rel);
        }
    }

    info!(
        output = %output_dir.display(),
        rendered = files_rendered.len(),
        copied = files_copied.len(),
        "output written"
    );

    Ok(WrittenTree {
        output_dir: output_dir.to_path_buf(),
        files_rendered,
        files_copied,
    })
}
