pub mod clone;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::SourceDescriptor;
use crate::error::{Result, TerraforgeError};

pub use clone::{clone_branch, CloneResult};

/// The template root for one run.
///
/// For git sources this owns the temporary clone, which is deleted when the
/// value is dropped. Deletion errors are swallowed by `TempDir`, so cleanup
/// can never replace the run's own result.
#[derive(Debug)]
pub struct ResolvedSource {
    root: PathBuf,
    clone: Option<CloneResult>,
}

impl ResolvedSource {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.clone.as_ref().and_then(|c| c.commit_sha.as_deref())
    }

    pub fn is_temporary(&self) -> bool {
        self.clone.is_some()
    }
}

/// Turn a source descriptor into a local directory holding the template tree.
pub fn resolve_source(descriptor: &SourceDescriptor) -> Result<ResolvedSource> {
    match descriptor {
        SourceDescriptor::Local { path } => {
            if !path.is_dir() {
                return Err(TerraforgeError::SourceNotFound { path: path.clone() });
            }
            debug!(path = %path.display(), "using local template tree");
            Ok(ResolvedSource {
                root: path.clone(),
                clone: None,
            })
        }
        SourceDescriptor::Git {
            repo_url,
            branch,
            subpath,
        } => {
            let clone = clone_branch(repo_url, branch)?;
            let root = clone.dir.path().join(subpath);
            if !root.is_dir() {
                return Err(TerraforgeError::SourceNotFound {
                    path: subpath.clone(),
                });
            }
            info!(root = %root.display(), "using cloned template tree");
            Ok(ResolvedSource {
                root,
                clone: Some(clone),
            })
        }
    }
}
