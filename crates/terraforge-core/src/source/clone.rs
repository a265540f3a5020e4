use tracing::{info, warn};

use crate::error::{Result, TerraforgeError};

/// A fresh clone of one branch, living in its own temporary directory.
#[derive(Debug)]
pub struct CloneResult {
    /// Removed when dropped.
    pub dir: tempfile::TempDir,
    /// The resolved commit SHA of HEAD after checkout.
    pub commit_sha: Option<String>,
}

/// Clone `branch` of the repository at `url` into a new temporary directory.
///
/// Rejects `file://` URLs. Logs a warning for `http://` URLs (non-TLS).
pub fn clone_branch(url: &str, branch: &str) -> Result<CloneResult> {
    let fetch_error = |reason: String| TerraforgeError::SourceFetch {
        url: url.to_string(),
        branch: branch.to_string(),
        reason,
    };

    if url.starts_with("file://") {
        return Err(fetch_error(
            "file:// URLs are not allowed for remote template trees".into(),
        ));
    }

    if url.starts_with("http://") {
        warn!(url, "using insecure http:// URL; consider https:// instead");
    }

    let tmp_dir = tempfile::Builder::new()
        .prefix("terraforge-")
        .tempdir()
        .map_err(|e| TerraforgeError::Io {
            context: "creating temporary directory for git clone".into(),
            source: e,
        })?;

    info!(url, branch, dest = %tmp_dir.path().display(), "cloning repository");

    let prepare = gix::prepare_clone(url, tmp_dir.path()).map_err(|e| fetch_error(e.to_string()))?;

    let mut prepare = prepare
        .with_ref_name(Some(branch))
        .map_err(|e| fetch_error(format!("invalid branch name: {e}")))?;

    let (mut checkout, _outcome) = prepare
        .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| fetch_error(e.to_string()))?;

    let (repo, _outcome) = checkout
        .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| fetch_error(format!("worktree checkout failed: {e}")))?;

    let commit_sha = repo.head_id().ok().map(|id| id.to_string());
    info!(commit = commit_sha.as_deref().unwrap_or("unknown"), "clone complete");

    Ok(CloneResult {
        dir: tmp_dir,
        commit_sha,
    })
}
