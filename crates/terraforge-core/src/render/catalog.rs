use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, TerraforgeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Name ends in the template suffix; rendered against the context.
    Template,
    /// Copied byte for byte.
    Passthrough,
}

/// One file under the template root.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Path relative to the root, `/`-separated.
    pub relative_path: String,
    /// Where the file lands relative to the output root. Equals
    /// `relative_path` minus the template suffix for templates.
    pub output_path: String,
    pub source: PathBuf,
    pub kind: EntryKind,
}

/// Every file under a template root, sorted by relative path.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub root: PathBuf,
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn templates(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Template)
    }
}

/// Walk `root` and catalog every file beneath it.
///
/// Symlinks are followed and hidden files are included. Directories are
/// not entries. Two files that would produce the same output path are an
/// error.
pub fn build_catalog(root: &Path, suffix: &str) -> Result<Catalog> {
    if !root.is_dir() {
        return Err(TerraforgeError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_dangling_link(&e) => {
                warn!(path = ?e.path(), "skipping dangling symlink");
                continue;
            }
            Err(e) => {
                return Err(TerraforgeError::Catalog {
                    path: e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf()),
                    source: e,
                })
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative_path = to_slash_path(rel);
        let (kind, output_path) = classify(&relative_path, suffix);

        entries.push(CatalogEntry {
            relative_path,
            output_path,
            source: entry.path().to_path_buf(),
            kind,
        });
    }

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    check_collisions(&entries)?;

    debug!(
        root = %root.display(),
        files = entries.len(),
        templates = entries.iter().filter(|e| e.kind == EntryKind::Template).count(),
        "built template catalog"
    );

    Ok(Catalog {
        root: root.to_path_buf(),
        entries,
    })
}

/// A link whose target is gone is not a file; loops and permission errors
/// still abort the walk.
fn is_dangling_link(err: &walkdir::Error) -> bool {
    let not_found = err
        .io_error()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
    not_found
        && err
            .path()
            .and_then(|p| p.symlink_metadata().ok())
            .is_some_and(|meta| meta.file_type().is_symlink())
}

fn to_slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn classify(relative_path: &str, suffix: &str) -> (EntryKind, String) {
    let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    match relative_path.strip_suffix(suffix) {
        // A file named exactly like the suffix has nothing left to name the output.
        Some(stripped) if file_name.len() > suffix.len() => {
            (EntryKind::Template, stripped.to_string())
        }
        _ => (EntryKind::Passthrough, relative_path.to_string()),
    }
}

fn check_collisions(entries: &[CatalogEntry]) -> Result<()> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for entry in entries {
        if let Some(first) = seen.insert(&entry.output_path, &entry.relative_path) {
            return Err(TerraforgeError::OutputCollision {
                output: entry.output_path.clone(),
                first: first.to_string(),
                second: entry.relative_path.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, rel).unwrap();
    }

    #[rstest]
    #[case("main.tf.j2", EntryKind::Template, "main.tf")]
    #[case("modules/vpc/vars.tf.j2", EntryKind::Template, "modules/vpc/vars.tf")]
    #[case("README.md", EntryKind::Passthrough, "README.md")]
    #[case("notes/.j2", EntryKind::Passthrough, "notes/.j2")]
    #[case("archive.j2.bak", EntryKind::Passthrough, "archive.j2.bak")]
    fn classifies_by_suffix(
        #[case] rel: &str,
        #[case] kind: EntryKind,
        #[case] output: &str,
    ) {
        assert_eq!(classify(rel, ".j2"), (kind, output.to_string()));
    }

    #[test]
    fn catalogs_every_file_sorted_with_slash_paths() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "z.tf.j2");
        touch(tmp.path(), "a/b/c.tf.j2");
        touch(tmp.path(), "a-c.txt");
        touch(tmp.path(), ".hidden");
        std::fs::create_dir_all(tmp.path().join("empty-dir")).unwrap();

        let catalog = build_catalog(tmp.path(), ".j2").unwrap();
        let rels: Vec<&str> = catalog
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(rels, vec![".hidden", "a-c.txt", "a/b/c.tf.j2", "z.tf.j2"]);
        assert_eq!(catalog.templates().count(), 2);
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn colliding_outputs_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "main.tf");
        touch(tmp.path(), "main.tf.j2");

        match build_catalog(tmp.path(), ".j2").unwrap_err() {
            TerraforgeError::OutputCollision { output, .. } => assert_eq!(output, "main.tf"),
            other => panic!("expected OutputCollision, got: {other:?}"),
        }
    }

    #[test]
    fn missing_root_is_source_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            build_catalog(&tmp.path().join("absent"), ".j2").unwrap_err(),
            TerraforgeError::SourceNotFound { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_included() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        touch(outside.path(), "shared.tf.j2");
        touch(tmp.path(), "main.tf.j2");
        std::os::unix::fs::symlink(
            outside.path().join("shared.tf.j2"),
            tmp.path().join("shared.tf.j2"),
        )
        .unwrap();

        let catalog = build_catalog(tmp.path(), ".j2").unwrap();
        let outputs: Vec<&str> = catalog
            .entries
            .iter()
            .map(|e| e.output_path.as_str())
            .collect();
        assert_eq!(outputs, vec!["main.tf", "shared.tf"]);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlinks_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "main.tf.j2");
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("dangling.tf"))
            .unwrap();

        let catalog = build_catalog(tmp.path(), ".j2").unwrap();
        let rels: Vec<&str> = catalog
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(rels, vec!["main.tf.j2"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loops_still_abort() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "main.tf.j2");
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("loop")).unwrap();

        assert!(matches!(
            build_catalog(tmp.path(), ".j2").unwrap_err(),
            TerraforgeError::Catalog { .. }
        ));
    }
}
