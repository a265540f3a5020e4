pub mod user;

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TerraforgeError};

pub use user::{load_user_config, UserConfig};

/// Default suffix marking a file as a template.
pub const DEFAULT_TEMPLATE_SUFFIX: &str = ".j2";

/// Where the template tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Local {
        path: PathBuf,
    },
    Git {
        repo_url: String,
        branch: String,
        /// Template root relative to the repository root.
        subpath: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Local,
    Git,
}

/// Immutable settings for a single run, captured once and handed to each
/// pipeline stage.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: SourceDescriptor,
    pub output_dir: PathBuf,
    /// Ordered; later files override earlier ones.
    pub data_files: Vec<PathBuf>,
    /// `KEY.PATH=VALUE` pairs applied after every data file.
    pub overrides: Vec<String>,
    pub template_suffix: String,
    pub concurrency: usize,
    pub dry_run: bool,
}

/// Partially specified run settings, as read from a run file or from the
/// command line. Layers are combined with [`RunSettings::or`] and turned
/// into a [`RunConfig`] once every source has been applied.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    pub source: Option<SourceKind>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub data_files: Vec<PathBuf>,
    #[serde(default)]
    pub set: Vec<String>,
    pub template_suffix: Option<String>,
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
}

impl RunSettings {
    /// Fill every field left unset in `self` from `fallback`.
    ///
    /// Data files are taken as a whole list: a non-empty list in `self`
    /// replaces the fallback's list rather than extending it. Overrides
    /// accumulate, with `self`'s applied last.
    pub fn or(self, fallback: RunSettings) -> RunSettings {
        let mut set = fallback.set;
        set.extend(self.set);
        RunSettings {
            source: self.source.or(fallback.source),
            repo_url: self.repo_url.or(fallback.repo_url),
            branch: self.branch.or(fallback.branch),
            input_dir: self.input_dir.or(fallback.input_dir),
            output_dir: self.output_dir.or(fallback.output_dir),
            data_files: if self.data_files.is_empty() {
                fallback.data_files
            } else {
                self.data_files
            },
            set,
            template_suffix: self.template_suffix.or(fallback.template_suffix),
            concurrency: self.concurrency.or(fallback.concurrency),
            dry_run: self.dry_run || fallback.dry_run,
        }
    }

    pub fn with_user_defaults(self, user: &UserConfig) -> RunSettings {
        RunSettings {
            template_suffix: self
                .template_suffix
                .or_else(|| user.template_suffix.clone()),
            concurrency: self.concurrency.or(user.concurrency),
            ..self
        }
    }

    /// Validate and freeze the settings.
    pub fn into_config(self) -> Result<RunConfig> {
        let input_dir = self.input_dir.ok_or_else(|| invalid("--input-dir is required"))?;
        let output_dir = self
            .output_dir
            .ok_or_else(|| invalid("--output-dir is required"))?;

        if self.data_files.is_empty() {
            return Err(invalid("at least one data file is required"));
        }

        let source = match self.source.unwrap_or_default() {
            SourceKind::Local => SourceDescriptor::Local { path: input_dir },
            SourceKind::Git => {
                let repo_url = self
                    .repo_url
                    .ok_or_else(|| invalid("--repo-url is required when the source is git"))?;
                let branch = self
                    .branch
                    .ok_or_else(|| invalid("--branch is required when the source is git"))?;
                let escapes = input_dir.components().any(|c| {
                    matches!(
                        c,
                        Component::ParentDir | Component::RootDir | Component::Prefix(_)
                    )
                });
                if escapes {
                    return Err(invalid(
                        "--input-dir must stay inside the repository when the source is git",
                    ));
                }
                SourceDescriptor::Git {
                    repo_url,
                    branch,
                    subpath: input_dir,
                }
            }
        };

        let template_suffix = self
            .template_suffix
            .unwrap_or_else(|| DEFAULT_TEMPLATE_SUFFIX.to_string());
        if template_suffix.is_empty() {
            return Err(invalid("the template suffix must not be empty"));
        }

        let concurrency = match self.concurrency {
            Some(0) => return Err(invalid("concurrency must be at least 1")),
            Some(n) => n,
            None => default_concurrency(),
        };

        Ok(RunConfig {
            source,
            output_dir,
            data_files: self.data_files,
            overrides: self.set,
            template_suffix,
            concurrency,
            dry_run: self.dry_run,
        })
    }
}

fn invalid(reason: &str) -> TerraforgeError {
    TerraforgeError::InvalidConfig {
        reason: reason.to_string(),
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Read a TOML run file.
pub fn load_run_file(path: &Path) -> Result<RunSettings> {
    let content = std::fs::read_to_string(path).map_err(|e| TerraforgeError::Io {
        context: format!("reading config file {}", path.display()),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| TerraforgeError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn local_settings() -> RunSettings {
        RunSettings {
            input_dir: Some("templates".into()),
            output_dir: Some("out".into()),
            data_files: vec!["base.yaml".into()],
            ..Default::default()
        }
    }

    #[test]
    fn local_source_uses_input_dir() {
        let config = local_settings().into_config().unwrap();
        assert_eq!(
            config.source,
            SourceDescriptor::Local {
                path: "templates".into()
            }
        );
        assert_eq!(config.template_suffix, DEFAULT_TEMPLATE_SUFFIX);
        assert!(config.concurrency >= 1);
    }

    #[test]
    fn git_source_requires_url_and_branch() {
        let mut settings = local_settings();
        settings.source = Some(SourceKind::Git);
        settings.repo_url = Some("https://example.com/infra.git".into());
        let err = settings.clone().into_config().unwrap_err();
        assert!(err.to_string().contains("--branch"));

        settings.branch = Some("main".into());
        let config = settings.into_config().unwrap();
        assert_eq!(
            config.source,
            SourceDescriptor::Git {
                repo_url: "https://example.com/infra.git".into(),
                branch: "main".into(),
                subpath: "templates".into(),
            }
        );
    }

    #[rstest]
    #[case("../..")]
    #[case("templates/../../outside")]
    #[case("/etc")]
    fn git_input_dir_must_stay_inside_clone(#[case] input_dir: &str) {
        let mut settings = local_settings();
        settings.source = Some(SourceKind::Git);
        settings.repo_url = Some("https://example.com/infra.git".into());
        settings.branch = Some("main".into());
        settings.input_dir = Some(input_dir.into());
        match settings.into_config().unwrap_err() {
            TerraforgeError::InvalidConfig { reason } => assert!(reason.contains("--input-dir")),
            other => panic!("expected InvalidConfig, got: {other:?}"),
        }
    }

    #[test]
    fn git_input_dir_may_use_current_dir_segments() {
        let mut settings = local_settings();
        settings.source = Some(SourceKind::Git);
        settings.repo_url = Some("https://example.com/infra.git".into());
        settings.branch = Some("main".into());
        settings.input_dir = Some("./stacks/prod".into());
        assert!(settings.into_config().is_ok());
    }

    #[test]
    fn missing_data_files_rejected() {
        let mut settings = local_settings();
        settings.data_files.clear();
        assert!(matches!(
            settings.into_config().unwrap_err(),
            TerraforgeError::InvalidConfig { .. }
        ));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut settings = local_settings();
        settings.concurrency = Some(0);
        assert!(settings.into_config().is_err());
    }

    #[test]
    fn cli_values_win_over_run_file() {
        let file: RunSettings = toml::from_str(
            r#"
source = "git"
repo_url = "https://example.com/infra.git"
branch = "main"
input_dir = "modules"
output_dir = "rendered"
data_files = ["base.yaml", "prod.yaml"]
set = ["region=eu-west-1"]
concurrency = 2
"#,
        )
        .unwrap();

        let cli = RunSettings {
            branch: Some("release".into()),
            set: vec!["region=us-east-1".into()],
            ..Default::default()
        };

        let merged = cli.or(file);
        assert_eq!(merged.branch.as_deref(), Some("release"));
        assert_eq!(merged.repo_url.as_deref(), Some("https://example.com/infra.git"));
        assert_eq!(merged.data_files.len(), 2);
        assert_eq!(merged.set, vec!["region=eu-west-1", "region=us-east-1"]);
        assert_eq!(merged.concurrency, Some(2));
    }

    #[test]
    fn cli_data_files_replace_run_file_list() {
        let file = RunSettings {
            data_files: vec!["a.yaml".into(), "b.yaml".into()],
            ..Default::default()
        };
        let cli = RunSettings {
            data_files: vec!["c.yaml".into()],
            ..Default::default()
        };
        assert_eq!(cli.or(file).data_files, vec![PathBuf::from("c.yaml")]);
    }

    #[test]
    fn user_defaults_fill_gaps_only() {
        let user = UserConfig {
            template_suffix: Some(".tmpl".into()),
            concurrency: Some(8),
        };
        let mut settings = local_settings();
        settings.concurrency = Some(2);
        let settings = settings.with_user_defaults(&user);
        assert_eq!(settings.template_suffix.as_deref(), Some(".tmpl"));
        assert_eq!(settings.concurrency, Some(2));
    }

    #[test]
    fn unknown_run_file_keys_rejected() {
        let result: std::result::Result<RunSettings, _> = toml::from_str("colour = \"red\"");
        assert!(result.is_err());
    }

    #[test]
    fn load_run_file_reports_parse_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.toml");
        std::fs::write(&path, "not valid [[ toml").unwrap();
        assert!(matches!(
            load_run_file(&path).unwrap_err(),
            TerraforgeError::ConfigParse { .. }
        ));
    }
}
