use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use terraforge_core::config::{RunSettings, SourceKind};

#[derive(Parser)]
#[command(
    name = "terraforge",
    about = "Render infrastructure template trees from layered data files",
    version
)]
pub struct Cli {
    /// Where the template tree comes from [default: local]
    #[arg(short, long, value_enum)]
    pub source: Option<SourceArg>,

    /// Git repository URL (required when the source is git)
    #[arg(short, long)]
    pub repo_url: Option<String>,

    /// Branch to clone (required when the source is git)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Template tree root, or its path inside the cloned repository
    #[arg(short, long)]
    pub input_dir: Option<PathBuf>,

    /// Directory the rendered tree is written to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Data files to merge, lowest precedence first
    #[arg(short, long, num_args = 1.., value_name = "DATA_FILE")]
    pub data_files: Vec<PathBuf>,

    /// Override a merged value (can be repeated: --set db.port=5432)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Maximum number of files rendered at once
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Suffix marking a file as a template [default: .j2]
    #[arg(long)]
    pub template_suffix: Option<String>,

    /// Render everything and list the output without writing it
    #[arg(long)]
    pub dry_run: bool,

    /// With --dry-run, also print the content of each file
    #[arg(short, long)]
    pub verbose: bool,

    /// TOML file holding any of the options above; flags take precedence
    #[arg(short, long, env = "TERRAFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Local,
    Git,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Local => SourceKind::Local,
            SourceArg::Git => SourceKind::Git,
        }
    }
}

impl Cli {
    /// The run settings given on the command line.
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            source: self.source.map(SourceKind::from),
            repo_url: self.repo_url.clone(),
            branch: self.branch.clone(),
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            data_files: self.data_files.clone(),
            set: self.set.clone(),
            template_suffix: self.template_suffix.clone(),
            concurrency: self.concurrency,
            dry_run: self.dry_run,
        }
    }
}
