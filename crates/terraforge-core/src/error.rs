#![allow(unused_assignments)]

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TerraforgeError {
    #[error("Template source not found: {path}")]
    #[diagnostic(help("--input-dir must point to an existing directory"))]
    SourceNotFound { path: PathBuf },

    #[error("Failed to fetch branch '{branch}' from {url}: {reason}")]
    #[diagnostic(help("Check the repository URL, the branch name and your network connection"))]
    SourceFetch {
        url: String,
        branch: String,
        reason: String,
    },

    #[error("Data file not found: {path}")]
    LayerNotFound { path: PathBuf },

    #[error("Failed to parse data file {}{}: {message}", path.display(), location(*line, *column))]
    #[diagnostic(help("Fix the syntax error; no data file is applied until all of them parse"))]
    LayerParse {
        path: PathBuf,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error("Data file {path} must contain a mapping at the top level, found {found}")]
    #[diagnostic(help("Wrap the values in named keys, e.g. `region: eu-west-1`"))]
    LayerShape { path: PathBuf, found: String },

    #[error("Invalid --set override '{input}': {reason}")]
    #[diagnostic(help("Use KEY.PATH=VALUE, e.g. --set db.port=5432"))]
    InvalidOverride { input: String, reason: String },

    #[error("Failed to read template tree under {path}")]
    Catalog {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("'{first}' and '{second}' would both be written to '{output}'")]
    #[diagnostic(help("Rename or remove one of the two files"))]
    OutputCollision {
        output: String,
        first: String,
        second: String,
    },

    #[error("{} template(s) failed to render", failures.len())]
    RenderFailed {
        #[related]
        failures: Vec<RenderFailure>,
    },

    #[error("Failed to write output {path}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}")]
    #[diagnostic(help("Check the TOML syntax in the config file"))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// A failure to render one catalog entry.
///
/// These are collected across the whole catalog and reported together
/// through [`TerraforgeError::RenderFailed`].
#[derive(Debug, Error, Diagnostic)]
pub enum RenderFailure {
    #[error("{file} [UnresolvedReferenceError]: '{key}' ({detail})")]
    #[diagnostic(help("Define '{key}' in one of the data files or pass --set {key}=..."))]
    UnresolvedReference {
        file: String,
        key: String,
        detail: String,
    },

    #[error("{file} [TemplateError]: {detail}")]
    #[diagnostic(help("Check the Tera template syntax"))]
    Template { file: String, detail: String },

    #[error("{file} [TemplateReadError]: could not read template")]
    TemplateRead {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

impl RenderFailure {
    /// The catalog-relative path of the file that failed.
    pub fn file(&self) -> &str {
        match self {
            RenderFailure::UnresolvedReference { file, .. }
            | RenderFailure::Template { file, .. }
            | RenderFailure::TemplateRead { file, .. } => file,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RenderFailure::UnresolvedReference { .. } => "UnresolvedReferenceError",
            RenderFailure::Template { .. } => "TemplateError",
            RenderFailure::TemplateRead { .. } => "TemplateReadError",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            RenderFailure::UnresolvedReference { key, detail, .. } => format!("{key}: {detail}"),
            RenderFailure::Template { detail, .. } => detail.clone(),
            RenderFailure::TemplateRead { source, .. } => source.to_string(),
        }
    }
}

fn location(line: Option<usize>, column: Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!(" at line {l}, column {c}"),
        (Some(l), None) => format!(" at line {l}"),
        _ => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, TerraforgeError>;
