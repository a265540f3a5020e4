use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::document::{self, Map, Value};
use crate::error::{Result, TerraforgeError};
use crate::merge::merge;

/// Where a data layer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOrigin {
    File(PathBuf),
    /// `--set` overrides, folded into one final layer.
    Overrides,
}

impl fmt::Display for LayerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerOrigin::File(path) => write!(f, "{}", path.display()),
            LayerOrigin::Overrides => write!(f, "--set overrides"),
        }
    }
}

/// One parsed data file. Its index is its merge precedence.
#[derive(Debug, Clone)]
pub struct DataLayer {
    pub index: usize,
    pub origin: LayerOrigin,
    /// Always a mapping.
    pub document: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
    Toml,
}

impl Format {
    fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("toml") => Format::Toml,
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Load every data file in order. Fails on the first file that is missing,
/// malformed, or not a mapping, before anything is merged.
pub fn load_layers(paths: &[PathBuf]) -> Result<Vec<DataLayer>> {
    info!(count = paths.len(), "loading data layers");
    paths
        .iter()
        .enumerate()
        .map(|(index, path)| load_layer(index, path))
        .collect()
}

pub fn load_layer(index: usize, path: &Path) -> Result<DataLayer> {
    if !path.is_file() {
        return Err(TerraforgeError::LayerNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| TerraforgeError::Io {
        context: format!("reading data file {}", path.display()),
        source: e,
    })?;

    let document = parse_document(path, &content)?;
    let document = match document {
        Value::Object(_) => document,
        Value::Null => {
            warn!(path = %path.display(), "data file is empty, it contributes no values");
            Value::Object(Map::new())
        }
        other => {
            return Err(TerraforgeError::LayerShape {
                path: path.to_path_buf(),
                found: document::kind_name(&other).to_string(),
            })
        }
    };

    debug!(index, path = %path.display(), "loaded data layer");
    Ok(DataLayer {
        index,
        origin: LayerOrigin::File(path.to_path_buf()),
        document,
    })
}

fn parse_document(path: &Path, content: &str) -> Result<Value> {
    match Format::from_path(path) {
        Format::Yaml => serde_yaml::from_str::<serde_yaml::Value>(content)
            .map(document::from_yaml)
            .map_err(|e| {
                let location = e.location();
                TerraforgeError::LayerParse {
                    path: path.to_path_buf(),
                    line: location.as_ref().map(|l| l.line()),
                    column: location.as_ref().map(|l| l.column()),
                    message: e.to_string(),
                }
            }),
        Format::Json => {
            if content.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str::<Value>(content).map_err(|e| TerraforgeError::LayerParse {
                path: path.to_path_buf(),
                line: Some(e.line()),
                column: Some(e.column()),
                message: e.to_string(),
            })
        }
        Format::Toml => content
            .parse::<toml::Table>()
            .map(|table| document::from_toml(toml::Value::Table(table)))
            .map_err(|e| {
                let (line, column) = match e.span() {
                    Some(span) => {
                        let (l, c) = line_column(content, span.start);
                        (Some(l), Some(c))
                    }
                    None => (None, None),
                };
                TerraforgeError::LayerParse {
                    path: path.to_path_buf(),
                    line,
                    column,
                    message: e.message().to_string(),
                }
            }),
    }
}

/// 1-based line and column of a byte offset.
fn line_column(content: &str, offset: usize) -> (usize, usize) {
    let before = &content[..offset.min(content.len())];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count())
        .unwrap_or(0)
        + 1;
    (line, column)
}

/// Parse `KEY.PATH=VALUE` overrides into a single highest-precedence layer.
///
/// Values are read as YAML flow scalars, so `3` is a number, `true` a
/// boolean and `[a, b]` a sequence; anything else stays a string.
pub fn parse_overrides(index: usize, overrides: &[String]) -> Result<Option<DataLayer>> {
    if overrides.is_empty() {
        return Ok(None);
    }

    let mut document = Value::Object(Map::new());
    for raw in overrides {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| TerraforgeError::InvalidOverride {
                input: raw.clone(),
                reason: "missing '='".into(),
            })?;
        let path = document::parse_key_path(key.trim()).ok_or_else(|| {
            TerraforgeError::InvalidOverride {
                input: raw.clone(),
                reason: format!("'{}' is not a valid key path", key.trim()),
            }
        })?;
        let value = parse_override_value(value);
        document = merge(&document, &document::nest(&path, value));
    }

    Ok(Some(DataLayer {
        index,
        origin: LayerOrigin::Overrides,
        document,
    }))
}

fn parse_override_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    match serde_yaml::from_str::<serde_yaml::Value>(raw) {
        Ok(serde_yaml::Value::Mapping(_)) | Err(_) => Value::String(raw.to_string()),
        Ok(parsed) => document::from_yaml(parsed),
    }
}
