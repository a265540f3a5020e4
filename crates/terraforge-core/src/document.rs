//! The document value type shared by data layers and the merged context.
//!
//! Documents are `serde_json::Value` (re-exported by tera as `tera::Value`):
//! a tagged union of mapping, sequence and scalar variants. Mappings are
//! sorted by key, which keeps every dump and every render deterministic.

use std::fmt;

pub use serde_json::{Map, Value};

/// One segment of a key path such as `db.replicas[0].host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{k}"),
            Segment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Parse a dotted/bracketed key path.
///
/// Accepts `a.b.c`, `a[0].b`, `a["b.c"]` and `a['b']`. Bare numeric
/// segments after a dot (`a.0`) are indices, matching Tera's lookup rules.
pub fn parse_key_path(input: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut chars = input.chars().peekable();
    let mut current = String::new();

    let flush = |current: &mut String, segments: &mut Vec<Segment>| -> bool {
        if current.is_empty() {
            return false;
        }
        let seg = match current.parse::<usize>() {
            Ok(i) if !segments.is_empty() => Segment::Index(i),
            _ => Segment::Key(current.clone()),
        };
        segments.push(seg);
        current.clear();
        true
    };

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !flush(&mut current, &mut segments) {
                    return None;
                }
            }
            '[' => {
                if !current.is_empty() {
                    flush(&mut current, &mut segments);
                } else if segments.is_empty() {
                    return None;
                }
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return None;
                }
                let inner = inner.trim();
                let quoted = inner.len() >= 2
                    && ((inner.starts_with('"') && inner.ends_with('"'))
                        || (inner.starts_with('\'') && inner.ends_with('\'')));
                if quoted {
                    segments.push(Segment::Key(inner[1..inner.len() - 1].to_string()));
                } else {
                    segments.push(Segment::Index(inner.parse().ok()?));
                }
                // A bracket must be followed by the end, another bracket, or a dot.
                match chars.peek() {
                    None | Some('[') => {}
                    Some('.') => {
                        chars.next();
                        if chars.peek().is_none() {
                            return None;
                        }
                    }
                    Some(_) => return None,
                }
            }
            c if c.is_whitespace() => return None,
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        flush(&mut current, &mut segments);
    } else if input.ends_with('.') {
        return None;
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

/// Look up a key path in a document.
pub fn lookup<'a>(doc: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |node, seg| step(node, seg))
}

/// Return how many leading segments of `path` resolve in `doc`.
pub fn resolved_depth(doc: &Value, path: &[Segment]) -> usize {
    let mut node = doc;
    for (depth, seg) in path.iter().enumerate() {
        match step(node, seg) {
            Some(next) => node = next,
            None => return depth,
        }
    }
    path.len()
}

fn step<'a>(node: &'a Value, seg: &Segment) -> Option<&'a Value> {
    match (node, seg) {
        (Value::Object(map), Segment::Key(k)) => map.get(k),
        (Value::Object(map), Segment::Index(i)) => map.get(&i.to_string()),
        (Value::Array(items), Segment::Index(i)) => items.get(*i),
        _ => None,
    }
}

/// Build a document holding `value` at `path`, e.g. `a.b = 1` becomes
/// `{a: {b: 1}}`. Index segments become string keys so the result can be
/// merged as an ordinary layer.
pub fn nest(path: &[Segment], value: Value) -> Value {
    path.iter().rev().fold(value, |inner, seg| {
        let key = match seg {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        };
        let mut map = Map::new();
        map.insert(key, inner);
        Value::Object(map)
    })
}

/// A short human name for the variant of a value.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Convert a YAML value into a document value.
///
/// Non-string mapping keys are stringified; tags are dropped in favour of
/// the tagged value. Non-finite floats have no JSON form and become strings.
pub fn from_yaml(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Y;

    match value {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(n.to_string()))
            }
        }
        Y::String(s) => Value::String(s),
        Y::Sequence(items) => Value::Array(items.into_iter().map(from_yaml).collect()),
        Y::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(k, v)| (yaml_key(k), from_yaml(v)))
                .collect(),
        ),
        Y::Tagged(tagged) => from_yaml(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    use serde_yaml::Value as Y;

    match key {
        Y::String(s) => s,
        Y::Bool(b) => b.to_string(),
        Y::Number(n) => n.to_string(),
        Y::Null => "null".to_string(),
        Y::Tagged(tagged) => yaml_key(tagged.value),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Convert a TOML value into a document value. Datetimes become strings.
pub fn from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, from_toml(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn key(k: &str) -> Segment {
        Segment::Key(k.to_string())
    }

    #[rstest]
    #[case("a", vec![key("a")])]
    #[case("a.b.c", vec![key("a"), key("b"), key("c")])]
    #[case("a[0]", vec![key("a"), Segment::Index(0)])]
    #[case("a.0", vec![key("a"), Segment::Index(0)])]
    #[case("a[\"b.c\"].d", vec![key("a"), key("b.c"), key("d")])]
    #[case("a['b'][2]", vec![key("a"), key("b"), Segment::Index(2)])]
    fn parses_key_paths(#[case] input: &str, #[case] expected: Vec<Segment>) {
        assert_eq!(parse_key_path(input), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case(".a")]
    #[case("a.")]
    #[case("a..b")]
    #[case("a[0")]
    #[case("[0]")]
    #[case("a[x]")]
    #[case("a b")]
    fn rejects_malformed_key_paths(#[case] input: &str) {
        assert_eq!(parse_key_path(input), None);
    }

    #[test]
    fn lookup_nested_mapping_and_sequence() {
        let doc = json!({"db": {"replicas": [{"host": "r0"}, {"host": "r1"}]}});
        let path = parse_key_path("db.replicas[1].host").unwrap();
        assert_eq!(lookup(&doc, &path), Some(&json!("r1")));
    }

    #[test]
    fn lookup_missing_reports_depth() {
        let doc = json!({"db": {"host": "a"}});
        let path = parse_key_path("db.port.number").unwrap();
        assert_eq!(lookup(&doc, &path), None);
        assert_eq!(resolved_depth(&doc, &path), 1);
    }

    #[test]
    fn nest_builds_mapping_chain() {
        let path = parse_key_path("a.b[0]").unwrap();
        assert_eq!(nest(&path, json!(1)), json!({"a": {"b": {"0": 1}}}));
    }

    #[test]
    fn yaml_keys_are_stringified() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("1: one\ntrue: yes\nname: x\n").unwrap();
        assert_eq!(
            from_yaml(yaml),
            json!({"1": "one", "true": "yes", "name": "x"})
        );
    }

    #[test]
    fn yaml_non_finite_float_becomes_string() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("x: .nan").unwrap();
        let doc = from_yaml(yaml);
        assert!(doc["x"].is_string());
    }

    #[test]
    fn toml_tables_convert() {
        let value: toml::Value = toml::from_str("[db]\nport = 5432\nhosts = [\"a\"]").unwrap();
        assert_eq!(from_toml(value), json!({"db": {"port": 5432, "hosts": ["a"]}}));
    }
}
