use std::collections::HashSet;
use std::error::Error as _;
use std::sync::OnceLock;

use regex_lite::Regex;
use tera::{Context, ErrorKind, Template, Tera};

use crate::document::{self, Value};
use crate::error::RenderFailure;
use crate::render::catalog::{Catalog, CatalogEntry, EntryKind};

/// A rendered (or copied) file, ready to be written.
#[derive(Debug, Clone)]
pub struct RenderedFile {
    /// Path relative to the output root, `/`-separated.
    pub relative_path: String,
    pub content: Vec<u8>,
    /// Whether this file was copied verbatim (true) or rendered from a template (false).
    pub is_copy: bool,
}

fn new_tera() -> Tera {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera
}

/// Parse every text template in the catalog into one Tera instance, each
/// registered under its catalog path, so templates can `include`, `import`
/// and `extend` one another.
///
/// Templates that fail to parse, or that extend or import a template which
/// is not available, come back as failures and are left out of the set.
/// Unreadable and binary files are skipped here; rendering reports them.
pub fn build_environment(catalog: &Catalog) -> (Tera, Vec<RenderFailure>) {
    let mut failures = Vec::new();
    let mut parsed: Vec<(String, String, Template)> = Vec::new();

    for entry in catalog.templates() {
        let Some(text) = std::fs::read(&entry.source)
            .ok()
            .filter(|bytes| !is_binary(bytes))
            .and_then(|bytes| String::from_utf8(bytes).ok())
        else {
            continue;
        };
        match Template::new(&entry.relative_path, None, &text) {
            Ok(template) => parsed.push((entry.relative_path.clone(), text, template)),
            Err(e) => failures.push(RenderFailure::Template {
                file: entry.relative_path.clone(),
                detail: error_chain(&e).join(": "),
            }),
        }
    }

    // Dropping a template can orphan the ones built on it, so repeat until
    // every remaining reference resolves.
    while let Some((index, detail)) = find_broken_reference(&parsed) {
        let (file, _, _) = parsed.remove(index);
        failures.push(RenderFailure::Template { file, detail });
    }

    loop {
        let mut tera = new_tera();
        let sources = parsed.iter().map(|(name, text, _)| (name.as_str(), text.as_str()));
        let err = match tera.add_raw_templates(sources) {
            Ok(()) => return (tera, failures),
            Err(err) => err,
        };

        let culprit = match &err.kind {
            ErrorKind::CircularExtend { tpl, .. } => Some(tpl.as_str()),
            ErrorKind::MissingParent { current, .. } => Some(current.as_str()),
            _ => None,
        }
        .and_then(|name| parsed.iter().position(|(n, _, _)| n == name));

        let detail = error_chain(&err).join(": ");
        match culprit {
            Some(index) => {
                let (file, _, _) = parsed.remove(index);
                failures.push(RenderFailure::Template { file, detail });
            }
            None => {
                failures.extend(parsed.drain(..).map(|(file, _, _)| RenderFailure::Template {
                    file,
                    detail: detail.clone(),
                }));
                return (new_tera(), failures);
            }
        }
    }
}

/// First template that extends or imports a name outside the set.
fn find_broken_reference(parsed: &[(String, String, Template)]) -> Option<(usize, String)> {
    let names: HashSet<&str> = parsed.iter().map(|(name, _, _)| name.as_str()).collect();
    parsed.iter().enumerate().find_map(|(i, (_, _, template))| {
        if let Some(parent) = template.parent.as_deref().filter(|p| !names.contains(p)) {
            return Some((i, format!("extends '{parent}', which is missing or failed to parse")));
        }
        template
            .imported_macro_files
            .iter()
            .find(|(file, _)| !names.contains(file.as_str()))
            .map(|(file, _)| {
                (
                    i,
                    format!("imports macros from '{file}', which is missing or failed to parse"),
                )
            })
    })
}

/// Produce the output for one catalog entry.
///
/// Passthrough entries, binary files and templates without any Tera markup
/// come back byte for byte. Templates render from `tera` by their catalog
/// path.
pub fn render_entry(
    entry: &CatalogEntry,
    tera: &Tera,
    context: &Context,
    document: &Value,
) -> Result<RenderedFile, RenderFailure> {
    let bytes = std::fs::read(&entry.source).map_err(|e| RenderFailure::TemplateRead {
        file: entry.relative_path.clone(),
        source: e,
    })?;

    let copy = |content: Vec<u8>| RenderedFile {
        relative_path: entry.output_path.clone(),
        content,
        is_copy: true,
    };

    if entry.kind == EntryKind::Passthrough || is_binary(&bytes) {
        return Ok(copy(bytes));
    }

    let text = String::from_utf8(bytes).map_err(|e| RenderFailure::TemplateRead {
        file: entry.relative_path.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.utf8_error()),
    })?;

    if !has_template_syntax(&text) {
        return Ok(copy(text.into_bytes()));
    }

    let rendered = tera
        .render(&entry.relative_path, context)
        .map_err(|e| classify_error(&entry.relative_path, &e, &text, document))?;
    if rendered.trim().is_empty() {
        tracing::warn!(file = %entry.relative_path, "template rendered to empty output");
    }

    Ok(RenderedFile {
        relative_path: entry.output_path.clone(),
        content: rendered.into_bytes(),
        is_copy: false,
    })
}

/// Whether the text contains any Tera expression, statement or comment.
pub fn has_template_syntax(content: &str) -> bool {
    content.contains("{{") || content.contains("{%") || content.contains("{#")
}

/// Detect binary content (BOM-aware, null-byte scanning) from the first 8KB.
pub fn is_binary(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(8192)];
    !content_inspector::inspect(head).is_text()
}

fn undefined_variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Variable `([^`]+)` not found in context").expect("pattern is valid")
    })
}

fn error_chain(err: &tera::Error) -> Vec<String> {
    let mut messages = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    messages
}

fn classify_error(file: &str, err: &tera::Error, text: &str, document: &Value) -> RenderFailure {
    let messages = error_chain(err);
    let missing = messages.iter().find_map(|m| {
        undefined_variable_pattern()
            .captures(m)
            .map(|c| c[1].to_string())
    });

    match missing {
        Some(key) => RenderFailure::UnresolvedReference {
            detail: describe_missing(&key, text, document),
            file: file.to_string(),
            key,
        },
        None => RenderFailure::Template {
            file: file.to_string(),
            detail: messages.join(": "),
        },
    }
}

fn bound_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{%-?\s*(?:for\s+(\w+)(?:\s*,\s*(\w+))?\s+in\b|set(?:_global)?\s+(\w+)\s*=)")
            .expect("pattern is valid")
    })
}

/// Whether `text` binds `name` with a `for` loop or a `set`.
fn binds_name(text: &str, name: &str) -> bool {
    bound_name_pattern().captures_iter(text).any(|caps| {
        (1..=3).any(|group| caps.get(group).is_some_and(|m| m.as_str() == name))
    })
}

/// Say which segment of a missing key path stopped resolving.
fn describe_missing(key: &str, text: &str, document: &Value) -> String {
    let Some(path) = document::parse_key_path(key) else {
        return "not found in the merged context".to_string();
    };
    let depth = document::resolved_depth(document, &path);
    if depth == 0 {
        let bound = matches!(&path[0], document::Segment::Key(name) if binds_name(text, name));
        if bound {
            return "not found in the merged context".to_string();
        }
        return format!("'{}' is not defined in any data file", path[0]);
    }

    let prefix = join_path(&path[..depth]);
    match (document::lookup(document, &path[..depth]), path.get(depth)) {
        (Some(parent), Some(next)) if !matches!(parent, Value::Object(_) | Value::Array(_)) => {
            format!("'{prefix}' is {}, so it has no '{next}'", document::kind_name(parent))
        }
        (_, Some(next)) => format!("'{prefix}' has no '{next}'"),
        (_, None) => "not found in the merged context".to_string(),
    }
}

fn join_path(path: &[document::Segment]) -> String {
    let mut out = String::new();
    for seg in path {
        match seg {
            document::Segment::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            document::Segment::Index(_) => out.push_str(&seg.to_string()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    /// Render `content` as the only template in a fresh set.
    fn render_text(
        name: &str,
        content: &str,
        context: &Context,
        document: &Value,
    ) -> Result<String, RenderFailure> {
        let mut tera = new_tera();
        tera.add_raw_template(name, content)
            .and_then(|_| tera.render(name, context))
            .map_err(|e| classify_error(name, &e, content, document))
    }

    fn context_for(doc: &Value) -> Context {
        Context::from_value(doc.clone()).unwrap()
    }

    #[rstest]
    #[case(b"Hello, world!", false)]
    #[case(&(0..256).map(|i| i as u8).collect::<Vec<u8>>(), true)]
    fn detects_binary_content(#[case] content: &[u8], #[case] expected_binary: bool) {
        assert_eq!(is_binary(content), expected_binary);
    }

    #[rstest]
    #[case("region = \"{{ region }}\"", true)]
    #[case("{% if x %}y{% endif %}", true)]
    #[case("{# note #}", true)]
    #[case("resource \"aws_vpc\" \"main\" { cidr_block = \"10.0.0.0/16\" }", false)]
    #[case("tags = { Name = \"${var.name}\" }", false)]
    fn detects_template_syntax(#[case] content: &str, #[case] expected: bool) {
        assert_eq!(has_template_syntax(content), expected);
    }

    #[test]
    fn renders_nested_and_indexed_lookups() {
        let doc = json!({
            "db": {"host": "b", "port": 5432},
            "subnets": ["10.0.1.0/24", "10.0.2.0/24"],
            "tags": {"cost-center": "ops"}
        });
        let out = render_text(
            "main.tf.j2",
            "{{ db.host }}:{{ db.port }} {{ subnets[1] }} {{ subnets.0 }} {{ tags[\"cost-center\"] }}",
            &context_for(&doc),
            &doc,
        )
        .unwrap();
        assert_eq!(out, "b:5432 10.0.2.0/24 10.0.1.0/24 ops");
    }

    #[test]
    fn html_like_output_is_not_escaped() {
        let doc = json!({"policy": "<a & b>"});
        let out = render_text("index.html", "{{ policy }}", &context_for(&doc), &doc).unwrap();
        assert_eq!(out, "<a & b>");
    }

    #[test]
    fn missing_key_is_unresolved_reference() {
        let doc = json!({"other": 1});
        match render_text("main.tf.j2", "x = {{ missing.key }}", &context_for(&doc), &doc)
            .unwrap_err()
        {
            RenderFailure::UnresolvedReference { file, key, detail } => {
                assert_eq!(file, "main.tf.j2");
                assert_eq!(key, "missing.key");
                assert!(detail.contains("'missing' is not defined"), "{detail}");
            }
            other => panic!("expected UnresolvedReference, got: {other:?}"),
        }
    }

    #[test]
    fn missing_nested_key_names_resolved_prefix() {
        let doc = json!({"db": {"host": "a"}});
        match render_text("db.tf.j2", "{{ db.port }}", &context_for(&doc), &doc).unwrap_err() {
            RenderFailure::UnresolvedReference { key, detail, .. } => {
                assert_eq!(key, "db.port");
                assert_eq!(detail, "'db' has no 'port'");
            }
            other => panic!("expected UnresolvedReference, got: {other:?}"),
        }
    }

    #[test]
    fn missing_field_on_loop_variable_is_not_blamed_on_data_files() {
        let doc = json!({"subnets": [{"name": "a"}]});
        match render_text(
            "subnets.tf.j2",
            "{% for s in subnets %}{{ s.zone }}{% endfor %}",
            &context_for(&doc),
            &doc,
        )
        .unwrap_err()
        {
            RenderFailure::UnresolvedReference { key, detail, .. } => {
                assert_eq!(key, "s.zone");
                assert_eq!(detail, "not found in the merged context");
            }
            other => panic!("expected UnresolvedReference, got: {other:?}"),
        }
    }

    #[rstest]
    #[case("{% for s in subnets %}", "s", true)]
    #[case("{%- for k, v in tags -%}", "v", true)]
    #[case("{% set region = \"x\" %}", "region", true)]
    #[case("{% set_global count = 0 %}", "count", true)]
    #[case("{{ s }} {% for subnet in subnets %}", "s", false)]
    fn finds_names_bound_in_template(#[case] text: &str, #[case] name: &str, #[case] bound: bool) {
        assert_eq!(binds_name(text, name), bound);
    }

    #[test]
    fn syntax_error_is_template_error() {
        let doc = json!({});
        let err = render_text("bad.tf.j2", "{% if %}", &context_for(&doc), &doc).unwrap_err();
        assert_eq!(err.kind(), "TemplateError");
        assert_eq!(err.file(), "bad.tf.j2");
    }

    #[test]
    fn describe_missing_through_scalar() {
        let doc = json!({"db": "postgres"});
        assert_eq!(
            describe_missing("db.host", "{{ db.host }}", &doc),
            "'db' is a string, so it has no 'host'"
        );
    }

    #[test]
    fn plain_template_is_copied_byte_for_byte() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("plain.tf.j2");
        let body = "resource \"null_resource\" \"x\" {}\n\n  trailing   \n";
        std::fs::write(&source, body).unwrap();

        let entry = CatalogEntry {
            relative_path: "plain.tf.j2".into(),
            output_path: "plain.tf".into(),
            source,
            kind: EntryKind::Template,
        };
        let doc = json!({});
        let file = render_entry(&entry, &new_tera(), &context_for(&doc), &doc).unwrap();
        assert_eq!(file.relative_path, "plain.tf");
        assert_eq!(file.content, body.as_bytes());
        assert!(file.is_copy);
    }

    #[test]
    fn non_utf8_template_is_read_error() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("latin1.tf.j2");
        std::fs::write(&source, [b'{', b'{', b' ', 0xE9, b' ', b'}', b'}']).unwrap();

        let entry = CatalogEntry {
            relative_path: "latin1.tf.j2".into(),
            output_path: "latin1.tf".into(),
            source,
            kind: EntryKind::Template,
        };
        let doc = json!({});
        let err = render_entry(&entry, &new_tera(), &context_for(&doc), &doc).unwrap_err();
        assert_eq!(err.kind(), "TemplateReadError");
    }
}
