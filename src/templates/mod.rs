//! Template rendering.
//!
//! # Responsibilities
//! - Define the seam handlers render through ([`TemplateRenderer`])
//! - Provide the default file-backed store on top of `minijinja`
//!
//! # Design Decisions
//! - Every file under `template_path` is compiled when the store is built;
//!   a syntax error aborts startup instead of failing a request later
//! - Variable delimiters come from settings; block and comment delimiters
//!   keep the engine defaults
//! - `.html` templates are auto-escaped, so injected markup such as
//!   `xsrf_form_html` must be emitted with `|safe`
//! - Handlers can add functions for a single render; the store can carry
//!   functions shared by every template

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, ErrorKind};
use serde_json::Value;
use thiserror::Error;
use walkdir::WalkDir;

/// Functions (or any other engine values) added to one render call,
/// keyed by the name templates use.
///
/// Build entries with [`minijinja::Value::from_function`].
pub type TemplateFunctions = BTreeMap<String, minijinja::Value>;

/// Template failures, mapped to HTTP statuses by the handler layer.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("failed to render template: {0}")]
    Render(String),

    #[error("template syntax error: {0}")]
    Syntax(String),
}

impl TemplateError {
    /// HTTP status for a failed render.
    pub fn status(&self) -> u16 {
        match self {
            TemplateError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

/// Something that turns a template name and context into bytes.
pub trait TemplateRenderer: Send + Sync {
    fn render_bytes(&self, name: &str, context: &Value) -> Result<Vec<u8>, TemplateError>;

    /// Render with extra functions visible to this call only.
    ///
    /// Renderers without function support ignore `functions`.
    fn render_with_functions(
        &self,
        name: &str,
        context: &Value,
        functions: &TemplateFunctions,
    ) -> Result<Vec<u8>, TemplateError> {
        let _ = functions;
        self.render_bytes(name, context)
    }
}

/// File-backed templates.
pub struct TemplateStore {
    root: PathBuf,
    env: Environment<'static>,
}

impl std::fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateStore")
            .field("root", &self.root)
            .field("templates", &self.env.templates().count())
            .finish()
    }
}

impl TemplateStore {
    /// Compile every template under `root`, using `left`/`right` as
    /// variable delimiters.
    ///
    /// A missing `root` gives an empty store. Templates are named by their
    /// path relative to `root`, with `/` separators.
    pub fn new(root: impl Into<PathBuf>, left: &str, right: &str) -> Result<Self, TemplateError> {
        let root = root.into();

        let syntax = SyntaxConfig::builder()
            .variable_delimiters(left.to_string(), right.to_string())
            .build()
            .map_err(|e| TemplateError::Syntax(format!("invalid delimiters: {e}")))?;

        let mut env = Environment::new();
        env.set_syntax(syntax);

        if root.is_dir() {
            for (name, source) in read_templates(&root)? {
                env.add_template_owned(name.clone(), source).map_err(|e| {
                    tracing::error!(template = %name, error = %e, "failed to compile template");
                    TemplateError::Syntax(format!("{name}: {e}"))
                })?;
            }
        } else {
            tracing::warn!(path = %root.display(), "template directory does not exist");
        }

        tracing::debug!(
            path = %root.display(),
            templates = env.templates().count(),
            left,
            right,
            "template store ready"
        );
        Ok(Self { root, env })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the compiled templates.
    pub fn names(&self) -> Vec<String> {
        self.env.templates().map(|(name, _)| name.to_string()).collect()
    }

    /// Make `value` visible to every template under `name`.
    ///
    /// Register functions with [`minijinja::Value::from_function`].
    pub fn add_global(&mut self, name: impl Into<Cow<'static, str>>, value: minijinja::Value) {
        self.env.add_global(name, value);
    }

    fn render(&self, name: &str, context: minijinja::Value) -> Result<Vec<u8>, TemplateError> {
        let template = self.env.get_template(name).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => TemplateError::NotFound(name.to_string()),
            _ => TemplateError::Render(e.to_string()),
        })?;
        let rendered = template
            .render(context)
            .map_err(|e| TemplateError::Render(e.to_string()))?;
        Ok(rendered.into_bytes())
    }
}

impl TemplateRenderer for TemplateStore {
    fn render_bytes(&self, name: &str, context: &Value) -> Result<Vec<u8>, TemplateError> {
        self.render(name, minijinja::Value::from_serialize(context))
    }

    fn render_with_functions(
        &self,
        name: &str,
        context: &Value,
        functions: &TemplateFunctions,
    ) -> Result<Vec<u8>, TemplateError> {
        if functions.is_empty() {
            return self.render_bytes(name, context);
        }

        let mut merged: BTreeMap<String, minijinja::Value> = match context {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), minijinja::Value::from_serialize(v)))
                .collect(),
            _ => BTreeMap::new(),
        };
        for (key, function) in functions {
            merged.insert(key.clone(), function.clone());
        }
        self.render(name, minijinja::Value::from_serialize(&merged))
    }
}

/// Every regular file under `root` as `(relative name, source)`.
/// Directories and symlinks are skipped.
fn read_templates(root: &Path) -> Result<Vec<(String, String)>, TemplateError> {
    let mut templates = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| TemplateError::Syntax(format!("cannot walk template directory: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let source = fs::read_to_string(path)
            .map_err(|e| TemplateError::Syntax(format!("{name}: cannot read template: {e}")))?;
        templates.push((name, source));
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(name: &str, source: &str, left: &str, right: &str) -> (tempfile::TempDir, TemplateStore) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(name), source).unwrap();
        let store = TemplateStore::new(dir.path(), left, right).unwrap();
        (dir, store)
    }

    #[test]
    fn test_render_with_default_delimiters() {
        let (_dir, store) = store_with("hello.txt", "Hello {{ name }}!", "{{", "}}");
        let out = store.render_bytes("hello.txt", &json!({"name": "World"})).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hello World!");
    }

    #[test]
    fn test_render_with_custom_delimiters() {
        let (_dir, store) = store_with("page.txt", "Hi [[ who ]] {{ kept }}", "[[", "]]");
        let out = store.render_bytes("page.txt", &json!({"who": "there"})).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hi there {{ kept }}");
    }

    #[test]
    fn test_missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path(), "{{", "}}").unwrap();
        let err = store.render_bytes("missing.html", &json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_broken_template_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), "fine").unwrap();
        fs::write(dir.path().join("bad.html"), "{% if %}").unwrap();

        let err = TemplateStore::new(dir.path(), "{{", "}}").unwrap_err();
        match err {
            TemplateError::Syntax(message) => assert!(message.starts_with("bad.html")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_nested_templates_are_named_by_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("admin").join("users")).unwrap();
        fs::write(dir.path().join("admin").join("users").join("list.html"), "users").unwrap();
        fs::write(dir.path().join("base.html"), "{% include 'admin/users/list.html' %}").unwrap();

        let store = TemplateStore::new(dir.path(), "{{", "}}").unwrap();
        let mut names = store.names();
        names.sort();
        assert_eq!(names, vec!["admin/users/list.html", "base.html"]);

        let out = store.render_bytes("base.html", &json!({})).unwrap();
        assert_eq!(out, b"users");
    }

    #[test]
    fn test_missing_root_gives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path().join("nope"), "{{", "}}").unwrap();
        assert!(store.names().is_empty());
    }

    #[test]
    fn test_store_globals_and_render_functions() {
        let (_dir, mut store) = store_with("fn.txt", "{{ shout(name) }} {{ site() }}", "{{", "}}");
        store.add_global("site", minijinja::Value::from_function(|| "lemon".to_string()));

        let mut functions = TemplateFunctions::new();
        functions.insert(
            "shout".to_string(),
            minijinja::Value::from_function(|s: String| s.to_uppercase()),
        );
        let out = store
            .render_with_functions("fn.txt", &json!({"name": "hey"}), &functions)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "HEY lemon");
    }
}
