//! Template engine implementation
//!
//! The engine wraps minijinja and provides template rendering with custom
//! functions and named partial templates.

use crate::functions;
use crate::{Error, Result};
use minijinja::{Environment, UndefinedBehavior};

/// Rendering options for the template engine
///
/// `strict_undefined` makes any reference to a missing variable an error,
/// which is the behavior the reconciliation engine relies on: a typo in a
/// template must fail loading rather than silently produce an empty value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateOptions {
    /// Treat undefined variables as errors
    pub strict_undefined: bool,
    /// Remove the newline after block tags
    pub trim_blocks: bool,
    /// Strip leading whitespace from block lines
    pub lstrip_blocks: bool,
    /// Preserve a trailing newline at the end of rendered output
    pub keep_trailing_newline: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            strict_undefined: true,
            trim_blocks: true,
            lstrip_blocks: true,
            keep_trailing_newline: true,
        }
    }
}

/// Template engine for rendering templates
///
/// Holds a single minijinja environment. Partials registered with
/// [`TemplateEngine::add_partial`] share the environment's namespace and
/// are reachable from every subsequently rendered template via
/// `{% include %}` and `{% import %}`.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with default options
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(TemplateOptions::default())
    }

    /// Create a new template engine with explicit options
    #[must_use]
    pub fn with_options(options: TemplateOptions) -> Self {
        let mut env = Environment::new();

        if options.strict_undefined {
            env.set_undefined_behavior(UndefinedBehavior::Strict);
        }
        env.set_trim_blocks(options.trim_blocks);
        env.set_lstrip_blocks(options.lstrip_blocks);
        env.set_keep_trailing_newline(options.keep_trailing_newline);

        env.add_function("env", functions::env);
        env.add_function("os", functions::os);
        env.add_function("arch", functions::arch);
        env.add_function("hostname", functions::hostname);
        env.add_function("username", functions::username);
        env.add_function("homeDir", functions::home_dir);
        env.add_function("joinPath", functions::join_path);
        env.add_function("lookPath", functions::look_path);

        Self { env }
    }

    /// Register a named partial template
    ///
    /// # Errors
    ///
    /// Returns an error if the partial fails to parse.
    pub fn add_partial(&mut self, name: &str, source: &str) -> Result<()> {
        self.env
            .add_template_owned(name.to_string(), source.to_string())
            .map_err(|e| Error::Parse {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    /// Render a one-off template against the given context
    ///
    /// `name` is used in error messages and as the template's own name in
    /// the environment for the duration of the render.
    ///
    /// # Errors
    ///
    /// Returns an error if the template fails to parse or render.
    pub fn render(&self, name: &str, source: &str, context: &serde_json::Value) -> Result<String> {
        self.env
            .render_named_str(name, source, context)
            .map_err(|e| Error::render(name, &e))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_plain_text() {
        let engine = TemplateEngine::new();
        let out = engine.render("t", "plain text", &json!({})).unwrap();
        assert_eq!(out, "plain text");
    }

    #[test]
    fn test_render_variable() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("t", "email = {{ email }}", &json!({"email": "you@example.com"}))
            .unwrap();
        assert_eq!(out, "email = you@example.com");
    }

    #[test]
    fn test_render_literal_expression() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("t", "{{ \"you@example.com\" }}", &json!({}))
            .unwrap();
        assert_eq!(out, "you@example.com");
    }

    #[test]
    fn test_strict_undefined_errors() {
        let engine = TemplateEngine::new();
        let err = engine.render("t", "{{ missing }}", &json!({})).unwrap_err();
        assert!(err.to_string().contains('t'));
    }

    #[test]
    fn test_lenient_undefined_renders_empty() {
        let engine = TemplateEngine::with_options(TemplateOptions {
            strict_undefined: false,
            ..TemplateOptions::default()
        });
        let out = engine.render("t", "[{{ missing }}]", &json!({})).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_partial_include() {
        let mut engine = TemplateEngine::new();
        engine.add_partial("header", "# managed by tatami\n").unwrap();
        let out = engine
            .render("t", "{% include \"header\" %}key = 1", &json!({}))
            .unwrap();
        assert_eq!(out, "# managed by tatami\nkey = 1");
    }

    #[test]
    fn test_trim_blocks_removes_newline_after_tags() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("t", "{% if true %}\nyes\n{% endif %}\n", &json!({}))
            .unwrap();
        assert_eq!(out, "yes\n");
    }

    #[test]
    fn test_partial_parse_error() {
        let mut engine = TemplateEngine::new();
        assert!(engine.add_partial("bad", "{% if %}").is_err());
    }

    #[test]
    fn test_keep_trailing_newline() {
        let engine = TemplateEngine::new();
        let out = engine.render("t", "line\n", &json!({})).unwrap();
        assert_eq!(out, "line\n");
    }

    #[test]
    fn test_function_table_available() {
        let engine = TemplateEngine::new();
        let out = engine.render("t", "{{ os() }}", &json!({})).unwrap();
        assert_eq!(out, std::env::consts::OS);
    }
}
