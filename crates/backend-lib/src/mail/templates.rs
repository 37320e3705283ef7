// ============================
// crates/backend-lib/src/mail/templates.rs
// ============================
//! Named email templates with `{{.Var}}` placeholders.
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

pub const AUTH_EMAIL_TXT: &str = "authemail.txt";
pub const AUTH_EMAIL_HTML: &str = "authemail.html";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.?(\w+)\s*\}\}").unwrap_or_else(|e| panic!("placeholder pattern: {e}"))
});

const BUILTIN_AUTH_TXT: &str = "\
Hi {{.Username}},

Use this link to sign in to {{.AppName}}:

{{.Link}}

The link works once and expires in 15 minutes.
If you did not ask for it, ignore this email.

{{.AppName}} ({{.Domain}})
";

const BUILTIN_AUTH_HTML: &str = r#"<!DOCTYPE html>
<html>
  <body style="font-family: sans-serif;">
    <h2>Hi {{.Username}},</h2>
    <p>Use this link to sign in to {{.AppName}}:</p>
    <p><a href="{{.Link}}">{{.Link}}</a></p>
    <p>The link works once and expires in 15 minutes.
    If you did not ask for it, ignore this email.</p>
    <p><small>{{.AppName}} &middot; {{.Domain}}</small></p>
  </body>
</html>
"#;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template {template} uses unknown variable {var}")]
    MissingVar { template: String, var: String },

    #[error("failed to read template: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders a named template with a variable map
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, vars: &HashMap<&str, String>) -> Result<String, TemplateError>;
}

/// In-memory template set
#[derive(Debug, Clone)]
pub struct Templates {
    sources: HashMap<String, String>,
}

impl Default for Templates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Templates {
    /// The built-in auth email templates
    pub fn builtin() -> Self {
        let mut sources = HashMap::new();
        sources.insert(AUTH_EMAIL_TXT.to_string(), BUILTIN_AUTH_TXT.to_string());
        sources.insert(AUTH_EMAIL_HTML.to_string(), BUILTIN_AUTH_HTML.to_string());
        Self { sources }
    }

    /// Built-in templates, overridden by any auth email templates in `dir`
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, TemplateError> {
        let mut templates = Self::builtin();
        for name in [AUTH_EMAIL_TXT, AUTH_EMAIL_HTML] {
            let path = dir.as_ref().join(name);
            if path.is_file() {
                templates.insert(name, std::fs::read_to_string(&path)?);
                tracing::info!(template = name, path = %path.display(), "loaded email template");
            }
        }
        Ok(templates)
    }

    pub fn insert(&mut self, name: &str, source: String) {
        self.sources.insert(name.to_string(), source);
    }
}

impl TemplateRenderer for Templates {
    fn render(&self, name: &str, vars: &HashMap<&str, String>) -> Result<String, TemplateError> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        let html = name.ends_with(".html");

        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(source, |caps: &Captures| {
            let var = &caps[1];
            match vars.get(var) {
                Some(value) if html => escape_html(value),
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| var.to_string());
                    String::new()
                },
            }
        });

        match missing {
            Some(var) => Err(TemplateError::MissingVar {
                template: name.to_string(),
                var,
            }),
            None => Ok(rendered.into_owned()),
        }
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
