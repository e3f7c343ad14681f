use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use minijinja::{AutoEscape, Environment};
use serde_json::Value;

use crate::transport::{TransportRequest, TransportResponse, ViewRenderer};

/// Renders forwarded views from a directory of minijinja templates.
///
/// The view path of a `forward:` directive (prefix included) is mapped onto
/// `base_dir`; the request attributes are the template context.
#[derive(Debug, Clone)]
pub struct TemplateViews {
    base_dir: PathBuf,
    strip_prefix: String,
}

impl TemplateViews {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base_dir: base.into(),
            strip_prefix: String::new(),
        }
    }

    /// Drop a leading prefix (such as the configured view prefix) before
    /// mapping the view onto the directory.
    #[must_use]
    pub fn strip_prefix(mut self, prefix: &str) -> Self {
        self.strip_prefix = prefix.to_string();
        self
    }

    fn map_path(&self, view: &str) -> Option<PathBuf> {
        let relative = view.strip_prefix(self.strip_prefix.as_str()).unwrap_or(view);
        let mut pb = self.base_dir.clone();
        for comp in Path::new(relative.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    fn content_type(path: &Path) -> &'static str {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase()
            .as_str()
        {
            "json" => "application/json",
            "txt" => "text/plain",
            _ => "text/html",
        }
    }

    /// Render `view` with `context`.
    ///
    /// # Errors
    ///
    /// Fails for paths escaping the base directory, missing files and
    /// template errors.
    pub fn render(&self, view: &str, context: &Value) -> anyhow::Result<(String, &'static str)> {
        let path = self
            .map_path(view)
            .ok_or_else(|| anyhow!("invalid view path: {view}"))?;
        if !path.is_file() {
            return Err(anyhow!("view not found: {view}"));
        }
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed to read view {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("view.html");
        let content_type = Self::content_type(&path);
        let mut env = Environment::new();
        // minijinja only escapes by extension (.html, .htm, .xml); .jsp views
        // and anything else served as HTML need it too
        if content_type == "text/html" {
            env.set_auto_escape_callback(|_| AutoEscape::Html);
        }
        env.add_template(name, &source)?;
        let rendered = env.get_template(name)?.render(context)?;
        Ok((rendered, content_type))
    }
}

impl ViewRenderer for TemplateViews {
    fn forward(
        &self,
        view: &str,
        request: &dyn TransportRequest,
        response: &mut dyn TransportResponse,
    ) -> anyhow::Result<()> {
        let context = Value::Object(request.request_attributes());
        let (body, content_type) = self.render(view, &context)?;
        response.set_content_type(content_type);
        response.write_body(&body)
    }
}
