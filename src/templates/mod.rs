//! Template cache.
//!
//! Every `*.html` file in the templates directory is parsed into one
//! handlebars bundle, each template registered under its file name
//! (`posts-list.html`). Templates use `<%` and `%>` instead of `{{` / `}}`
//! so they can embed client-side templates that use braces:
//!
//! ```text
//! <h1><% title %></h1>
//! <%#each posts%><li><% this.title %></li><%/each%>
//! <script type="text/x-template">{{ untouched }}</script>
//! ```
//!
//! The parsed bundle sits behind an `RwLock<Arc<_>>`. A reload builds a
//! complete new bundle and swaps it in; renders clone the `Arc` and work
//! outside the lock. A reload that fails leaves the previous bundle in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// File extension of template files.
pub const TEMPLATE_EXT: &str = "html";

pub const OPEN_DELIM: &str = "<%";
pub const CLOSE_DELIM: &str = "%>";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: Box<handlebars::TemplateError>,
    },

    #[error("failed to render template: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("no templates loaded")]
    NotLoaded,

    #[error("template {0} not found")]
    NotFound(String),
}

/// The current parsed bundle plus the directory it is read from.
pub struct TemplateCache {
    dir: PathBuf,
    current: RwLock<Option<Arc<Handlebars<'static>>>>,
}

impl TemplateCache {
    /// An empty cache over `dir`. Nothing is read until [`reload`](Self::reload).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-reads the directory and swaps in the new bundle.
    ///
    /// Returns the number of templates parsed. An empty directory leaves the
    /// current bundle alone.
    pub fn refresh(&self) -> Result<usize, TemplateError> {
        let files = template_files(&self.dir)?;
        debug!(templates = ?files, "parsing templates");
        if files.is_empty() {
            return Ok(0);
        }

        let mut registry = Handlebars::new();
        for path in &files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
                path: path.clone(),
                source,
            })?;
            registry
                .register_template_string(&name, translate_delimiters(&source))
                .map_err(|source| TemplateError::Parse {
                    name,
                    source: Box::new(source),
                })?;
        }

        let count = files.len();
        let bundle = Arc::new(registry);
        match self.current.write() {
            Ok(mut guard) => *guard = Some(bundle),
            Err(poisoned) => *poisoned.into_inner() = Some(bundle),
        }
        Ok(count)
    }

    /// [`refresh`](Self::refresh), logging instead of returning failures.
    pub fn reload(&self) {
        if let Err(e) = self.refresh() {
            error!(error = %e, dir = %self.dir.display(), "template reload failed; keeping previous templates");
        }
    }

    /// `true` once a bundle has been parsed.
    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Renders template `name` (file name, including extension) with `data`.
    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String, TemplateError> {
        let bundle = self.snapshot().ok_or(TemplateError::NotLoaded)?;
        if !bundle.has_template(name) {
            return Err(TemplateError::NotFound(name.to_owned()));
        }
        Ok(bundle.render(name, data)?)
    }

    fn snapshot(&self) -> Option<Arc<Handlebars<'static>>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Template files directly inside `dir`, sorted by name.
fn template_files(dir: &Path) -> Result<Vec<PathBuf>, TemplateError> {
    let io_err = |source| TemplateError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == TEMPLATE_EXT) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Rewrites `<% %>` tags into handlebars syntax, escaping any literal `{{`
/// so it renders verbatim.
fn translate_delimiters(source: &str) -> String {
    source
        .replace("{{", "\\{{")
        .replace(OPEN_DELIM, "{{")
        .replace(CLOSE_DELIM, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn renders_with_custom_delimiters() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "hello.html", "<p>Hi <% name %></p>");
        let cache = TemplateCache::new(dir.path());
        assert_eq!(cache.refresh().unwrap(), 1);
        let out = cache.render("hello.html", &json!({"name": "Ann"})).unwrap();
        assert_eq!(out, "<p>Hi Ann</p>");
    }

    #[test]
    fn literal_braces_survive() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "mixed.html", "{{ client }} <% server %>");
        let cache = TemplateCache::new(dir.path());
        cache.refresh().unwrap();
        let out = cache.render("mixed.html", &json!({"server": "ok", "client": "no"})).unwrap();
        assert_eq!(out, "{{ client }} ok");
    }

    #[test]
    fn only_html_files_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "index");
        write(dir.path(), "notes.txt", "<% broken");
        write(dir.path(), "page.htmlx", "x");
        let cache = TemplateCache::new(dir.path());
        assert_eq!(cache.refresh().unwrap(), 1);
        assert!(matches!(
            cache.render("page.htmlx", &json!({})),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn nothing_loaded_before_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TemplateCache::new(dir.path());
        assert!(!cache.is_loaded());
        assert!(matches!(
            cache.render("index.html", &json!({})),
            Err(TemplateError::NotLoaded)
        ));
    }

    #[test]
    fn broken_template_keeps_previous_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "v1");
        let cache = TemplateCache::new(dir.path());
        cache.refresh().unwrap();

        write(dir.path(), "index.html", "<%#if x%>never closed");
        assert!(matches!(cache.refresh(), Err(TemplateError::Parse { .. })));
        cache.reload();
        assert_eq!(cache.render("index.html", &json!({})).unwrap(), "v1");
    }

    #[test]
    fn refresh_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "before");
        let cache = TemplateCache::new(dir.path());
        cache.refresh().unwrap();
        write(dir.path(), "index.html", "after");
        cache.refresh().unwrap();
        assert_eq!(cache.render("index.html", &json!({})).unwrap(), "after");
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let cache = TemplateCache::new("/definitely/not/here");
        assert!(matches!(cache.refresh(), Err(TemplateError::Io { .. })));
    }
}
