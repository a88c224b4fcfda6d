//! Files under `<base>/static/`, served at `/static/...`.
//!
//! Static requests skip sessions, roles and templates entirely.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::http::{Request, Response, StatusCode};
use crate::router::Handler;

/// URL prefix and directory name of static files.
pub const STATIC_PREFIX: &str = "/static/";

/// Serves `path` (which includes the `/static/` prefix) relative to `base`.
///
/// Paths containing a `..` segment are refused with `400`. Missing files
/// and directories give `404`.
pub async fn serve(base: &Path, path: &str) -> Response {
    let relative = path.trim_start_matches('/');
    if relative.split('/').any(|segment| segment == "..") {
        warn!(path, "refusing path with parent segment");
        return Response::new(StatusCode::BadRequest).body("invalid URL path");
    }

    let root = base.join(STATIC_PREFIX.trim_matches('/'));
    let file = base.join(relative);
    match contained(&root, &file).await {
        Some(file) => read(&file).await,
        None => not_found(),
    }
}

/// The handler registered on [`STATIC_PREFIX`].
pub fn handler(base: PathBuf) -> Handler {
    crate::router::handler(move |request: Request| {
        let base = base.clone();
        async move { serve(&base, request.path()).await }
    })
}

// Canonical path of `file` if it is a regular file inside `root`.
async fn contained(root: &Path, file: &Path) -> Option<PathBuf> {
    let root = fs::canonicalize(root).await.ok()?;
    let file = fs::canonicalize(file).await.ok()?;
    if !file.starts_with(&root) {
        warn!(path = %file.display(), "static path escapes static directory");
        return None;
    }
    let meta = fs::metadata(&file).await.ok()?;
    meta.is_file().then_some(file)
}

async fn read(file: &Path) -> Response {
    match fs::read(file).await {
        Ok(body) => {
            debug!(path = %file.display(), bytes = body.len(), "serving static file");
            Response::new(StatusCode::Ok)
                .header("Content-Type", content_type(file.extension().and_then(|e| e.to_str())))
                .body_bytes(body)
        }
        Err(e) => {
            warn!(path = %file.display(), error = %e, "failed to read static file");
            not_found()
        }
    }
}

fn not_found() -> Response {
    Response::new(StatusCode::NotFound).body("404 page not found")
}

/// Content type for a file extension.
pub fn content_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("txt" | "md") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("js" | "mjs") => "application/javascript",
        Some("json" | "map") => "application/json",
        Some("wasm") => "application/wasm",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
