//! Route registration values and the per-request pipeline.
//!
//! Every registered route runs the same steps, in order:
//!
//! 1. reload templates when template caching is off;
//! 2. classify the [`ResponseKind`] from a leading `/json` or `/xml`
//!    segment and strip it;
//! 3. read the URL parameters that follow the pattern;
//! 4. load the session and its user (guest when absent);
//! 5. check the user's role against the route's allow-list, redirecting to
//!    the login page or `/denied` without calling the handler;
//! 6. call the handler and write the session back as a cookie;
//! 7. render: redirect, error, XML stub, JSON, or an HTML template.

pub mod static_files;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info};

use crate::context::{AppScope, RequestScope, USER_KEY, UrlParams};
use crate::http::{Request, Response, StatusCode};
use crate::security::{Role, SessionStore, User, authorize};
use crate::templates::{TEMPLATE_EXT, TemplateCache};

/// Body sent with every `500`; details only go to the log.
pub const INTERNAL_ERROR_BODY: &str = "An error occurred. See log for details.";

/// Standard XML declaration written before XML bodies.
pub const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Opaque error a handler may return. It is logged, never shown.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<HandlerResponse, HandlerError>;

/// A route handler.
///
/// Handlers are synchronous and run on the blocking thread pool, so they may
/// use the database handle directly.
pub type HandlerFn<U> =
    Arc<dyn Fn(&Request, &AppScope<U>, &mut RequestScope<U>) -> HandlerResult + Send + Sync>;

/// A URL pattern bound to a handler and the roles allowed to reach it.
pub struct RouteConfig<U> {
    pub pattern: String,
    pub handler: HandlerFn<U>,
    pub roles: Vec<Role>,
}

impl<U: User> RouteConfig<U> {
    pub fn new<F>(pattern: impl Into<String>, roles: &[Role], handler: F) -> Self
    where
        F: Fn(&Request, &AppScope<U>, &mut RequestScope<U>) -> HandlerResult
            + Send
            + Sync
            + 'static,
    {
        Self {
            pattern: pattern.into(),
            handler: Arc::new(handler),
            roles: roles.to_vec(),
        }
    }
}

/// What a handler hands back: view data, or a redirect that overrides it.
///
/// A view with a single entry is special-cased by the JSON renderer, which
/// sends only that entry's value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerResponse {
    pub view: Map<String, Value>,
    pub redirect: Option<String>,
}

impl HandlerResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A response that only redirects.
    pub fn redirect(to: impl Into<String>) -> Self {
        Self {
            view: Map::new(),
            redirect: Some(to.into()),
        }
    }

    /// Adds a raw JSON value to the view.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.view.insert(key.into(), value);
    }

    /// Serializes `value` into the view under `key`.
    pub fn set<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        self.view.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }
}

/// How a response body is produced, decided once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Html,
    Json,
    Xml,
}

impl ResponseKind {
    /// Classifies `path` by its first segment and returns the path with that
    /// segment removed (`/` when nothing is left).
    pub fn classify(path: &str) -> (Self, &str) {
        for (prefix, kind) in [("/json", Self::Json), ("/xml", Self::Xml)] {
            if let Some(rest) = path.strip_prefix(prefix) {
                if rest.is_empty() {
                    return (kind, "/");
                }
                if rest.starts_with('/') {
                    return (kind, rest);
                }
            }
        }
        (Self::Html, path)
    }
}

/// Reads `/k1/v1/k2/v2...` after `pattern` in `path` into a map.
///
/// Both arguments may carry a `/json` or `/xml` prefix; it is stripped from
/// each. Empty segments are skipped, an odd trailing segment is dropped, and
/// a path that does not continue the pattern gives an empty map.
///
/// ```
/// use sawsij::dispatch::extract_url_params;
///
/// let params = extract_url_params("/admin/", "/admin/id/14/display/1");
/// assert_eq!(params.get("id"), Some("14"));
/// assert_eq!(params.get("display"), Some("1"));
/// ```
pub fn extract_url_params(pattern: &str, path: &str) -> UrlParams {
    let (_, pattern) = ResponseKind::classify(pattern);
    let (_, path) = ResponseKind::classify(path);
    let base = pattern.trim_end_matches('/');

    let Some(rest) = path.strip_prefix(base) else {
        return UrlParams::new();
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        return UrlParams::new();
    }

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    segments
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

/// Template name for a pattern: `/posts/list` → `posts-list`, `/` → `index`.
pub fn template_name(pattern: &str) -> String {
    let trimmed = pattern.trim_matches('/');
    if trimmed.is_empty() {
        "index".to_owned()
    } else {
        trimmed.replace('/', "-")
    }
}

/// Everything the pipeline needs besides the route itself.
pub(crate) struct Services<U> {
    pub scope: AppScope<U>,
    pub templates: TemplateCache,
    pub sessions: SessionStore,
    pub cache_templates: bool,
}

/// Runs the full pipeline for one request to `route`.
pub(crate) async fn dispatch<U: User>(
    services: Arc<Services<U>>,
    route: Arc<RouteConfig<U>>,
    request: Request,
) -> Response {
    debug!(method = %request.method(), path = request.path(), pattern = %route.pattern, "dispatching");

    if !services.cache_templates {
        let reloading = Arc::clone(&services);
        if let Err(e) = tokio::task::spawn_blocking(move || reloading.templates.reload()).await {
            error!(error = %e, "template reload task failed");
        }
    }

    let (kind, _) = ResponseKind::classify(request.path());
    let url_params = extract_url_params(&route.pattern, request.path());
    debug!(params = ?url_params, kind = ?kind, "request classified");

    let session = services.sessions.load(&request);
    let scope = RequestScope::<U>::new(session, url_params);
    let session_user = scope.session.get(USER_KEY).cloned().unwrap_or(Value::Null);

    if let Err(rejection) = authorize(scope.user(), &route.roles) {
        info!(pattern = %route.pattern, roles = ?route.roles, reason = %rejection, "access refused");
        return Response::redirect(rejection.redirect_target(&route.pattern));
    }

    let (scope, result) = match run_handler(&services, &route, request, scope).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(pattern = %route.pattern, error = %e, "handler task failed");
            return internal_error();
        }
    };

    let mut response = render(&services.templates, &route.pattern, kind, result, session_user);
    if let Err(e) = services.sessions.save(&scope.session, &mut response) {
        error!(error = %e, "failed to save session");
    }
    response
}

async fn run_handler<U: User>(
    services: &Arc<Services<U>>,
    route: &Arc<RouteConfig<U>>,
    request: Request,
    mut scope: RequestScope<U>,
) -> Result<(RequestScope<U>, HandlerResult), tokio::task::JoinError> {
    let services = Arc::clone(services);
    let route = Arc::clone(route);
    tokio::task::spawn_blocking(move || {
        let result = (route.handler)(&request, &services.scope, &mut scope);
        (scope, result)
    })
    .await
}

fn render(
    templates: &TemplateCache,
    pattern: &str,
    kind: ResponseKind,
    result: HandlerResult,
    session_user: Value,
) -> Response {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(pattern, error = %e, "handler returned an error");
            return internal_error();
        }
    };

    if let Some(target) = outcome.redirect {
        return Response::redirect(target);
    }

    match kind {
        ResponseKind::Xml => render_xml(),
        ResponseKind::Json => render_json(&outcome.view),
        ResponseKind::Html => render_html(templates, pattern, outcome.view, session_user),
    }
}

#[derive(Serialize)]
#[serde(rename = "Response")]
struct XmlStub {
    #[serde(rename = "Error")]
    error: &'static str,
}

// XML rendering of view data does not exist yet; every XML request gets the
// same placeholder document.
fn render_xml() -> Response {
    match quick_xml::se::to_string(&XmlStub {
        error: "NOT YET IMPLEMENTED",
    }) {
        Ok(doc) => Response::new(StatusCode::Ok)
            .header("Content-Type", "text/xml")
            .body(format!("{XML_HEADER}{doc}")),
        Err(e) => {
            error!(error = %e, "xml serialization failed");
            internal_error()
        }
    }
}

fn render_json(view: &Map<String, Value>) -> Response {
    let encoded = match view.values().next() {
        Some(only) if view.len() == 1 => serde_json::to_string(only),
        _ => serde_json::to_string(view),
    };
    match encoded {
        Ok(body) => Response::json(body),
        Err(e) => {
            error!(error = %e, "json serialization failed");
            internal_error()
        }
    }
}

fn render_html(
    templates: &TemplateCache,
    pattern: &str,
    mut view: Map<String, Value>,
    session_user: Value,
) -> Response {
    let name = format!("{}.{TEMPLATE_EXT}", template_name(pattern));
    if !view.is_empty() {
        view.insert("global".to_owned(), json!({ "user": session_user }));
    }
    match templates.render(&name, &view) {
        Ok(html) => Response::html(html),
        Err(e) => {
            error!(template = %name, error = %e, "template render failed");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    Response::new(StatusCode::InternalServerError).body(INTERNAL_ERROR_BODY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefixes() {
        assert_eq!(ResponseKind::classify("/json/posts"), (ResponseKind::Json, "/posts"));
        assert_eq!(ResponseKind::classify("/xml/posts/id/1"), (ResponseKind::Xml, "/posts/id/1"));
        assert_eq!(ResponseKind::classify("/json"), (ResponseKind::Json, "/"));
        assert_eq!(ResponseKind::classify("/posts"), (ResponseKind::Html, "/posts"));
    }

    #[test]
    fn classify_needs_a_whole_segment() {
        assert_eq!(ResponseKind::classify("/jsonp"), (ResponseKind::Html, "/jsonp"));
        assert_eq!(ResponseKind::classify("/xmlrpc/x"), (ResponseKind::Html, "/xmlrpc/x"));
    }

    #[test]
    fn params_are_paired() {
        let p = extract_url_params("/admin", "/admin/id/14/display/1");
        assert_eq!(p.len(), 2);
        assert_eq!(p.get("id"), Some("14"));
        assert_eq!(p.get("display"), Some("1"));
    }

    #[test]
    fn odd_trailing_segment_is_dropped() {
        let p = extract_url_params("/admin/", "/admin/id/14/orphan");
        assert_eq!(p.len(), 1);
        assert_eq!(p.get("id"), Some("14"));
        assert_eq!(p.get("orphan"), None);
    }

    #[test]
    fn params_after_kind_prefix() {
        let p = extract_url_params("/json/posts", "/json/posts/id/3");
        assert_eq!(p.get("id"), Some("3"));
    }

    #[test]
    fn bare_pattern_has_no_params() {
        assert!(extract_url_params("/admin", "/admin").is_empty());
        assert!(extract_url_params("/admin", "/admin/").is_empty());
    }

    #[test]
    fn unrelated_path_gives_empty_map() {
        assert!(extract_url_params("/admin", "/posts/id/1").is_empty());
        assert!(extract_url_params("/admin", "/administrator/id/1").is_empty());
    }

    #[test]
    fn root_pattern_reads_whole_path() {
        let p = extract_url_params("/", "/page/2");
        assert_eq!(p.get("page"), Some("2"));
    }

    #[test]
    fn template_names() {
        assert_eq!(template_name("/"), "index");
        assert_eq!(template_name("/admin"), "admin");
        assert_eq!(template_name("/admin/"), "admin");
        assert_eq!(template_name("/posts/list"), "posts-list");
    }

    #[test]
    fn json_single_entry_is_unwrapped() {
        let mut view = Map::new();
        view.insert("posts".into(), json!([1, 2]));
        let res = render_json(&view);
        assert_eq!(res.payload(), b"[1,2]");
    }

    #[test]
    fn json_multiple_entries_stay_wrapped() {
        let mut view = Map::new();
        view.insert("a".into(), json!(1));
        view.insert("b".into(), json!("x"));
        let res = render_json(&view);
        let parsed: Value = serde_json::from_slice(res.payload()).unwrap();
        assert_eq!(parsed, json!({"a": 1, "b": "x"}));
    }

    #[test]
    fn json_empty_view_is_empty_object() {
        assert_eq!(render_json(&Map::new()).payload(), b"{}");
    }

    #[test]
    fn xml_is_a_stub() {
        let res = render_xml();
        assert_eq!(res.headers().get("content-type"), Some("text/xml"));
        let body = String::from_utf8(res.payload().to_vec()).unwrap();
        assert!(body.starts_with(XML_HEADER));
        assert!(body.ends_with("<Response><Error>NOT YET IMPLEMENTED</Error></Response>"));
    }

    #[test]
    fn handler_error_is_500_with_generic_body() {
        let dir = tempfile::tempdir().unwrap();
        let templates = TemplateCache::new(dir.path());
        let res = render(
            &templates,
            "/x",
            ResponseKind::Json,
            Err("db exploded".into()),
            Value::Null,
        );
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(res.payload(), INTERNAL_ERROR_BODY.as_bytes());
    }

    #[test]
    fn redirect_wins_over_view() {
        let dir = tempfile::tempdir().unwrap();
        let templates = TemplateCache::new(dir.path());
        let mut outcome = HandlerResponse::redirect("/elsewhere");
        outcome.insert("ignored", json!(true));
        let res = render(&templates, "/x", ResponseKind::Json, Ok(outcome), Value::Null);
        assert_eq!(res.status(), StatusCode::Found);
        assert_eq!(res.headers().get("location"), Some("/elsewhere"));
        assert!(res.payload().is_empty());
    }

    #[test]
    fn html_injects_global_user() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("posts-list.html"),
            "<% title %> by <% global.user.name %>",
        )
        .unwrap();
        let templates = TemplateCache::new(dir.path());
        templates.refresh().unwrap();

        let mut outcome = HandlerResponse::new();
        outcome.set("title", "Hello").unwrap();
        let res = render(
            &templates,
            "/posts/list",
            ResponseKind::Html,
            Ok(outcome),
            json!({"name": "ann"}),
        );
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.payload(), b"Hello by ann");
    }

    #[test]
    fn missing_template_is_500() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "home").unwrap();
        let templates = TemplateCache::new(dir.path());
        templates.refresh().unwrap();
        let res = render(
            &templates,
            "/nowhere",
            ResponseKind::Html,
            Ok(HandlerResponse::new()),
            Value::Null,
        );
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }
}
