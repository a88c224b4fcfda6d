//! Request routing: map URL patterns to handlers.
//!
//! [`Router`] is a pattern mux with two kinds of pattern:
//!
//! | Pattern     | Matches                                   |
//! |-------------|-------------------------------------------|
//! | `/admin`    | exactly `/admin`                          |
//! | `/admin/`   | `/admin/` and everything beneath it        |
//! | `/`         | every path (the catch-all subtree)         |
//!
//! When several patterns match, the longest one wins, so `/static/` beats
//! `/` and `/admin/users` beats `/admin/`. Routes are method-agnostic;
//! handlers inspect [`Request::method`] themselves when they care.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::http::{Request, Response, StatusCode};

/// Type-erased async handler shared between the routes it is registered on.
pub type Handler =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` gets this via the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(request))
    }
}

/// Erases a concrete handler into a [`Handler`].
pub fn handler(h: impl IntoHandler) -> Handler {
    Arc::new(move |req| h.call(req))
}

// Compiled form of a pattern string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    // Stored with its trailing slash.
    Subtree(String),
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        if pattern.ends_with('/') {
            Pattern::Subtree(pattern.to_owned())
        } else {
            Pattern::Exact(pattern.to_owned())
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Pattern::Exact(p) | Pattern::Subtree(p) => p,
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Exact(p) => p == path,
            Pattern::Subtree(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

struct Route {
    pattern: Pattern,
    handler: Handler,
}

/// Dispatches requests to the handler registered under the longest matching
/// pattern; `404 Not Found` when nothing matches.
///
/// # Examples
///
/// ```rust,no_run
/// use sawsij::router::Router;
/// use sawsij::http::{Request, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.handle("/ping", |_req: Request| async { Response::new(StatusCode::Ok) });
/// router.handle("/files/", |req: Request| async move {
///     Response::new(StatusCode::Ok).body(req.path().to_owned())
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `h` under `pattern`.
    pub fn handle(&mut self, pattern: &str, h: impl IntoHandler) {
        self.handle_shared(pattern, handler(h));
    }

    /// Registers an already-erased handler, so one handler can sit behind
    /// several patterns.
    ///
    /// Registering the same pattern twice replaces the earlier handler.
    pub fn handle_shared(&mut self, pattern: &str, handler: Handler) {
        let pattern = Pattern::parse(pattern);
        if let Some(existing) = self.routes.iter_mut().find(|r| r.pattern == pattern) {
            debug!(pattern = pattern.as_str(), "replacing route");
            existing.handler = handler;
            return;
        }
        self.routes.push(Route { pattern, handler });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `true` if `pattern` has been registered verbatim.
    pub fn has_pattern(&self, pattern: &str) -> bool {
        self.routes.iter().any(|r| r.pattern.as_str() == pattern)
    }

    /// The registered pattern that would serve `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.lookup(path).map(|r| r.pattern.as_str())
    }

    fn lookup(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|r| r.pattern.matches(path))
            .max_by_key(|r| r.pattern.as_str().len())
    }

    /// Dispatches `request` to its handler.
    pub async fn route(&self, request: Request) -> Response {
        match self.lookup(request.path()) {
            Some(route) => {
                let handler = Arc::clone(&route.handler);
                handler(request).await
            }
            None => {
                debug!(path = request.path(), "no route");
                Response::new(StatusCode::NotFound).body("404 page not found")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn tagged(tag: &'static str) -> impl IntoHandler {
        move |_req: Request| async move { Response::new(StatusCode::Ok).body(tag) }
    }

    #[test]
    fn exact_pattern_matches_only_itself() {
        let p = Pattern::parse("/admin");
        assert!(p.matches("/admin"));
        assert!(!p.matches("/admin/"));
        assert!(!p.matches("/admin/id/1"));
    }

    #[test]
    fn subtree_pattern_matches_descendants() {
        let p = Pattern::parse("/admin/");
        assert!(p.matches("/admin/"));
        assert!(p.matches("/admin/id/1"));
        assert!(!p.matches("/admin"));
        assert!(!p.matches("/administrator"));
    }

    #[test]
    fn root_is_catch_all() {
        let mut router = Router::new();
        router.handle("/", tagged("root"));
        assert_eq!(router.resolve("/anything/at/all"), Some("/"));
    }

    #[test]
    fn longest_pattern_wins() {
        let mut router = Router::new();
        router.handle("/", tagged("root"));
        router.handle("/admin/", tagged("admin"));
        router.handle("/admin/users/", tagged("users"));
        assert_eq!(router.resolve("/admin/users/id/3"), Some("/admin/users/"));
        assert_eq!(router.resolve("/admin/id/3"), Some("/admin/"));
        assert_eq!(router.resolve("/other"), Some("/"));
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut router = Router::new();
        router.handle("/a", tagged("one"));
        router.handle("/a", tagged("two"));
        assert_eq!(router.len(), 1);
    }

    #[tokio::test]
    async fn unmatched_path_is_404() {
        let mut router = Router::new();
        router.handle("/hello", tagged("hello"));
        let res = router.route(get("/world")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn shared_handler_serves_both_patterns() {
        let mut router = Router::new();
        let h = handler(tagged("admin"));
        router.handle_shared("/admin", Arc::clone(&h));
        router.handle_shared("/admin/", h);

        for path in ["/admin", "/admin/", "/admin/id/14"] {
            let res = router.route(get(path)).await;
            assert_eq!(res.status(), StatusCode::Ok, "{path}");
            assert_eq!(res.payload(), b"admin");
        }
    }
}
