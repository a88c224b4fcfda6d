//! The application entry points: [`App::configure`], [`App::route`] and
//! [`App::run`].
//!
//! ```rust,no_run
//! use sawsij::{App, AppSetup, HandlerResponse, RouteConfig, GUEST};
//! # use sawsij::{AppScope, Role, User};
//! # #[derive(serde::Serialize, serde::Deserialize)]
//! # struct Member { role: Role }
//! # impl User for Member {
//! #     fn test_password(&self, _: &str, _: &AppScope<Self>) -> bool { false }
//! #     fn role(&self) -> Role { self.role }
//! #     fn clear_password_hash(&mut self) {}
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sawsij::Error> {
//!     let setup = AppSetup::new(|_name: &str, _app: &AppScope<Member>| None);
//!     let mut app = App::configure(setup, "/srv/blog")?;
//!     app.route(RouteConfig::new("/", &[GUEST], |_req, _app, _scope| {
//!         Ok(HandlerResponse::new())
//!     }));
//!     app.run().await
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::AppScope;
use crate::database::DbSetup;
use crate::dispatch::{RouteConfig, Services, dispatch, static_files};
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::router::{self, Router};
use crate::security::{SessionStore, User};
use crate::server::Server;
use crate::templates::TemplateCache;

/// Directory under the base path holding `*.html` templates.
pub const TEMPLATES_DIR: &str = "templates";

/// Host bound when `server.host` is not configured.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Callbacks the application supplies at startup.
pub struct AppSetup<U> {
    /// Looks a user up by name, for login.
    pub get_user: Box<dyn Fn(&str, &AppScope<U>) -> Option<U> + Send + Sync>,
}

impl<U> AppSetup<U> {
    pub fn new<F>(get_user: F) -> Self
    where
        F: Fn(&str, &AppScope<U>) -> Option<U> + Send + Sync + 'static,
    {
        Self {
            get_user: Box::new(get_user),
        }
    }
}

/// A configured application: shared services plus its routing table.
pub struct App<U> {
    services: Arc<Services<U>>,
    router: Router,
}

impl<U: User> App<U> {
    /// Loads configuration, opens the database, parses templates and
    /// registers the static handler.
    ///
    /// An empty `base_path` falls back to the first command-line argument.
    /// Any missing key or failed open is returned as an error.
    pub fn configure(setup: AppSetup<U>, base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = resolve_base_path(base_path.as_ref())?;
        info!(base_path = %base_path.display(), "configuring application");

        let config = Config::load(&base_path)?;
        let db = DbSetup::open(&config)?;
        let sessions = SessionStore::new(config.get("encryption.key")?);

        let cache_templates = match config.get_bool("server.cacheTemplates") {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "server.cacheTemplates unreadable; templates parsed once");
                true
            }
        };

        let templates = TemplateCache::new(base_path.join(TEMPLATES_DIR));
        templates.reload();
        info!(
            dir = %templates.dir().display(),
            loaded = templates.is_loaded(),
            cache = cache_templates,
            "templates"
        );

        let static_dir = base_path.join(static_files::STATIC_PREFIX.trim_matches('/'));
        info!(dir = %static_dir.display(), "serving static files");
        let mut router = Router::new();
        router.handle_shared(
            static_files::STATIC_PREFIX,
            static_files::handler(base_path.clone()),
        );

        let scope = AppScope {
            config,
            db,
            base_path,
            setup,
        };

        Ok(Self {
            services: Arc::new(Services {
                scope,
                templates,
                sessions,
                cache_templates,
            }),
            router,
        })
    }

    /// Registers `route` under its pattern and, when the pattern has no
    /// trailing slash, under `pattern/` as well.
    pub fn route(&mut self, route: RouteConfig<U>) {
        let pattern = route.pattern.clone();
        let route = Arc::new(route);
        let services = Arc::clone(&self.services);
        let handler = router::handler(move |request: Request| {
            dispatch(Arc::clone(&services), Arc::clone(&route), request)
        });

        self.router.handle_shared(&pattern, Arc::clone(&handler));
        if !pattern.ends_with('/') {
            let subtree = format!("{pattern}/");
            debug!(specified = %pattern, implied = %subtree, "registering trailing-slash variant");
            self.router.handle_shared(&subtree, handler);
        }
        info!(pattern = %pattern, "route registered");
    }

    pub fn scope(&self) -> &AppScope<U> {
        &self.services.scope
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Runs one request through the routing table without a socket.
    pub async fn handle(&self, request: Request) -> Response {
        self.router.route(request).await
    }

    /// Binds `server.host:server.port` and serves until the task ends.
    pub async fn run(self) -> Result<()> {
        let config = &self.services.scope.config;
        let port = config.get("server.port")?;
        let host = config
            .get_opt("server.host")?
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());

        let server = Server::bind(format!("{host}:{port}")).await?;
        let router = Arc::new(self.router);
        server
            .run(move |request: Request| {
                let router = Arc::clone(&router);
                async move { router.route(request).await }
            })
            .await?;
        Ok(())
    }
}

fn resolve_base_path(given: &Path) -> Result<PathBuf> {
    if !given.as_os_str().is_empty() {
        return Ok(given.to_path_buf());
    }
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .ok_or(Error::NoBasePath)
}
