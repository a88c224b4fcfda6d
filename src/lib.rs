//! # sawsij
//!
//! A small async web framework. An application points it at a base
//! directory:
//!
//! ```text
//! <base>/etc/config.yaml     database, session key, server settings
//! <base>/templates/*.html    one template per route
//! <base>/static/**           served as-is under /static/
//! ```
//!
//! then registers routes. Each route is a pattern, a handler and the roles
//! allowed to call it. The framework takes care of cookie sessions, role
//! checks, URL parameters and rendering: HTML through the route's template,
//! or JSON when the path starts with `/json`.
//!
//! ## Modules
//!
//! - [`app`]: `configure` / `route` / `run`
//! - [`dispatch`]: the per-request pipeline and renderers
//! - [`context`]: application and request scopes handed to handlers
//! - [`security`]: signed sessions, users and roles
//! - [`templates`]: the reloadable template bundle
//! - [`config`], [`database`]: startup resources
//! - [`router`], [`server`], [`http`]: the HTTP/1.1 transport

pub mod app;
pub mod config;
pub mod context;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod router;
pub mod security;
pub mod server;
pub mod templates;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::{App, AppSetup};
pub use context::{AppScope, RequestScope, UrlParams};
pub use dispatch::{HandlerError, HandlerResponse, HandlerResult, ResponseKind, RouteConfig};
pub use error::Error;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use security::{GUEST, Role, Session, User};
pub use server::{Server, ServerError};
