//! Roles, the user contract, and route authorization.
//!
//! Every user has exactly one flat [`Role`]; requests without a logged-in
//! user carry [`GUEST`]. A route lists the roles allowed through and
//! [`authorize`] compares the two. There is no hierarchy: a role is either
//! in the list or it is not.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::context::AppScope;

/// A permission tier.
pub type Role = i64;

/// The role of a request with no logged-in user.
pub const GUEST: Role = 0;

/// Where unauthenticated requests are sent; the base64url-encoded pattern
/// they asked for is appended.
pub const LOGIN_PATH: &str = "/login/dest/";

/// Where authenticated requests without the right role are sent.
pub const DENIED_PATH: &str = "/denied";

/// What the framework needs from an application's user type.
///
/// The framework never builds users itself. The application looks them up
/// (see [`AppSetup`](crate::app::AppSetup)), and the framework keeps the
/// logged-in one in the session, which is why the type must round-trip
/// through serde.
pub trait User: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Whether `password` is this user's password.
    fn test_password(&self, password: &str, app: &AppScope<Self>) -> bool;

    /// The user's single role.
    fn role(&self) -> Role;

    /// Blanks any password hash the type carries. Called before the user is
    /// written into the session cookie.
    fn clear_password_hash(&mut self);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("login required")]
    LoginRequired,

    #[error("role {role} is not permitted")]
    Denied { role: Role },
}

impl AuthzError {
    /// The redirect target for a rejected request to `pattern`.
    pub fn redirect_target(&self, pattern: &str) -> String {
        match self {
            AuthzError::LoginRequired => login_redirect(pattern),
            AuthzError::Denied { .. } => DENIED_PATH.to_owned(),
        }
    }
}

/// Checks `user` (or the guest role when absent) against `allowed`.
///
/// Returns the effective role on success.
pub fn authorize<U: User>(user: Option<&U>, allowed: &[Role]) -> Result<Role, AuthzError> {
    let role = user.map_or(GUEST, User::role);
    if allowed.contains(&role) {
        Ok(role)
    } else if user.is_none() {
        Err(AuthzError::LoginRequired)
    } else {
        Err(AuthzError::Denied { role })
    }
}

/// The login URL carrying `pattern` as the post-login destination.
pub fn login_redirect(pattern: &str) -> String {
    format!("{LOGIN_PATH}{}", URL_SAFE.encode(pattern))
}

/// Reverses the destination encoding used by [`login_redirect`].
pub fn decode_destination(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}
