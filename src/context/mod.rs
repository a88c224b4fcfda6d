//! Scopes handed to every handler.
//!
//! - [`AppScope`]: process-wide, built once by
//!   [`App::configure`](crate::app::App::configure) and shared read-only.
//! - [`RequestScope`]: built per request from the session, the URL parameters and
//!   the session user decoded once up front.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use crate::app::AppSetup;
use crate::config::Config;
use crate::database::DbSetup;
use crate::security::{Session, User};

/// Session key the logged-in user is stored under.
pub const USER_KEY: &str = "user";

/// Configuration, database and application hooks shared by all requests.
pub struct AppScope<U> {
    pub config: Config,
    pub db: DbSetup,
    pub base_path: PathBuf,
    pub setup: AppSetup<U>,
}

impl<U: User> AppScope<U> {
    /// Looks a user up through the application's `get_user` hook.
    pub fn get_user(&self, username: &str) -> Option<U> {
        (self.setup.get_user)(username, self)
    }

    /// Looks `username` up and checks `password`.
    ///
    /// The returned user has already had its password hash cleared, so it is
    /// ready for [`RequestScope::login`].
    pub fn authenticate(&self, username: &str, password: &str) -> Option<U> {
        let mut user = self.get_user(username)?;
        if !user.test_password(password, self) {
            return None;
        }
        user.clear_password_hash();
        Some(user)
    }
}

/// Key/value pairs read from the path segments after a route's pattern.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct UrlParams {
    map: HashMap<String, String>,
}

impl UrlParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// The parameter parsed as an integer; `None` if absent or not numeric.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UrlParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Session, URL parameters and current user for one request.
#[derive(Debug)]
pub struct RequestScope<U> {
    pub session: Session,
    pub url_params: UrlParams,
    user: Option<U>,
}

impl<U: User> RequestScope<U> {
    /// Builds the scope, decoding the session user.
    ///
    /// A stored user that no longer matches `U` is dropped from the session
    /// and the request proceeds as a guest.
    pub fn new(mut session: Session, url_params: UrlParams) -> Self {
        let user = match session.get(USER_KEY).cloned() {
            None | Some(Value::Null) => None,
            Some(value) => match serde_json::from_value::<U>(value) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "session user does not decode; treating as guest");
                    session.remove(USER_KEY);
                    None
                }
            },
        };
        Self {
            session,
            url_params,
            user,
        }
    }

    pub fn user(&self) -> Option<&U> {
        self.user.as_ref()
    }

    /// Stores `user` in the session after clearing its password hash.
    pub fn login(&mut self, mut user: U) -> Result<(), serde_json::Error> {
        user.clear_password_hash();
        self.session.insert(USER_KEY, serde_json::to_value(&user)?);
        self.user = Some(user);
        Ok(())
    }

    pub fn logout(&mut self) {
        self.session.remove(USER_KEY);
        self.user = None;
    }

    /// The `id` URL parameter as an integer.
    pub fn int_id(&self) -> Option<i64> {
        self.url_params.get_int("id")
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Role;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Editor {
        name: String,
        role: Role,
        #[serde(default)]
        hash: String,
    }

    impl User for Editor {
        fn test_password(&self, password: &str, _app: &AppScope<Self>) -> bool {
            self.hash == password
        }
        fn role(&self) -> Role {
            self.role
        }
        fn clear_password_hash(&mut self) {
            self.hash.clear();
        }
    }

    #[test]
    fn url_params_int_parsing() {
        let params: UrlParams = [("id", "14"), ("display", "x")].into_iter().collect();
        assert_eq!(params.get_int("id"), Some(14));
        assert_eq!(params.get_int("display"), None);
        assert_eq!(params.get_int("missing"), None);
    }

    #[test]
    fn empty_session_has_no_user() {
        let scope = RequestScope::<Editor>::new(Session::new(), UrlParams::new());
        assert!(scope.user().is_none());
    }

    #[test]
    fn session_user_is_decoded() {
        let mut session = Session::new();
        session.insert(USER_KEY, json!({"name": "ann", "role": 2}));
        let scope = RequestScope::<Editor>::new(session, UrlParams::new());
        assert_eq!(scope.user().map(|u| u.role), Some(2));
    }

    #[test]
    fn undecodable_user_is_dropped() {
        let mut session = Session::new();
        session.insert(USER_KEY, json!("not an editor"));
        let scope = RequestScope::<Editor>::new(session, UrlParams::new());
        assert!(scope.user().is_none());
        assert!(scope.session.get(USER_KEY).is_none());
    }

    #[test]
    fn login_clears_hash_before_storing() {
        let mut scope = RequestScope::<Editor>::new(Session::new(), UrlParams::new());
        scope
            .login(Editor {
                name: "ann".into(),
                role: 1,
                hash: "secret".into(),
            })
            .unwrap();
        assert_eq!(
            scope.session.get(USER_KEY),
            Some(&json!({"name": "ann", "role": 1, "hash": ""}))
        );

        scope.logout();
        assert!(scope.user().is_none());
        assert!(scope.into_session().get(USER_KEY).is_none());
    }

    #[test]
    fn int_id_reads_id_param() {
        let params: UrlParams = [("id", "7")].into_iter().collect();
        let scope = RequestScope::<Editor>::new(Session::new(), params);
        assert_eq!(scope.int_id(), Some(7));
    }
}
