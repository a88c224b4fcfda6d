//! Signed cookie sessions.
//!
//! The whole session lives in one cookie:
//!
//! ```text
//! session=<base64url(json envelope)>.<base64url(hmac-sha256)>
//! ```
//!
//! The envelope carries the values map and the time it was issued. A cookie
//! whose signature does not verify, that has outlived its max age, or that
//! fails to decode is discarded and the request gets a fresh, empty session.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::http::{Request, Response};

type HmacSha256 = Hmac<Sha256>;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

/// Thirty days.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cookie is malformed")]
    Malformed,

    #[error("session cookie signature mismatch")]
    BadSignature,

    #[error("session cookie expired")]
    Expired,

    #[error("invalid session key")]
    Key,

    #[error("session cookie encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("session payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "t")]
    issued: u64,
    #[serde(rename = "v")]
    values: Map<String, Value>,
}

/// Values stored for one browser session.
#[derive(Debug, Clone)]
pub struct Session {
    values: Map<String, Value>,
    is_new: bool,
}

impl Session {
    /// A session no cookie backed.
    pub fn new() -> Self {
        Self {
            values: Map::new(),
            is_new: true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// `true` when the request carried no valid session cookie.
    pub fn is_new(&self) -> bool {
        self.is_new
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads and saves [`Session`]s, signing them with a secret key.
#[derive(Clone)]
pub struct SessionStore {
    key: Vec<u8>,
    max_age: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("key", &"<redacted>")
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl SessionStore {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// The session for `request`; a fresh one if the cookie is absent or
    /// rejected.
    pub fn load(&self, request: &Request) -> Session {
        let Some(cookie) = request.cookie(SESSION_COOKIE) else {
            return Session::new();
        };
        match self.decode(cookie) {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "discarding session cookie");
                Session::new()
            }
        }
    }

    /// Writes `session` onto `response` as a `Set-Cookie` header.
    pub fn save(&self, session: &Session, response: &mut Response) -> Result<(), SessionError> {
        let value = self.encode(session)?;
        response.set_cookie(format!(
            "{SESSION_COOKIE}={value}; Path=/; Max-Age={}; HttpOnly",
            self.max_age.as_secs()
        ));
        Ok(())
    }

    pub fn encode(&self, session: &Session) -> Result<String, SessionError> {
        let envelope = Envelope {
            issued: now_secs(),
            values: session.values.clone(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&envelope)?);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    pub fn decode(&self, cookie: &str) -> Result<Session, SessionError> {
        let (payload, signature) = cookie.split_once('.').ok_or(SessionError::Malformed)?;
        let signature = URL_SAFE_NO_PAD.decode(signature)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        let envelope: Envelope = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
        if now_secs().saturating_sub(envelope.issued) > self.max_age.as_secs() {
            return Err(SessionError::Expired);
        }
        Ok(Session {
            values: envelope.values,
            is_new: false,
        })
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| SessionError::Key)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with_cookie(cookie: &str) -> Request {
        let raw = format!("GET / HTTP/1.1\r\nCookie: {SESSION_COOKIE}={cookie}\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn saved_session_loads_back() {
        let store = SessionStore::new("key");
        let mut session = Session::new();
        session.insert("user", json!({"name": "ann", "role": 2}));

        let cookie = store.encode(&session).unwrap();
        let loaded = store.load(&request_with_cookie(&cookie));
        assert!(!loaded.is_new());
        assert_eq!(loaded.get("user"), Some(&json!({"name": "ann", "role": 2})));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let store = SessionStore::new("key");
        let mut session = Session::new();
        session.insert("role", json!(1));
        let cookie = store.encode(&session).unwrap();

        let (_, sig) = cookie.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"t":0,"v":{"role":9}}"#);
        let err = store.decode(&format!("{forged}.{sig}")).unwrap_err();
        assert!(matches!(err, SessionError::BadSignature));

        let loaded = store.load(&request_with_cookie(&format!("{forged}.{sig}")));
        assert!(loaded.is_new());
        assert!(loaded.values().is_empty());
    }

    #[test]
    fn other_key_cannot_read() {
        let cookie = SessionStore::new("one").encode(&Session::new()).unwrap();
        assert!(matches!(
            SessionStore::new("two").decode(&cookie),
            Err(SessionError::BadSignature)
        ));
    }

    #[test]
    fn expired_cookie_is_rejected() {
        let store = SessionStore::new("key");
        let envelope = URL_SAFE_NO_PAD.encode(br#"{"t":1,"v":{}}"#);
        let mut mac = store.mac().unwrap();
        mac.update(envelope.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        assert!(matches!(
            store.decode(&format!("{envelope}.{sig}")),
            Err(SessionError::Expired)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let store = SessionStore::new("key");
        assert!(matches!(store.decode("no-dot"), Err(SessionError::Malformed)));
        assert!(store.load(&request_with_cookie("%%%.###")).is_new());
    }

    #[test]
    fn save_sets_cookie_attributes() {
        let store = SessionStore::new("key");
        let mut response = Response::default();
        store.save(&Session::new(), &mut response).unwrap();
        let cookie = response.headers().get("set-cookie").unwrap();
        assert!(cookie.starts_with("session="));
        assert!(cookie.contains("; Path=/;"));
        assert!(cookie.ends_with("; HttpOnly"));
    }
}
