//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::collections::HashMap;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete: more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.1 request.
///
/// [`Request::parse`] reads the request head; the server attaches the body
/// once `Content-Length` bytes have arrived.
///
/// # Examples
///
/// ```
/// use sawsij::http::Request;
///
/// let raw = b"GET /posts/list?page=2&q=hello%20world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/posts/list");
/// assert_eq!(request.query_param("page"), Some("2"));
/// assert_eq!(request.query_param("q"), Some("hello world"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    /// Percent-decoded; `+` is kept as is.
    path: String,
    raw_path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    query_params: HashMap<String, String>,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses the request head from `buf`.
    ///
    /// Returns the request (with any bytes after the head provisionally used
    /// as its body) and the offset at which the body starts.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head has not fully arrived yet.
    /// - [`RequestError::Parse`]: the head is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw.method {
            Some(m) => m.parse::<Method>().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };
        let target = raw
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let (raw_path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };
        let path = percent_decode_str(&raw_path).decode_utf8_lossy().into_owned();

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let query_params = query.as_deref().map(parse_urlencoded).unwrap_or_default();

        Ok((
            Self {
                method,
                path,
                raw_path,
                version,
                headers: header_map,
                query,
                query_params,
                body: Bytes::copy_from_slice(&buf[body_offset..]),
            },
            body_offset,
        ))
    }

    /// Replaces the body, typically with exactly `Content-Length` bytes.
    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without the query string.
    /// The percent-decoded path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path exactly as it appeared on the request line.
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// A decoded query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// A cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers.cookie(name)
    }

    /// Decodes an `application/x-www-form-urlencoded` body.
    ///
    /// Returns an empty map for any other content type or a non-UTF-8 body.
    pub fn form(&self) -> HashMap<String, String> {
        let is_form = self
            .headers
            .get("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if !is_form {
            return HashMap::new();
        }
        std::str::from_utf8(&self.body)
            .map(parse_urlencoded)
            .unwrap_or_default()
    }

    /// A single form field, falling back to the query string like most
    /// form helpers do.
    pub fn form_value(&self, key: &str) -> Option<String> {
        self.form()
            .remove(key)
            .or_else(|| self.query_param(key).map(str::to_owned))
    }

    /// HTTP/1.1 keeps the connection open unless told otherwise; HTTP/1.0
    /// closes it unless `Connection: keep-alive` is sent.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

/// Parses `key=value&key2=value2`, decoding `+` and percent escapes.
fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn query_is_split_and_decoded() {
        let raw = b"GET /search?q=a%2Fb+c&flag HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=a%2Fb+c&flag"));
        assert_eq!(req.query_param("q"), Some("a/b c"));
        assert_eq!(req.query_param("flag"), Some(""));
    }

    #[test]
    fn path_is_percent_decoded() {
        let raw = b"GET /posts/title/hello%20world/tag/c++ HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/posts/title/hello world/tag/c++");
        assert_eq!(req.raw_path(), "/posts/title/hello%20world/tag/c++");
    }

    #[test]
    fn incomplete_head() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn keep_alive_rules() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn form_body_is_decoded() {
        let raw = b"POST /login HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 30\r\n\r\nusername=ann&password=p%40ss+1";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(30));
        assert_eq!(&raw[offset..], b"username=ann&password=p%40ss+1");
        assert_eq!(req.form_value("username").as_deref(), Some("ann"));
        assert_eq!(req.form_value("password").as_deref(), Some("p@ss 1"));
    }

    #[test]
    fn form_ignored_for_other_content_types() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Type: application/json\r\n\r\na=1";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(req.form().is_empty());
    }

    #[test]
    fn cookie_lookup() {
        let raw = b"GET / HTTP/1.1\r\nCookie: session=abc.def\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.cookie("session"), Some("abc.def"));
    }
}
