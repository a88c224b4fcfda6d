//! Header map with case-insensitive lookup and cookie parsing.

use std::fmt;

/// An insertion-ordered, multi-value header map.
///
/// Names compare case-insensitively. `Set-Cookie` is the usual reason a name
/// appears more than once.
///
/// # Examples
///
/// ```
/// use sawsij::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Cookie", "session=abc; theme=dark");
///
/// assert_eq!(headers.cookie("theme"), Some("dark"));
/// assert_eq!(headers.cookie("missing"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry, keeping any existing values for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes every entry named `name`. Returns `true` if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.entries.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Looks a cookie up by name across every `Cookie` header.
    ///
    /// Cookie names are case-sensitive; surrounding quotes on the value are
    /// stripped.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.get_all("cookie")
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim_matches('"'))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/html");
        assert_eq!(h.get("content-type"), Some("text/html"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.insert("X-Tag", "a");
        h.insert("x-tag", "b");
        h.set("X-Tag", "c");
        assert_eq!(h.get_all("x-tag").collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn cookie_across_multiple_headers() {
        let mut h = Headers::new();
        h.insert("Cookie", "a=1; b=2");
        h.insert("Cookie", "session=\"xyz\"");
        assert_eq!(h.cookie("b"), Some("2"));
        assert_eq!(h.cookie("session"), Some("xyz"));
        assert_eq!(h.cookie("A"), None);
    }

    #[test]
    fn cookie_value_may_contain_equals() {
        let mut h = Headers::new();
        h.insert("Cookie", "session=abc==.sig");
        assert_eq!(h.cookie("session"), Some("abc==.sig"));
    }
}
