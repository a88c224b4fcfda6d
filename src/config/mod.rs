//! Application configuration read from `<base>/etc/config.yaml`.
//!
//! The file is an arbitrary YAML mapping; lookups use dotted paths such as
//! `database.connect`. Scalars of any YAML type (strings, numbers, booleans)
//! read back as strings, so `port: 8080` and `port: "8080"` are the same to
//! callers.
//!
//! ```yaml
//! server:
//!   port: 8080
//!   cacheTemplates: false
//! database:
//!   driver: sqlite3
//!   connect: /var/lib/blog/blog.db
//!   default_schema: blog
//!   schemas:
//!     blog: 2
//! encryption:
//!   key: change-me
//! ```

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// Location of the config file relative to the application base path.
pub const CONFIG_FILE: &str = "etc/config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing config key `{0}`")]
    Missing(String),

    #[error("config key `{key}` is not {expected}")]
    Type { key: String, expected: &'static str },
}

/// A parsed configuration tree.
#[derive(Debug, Clone)]
pub struct Config {
    root: Value,
}

impl Config {
    /// Reads and parses `<base_path>/etc/config.yaml`.
    pub fn load(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            root: serde_yaml::from_str(text)?,
        })
    }

    /// The node at a dotted path.
    pub fn child(&self, key: &str) -> Result<&Value, ConfigError> {
        key.split('.')
            .try_fold(&self.root, |node, part| node.get(part))
            .ok_or_else(|| ConfigError::Missing(key.to_owned()))
    }

    /// A scalar at `key`, rendered as a string.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        scalar_to_string(self.child(key)?).ok_or_else(|| ConfigError::Type {
            key: key.to_owned(),
            expected: "a scalar",
        })
    }

    /// Like [`get`](Self::get) but `None` when the key is absent.
    pub fn get_opt(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            Ok(v) => Ok(Some(v)),
            Err(ConfigError::Missing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `true` only for the scalar `true` (boolean or string).
    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        Ok(self.get(key)? == "true")
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ConfigError> {
        self.get(key)?.trim().parse().map_err(|_| ConfigError::Type {
            key: key.to_owned(),
            expected: "an integer",
        })
    }

    /// The mapping at `key`, with every value rendered as a string.
    pub fn get_map(&self, key: &str) -> Result<Vec<(String, String)>, ConfigError> {
        let mapping: &Mapping = self.child(key)?.as_mapping().ok_or_else(|| ConfigError::Type {
            key: key.to_owned(),
            expected: "a mapping",
        })?;
        Ok(mapping
            .iter()
            .filter_map(|(k, v)| Some((scalar_to_string(k)?, scalar_to_string(v)?)))
            .collect())
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
