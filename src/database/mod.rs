//! Database bootstrap: one SQL connection opened at startup.
//!
//! `database.driver` picks the backend (`sqlite3` or `sqlite`) and
//! `database.connect` is handed to it verbatim (a file path or `:memory:`).
//! The declared schemas are recorded for the application's benefit; nothing
//! checks them against the live database.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ConfigError};

/// Drivers `open` knows how to connect with.
pub const SUPPORTED_DRIVERS: &[&str] = &["sqlite3", "sqlite"];

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unsupported database driver `{0}`")]
    UnsupportedDriver(String),

    #[error("no schemas defined in config")]
    NoSchemas,

    #[error("schema `{name}` has non-numeric version `{version}`")]
    BadVersion { name: String, version: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection lock poisoned")]
    Poisoned,
}

/// An expected schema and its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub version: i64,
}

/// The shared connection plus schema metadata.
#[derive(Debug, Clone)]
pub struct DbSetup {
    conn: Arc<Mutex<Connection>>,
    pub default_schema: String,
    pub schemas: Vec<Schema>,
}

impl DbSetup {
    /// Opens the connection described by `config`.
    pub fn open(config: &Config) -> Result<Self, DatabaseError> {
        let driver = config.get("database.driver")?;
        let connect = config.get("database.connect")?;
        let default_schema = config.get("database.default_schema")?;
        let schemas = read_schemas(config)?;

        if !SUPPORTED_DRIVERS.contains(&driver.as_str()) {
            return Err(DatabaseError::UnsupportedDriver(driver));
        }
        let conn = Connection::open(&connect)?;

        info!(
            driver = %driver,
            default_schema = %default_schema,
            schemas = ?schemas,
            "database opened"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            default_schema,
            schemas,
        })
    }

    /// Locks the connection for the duration of the returned guard.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }

    /// The declared schema named `name`.
    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.name == name)
    }
}

fn read_schemas(config: &Config) -> Result<Vec<Schema>, DatabaseError> {
    let entries = match config.get_map("database.schemas") {
        Ok(entries) => entries,
        Err(ConfigError::Missing(_)) => return Err(DatabaseError::NoSchemas),
        Err(e) => return Err(e.into()),
    };
    if entries.is_empty() {
        return Err(DatabaseError::NoSchemas);
    }
    entries
        .into_iter()
        .map(|(name, version)| match version.trim().parse() {
            Ok(version) => Ok(Schema { name, version }),
            Err(_) => Err(DatabaseError::BadVersion { name, version }),
        })
        .collect()
}
