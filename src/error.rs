//! Errors that stop an application from starting or serving.
//!
//! Per-request failures never surface here: they are logged and answered
//! with a `500`, a redirect, or a `404`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::server::ServerError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no base path given and none on the command line")]
    NoBasePath,

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("database: {0}")]
    Database(#[from] DatabaseError),

    #[error("server: {0}")]
    Server(#[from] ServerError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
