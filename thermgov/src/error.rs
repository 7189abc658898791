//! Crate-wide error type.

use thiserror::Error;

use crate::thermal::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid environment variable {name}: {reason}")]
    Environment { name: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
