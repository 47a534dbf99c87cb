//! Errors raised while locating and reading shared configuration

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparsable file, override or log level
    #[error("Configuration error: {0}")]
    Config(String),

    /// A config path was named explicitly but does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}
