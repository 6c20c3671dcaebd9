//! Error types for systate.
//!
//! Individual events never fail: providers drop what they cannot correlate.
//! These errors only cover a broken input stream and bad configuration.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Malformed event on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Event on line {line} goes back in time ({ts} < {prev})")]
    OutOfOrder { line: usize, prev: u64, ts: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
