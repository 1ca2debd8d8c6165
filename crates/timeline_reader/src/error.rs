//! Error types for the reader core.
//!
//! Library failures are split into the four kinds a consumer may want to
//! distinguish (configuration, programmer fault, runtime, data quality).
//! Errors raised by the pluggable deserializer are surfaced as-is through
//! the transparent `Deserializer` variant.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    /// Unsupported or inconsistent configuration, detected up front.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Programmer fault: the caller or an internal component violated the
    /// API contract.
    #[error("logic error: {message}")]
    Logic { message: String },

    /// Unexpected state at run time (missing checkpoint entries, empty
    /// reads, oversized requests).
    #[error("runtime error: {message}")]
    Runtime { message: String },

    /// Data quality failure, e.g. the invalid-sequence budget was exceeded.
    #[error("data error: {message}")]
    Data { message: String },

    /// An error produced by the deserializer, passed through unchanged.
    #[error(transparent)]
    Deserializer(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ReaderError>;

// Convenience constructors
impl ReaderError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }
}
