//! Errors raised while reading connection strings.

use thiserror::Error;

/// A connection string could not be parsed or a value had the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionStringError {
    /// A segment is not of the form `key=value`.
    #[error("invalid connection string syntax at offset {offset}")]
    Syntax {
        /// Byte offset of the offending segment.
        offset: usize,
    },

    /// A quoted value is missing its closing quote.
    #[error("unterminated quoted value at offset {offset}")]
    UnterminatedQuote {
        /// Byte offset of the opening quote's segment.
        offset: usize,
    },

    /// A keyword carries a value that cannot be converted.
    #[error("invalid value '{value}' for keyword '{keyword}'")]
    InvalidValue {
        /// Canonical keyword name.
        keyword: &'static str,
        /// Raw value found in the connection string.
        value: String,
    },
}
