//! Error types for parsing and JSON encoding

use chainvault_common::types::SourceFormat;
use thiserror::Error;

/// Failure while reading a source file into rows
#[derive(Error, Debug)]
pub enum ParseError {
    /// Input is not valid UTF-8
    #[error("Invalid UTF-8 in {format} input near line {line}")]
    Encoding { format: SourceFormat, line: u64 },

    /// Input is syntactically broken
    #[error("Malformed {format} input at line {line}: {message}")]
    Malformed {
        format: SourceFormat,
        line: u64,
        message: String,
    },

    /// SQL that uses a dialect feature the converter does not read
    #[error("Unsupported SQL dialect at line {line}: {message}")]
    UnsupportedDialect { line: u64, message: String },

    /// A single SQL statement is larger than the configured cap
    #[error("SQL statement starting at line {line} exceeds {limit} bytes")]
    StatementTooLarge { line: u64, limit: usize },

    #[error("IO error while reading input: {0}")]
    Io(#[from] std::io::Error),

    /// The row sink refused a row
    #[error(transparent)]
    Output(#[from] CodecError),
}

impl ParseError {
    pub(crate) fn malformed(format: SourceFormat, line: u64, message: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            line,
            message: message.into(),
        }
    }

    pub(crate) fn sql(line: u64, message: impl Into<String>) -> Self {
        Self::malformed(SourceFormat::Sql, line, message)
    }
}

/// Failure while writing or reading converted JSON
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error while writing JSON: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON is valid but does not have the converter's output shape
    #[error("Unexpected JSON shape: {0}")]
    Shape(String),
}
