//! ChainVault Convert Library
//!
//! Streaming conversion of SQL dumps and CSV files into JSON.
//!
//! # Formats
//!
//! - **CSV**: first record is the header; output is an array of row objects
//! - **SQL**: `CREATE TABLE` / `INSERT` statements from MySQL, PostgreSQL and
//!   SQLite dumps; output is an array of table blocks
//!
//! Gzip-compressed input and a UTF-8 byte-order mark are detected
//! automatically.
//!
//! # Example
//!
//! ```no_run
//! use chainvault_common::types::SourceFormat;
//! use chainvault_convert::{convert, ParseOptions};
//!
//! fn run() -> anyhow::Result<()> {
//!     let input = std::fs::File::open("users.csv")?;
//!     let output = std::fs::File::create("users.json")?;
//!     let (summary, _) = convert(input, SourceFormat::Csv, &ParseOptions::default(), output)?;
//!     println!("{} rows, sha256 {}", summary.rows, summary.sha256);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod input;
pub mod json;
pub mod parser;
pub mod spool;
pub mod table;

pub use error::{CodecError, ParseError};
pub use json::{convert, convert_to_string, decode, ConversionSummary, JsonWriter};
pub use parser::{parse, ParseOptions};
pub use spool::Spool;
pub use table::{Cell, CoercionRules, RowCounter, RowSink, Table, TableCollector};
