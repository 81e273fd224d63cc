//! Format parsers
//!
//! Both parsers read from any [`Read`] and push rows into a [`RowSink`] as
//! they go, so memory use is bounded by the largest row (CSV) or statement
//! (SQL) rather than by the file size.

pub mod csv;
pub mod sql;

use std::io::Read;

use chainvault_common::types::SourceFormat;
use tracing::instrument;

use crate::error::ParseError;
use crate::input;
use crate::table::{CoercionRules, RowSink};

/// Default cap for a single SQL statement (16 MiB)
pub const DEFAULT_MAX_STATEMENT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// CSV field delimiter
    pub delimiter: u8,
    /// Upper bound for one SQL statement
    pub max_statement_bytes: usize,
    pub coercion: CoercionRules,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            max_statement_bytes: DEFAULT_MAX_STATEMENT_BYTES,
            coercion: CoercionRules::default(),
        }
    }
}

/// Parse `reader` as `format`, feeding every row into `sink`.
///
/// Gzip input and a leading UTF-8 BOM are handled transparently.
#[instrument(skip(reader, sink), fields(format = %format))]
pub fn parse<R, S>(
    reader: R,
    format: SourceFormat,
    options: &ParseOptions,
    sink: &mut S,
) -> Result<(), ParseError>
where
    R: Read + 'static,
    S: RowSink + ?Sized,
{
    let prepared = input::prepare(reader)?;
    match format {
        SourceFormat::Csv => csv::parse(prepared, options, sink)?,
        SourceFormat::Sql => sql::parse(prepared, options, sink)?,
    }
    sink.finish()?;
    Ok(())
}
