//! CSV parser
//!
//! The first record is the header. Header names must be non-empty and unique,
//! and every data record must have exactly as many fields as the header.

use std::collections::HashSet;
use std::io::Read;

use chainvault_common::types::SourceFormat;
use csv::{ErrorKind, ReaderBuilder, StringRecord};
use tracing::debug;

use super::ParseOptions;
use crate::error::ParseError;
use crate::table::RowSink;

pub fn parse<R, S>(reader: R, options: &ParseOptions, sink: &mut S) -> Result<(), ParseError>
where
    R: Read,
    S: RowSink + ?Sized,
{
    let mut csv_reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(map_csv_error)?.clone();
    if headers.is_empty() {
        debug!("CSV input is empty");
        return Ok(());
    }
    let columns = validate_headers(&headers)?;
    sink.begin_table(None, &columns)?;

    let mut rows = 0u64;
    let mut record = StringRecord::new();
    while csv_reader.read_record(&mut record).map_err(map_csv_error)? {
        let cells = record
            .iter()
            .map(|field| options.coercion.csv_cell(field))
            .collect();
        sink.row(cells)?;
        rows += 1;
    }

    debug!(columns = columns.len(), rows, "Parsed CSV input");
    Ok(())
}

fn validate_headers(headers: &StringRecord) -> Result<Vec<String>, ParseError> {
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(headers.len());

    for (index, name) in headers.iter().enumerate() {
        if name.trim().is_empty() {
            return Err(ParseError::malformed(
                SourceFormat::Csv,
                1,
                format!("header column {} is empty", index + 1),
            ));
        }
        if !seen.insert(name) {
            return Err(ParseError::malformed(
                SourceFormat::Csv,
                1,
                format!("duplicate header column '{}'", name),
            ));
        }
        columns.push(name.to_string());
    }

    Ok(columns)
}

fn map_csv_error(err: csv::Error) -> ParseError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    match err.into_kind() {
        ErrorKind::Io(e) => ParseError::Io(e),
        ErrorKind::Utf8 { .. } => ParseError::Encoding {
            format: SourceFormat::Csv,
            line,
        },
        ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => ParseError::malformed(
            SourceFormat::Csv,
            line,
            format!("expected {} fields, found {}", expected_len, len),
        ),
        other => ParseError::malformed(SourceFormat::Csv, line, format!("{:?}", other)),
    }
}
