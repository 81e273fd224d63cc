//! JSON codec for parsed tables
//!
//! CSV input encodes as an array of objects, one per row, keyed by header:
//!
//! ```json
//! [{"name":"A","age":"1"},{"name":"C","age":null}]
//! ```
//!
//! SQL input encodes as an array of table blocks, one per run of rows that
//! share a table and column list:
//!
//! ```json
//! [{"table":"users","columns":["id","name"],"rows":[{"id":1,"name":"alice"}]}]
//! ```
//!
//! Output is compact and written incrementally, so encoding never holds more
//! than one row in memory.

use std::io::{Read, Write};

use chainvault_common::checksum::HashingWriter;
use chainvault_common::types::SourceFormat;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::{CodecError, ParseError};
use crate::parser::{self, ParseOptions};
use crate::table::{Cell, RowSink, Table, TableCollector};

/// Streaming JSON encoder implementing [`RowSink`]
pub struct JsonWriter<W: Write> {
    out: W,
    /// `"key":` prefixes for the current column list, already escaped
    keys: Vec<String>,
    opened: bool,
    block_open: bool,
    first_row: bool,
    tables: u64,
    rows: u64,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            keys: Vec::new(),
            opened: false,
            block_open: false,
            first_row: true,
            tables: 0,
            rows: 0,
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn tables_written(&self) -> u64 {
        self.tables
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn open(&mut self) -> Result<(), CodecError> {
        if !self.opened {
            self.out.write_all(b"[")?;
            self.opened = true;
        }
        Ok(())
    }

    fn close_block(&mut self) -> Result<(), CodecError> {
        if self.block_open {
            self.out.write_all(b"]}")?;
            self.block_open = false;
        }
        Ok(())
    }
}

impl<W: Write> RowSink for JsonWriter<W> {
    fn begin_table(&mut self, name: Option<&str>, columns: &[String]) -> Result<(), CodecError> {
        self.open()?;
        self.keys = columns
            .iter()
            .map(|c| serde_json::to_string(c).map(|k| k + ":"))
            .collect::<Result<_, _>>()?;

        match name {
            Some(table) => {
                if self.block_open {
                    self.close_block()?;
                }
                if self.tables > 0 {
                    self.out.write_all(b",")?;
                }
                self.out.write_all(b"{\"table\":")?;
                serde_json::to_writer(&mut self.out, table)?;
                self.out.write_all(b",\"columns\":")?;
                serde_json::to_writer(&mut self.out, columns)?;
                self.out.write_all(b",\"rows\":[")?;
                self.block_open = true;
                self.first_row = true;
            },
            None => {
                if self.block_open {
                    return Err(CodecError::Shape(
                        "unnamed table after a named table".to_string(),
                    ));
                }
            },
        }
        self.tables += 1;
        Ok(())
    }

    fn row(&mut self, cells: Vec<Cell>) -> Result<(), CodecError> {
        if !self.opened {
            return Err(CodecError::Shape("row received before table header".to_string()));
        }
        if cells.len() != self.keys.len() {
            return Err(CodecError::Shape(format!(
                "row has {} cells but {} columns",
                cells.len(),
                self.keys.len()
            )));
        }

        if !self.first_row {
            self.out.write_all(b",")?;
        }
        self.first_row = false;

        self.out.write_all(b"{")?;
        for (index, (key, cell)) in self.keys.iter().zip(&cells).enumerate() {
            if index > 0 {
                self.out.write_all(b",")?;
            }
            self.out.write_all(key.as_bytes())?;
            cell.serialize(&mut serde_json::Serializer::new(&mut self.out))?;
        }
        self.out.write_all(b"}")?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CodecError> {
        self.open()?;
        self.close_block()?;
        self.out.write_all(b"]")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Decode converted JSON back into tables.
///
/// CSV output yields at most one unnamed table; SQL output yields one table
/// per distinct table name and column list.
pub fn decode<R: Read>(reader: R, format: SourceFormat) -> Result<Vec<Table>, CodecError> {
    let value: Value = serde_json::from_reader(reader)?;
    let Value::Array(items) = value else {
        return Err(CodecError::Shape("top-level value is not an array".to_string()));
    };

    let mut collector = TableCollector::new();
    match format {
        SourceFormat::Csv => decode_csv(items, &mut collector)?,
        SourceFormat::Sql => decode_sql(items, &mut collector)?,
    }
    Ok(collector.into_tables())
}

fn decode_csv(items: Vec<Value>, sink: &mut TableCollector) -> Result<(), CodecError> {
    let mut columns: Option<Vec<String>> = None;

    for item in items {
        let object = as_object(item, "row")?;
        let keys: Vec<String> = object.keys().cloned().collect();
        match &columns {
            Some(expected) if *expected != keys => {
                return Err(CodecError::Shape(format!(
                    "row keys {:?} differ from {:?}",
                    keys, expected
                )));
            },
            Some(_) => {},
            None => {
                sink.begin_table(None, &keys)?;
                columns = Some(keys);
            },
        }
        sink.row(object_cells(object)?)?;
    }
    Ok(())
}

fn decode_sql(items: Vec<Value>, sink: &mut TableCollector) -> Result<(), CodecError> {
    for item in items {
        let mut block = as_object(item, "table block")?;

        let table = match block.remove("table") {
            Some(Value::String(name)) => name,
            _ => return Err(CodecError::Shape("table block without a 'table' name".to_string())),
        };
        let columns: Vec<String> = match block.remove("columns") {
            Some(value) => serde_json::from_value(value)?,
            None => return Err(CodecError::Shape(format!("table '{}' has no columns", table))),
        };
        let rows = match block.remove("rows") {
            Some(Value::Array(rows)) => rows,
            _ => return Err(CodecError::Shape(format!("table '{}' has no rows array", table))),
        };

        sink.begin_table(Some(&table), &columns)?;
        for row in rows {
            let object = as_object(row, "row")?;
            if !object.keys().eq(columns.iter()) {
                return Err(CodecError::Shape(format!(
                    "row in '{}' does not match its column list",
                    table
                )));
            }
            sink.row(object_cells(object)?)?;
        }
    }
    Ok(())
}

fn as_object(value: Value, what: &str) -> Result<Map<String, Value>, CodecError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::Shape(format!("{} is not an object: {}", what, other))),
    }
}

fn object_cells(object: Map<String, Value>) -> Result<Vec<Cell>, CodecError> {
    object
        .into_iter()
        .map(|(key, value)| match value {
            Value::Null => Ok(Cell::Null),
            Value::String(s) => Ok(Cell::Text(s)),
            Value::Number(n) => Ok(Cell::Number(n)),
            Value::Bool(b) => Ok(Cell::Bool(b)),
            _ => Err(CodecError::Shape(format!("nested value in column '{}'", key))),
        })
        .collect()
}

/// Outcome of a full conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSummary {
    pub tables: u64,
    pub rows: u64,
    /// Size of the JSON output
    pub bytes: u64,
    /// SHA-256 of the JSON output, hex encoded
    pub sha256: String,
}

/// Parse `reader` and write the JSON encoding to `out`.
///
/// Output may be partially written when an error is returned; callers that
/// need all-or-nothing output should write into a buffer or spool.
#[instrument(skip(reader, out), fields(format = %format))]
pub fn convert<R, W>(
    reader: R,
    format: SourceFormat,
    options: &ParseOptions,
    out: W,
) -> Result<(ConversionSummary, W), ParseError>
where
    R: Read + 'static,
    W: Write,
{
    let mut writer = JsonWriter::new(HashingWriter::new(out));
    parser::parse(reader, format, options, &mut writer)?;

    let tables = writer.tables_written();
    let rows = writer.rows_written();
    let (out, sha256, bytes) = writer.into_inner().finish()?;

    debug!(tables, rows, bytes, "Conversion finished");
    Ok((
        ConversionSummary {
            tables,
            rows,
            bytes,
            sha256,
        },
        out,
    ))
}

/// Convert an in-memory input to a JSON string
pub fn convert_to_string(
    input: &[u8],
    format: SourceFormat,
    options: &ParseOptions,
) -> Result<String, ParseError> {
    let (_, bytes) = convert(
        std::io::Cursor::new(input.to_vec()),
        format,
        options,
        Vec::new(),
    )?;
    String::from_utf8(bytes).map_err(|e| {
        ParseError::Output(CodecError::Shape(format!("encoder produced invalid UTF-8: {}", e)))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::table::CoercionRules;
    use chainvault_common::checksum::sha256_hex;
    use proptest::prelude::*;

    fn csv(input: &str) -> String {
        convert_to_string(input.as_bytes(), SourceFormat::Csv, &ParseOptions::default()).unwrap()
    }

    fn sql(input: &str) -> String {
        convert_to_string(input.as_bytes(), SourceFormat::Sql, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_csv_with_trailing_empty_cell() {
        assert_eq!(
            csv("name,age\nA,1\nB,2\nC,"),
            r#"[{"name":"A","age":"1"},{"name":"B","age":"2"},{"name":"C","age":null}]"#
        );
    }

    #[test]
    fn test_header_only_and_empty_inputs() {
        assert_eq!(csv("name,age\n"), "[]");
        assert_eq!(csv(""), "[]");
        assert_eq!(sql("SET NAMES utf8;"), "[]");
    }

    #[test]
    fn test_keys_are_escaped() {
        assert_eq!(csv("a\"b,c\nx,y\n"), r#"[{"a\"b":"x","c":"y"}]"#);
    }

    #[test]
    fn test_sql_blocks() {
        let out = sql(
            "INSERT INTO a (x) VALUES (1),(2);\nINSERT INTO b (y, z) VALUES ('q', NULL);",
        );
        assert_eq!(
            out,
            r#"[{"table":"a","columns":["x"],"rows":[{"x":1},{"x":2}]},{"table":"b","columns":["y","z"],"rows":[{"y":"q","z":null}]}]"#
        );
    }

    #[test]
    fn test_consecutive_inserts_share_a_block() {
        let out = sql("INSERT INTO a (x) VALUES (1);\nINSERT INTO a (x) VALUES (2);");
        assert_eq!(out, r#"[{"table":"a","columns":["x"],"rows":[{"x":1},{"x":2}]}]"#);
    }

    #[test]
    fn test_summary_matches_output() {
        let (summary, out) = convert(
            std::io::Cursor::new(b"id\n1\n2\n".to_vec()),
            SourceFormat::Csv,
            &ParseOptions {
                coercion: CoercionRules { infer_types: true },
                ..ParseOptions::default()
            },
            Vec::new(),
        )
        .unwrap();

        assert_eq!(out, br#"[{"id":1},{"id":2}]"#);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.tables, 1);
        assert_eq!(summary.bytes, out.len() as u64);
        assert_eq!(summary.sha256, sha256_hex(&out));
    }

    #[test]
    fn test_decode_sql_merges_blocks() {
        let json = r#"[{"table":"a","columns":["x"],"rows":[{"x":1}]},{"table":"b","columns":["y"],"rows":[]},{"table":"a","columns":["x"],"rows":[{"x":2}]}]"#;
        let tables = decode(json.as_bytes(), SourceFormat::Sql).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].rows.len(), 2);
    }

    #[test]
    fn test_decode_rejects_inconsistent_csv_rows() {
        let json = r#"[{"a":1},{"b":2}]"#;
        assert!(matches!(
            decode(json.as_bytes(), SourceFormat::Csv),
            Err(CodecError::Shape(_))
        ));
    }

    #[test]
    fn test_decode_rejects_nested_values() {
        let json = r#"[{"a":[1]}]"#;
        assert!(decode(json.as_bytes(), SourceFormat::Csv).is_err());
    }

    fn cell_strategy() -> impl Strategy<Value = Cell> {
        prop_oneof![
            Just(Cell::Null),
            "[a-zA-Z0-9 ,;\"'\\\\\n]{1,12}".prop_map(Cell::Text),
            any::<i64>().prop_map(|n| Cell::Number(n.into())),
            any::<bool>().prop_map(Cell::Bool),
        ]
    }

    fn table_strategy() -> impl Strategy<Value = Table> {
        (1usize..5).prop_flat_map(|width| {
            let columns: Vec<String> = (0..width).map(|i| format!("c{}", i)).collect();
            prop::collection::vec(prop::collection::vec(cell_strategy(), width), 1..8).prop_map(
                move |rows| Table {
                    name: Some("t".to_string()),
                    columns: columns.clone(),
                    rows,
                },
            )
        })
    }

    #[test]
    fn test_csv_coercion_survives_decode() {
        let input = "a,b,c,d,e,f,g\n,007,1.50,TRUE,true,42,-3.5\n";
        let options = ParseOptions {
            coercion: CoercionRules { infer_types: true },
            ..ParseOptions::default()
        };
        let json = convert_to_string(input.as_bytes(), SourceFormat::Csv, &options).unwrap();
        assert_eq!(
            json,
            r#"[{"a":null,"b":"007","c":"1.50","d":"TRUE","e":true,"f":42,"g":-3.5}]"#
        );

        let tables = decode(json.as_bytes(), SourceFormat::Csv).unwrap();
        assert_eq!(tables[0].columns, vec!["a", "b", "c", "d", "e", "f", "g"]);
        assert_eq!(tables[0].rows[0][0], Cell::Null);
        assert_eq!(tables[0].rows[0][1], Cell::Text("007".to_string()));
        assert_eq!(tables[0].rows[0][4], Cell::Bool(true));
    }

    fn csv_field() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z0-9 ,;.\"'\n-]{0,10}",
            Just("007".to_string()),
            Just("1.50".to_string()),
            Just("TRUE".to_string()),
            Just("true".to_string()),
            Just("-12".to_string()),
            Just("2.5".to_string()),
            Just("1e5".to_string()),
        ]
    }

    /// Unique headers and rows of raw field text, all the same width
    fn csv_document() -> impl Strategy<Value = (Vec<String>, Vec<Vec<String>>)> {
        prop::collection::btree_set("[a-z][a-z0-9 _,\"]{0,6}", 1..5).prop_flat_map(|headers| {
            let headers: Vec<String> = headers.into_iter().collect();
            let width = headers.len();
            (
                Just(headers),
                prop::collection::vec(prop::collection::vec(csv_field(), width), 1..6),
            )
        })
    }

    fn quote_record(fields: &[String]) -> String {
        let quoted: Vec<String> = fields
            .iter()
            .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
            .collect();
        quoted.join(",")
    }

    proptest! {
        #[test]
        fn prop_csv_decode_inverts_encode(
            (headers, records) in csv_document(),
            infer_types in any::<bool>(),
        ) {
            let mut text = quote_record(&headers);
            for record in &records {
                text.push('\n');
                text.push_str(&quote_record(record));
            }
            let options = ParseOptions {
                coercion: CoercionRules { infer_types },
                ..ParseOptions::default()
            };

            let mut collector = TableCollector::new();
            parser::parse(
                std::io::Cursor::new(text.clone().into_bytes()),
                SourceFormat::Csv,
                &options,
                &mut collector,
            )
            .unwrap();
            let parsed = collector.into_tables();

            let expected: Vec<Vec<Cell>> = records
                .iter()
                .map(|r| r.iter().map(|f| options.coercion.csv_cell(f)).collect())
                .collect();
            prop_assert_eq!(&parsed[0].columns, &headers);
            prop_assert_eq!(&parsed[0].rows, &expected);

            let json = convert_to_string(text.as_bytes(), SourceFormat::Csv, &options).unwrap();
            let decoded = decode(json.as_bytes(), SourceFormat::Csv).unwrap();
            prop_assert_eq!(decoded, parsed);
        }

        #[test]
        fn prop_decode_inverts_encode(table in table_strategy()) {
            let mut writer = JsonWriter::new(Vec::new());
            writer.begin_table(table.name.as_deref(), &table.columns).unwrap();
            for row in &table.rows {
                writer.row(row.clone()).unwrap();
            }
            writer.finish().unwrap();

            let decoded = decode(writer.into_inner().as_slice(), SourceFormat::Sql).unwrap();
            prop_assert_eq!(decoded, vec![table]);
        }
    }
}
