//! Normalized row/column representation shared by the parsers and the codec

use serde::{Serialize, Serializer};
use serde_json::Number;

use crate::error::CodecError;

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Number(Number),
    Bool(bool),
}

impl Cell {
    /// Number cell for `text` if the number renders back to exactly `text`.
    ///
    /// Non-canonical spellings (`007`, `1.50`, `1e3`) return `None` so callers
    /// can keep them as text and decoding reproduces the original cell.
    pub fn canonical_number(text: &str) -> Option<Cell> {
        let number = if let Ok(n) = text.parse::<i64>() {
            Number::from(n)
        } else if let Ok(n) = text.parse::<u64>() {
            Number::from(n)
        } else {
            let f = text.parse::<f64>().ok()?;
            Number::from_f64(f)?
        };

        (number.to_string() == text).then_some(Cell::Number(number))
    }

    /// Text rendering of the cell, `None` for null
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_unit(),
            Cell::Text(s) => serializer.serialize_str(s),
            Cell::Number(n) => n.serialize(serializer),
            Cell::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

/// Type coercion applied to CSV cells, which carry no type information.
///
/// SQL literals are typed by their syntax and are not affected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoercionRules {
    /// Turn canonical numbers and `true`/`false` into JSON numbers and booleans
    pub infer_types: bool,
}

impl CoercionRules {
    /// Cell for a raw CSV field. Empty fields are null.
    pub fn csv_cell(&self, raw: &str) -> Cell {
        if raw.is_empty() {
            return Cell::Null;
        }
        if self.infer_types {
            match raw {
                "true" => return Cell::Bool(true),
                "false" => return Cell::Bool(false),
                _ => {},
            }
            if let Some(number) = Cell::canonical_number(raw) {
                return number;
            }
        }
        Cell::Text(raw.to_string())
    }
}

/// A named (SQL) or anonymous (CSV) table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(name: Option<String>, columns: Vec<String>) -> Self {
        Self {
            name,
            columns,
            rows: Vec::new(),
        }
    }
}

/// Receives parsed rows one at a time.
///
/// `begin_table` is called before the first row of every run of rows that
/// share a table and column list.
pub trait RowSink {
    fn begin_table(&mut self, name: Option<&str>, columns: &[String]) -> Result<(), CodecError>;

    fn row(&mut self, cells: Vec<Cell>) -> Result<(), CodecError>;

    fn finish(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Collects rows in memory, merging runs that target the same table
#[derive(Debug, Default)]
pub struct TableCollector {
    tables: Vec<Table>,
    current: Option<usize>,
}

impl TableCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_tables(self) -> Vec<Table> {
        self.tables
    }
}

impl RowSink for TableCollector {
    fn begin_table(&mut self, name: Option<&str>, columns: &[String]) -> Result<(), CodecError> {
        let existing = self
            .tables
            .iter()
            .position(|t| t.name.as_deref() == name && t.columns == columns);

        self.current = Some(match existing {
            Some(index) => index,
            None => {
                self.tables
                    .push(Table::new(name.map(str::to_string), columns.to_vec()));
                self.tables.len() - 1
            },
        });
        Ok(())
    }

    fn row(&mut self, cells: Vec<Cell>) -> Result<(), CodecError> {
        let index = self
            .current
            .ok_or_else(|| CodecError::Shape("row received before table header".to_string()))?;
        self.tables[index].rows.push(cells);
        Ok(())
    }
}

/// Counts tables and rows without keeping them
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RowCounter {
    pub tables: u64,
    pub rows: u64,
}

impl RowSink for RowCounter {
    fn begin_table(&mut self, _name: Option<&str>, _columns: &[String]) -> Result<(), CodecError> {
        self.tables += 1;
        Ok(())
    }

    fn row(&mut self, _cells: Vec<Cell>) -> Result<(), CodecError> {
        self.rows += 1;
        Ok(())
    }
}
