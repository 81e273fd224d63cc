//! SQL dump parser
//!
//! Reads `CREATE TABLE` and `INSERT` statements from MySQL, PostgreSQL and
//! SQLite style dumps. `CREATE TABLE` only contributes column names; every
//! `INSERT` row becomes one output row. Session and transaction statements
//! are skipped, anything else is reported as an unsupported dialect.
//!
//! Dumps are read with MySQL string rules until a statement announces
//! standard strings (`PRAGMA` from SQLite, or PostgreSQL's
//! `SET standard_conforming_strings = on`).

mod lexer;
pub mod splitter;

use std::collections::HashMap;
use std::io::BufRead;

use tracing::{debug, trace};

use self::lexer::{tokenize, Token};
use self::splitter::{Statement, StatementSplitter};
use super::ParseOptions;
use crate::error::ParseError;
use crate::table::{Cell, RowSink};

/// Statements that carry no row data
const IGNORED_STATEMENTS: &[&str] = &[
    "SET", "DROP", "LOCK", "UNLOCK", "USE", "BEGIN", "COMMIT", "START", "ROLLBACK", "SAVEPOINT",
    "RELEASE", "ALTER", "GRANT", "REVOKE", "COMMENT", "SELECT", "ANALYZE", "VACUUM", "SHOW",
    "FLUSH", "OPTIMIZE", "REINDEX", "CLUSTER", "PRAGMA", "END",
];

/// Words that open the body of a named `CONSTRAINT`
const CONSTRAINT_BODIES: &[&str] = &[
    "PRIMARY", "UNIQUE", "FOREIGN", "CHECK", "EXCLUDE", "KEY", "INDEX",
];

/// Column type names, used to tell `key TEXT` (a column) from `KEY idx (a)`
const TYPE_NAMES: &[&str] = &[
    "INT", "INTEGER", "TINYINT", "SMALLINT", "MEDIUMINT", "BIGINT", "INT2", "INT4", "INT8",
    "SERIAL", "SMALLSERIAL", "BIGSERIAL", "DECIMAL", "DEC", "NUMERIC", "NUMBER", "REAL", "FLOAT",
    "FLOAT4", "FLOAT8", "DOUBLE", "BIT", "BOOL", "BOOLEAN", "CHAR", "VARCHAR", "NCHAR",
    "NVARCHAR", "CHARACTER", "VARYING", "TEXT", "TINYTEXT", "MEDIUMTEXT", "LONGTEXT", "CLOB",
    "BLOB", "TINYBLOB", "MEDIUMBLOB", "LONGBLOB", "BINARY", "VARBINARY", "BYTEA", "DATE", "TIME",
    "DATETIME", "TIMESTAMP", "TIMESTAMPTZ", "TIMETZ", "INTERVAL", "YEAR", "JSON", "JSONB", "UUID",
    "ENUM", "SET", "MONEY", "INET", "CIDR", "MACADDR", "XML", "GEOMETRY", "POINT", "UNSIGNED",
];

/// String and comment conventions of a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Backslash escapes in every string; `--` comments need trailing whitespace
    #[default]
    MySql,
    /// Backslashes are literal outside `E'...'`; `--` always starts a comment
    Standard,
}

impl Dialect {
    /// Dialect announced by a session statement, if any
    pub fn announced_by(statement: &str) -> Option<Dialect> {
        let mut words = statement
            .split(|c: char| c.is_whitespace() || c == '=')
            .filter(|w| !w.is_empty());
        let first = words.next()?;
        if first.eq_ignore_ascii_case("PRAGMA") {
            return Some(Dialect::Standard);
        }
        if !first.eq_ignore_ascii_case("SET")
            || !words.next()?.eq_ignore_ascii_case("standard_conforming_strings")
        {
            return None;
        }

        let value = words.find(|w| !w.eq_ignore_ascii_case("TO"))?.trim_matches('\'');
        if value.eq_ignore_ascii_case("on") {
            Some(Dialect::Standard)
        } else if value.eq_ignore_ascii_case("off") {
            Some(Dialect::MySql)
        } else {
            None
        }
    }
}

pub fn parse<R, S>(reader: R, options: &ParseOptions, sink: &mut S) -> Result<(), ParseError>
where
    R: BufRead,
    S: RowSink + ?Sized,
{
    let mut splitter = StatementSplitter::new(reader, options.max_statement_bytes);
    let mut interpreter = Interpreter::new(sink);

    while let Some(statement) = splitter.next_statement()? {
        interpreter.execute(&statement)?;
    }

    debug!(
        tables = interpreter.schemas.len(),
        rows = interpreter.rows,
        "Parsed SQL input"
    );
    Ok(())
}

struct Interpreter<'a, S: ?Sized> {
    sink: &'a mut S,
    /// Column lists from `CREATE TABLE`, keyed by table name
    schemas: HashMap<String, Vec<String>>,
    /// Table and columns of the last emitted header
    current: Option<(String, Vec<String>)>,
    rows: u64,
}

impl<'a, S: RowSink + ?Sized> Interpreter<'a, S> {
    fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            schemas: HashMap::new(),
            current: None,
            rows: 0,
        }
    }

    fn execute(&mut self, statement: &Statement) -> Result<(), ParseError> {
        let line = statement.line;
        let tokens = tokenize(&statement.text, statement.dialect).map_err(|msg| ParseError::sql(line, msg))?;
        let mut cursor = TokenCursor::new(&tokens, line);

        let Some(Token::Word(first)) = cursor.peek().cloned() else {
            return Err(ParseError::UnsupportedDialect {
                line,
                message: format!("unrecognized statement '{}'", preview(&statement.text)),
            });
        };
        let keyword = first.to_ascii_uppercase();

        match keyword.as_str() {
            "CREATE" => self.create(cursor),
            "INSERT" | "REPLACE" => self.insert(cursor),
            "COPY" => Err(ParseError::UnsupportedDialect {
                line,
                message: "COPY ... FROM stdin blocks are not supported".to_string(),
            }),
            k if IGNORED_STATEMENTS.contains(&k) => {
                trace!(line, statement = k, "Skipping statement");
                Ok(())
            },
            _ => Err(ParseError::UnsupportedDialect {
                line,
                message: format!("unsupported statement '{}'", keyword),
            }),
        }
    }

    fn create(&mut self, mut cursor: TokenCursor<'_>) -> Result<(), ParseError> {
        cursor.next();
        while cursor.eat_any_keyword(&["TEMPORARY", "TEMP", "UNLOGGED", "OR", "REPLACE"]) {}
        if !cursor.eat_keyword("TABLE") {
            // CREATE INDEX / VIEW / SEQUENCE / ... carry no rows
            trace!(line = cursor.line, "Skipping non-table CREATE");
            return Ok(());
        }
        if cursor.eat_keyword("IF") {
            cursor.expect_keyword("NOT")?;
            cursor.expect_keyword("EXISTS")?;
        }

        let table = cursor.identifier()?;
        if !cursor.eat_punct('(') {
            // CREATE TABLE ... AS SELECT
            return Err(ParseError::UnsupportedDialect {
                line: cursor.line,
                message: format!("CREATE TABLE {} without a column list", table),
            });
        }

        let mut columns = Vec::new();
        loop {
            if !cursor.starts_constraint() {
                columns.push(cursor.identifier()?);
            }

            match cursor.skip_definition()? {
                ')' => break,
                _ => continue,
            }
        }

        debug!(table = %table, columns = columns.len(), "Registered table schema");
        self.schemas.insert(table, columns);
        Ok(())
    }

    fn insert(&mut self, mut cursor: TokenCursor<'_>) -> Result<(), ParseError> {
        let line = cursor.line;
        cursor.next();
        while cursor.eat_any_keyword(&["LOW_PRIORITY", "DELAYED", "HIGH_PRIORITY", "IGNORE"]) {}
        cursor.eat_keyword("INTO");

        let table = cursor.identifier()?;

        let columns = if cursor.peek() == Some(&Token::Punct('(')) && !cursor.peek_is_select(1) {
            cursor.next();
            let mut columns = Vec::new();
            loop {
                columns.push(cursor.identifier()?);
                if cursor.eat_punct(')') {
                    break;
                }
                cursor.expect_punct(',')?;
            }
            columns
        } else {
            self.schemas.get(&table).cloned().ok_or_else(|| {
                ParseError::sql(
                    line,
                    format!("INSERT into '{}' has no column list and no preceding CREATE TABLE", table),
                )
            })?
        };

        if cursor.eat_keyword("DEFAULT") {
            return Err(ParseError::UnsupportedDialect {
                line,
                message: "INSERT ... DEFAULT VALUES is not supported".to_string(),
            });
        }
        if !cursor.eat_keyword("VALUES") && !cursor.eat_keyword("VALUE") {
            return Err(ParseError::UnsupportedDialect {
                line,
                message: format!("INSERT into '{}' without a VALUES list", table),
            });
        }

        self.begin(&table, &columns)?;

        loop {
            cursor.expect_punct('(')?;
            let mut cells = Vec::with_capacity(columns.len());
            loop {
                cells.push(cursor.value()?);
                if cursor.eat_punct(')') {
                    break;
                }
                cursor.expect_punct(',')?;
            }

            if cells.len() != columns.len() {
                return Err(ParseError::sql(
                    line,
                    format!(
                        "row for '{}' has {} values but {} columns",
                        table,
                        cells.len(),
                        columns.len()
                    ),
                ));
            }
            self.sink.row(cells)?;
            self.rows += 1;

            if !cursor.eat_punct(',') {
                break;
            }
        }

        // ON DUPLICATE KEY UPDATE / ON CONFLICT / RETURNING do not change the rows
        match cursor.peek() {
            None => Ok(()),
            Some(t) if t.is_keyword("ON") || t.is_keyword("RETURNING") => Ok(()),
            Some(t) => Err(ParseError::sql(
                line,
                format!("unexpected '{}' after VALUES list", t.describe()),
            )),
        }
    }

    fn begin(&mut self, table: &str, columns: &[String]) -> Result<(), ParseError> {
        let unchanged = self
            .current
            .as_ref()
            .is_some_and(|(t, c)| t == table && c.as_slice() == columns);
        if !unchanged {
            self.sink.begin_table(Some(table), columns)?;
            self.current = Some((table.to_string(), columns.to_vec()));
        }
        Ok(())
    }
}

struct TokenCursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    line: u64,
}

impl<'t> TokenCursor<'t> {
    fn new(tokens: &'t [Token], line: u64) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    /// Whether the token `offset` places ahead is the `SELECT` keyword
    fn peek_is_select(&self, offset: usize) -> bool {
        self.tokens
            .get(self.pos + offset)
            .is_some_and(|t| t.is_keyword("SELECT"))
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_any_keyword(&mut self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.eat_keyword(k))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(keyword))
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", c)))
        }
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        let found = self
            .peek()
            .map(Token::describe)
            .unwrap_or_else(|| "end of statement".to_string());
        ParseError::sql(self.line, format!("expected {}, found '{}'", wanted, found))
    }

    /// Possibly qualified name; returns the last part (`schema.t` -> `t`)
    fn identifier(&mut self) -> Result<String, ParseError> {
        let mut name = self.identifier_part()?;
        while self.eat_punct('.') {
            name = self.identifier_part()?;
        }
        Ok(name)
    }

    fn identifier_part(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Token::Word(w)) | Some(Token::QuotedIdent(w)) => Ok(w.clone()),
            other => {
                let found = other
                    .map(Token::describe)
                    .unwrap_or_else(|| "end of statement".to_string());
                Err(ParseError::sql(
                    self.line,
                    format!("expected identifier, found '{}'", found),
                ))
            },
        }
    }

    /// Whether the definition at the cursor is a table constraint. Column
    /// names may be constraint words (`key TEXT`), so the tokens after the
    /// first one decide.
    fn starts_constraint(&self) -> bool {
        let ahead = |n: usize| self.tokens.get(self.pos + n);
        let keyword = |n: usize, k: &str| ahead(n).is_some_and(|t| t.is_keyword(k));
        let open = |n: usize| ahead(n) == Some(&Token::Punct('('));
        let name = |n: usize| match ahead(n) {
            Some(Token::Word(w)) => !is_type_name(w),
            Some(Token::QuotedIdent(_)) => true,
            _ => false,
        };

        let Some(Token::Word(first)) = ahead(0) else {
            return false;
        };
        match first.to_ascii_uppercase().as_str() {
            "CONSTRAINT" => name(1) && CONSTRAINT_BODIES.iter().any(|k| keyword(2, k)),
            "PRIMARY" | "FOREIGN" => keyword(1, "KEY"),
            "CHECK" => open(1),
            "EXCLUDE" => open(1) || keyword(1, "USING"),
            "UNIQUE" | "FULLTEXT" | "SPATIAL" => {
                open(1)
                    || keyword(1, "KEY")
                    || keyword(1, "INDEX")
                    || (name(1) && (open(2) || keyword(2, "USING")))
            },
            "KEY" | "INDEX" => open(1) || (name(1) && (open(2) || keyword(2, "USING"))),
            "LIKE" => name(1) && !open(2),
            _ => false,
        }
    }

    /// Skip the rest of a column or constraint definition and return the
    /// separator that ended it (`,` or `)`)
    fn skip_definition(&mut self) -> Result<char, ParseError> {
        let mut depth = 0usize;
        loop {
            match self.next() {
                None => return Err(ParseError::sql(self.line, "unterminated CREATE TABLE column list")),
                Some(Token::Punct('(')) => depth += 1,
                Some(Token::Punct(')')) if depth == 0 => return Ok(')'),
                Some(Token::Punct(')')) => depth -= 1,
                Some(Token::Punct(',')) if depth == 0 => return Ok(','),
                Some(_) => {},
            }
        }
    }

    /// One literal inside a `VALUES` tuple
    fn value(&mut self) -> Result<Cell, ParseError> {
        let line = self.line;
        match self.next() {
            Some(Token::Str(s)) => Ok(Cell::Text(s.clone())),
            Some(Token::Number(n)) => Ok(number_cell(n)),
            Some(Token::Hex(h)) => Ok(Cell::Text(h.clone())),
            Some(Token::Punct(sign @ ('-' | '+'))) => match self.next() {
                Some(Token::Number(n)) => {
                    let text = if *sign == '-' {
                        format!("-{}", n)
                    } else {
                        n.clone()
                    };
                    Ok(number_cell(&text))
                },
                _ => Err(ParseError::sql(line, format!("expected number after '{}'", sign))),
            },
            Some(t) if t.is_keyword("NULL") => Ok(Cell::Null),
            Some(t) if t.is_keyword("TRUE") => Ok(Cell::Bool(true)),
            Some(t) if t.is_keyword("FALSE") => Ok(Cell::Bool(false)),
            Some(t) => Err(ParseError::sql(
                line,
                format!("unsupported value expression '{}'", t.describe()),
            )),
            None => Err(ParseError::sql(line, "unexpected end of VALUES list")),
        }
    }
}

fn is_type_name(word: &str) -> bool {
    TYPE_NAMES.iter().any(|t| t.eq_ignore_ascii_case(word))
}

/// Canonical numbers become JSON numbers; other spellings stay text
fn number_cell(text: &str) -> Cell {
    Cell::canonical_number(text).unwrap_or_else(|| Cell::Text(text.to_string()))
}

fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}
