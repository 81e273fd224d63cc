//! Splits a SQL dump into statements on top-level `;`.
//!
//! Quotes (`'`, `"`, `` ` ``) and comments (`--`, `#`, `/* */`) are tracked
//! so separators inside them are ignored. Comments are dropped from the
//! statement text. Escape and comment rules follow the current [`Dialect`],
//! which switches when a statement announces one (`PRAGMA`,
//! `SET standard_conforming_strings`).

use std::io::BufRead;

use chainvault_common::types::SourceFormat;

use super::Dialect;
use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    /// 1-based line on which the statement starts
    pub line: u64,
    /// Dialect the statement was scanned under
    pub dialect: Dialect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    /// Saw `-` or `/` in normal text; the next byte decides if a comment starts
    MaybeComment(u8),
    /// Saw `--` under MySQL rules; a comment only if whitespace follows
    DashDash,
    Quoted { quote: u8, backslash: bool },
    Escaped(u8),
    LineComment,
    BlockComment,
    BlockCommentStar,
    /// Saw `$` in normal text; `$$` starts a dollar-quoted body
    Dollar,
}

pub struct StatementSplitter<R> {
    reader: R,
    scanner: Scanner,
}

impl<R: BufRead> StatementSplitter<R> {
    pub fn new(reader: R, max_bytes: usize) -> Self {
        Self::with_dialect(reader, max_bytes, Dialect::default())
    }

    pub fn with_dialect(reader: R, max_bytes: usize, dialect: Dialect) -> Self {
        Self {
            reader,
            scanner: Scanner {
                max_bytes,
                dialect,
                state: State::Normal,
                buffer: Vec::new(),
                line: 1,
                start_line: None,
                finished: false,
            },
        }
    }

    /// Dialect that applies to the next statement
    pub fn dialect(&self) -> Dialect {
        self.scanner.dialect
    }

    /// Next non-empty statement, or `None` at end of input
    pub fn next_statement(&mut self) -> Result<Option<Statement>, ParseError> {
        if self.scanner.finished {
            return Ok(None);
        }

        loop {
            let chunk = self.reader.fill_buf()?;
            if chunk.is_empty() {
                self.scanner.finished = true;
                return self.scanner.finish();
            }

            let mut consumed = 0;
            let mut emitted = None;
            for &byte in chunk {
                consumed += 1;
                if let Some(statement) = self.scanner.push(byte)? {
                    emitted = Some(statement);
                    break;
                }
            }

            self.reader.consume(consumed);
            if emitted.is_some() {
                return Ok(emitted);
            }
        }
    }
}

/// Byte-level state of the splitter, kept apart from the reader so the
/// buffered chunk can be scanned in place
struct Scanner {
    max_bytes: usize,
    dialect: Dialect,
    state: State,
    buffer: Vec<u8>,
    line: u64,
    start_line: Option<u64>,
    finished: bool,
}

impl Scanner {
    fn push(&mut self, byte: u8) -> Result<Option<Statement>, ParseError> {
        let statement = self.step(byte)?;
        if byte == b'\n' {
            self.line += 1;
        }
        if self.buffer.len() > self.max_bytes {
            return Err(ParseError::StatementTooLarge {
                line: self.start_line.unwrap_or(self.line),
                limit: self.max_bytes,
            });
        }
        Ok(statement)
    }

    fn step(&mut self, byte: u8) -> Result<Option<Statement>, ParseError> {
        match self.state {
            State::Normal => return self.normal(byte),
            State::MaybeComment(first) => match (first, byte) {
                (b'-', b'-') if self.dialect == Dialect::MySql => self.state = State::DashDash,
                (b'-', b'-') => self.state = State::LineComment,
                (b'/', b'*') => self.state = State::BlockComment,
                _ => {
                    self.state = State::Normal;
                    self.emit_byte(first);
                    return self.normal(byte);
                },
            },
            State::DashDash => {
                if byte.is_ascii_whitespace() || byte.is_ascii_control() {
                    self.state = State::LineComment;
                    return self.step(byte);
                }
                // `4--1`: two minus signs, not a comment
                self.state = State::Normal;
                self.emit_byte(b'-');
                self.emit_byte(b'-');
                return self.normal(byte);
            },
            State::Dollar => {
                if byte == b'$' {
                    return Err(ParseError::UnsupportedDialect {
                        line: self.line,
                        message: "dollar-quoted bodies are not supported".to_string(),
                    });
                }
                self.state = State::Normal;
                self.emit_byte(b'$');
                return self.normal(byte);
            },
            State::Quoted { quote, backslash } => {
                self.emit_byte(byte);
                if byte == quote {
                    self.state = State::Normal;
                } else if byte == b'\\' && backslash {
                    self.state = State::Escaped(quote);
                }
            },
            State::Escaped(quote) => {
                self.emit_byte(byte);
                self.state = State::Quoted {
                    quote,
                    backslash: true,
                };
            },
            State::LineComment => {
                if byte == b'\n' {
                    self.state = State::Normal;
                    self.emit_byte(b'\n');
                }
            },
            State::BlockComment => {
                if byte == b'*' {
                    self.state = State::BlockCommentStar;
                }
            },
            State::BlockCommentStar => {
                self.state = match byte {
                    b'/' => {
                        self.emit_byte(b' ');
                        State::Normal
                    },
                    b'*' => State::BlockCommentStar,
                    _ => State::BlockComment,
                };
            },
        }
        Ok(None)
    }

    fn normal(&mut self, byte: u8) -> Result<Option<Statement>, ParseError> {
        match byte {
            b';' => return self.take_statement(),
            b'\'' | b'"' | b'`' => {
                let backslash = match self.dialect {
                    Dialect::MySql => byte != b'`',
                    Dialect::Standard => byte == b'\'' && self.escape_string_prefix(),
                };
                self.emit_byte(byte);
                self.state = State::Quoted {
                    quote: byte,
                    backslash,
                };
            },
            b'-' | b'/' => self.state = State::MaybeComment(byte),
            b'#' => self.state = State::LineComment,
            b'$' => self.state = State::Dollar,
            _ => self.emit_byte(byte),
        }
        Ok(None)
    }

    /// Whether the buffered text ends in a standalone `E`, making the quote
    /// that follows an escape string (`E'a\tb'`)
    fn escape_string_prefix(&self) -> bool {
        match self.buffer.as_slice() {
            [.., before, b'E' | b'e'] => !(before.is_ascii_alphanumeric() || *before == b'_'),
            [b'E' | b'e'] => true,
            _ => false,
        }
    }

    fn emit_byte(&mut self, byte: u8) {
        if self.start_line.is_none() && !byte.is_ascii_whitespace() {
            self.start_line = Some(self.line);
        }
        if self.start_line.is_some() {
            self.buffer.push(byte);
        }
    }

    fn take_statement(&mut self) -> Result<Option<Statement>, ParseError> {
        let Some(line) = self.start_line.take() else {
            return Ok(None);
        };
        let bytes = std::mem::take(&mut self.buffer);
        let text = String::from_utf8(bytes).map_err(|_| ParseError::Encoding {
            format: SourceFormat::Sql,
            line,
        })?;
        let statement = Statement {
            text: text.trim_end().to_string(),
            line,
            dialect: self.dialect,
        };
        if let Some(dialect) = Dialect::announced_by(&statement.text) {
            self.dialect = dialect;
        }
        Ok(Some(statement))
    }

    fn finish(&mut self) -> Result<Option<Statement>, ParseError> {
        match self.state {
            State::Quoted { .. } | State::Escaped(_) => {
                return Err(ParseError::sql(
                    self.start_line.unwrap_or(self.line),
                    "unterminated quoted literal",
                ));
            },
            State::BlockComment | State::BlockCommentStar => {
                return Err(ParseError::sql(self.line, "unterminated block comment"));
            },
            State::MaybeComment(first) => self.emit_byte(first),
            State::Dollar => self.emit_byte(b'$'),
            State::Normal | State::LineComment | State::DashDash => {},
        }
        self.state = State::Normal;
        self.take_statement()
    }
}
