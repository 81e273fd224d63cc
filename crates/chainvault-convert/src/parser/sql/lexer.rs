//! Tokenizer for a single SQL statement

use std::iter::Peekable;
use std::str::Chars;

use super::Dialect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare word: keyword or unquoted identifier
    Word(String),
    /// `"quoted"` or `` `quoted` `` identifier
    QuotedIdent(String),
    /// String literal with escapes resolved
    Str(String),
    /// Numeric literal exactly as written
    Number(String),
    /// `0x...` literal exactly as written
    Hex(String),
    Punct(char),
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    pub fn describe(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::QuotedIdent(w) => format!("\"{}\"", w),
            Token::Str(_) => "string literal".to_string(),
            Token::Number(n) | Token::Hex(n) => n.clone(),
            Token::Punct(c) => c.to_string(),
        }
    }
}

/// Split one statement into tokens. Under [`Dialect::Standard`] only
/// `E'...'` strings resolve backslash escapes.
pub fn tokenize(statement: &str, dialect: Dialect) -> Result<Vec<Token>, String> {
    let backslash = dialect == Dialect::MySql;
    let mut tokens = Vec::new();
    let mut chars = statement.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            tokens.push(Token::Str(string_literal(&mut chars, backslash)?));
        } else if c == '"' || c == '`' {
            chars.next();
            tokens.push(Token::QuotedIdent(quoted_ident(&mut chars, c)?));
        } else if c.is_ascii_digit() || (c == '.' && next_is_digit(&chars)) {
            tokens.push(number(&mut chars));
        } else if c.is_alphabetic() || c == '_' {
            let word = word(&mut chars);
            // E'...' and N'...' prefixed strings
            if matches!(word.as_str(), "E" | "e" | "N" | "n") && chars.peek() == Some(&'\'') {
                chars.next();
                let escapes = backslash || word.eq_ignore_ascii_case("E");
                tokens.push(Token::Str(string_literal(&mut chars, escapes)?));
            } else {
                tokens.push(Token::Word(word));
            }
        } else {
            chars.next();
            tokens.push(Token::Punct(c));
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &Peekable<Chars<'_>>) -> bool {
    let mut lookahead = chars.clone();
    lookahead.next();
    lookahead.peek().is_some_and(|c| c.is_ascii_digit())
}

fn word(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' || c == '$' {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    out
}

fn number(chars: &mut Peekable<Chars<'_>>) -> Token {
    let mut out = String::new();

    if chars.peek() == Some(&'0') {
        let mut lookahead = chars.clone();
        lookahead.next();
        if matches!(lookahead.peek(), Some('x') | Some('X')) {
            out.push_str("0x");
            chars.next();
            chars.next();
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_hexdigit() {
                    break;
                }
                out.push(c);
                chars.next();
            }
            return Token::Hex(out);
        }
    }

    let mut seen_exponent = false;
    while let Some(&c) = chars.peek() {
        let accept = c.is_ascii_digit()
            || c == '.'
            || (!seen_exponent && (c == 'e' || c == 'E'))
            || ((c == '+' || c == '-') && out.ends_with(['e', 'E']));
        if !accept {
            break;
        }
        if c == 'e' || c == 'E' {
            seen_exponent = true;
        }
        out.push(c);
        chars.next();
    }
    Token::Number(out)
}

fn string_literal(chars: &mut Peekable<Chars<'_>>, backslash: bool) -> Result<String, String> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err("unterminated string literal".to_string()),
            Some('\'') => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    return Ok(out);
                }
            },
            Some('\\') if backslash => match chars.next() {
                None => return Err("unterminated string literal".to_string()),
                Some('0') => out.push('\0'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('b') => out.push('\u{8}'),
                Some('Z') => out.push('\u{1a}'),
                // MySQL keeps the backslash for LIKE wildcards
                Some(c @ ('%' | '_')) => {
                    out.push('\\');
                    out.push(c);
                },
                Some(c) => out.push(c),
            },
            Some(c) => out.push(c),
        }
    }
}

fn quoted_ident(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String, String> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err("unterminated quoted identifier".to_string()),
            Some(c) if c == quote => {
                if chars.peek() == Some(&quote) {
                    chars.next();
                    out.push(quote);
                } else {
                    return Ok(out);
                }
            },
            Some(c) => out.push(c),
        }
    }
}
