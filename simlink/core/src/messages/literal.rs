//! Embedded State Literals
//!
//! Some simulation builds send an agent's `state` as a string holding a
//! literal (`"[0.1, 0.2]"`, `"{'x': (1, 2)}"`) instead of structured JSON.
//! This module expands such strings into [`serde_json::Value`]s.
//!
//! Accepted grammar: JSON, plus Python-style literals: single-quoted strings,
//! `True`/`False`/`None`, tuples and sets (both become arrays), and trailing
//! commas. Dict keys that are not strings are rendered with their JSON text.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Deepest container nesting accepted, matching `serde_json`
pub const MAX_DEPTH: usize = 128;

/// A string that could not be read as a literal
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid literal at byte {position}: {message}")]
pub struct LiteralError {
    /// Byte offset where parsing failed
    pub position: usize,
    /// What went wrong
    pub message: String,
}

/// Parse a literal string into a JSON value
///
/// # Errors
///
/// Returns [`LiteralError`] if `input` is neither JSON nor a supported literal.
pub fn parse_literal(input: &str) -> Result<Value, LiteralError> {
    if let Ok(value) = serde_json::from_str(input) {
        return Ok(value);
    }

    let mut parser = Parser {
        src: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

/// Deserialize a state field, expanding string-encoded literals
pub(crate) fn deserialize_state<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => parse_literal(&s).map_err(serde::de::Error::custom),
        other => Ok(other),
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        self.skip_ws();
        match self.peek() {
            Some(b'[' | b'(' | b'{') => {
                if self.depth == MAX_DEPTH {
                    return Err(self.error(format!("nesting deeper than {MAX_DEPTH}")));
                }
                self.depth += 1;
                let value = self.container();
                self.depth -= 1;
                value
            }
            Some(q @ (b'\'' | b'"')) => {
                self.pos += 1;
                self.string(q).map(Value::String)
            }
            Some(b'-' | b'+' | b'.' | b'0'..=b'9') => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn container(&mut self) -> Result<Value, LiteralError> {
        match self.peek() {
            Some(b'[') => {
                self.pos += 1;
                self.sequence(b']').map(|(items, _)| Value::Array(items))
            }
            Some(b'(') => {
                self.pos += 1;
                let (mut items, trailing_comma) = self.sequence(b')')?;
                // `(x)` is a parenthesized value, `(x,)` a one-element tuple
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Value::Array(items))
                }
            }
            _ => {
                self.pos += 1;
                self.mapping()
            }
        }
    }

    /// Comma-separated values up to `close`; reports whether a comma preceded it
    fn sequence(&mut self, close: u8) -> Result<(Vec<Value>, bool), LiteralError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            items.push(self.value()?);
            trailing_comma = self.eat(b',');
            if !trailing_comma {
                if self.eat(close) {
                    return Ok((items, false));
                }
                return Err(self.error(format!("expected ',' or '{}'", close as char)));
            }
        }
    }

    /// Dict `{k: v, ...}` or set `{a, b}`
    fn mapping(&mut self) -> Result<Value, LiteralError> {
        if self.eat(b'}') {
            return Ok(Value::Object(Map::new()));
        }

        let first = self.value()?;
        if !self.eat(b':') {
            let mut items = vec![first];
            if self.eat(b',') {
                let (rest, _) = self.sequence(b'}')?;
                items.extend(rest);
            } else if !self.eat(b'}') {
                return Err(self.error("expected ',' or '}'"));
            }
            return Ok(Value::Array(items));
        }

        let mut map = Map::new();
        let mut key = first;
        loop {
            let value = self.value()?;
            map.insert(key_string(key), value);
            if !self.eat(b',') {
                if self.eat(b'}') {
                    return Ok(Value::Object(map));
                }
                return Err(self.error("expected ',' or '}'"));
            }
            if self.eat(b'}') {
                return Ok(Value::Object(map));
            }
            key = self.value()?;
            if !self.eat(b':') {
                return Err(self.error("expected ':'"));
            }
        }
    }

    fn string(&mut self, quote: u8) -> Result<String, LiteralError> {
        let mut out = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match c {
                _ if c == quote => break,
                b'\\' => {
                    let Some(esc) = self.peek() else {
                        return Err(self.error("unterminated escape"));
                    };
                    self.pos += 1;
                    match esc {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'0' => out.push(0),
                        b'\\' | b'\'' | b'"' => out.push(esc),
                        b'x' => {
                            let ch = self.hex_escape(2)?;
                            push_char(&mut out, ch);
                        }
                        b'u' => {
                            let ch = self.hex_escape(4)?;
                            push_char(&mut out, ch);
                        }
                        _ => {
                            out.push(b'\\');
                            out.push(esc);
                        }
                    }
                }
                _ => out.push(c),
            }
        }
        String::from_utf8(out).map_err(|_| self.error("string is not valid UTF-8"))
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, LiteralError> {
        let end = self.pos + digits;
        let hex = self
            .src
            .get(self.pos..end)
            .and_then(|h| std::str::from_utf8(h).ok())
            .ok_or_else(|| self.error("truncated escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid hex escape"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("escape is not a valid character"))
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'.' | b'e' | b'E' | b'_')
        ) || (matches!(self.peek(), Some(b'-' | b'+'))
            && matches!(self.src.get(self.pos - 1), Some(b'e' | b'E')))
        {
            self.pos += 1;
        }

        let text: String = String::from_utf8_lossy(&self.src[start..self.pos])
            .chars()
            .filter(|c| *c != '_')
            .collect();
        let text = text.strip_prefix('+').unwrap_or(&text);

        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Number(i.into()));
        }
        if let Ok(u) = text.parse::<u64>() {
            return Ok(Value::Number(u.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| LiteralError {
                position: start,
                message: format!("invalid number '{text}'"),
            })
    }

    fn keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        match &self.src[start..self.pos] {
            b"True" | b"true" => Ok(Value::Bool(true)),
            b"False" | b"false" => Ok(Value::Bool(false)),
            b"None" | b"null" => Ok(Value::Null),
            other => Err(LiteralError {
                position: start,
                message: format!("unknown name '{}'", String::from_utf8_lossy(other)),
            }),
        }
    }
}

fn push_char(out: &mut Vec<u8>, ch: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
