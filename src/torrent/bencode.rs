// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Minimal bencode decoder.
//!
//! Besides decoded values, [`parse`] reports the byte span of every
//! top-level dictionary entry, so callers can hash the raw `info`
//! dictionary without re-encoding it.

use std::fmt;
use std::ops::Range;

/// Maximum nesting of lists and dictionaries.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(Vec<(Vec<u8>, Value)>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string decoded as UTF-8, replacing invalid sequences.
    pub fn as_text(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Vec<u8>, Value)]> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key when this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|entries| dict_get(entries, key))
    }
}

pub fn dict_get<'a>(dict: &'a [(Vec<u8>, Value)], key: &[u8]) -> Option<&'a Value> {
    dict.iter()
        .find_map(|(k, v)| if k.as_slice() == key { Some(v) } else { None })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub offset: usize,
    pub reason: &'static str,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.reason, self.offset)
    }
}

impl std::error::Error for DecodeError {}

/// A decoded document with the raw span of each top-level dictionary value.
#[derive(Debug, Clone)]
pub struct Document {
    pub root: Value,
    pub spans: Vec<(Vec<u8>, Range<usize>)>,
}

impl Document {
    pub fn span_of(&self, key: &[u8]) -> Option<Range<usize>> {
        self.spans
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, span)| span.clone())
    }
}

/// Decode a complete bencoded document. Trailing bytes are an error.
pub fn parse(data: &[u8]) -> Result<Document, DecodeError> {
    let mut decoder = Decoder {
        data,
        pos: 0,
        spans: Vec::new(),
    };
    let root = decoder.value(0)?;
    if decoder.pos != data.len() {
        return Err(decoder.error("trailing data after document"));
    }
    Ok(Document {
        root,
        spans: decoder.spans,
    })
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    spans: Vec<(Vec<u8>, Range<usize>)>,
}

impl<'a> Decoder<'a> {
    fn error(&self, reason: &'static str) -> DecodeError {
        DecodeError {
            offset: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error("unexpected end of data"))
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        match self.peek()? {
            b'i' => self.int(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            _ => Err(self.error("unexpected byte")),
        }
    }

    fn int(&mut self) -> Result<Value, DecodeError> {
        self.pos += 1;
        let start = self.pos;
        let end = self.data[start..]
            .iter()
            .position(|&b| b == b'e')
            .map(|offset| start + offset)
            .ok_or_else(|| self.error("unterminated integer"))?;
        let digits = &self.data[start..end];

        let well_formed = match digits {
            [] | [b'-'] => false,
            [b'-', b'0', ..] => false,
            [b'0', _, ..] => false,
            [b'-', rest @ ..] => rest.iter().all(u8::is_ascii_digit),
            _ => digits.iter().all(u8::is_ascii_digit),
        };
        if !well_formed {
            return Err(self.error("invalid integer"));
        }

        let number = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| self.error("integer out of range"))?;
        self.pos = end + 1;
        Ok(Value::Int(number))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let start = self.pos;
        let colon = self.data[start..]
            .iter()
            .position(|&b| b == b':')
            .map(|offset| start + offset)
            .ok_or_else(|| self.error("missing ':' in string length"))?;
        let digits = &self.data[start..colon];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(self.error("invalid string length"));
        }
        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("string length out of range"))?;

        let body = colon + 1;
        let end = body
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.error("string runs past end of data"))?;
        self.pos = end;
        Ok(self.data[body..end].to_vec())
    }

    fn list(&mut self, depth: usize) -> Result<Value, DecodeError> {
        self.pos += 1;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, DecodeError> {
        self.pos += 1;
        let mut entries: Vec<(Vec<u8>, Value)> = Vec::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(self.error("dictionary key is not a string"));
            }
            let key = self.bytes()?;
            let start = self.pos;
            let value = self.value(depth + 1)?;
            if depth == 0 {
                self.spans.push((key.clone(), start..self.pos));
            }
            // Unsorted keys are tolerated; a repeated key keeps its first value.
            if dict_get(&entries, &key).is_none() {
                entries.push((key, value));
            }
        }
        self.pos += 1;
        Ok(Value::Dict(entries))
    }
}

/// Encode a value. Dictionary keys are written in the order given.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(n) => out.extend_from_slice(format!("i{}e", n).as_bytes()),
        Value::Bytes(bytes) => {
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(bytes);
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            for (key, item) in entries {
                encode_into(&Value::Bytes(key.clone()), out);
                encode_into(item, out);
            }
            out.push(b'e');
        }
    }
}
