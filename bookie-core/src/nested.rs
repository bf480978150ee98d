//! Recursive-descent parser for Bro record values embedded in a log field,
//! e.g. the `blackbook_record` column of notice logs:
//!
//! ```text
//! [ts=1420070400.0, id=[orig_h=128.252.1.1, orig_p=443/tcp], hosts={\x0a\x09a,\x0a\x09b\x0a}]
//! ```

use indexmap::IndexMap;

const UNINITIALIZED: &str = "<uninitialized>";

/// Deepest record nesting accepted. Values come straight from log fields.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedValue {
  Scalar(String),
  Record(IndexMap<String, NestedValue>),
  List(Vec<NestedValue>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed nested record at offset {offset}: {reason}")]
pub struct NestedParseError {
  pub offset: usize,
  pub reason: String,
}

type Result<T> = std::result::Result<T, NestedParseError>;

impl NestedValue {
  pub fn as_scalar(&self) -> Option<&str> {
    match self {
      NestedValue::Scalar(s) => Some(s),
      _ => None,
    }
  }
}

pub fn looks_nested(value: &str) -> bool {
  value.starts_with('[') && value.ends_with(']')
}

pub fn parse(input: &str) -> Result<NestedValue> {
  let mut p = Parser {
    src: input,
    pos: 0,
    depth: 0,
  };
  let value = p.record()?;
  if !p.src[p.pos..].trim().is_empty() {
    return Err(p.error("trailing data after record"));
  }
  Ok(value)
}

/// Flattens a value into `prefix.key = value` pairs in record order.
pub fn flatten(prefix: &str, value: &NestedValue, out: &mut Vec<(String, String)>) {
  match value {
    NestedValue::Scalar(s) if s == UNINITIALIZED => out.push((prefix.to_string(), String::new())),
    NestedValue::Scalar(s) => out.push((prefix.to_string(), s.clone())),
    NestedValue::Record(map) => {
      for (k, v) in map {
        flatten(&format!("{prefix}.{k}"), v, out);
      }
    }
    NestedValue::List(items) => {
      let joined = items
        .iter()
        .filter_map(NestedValue::as_scalar)
        .collect::<Vec<_>>()
        .join(", ");
      out.push((prefix.to_string(), joined));
    }
  }
}

struct Parser<'a> {
  src: &'a str,
  pos: usize,
  depth: usize,
}

impl<'a> Parser<'a> {
  fn peek(&self) -> Option<u8> {
    self.src.as_bytes().get(self.pos).copied()
  }

  fn error(&self, reason: &str) -> NestedParseError {
    NestedParseError {
      offset: self.pos,
      reason: reason.to_string(),
    }
  }

  fn expect(&mut self, b: u8) -> Result<()> {
    if self.peek() != Some(b) {
      return Err(self.error(&format!("expected `{}`", b as char)));
    }
    self.pos += 1;
    Ok(())
  }

  fn skip_spaces(&mut self) {
    while self.peek() == Some(b' ') {
      self.pos += 1;
    }
  }

  fn record(&mut self) -> Result<NestedValue> {
    if self.depth >= MAX_DEPTH {
      return Err(self.error("records nested too deeply"));
    }
    self.depth += 1;
    let value = self.record_body();
    self.depth -= 1;
    value
  }

  fn record_body(&mut self) -> Result<NestedValue> {
    self.expect(b'[')?;
    let mut map = IndexMap::new();
    if self.peek() == Some(b']') {
      self.pos += 1;
      return Ok(NestedValue::Record(map));
    }

    loop {
      let key = self.key()?;
      let value = self.value()?;
      map.insert(key, value);

      match self.peek() {
        Some(b']') => {
          self.pos += 1;
          return Ok(NestedValue::Record(map));
        }
        Some(b',') => {
          self.pos += 1;
          self.skip_spaces();
        }
        Some(_) => return Err(self.error("expected `,` or `]`")),
        None => return Err(self.error("unterminated record")),
      }
    }
  }

  fn key(&mut self) -> Result<String> {
    let start = self.pos;
    while let Some(b) = self.peek() {
      match b {
        b'=' => break,
        b'[' | b']' | b',' | b'{' | b'}' => return Err(self.error("unexpected delimiter in key")),
        _ => self.pos += 1,
      }
    }
    if self.peek() != Some(b'=') {
      return Err(self.error("expected `=`"));
    }

    let key = self.src[start..self.pos].trim();
    if key.is_empty() {
      return Err(self.error("empty key"));
    }
    self.pos += 1;
    Ok(key.to_string())
  }

  fn value(&mut self) -> Result<NestedValue> {
    match self.peek() {
      Some(b'[') => self.record(),
      Some(b'{') => self.list(),
      _ => Ok(NestedValue::Scalar(self.scalar())),
    }
  }

  // A scalar runs until the `, ` that separates pairs or the closing `]`.
  fn scalar(&mut self) -> String {
    let start = self.pos;
    let bytes = self.src.as_bytes();
    while let Some(b) = self.peek() {
      if b == b']' || (b == b',' && bytes.get(self.pos + 1) == Some(&b' ')) {
        break;
      }
      self.pos += 1;
    }
    clean(&self.src[start..self.pos])
  }

  fn list(&mut self) -> Result<NestedValue> {
    self.expect(b'{')?;
    let start = self.pos;
    while let Some(b) = self.peek() {
      if b == b'}' {
        break;
      }
      self.pos += 1;
    }
    if self.peek() != Some(b'}') {
      return Err(self.error("unterminated list"));
    }

    let inner = &self.src[start..self.pos];
    self.pos += 1;
    let items = inner
      .split(',')
      .map(clean)
      .filter(|s| !s.is_empty())
      .map(NestedValue::Scalar)
      .collect();
    Ok(NestedValue::List(items))
  }
}

// Bro escapes newlines and tabs inside container values.
fn clean(raw: &str) -> String {
  raw.replace("\\x0a", "").replace("\\x09", "").trim().to_string()
}
