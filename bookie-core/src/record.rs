//! Reader for the tab-delimited log format shared by the alert logs and the
//! blackbook data files.
//!
//! ```text
//! #separator \x09
//! #fields<TAB>ts<TAB>id.orig_h<TAB>...
//! 1420070400.0<TAB>128.252.1.1<TAB>...
//! ```
//!
//! Line 0 declares the separator, line 1 the field names. Body lines that
//! start with `#` are directives (`#types`, `#close`, ...) and are skipped.

use crate::error::{BookieError, Result};
use flate2::read::GzDecoder;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const SEPARATOR_HEADER: &str = r"#separator \x09";
pub const FIELDS_MARKER: &str = "#fields";

/// Rendered in place of a header field the record does not carry.
pub const ABSENT: &str = "?";

/// How a body line whose token count differs from the header is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
  /// Token count must equal the field count.
  Strict,
  /// Zip header with tokens; missing trailing fields become absent keys.
  Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
  fields: Vec<String>,
}

impl Header {
  pub fn new(fields: Vec<String>) -> Self {
    Self { fields }
  }

  pub fn fields(&self) -> &[String] {
    &self.fields
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }
}

#[derive(Debug, Clone)]
pub struct Record {
  pub source_log: PathBuf,
  /// 1-based line number in the source file.
  pub line: usize,
  fields: IndexMap<String, String>,
  extras: BTreeMap<String, String>,
}

impl Record {
  pub fn new(source_log: impl Into<PathBuf>, line: usize, fields: IndexMap<String, String>) -> Self {
    Self {
      source_log: source_log.into(),
      line,
      fields,
      extras: BTreeMap::new(),
    }
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.fields.get(name).map(String::as_str)
  }

  pub fn fields(&self) -> &IndexMap<String, String> {
    &self.fields
  }

  /// Attributes added during processing (resolved identity, user lookup).
  pub fn extras(&self) -> &BTreeMap<String, String> {
    &self.extras
  }

  pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.extras.insert(key.into(), value.into());
  }

  /// Re-encodes the record as a body line in header order.
  pub fn encode(&self, header: &Header) -> String {
    header
      .fields()
      .iter()
      .map(|f| self.get(f).unwrap_or(ABSENT))
      .collect::<Vec<_>>()
      .join("\t")
  }
}

#[derive(Debug, Clone)]
pub struct LogFile {
  pub source: PathBuf,
  pub header: Header,
  pub records: Vec<Record>,
}

pub fn read_log_file(path: &Path, policy: DecodePolicy) -> Result<LogFile> {
  let content = read_text(path)?;
  decode(path, &content, policy)
}

/// Reads a log, transparently gunzipping `*.gz` files.
pub fn read_text(path: &Path) -> Result<String> {
  let file = fs::File::open(path).map_err(|e| BookieError::io(path, e))?;
  let mut out = String::new();
  let res = if is_gzip(path) {
    GzDecoder::new(file).read_to_string(&mut out)
  } else {
    let mut file = file;
    file.read_to_string(&mut out)
  };
  res.map_err(|e| BookieError::io(path, e))?;
  Ok(out)
}

fn is_gzip(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

pub fn decode(source: &Path, content: &str, policy: DecodePolicy) -> Result<LogFile> {
  let mut lines = content.lines();

  let separator = lines
    .next()
    .ok_or_else(|| BookieError::format(source, 1, "file is empty"))?;
  check_separator_line(source, separator)?;

  let fields_line = lines
    .next()
    .ok_or_else(|| BookieError::format(source, 2, "missing #fields header"))?;
  let header = parse_fields_line(source, 2, fields_line)?;

  let mut records = Vec::new();
  for (idx, line) in lines.enumerate() {
    let line_no = idx + 3;
    if line.starts_with('#') {
      continue;
    }

    let tokens = split_body_line(source, line_no, line, &header, policy)?;
    let fields: IndexMap<String, String> = header
      .fields()
      .iter()
      .zip(tokens)
      .map(|(name, value)| (name.clone(), value.to_string()))
      .collect();
    records.push(Record::new(source, line_no, fields));
  }

  tracing::debug!(
    source = %source.display(),
    fields = header.len(),
    records = records.len(),
    "decoded log file"
  );

  Ok(LogFile {
    source: source.to_path_buf(),
    header,
    records,
  })
}

pub fn check_separator_line(source: &Path, line: &str) -> Result<()> {
  if line != SEPARATOR_HEADER {
    return Err(BookieError::format(
      source,
      1,
      format!("expected `{SEPARATOR_HEADER}` as the first line"),
    ));
  }
  Ok(())
}

/// Splits a body line into its tab-separated values. Blank lines are always
/// rejected; under `Strict` the value count must match the header.
pub fn split_body_line<'l>(
  source: &Path,
  line_no: usize,
  line: &'l str,
  header: &Header,
  policy: DecodePolicy,
) -> Result<Vec<&'l str>> {
  if line.trim().is_empty() {
    return Err(BookieError::format(source, line_no, "blank line"));
  }
  let tokens: Vec<&str> = line.split('\t').collect();
  if policy == DecodePolicy::Strict && tokens.len() != header.len() {
    return Err(BookieError::format(
      source,
      line_no,
      format!("expected {} fields, found {}", header.len(), tokens.len()),
    ));
  }
  Ok(tokens)
}

/// Parses the `#fields` line. The field names must be tab separated: a stray
/// space inside the line would otherwise silently merge two columns.
pub fn parse_fields_line(source: &Path, line_no: usize, line: &str) -> Result<Header> {
  if !line.starts_with(FIELDS_MARKER) {
    return Err(BookieError::format(
      source,
      line_no,
      format!("expected a `{FIELDS_MARKER}` header"),
    ));
  }

  let tab_tokens: Vec<&str> = line.split('\t').collect();
  if line.split_whitespace().count() != tab_tokens.len() {
    return Err(BookieError::format(
      source,
      line_no,
      "#fields header is not tab-delimited",
    ));
  }
  if tab_tokens[0] != FIELDS_MARKER {
    return Err(BookieError::format(
      source,
      line_no,
      format!("`{FIELDS_MARKER}` must be followed by a tab"),
    ));
  }

  let fields: Vec<String> = tab_tokens[1..].iter().map(|s| s.to_string()).collect();
  if fields.is_empty() {
    return Err(BookieError::format(source, line_no, "#fields header declares no fields"));
  }

  Ok(Header::new(fields))
}
