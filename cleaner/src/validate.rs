//! Line-by-line validator for blackbook data files.
//!
//! ```text
//! #separator \x09
//! #fields<TAB>indicator<TAB>source<TAB>date_to_remove
//! evil.example<TAB>phishtank<TAB>2026-12-31
//! 203.0.113.7<TAB>analyst<TAB>never
//! ```

use bookie_core::error::BookieError;
use bookie_core::record::{check_separator_line, parse_fields_line, split_body_line, DecodePolicy, Header};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub const SOURCE_FIELD: &str = "source";
pub const DATE_FIELD: &str = "date_to_remove";
pub const NEVER: &str = "never";

/// Bro reads a lone `-` as an unset field.
const UNSET: &str = "-";
const URL_PREFIXES: [&str; 3] = ["www.", "http://", "https://"];

#[derive(Debug, thiserror::Error)]
pub enum CleanerError {
  #[error(transparent)]
  Core(#[from] BookieError),

  #[error("no .{extension} files found under {}", root.display())]
  NoFiles { root: PathBuf, extension: String },

  #[error("no blackbook root configured (set blackbook.root or pass --root)")]
  NoRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  ExpectSeparator,
  ExpectFields,
  Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedEntry {
  pub line: usize,
  pub text: String,
}

/// Outcome of validating one file: what survives and what expired.
#[derive(Debug, Clone)]
pub struct FilePlan {
  pub path: PathBuf,
  pub header: Vec<String>,
  pub kept: Vec<String>,
  pub removed: Vec<RemovedEntry>,
}

impl FilePlan {
  pub fn changed(&self) -> bool {
    !self.removed.is_empty()
  }

  pub fn render(&self) -> String {
    let mut out = String::new();
    for line in self.header.iter().chain(&self.kept) {
      out.push_str(line);
      out.push('\n');
    }
    out
  }
}

/// Validates `content` and sorts its entries into kept and expired. Stops at
/// the first violation.
pub fn plan_file(path: &Path, content: &str, today: NaiveDate) -> Result<FilePlan, CleanerError> {
  let mut plan = FilePlan {
    path: path.to_path_buf(),
    header: Vec::with_capacity(2),
    kept: Vec::new(),
    removed: Vec::new(),
  };
  let mut state = State::ExpectSeparator;
  let mut header = Header::new(Vec::new());

  for (idx, raw) in content.lines().enumerate() {
    let line_no = idx + 1;
    let line = raw.trim_end();

    state = match state {
      State::ExpectSeparator => {
        check_separator_line(path, line)?;
        plan.header.push(line.to_string());
        State::ExpectFields
      }
      State::ExpectFields => {
        header = check_fields(path, line_no, line)?;
        plan.header.push(line.to_string());
        State::Body
      }
      State::Body => {
        if entry_is_live(path, line_no, line, &header, today)? {
          plan.kept.push(line.to_string());
        } else {
          tracing::info!(file = %path.display(), line = line_no, entry = %line, "expired entry");
          plan.removed.push(RemovedEntry {
            line: line_no,
            text: line.to_string(),
          });
        }
        State::Body
      }
    };
  }

  match state {
    State::ExpectSeparator => Err(BookieError::format(path, 1, "file is empty").into()),
    State::ExpectFields => Err(BookieError::format(path, 2, "missing #fields header").into()),
    State::Body => Ok(plan),
  }
}

fn check_fields(path: &Path, line_no: usize, line: &str) -> Result<Header, BookieError> {
  let header = parse_fields_line(path, line_no, line)?;
  let fields = header.fields();
  if fields.len() != 3 {
    return Err(BookieError::format(
      path,
      line_no,
      format!("expected 4 columns in #fields header, found {}", fields.len() + 1),
    ));
  }
  if fields[1] != SOURCE_FIELD {
    return Err(BookieError::format(
      path,
      line_no,
      format!("third #fields column must be `{SOURCE_FIELD}`"),
    ));
  }
  if fields[2] != DATE_FIELD {
    return Err(BookieError::format(
      path,
      line_no,
      format!("fourth #fields column must be `{DATE_FIELD}`"),
    ));
  }
  Ok(header)
}

/// Checks one entry and reports whether it outlives `today`.
fn entry_is_live(
  path: &Path,
  line_no: usize,
  line: &str,
  header: &Header,
  today: NaiveDate,
) -> Result<bool, BookieError> {
  let cols = split_body_line(path, line_no, line, header, DecodePolicy::Strict)?;
  if cols.iter().any(|c| *c == UNSET) {
    return Err(BookieError::format(
      path,
      line_no,
      "field is `-`, which Bro reads as unset",
    ));
  }
  if URL_PREFIXES.iter().any(|p| cols[0].starts_with(p)) {
    return Err(BookieError::format(
      path,
      line_no,
      "indicator must not start with `www.`, `http://` or `https://`",
    ));
  }

  let date = cols[2];
  if date == NEVER {
    return Ok(true);
  }
  let expires = NaiveDate::parse_from_str(date, "%Y-%m-%d")
    .map_err(|e| BookieError::format(path, line_no, format!("invalid {DATE_FIELD} {date:?}: {e}")))?;
  Ok(expires > today)
}

#[cfg(test)]
mod tests {
  use super::*;

  const HEADER: &str = "#separator \\x09\n#fields\tindicator\tsource\tdate_to_remove\n";

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
  }

  fn plan(body: &str) -> Result<FilePlan, CleanerError> {
    plan_file(Path::new("/bb/phish.brodata"), &format!("{HEADER}{body}"), today())
  }

  fn format_line(err: CleanerError) -> usize {
    match err {
      CleanerError::Core(BookieError::Format { line, .. }) => line,
      other => panic!("expected a format error, got {other}"),
    }
  }

  #[test]
  fn sorts_entries_by_expiry() {
    let p = plan(
      "evil.example\tphishtank\t2026-10-18\n\
203.0.113.7\tanalyst\tnever\n\
bad.example\tfeed\t2026-10-19\n\
later.example\tfeed\t2026-10-20\n",
    )
    .unwrap();

    assert_eq!(p.kept, ["203.0.113.7\tanalyst\tnever", "later.example\tfeed\t2026-10-20"]);
    let removed: Vec<usize> = p.removed.iter().map(|r| r.line).collect();
    assert_eq!(removed, [3, 5]);
    assert!(p.changed());
    assert_eq!(
      p.render(),
      format!("{HEADER}203.0.113.7\tanalyst\tnever\nlater.example\tfeed\t2026-10-20\n")
    );
  }

  #[test]
  fn unchanged_file_has_nothing_to_do() {
    let p = plan("203.0.113.7\tanalyst\tnever\n").unwrap();
    assert!(!p.changed());
  }

  #[test]
  fn header_only_file_is_valid() {
    assert!(plan("").unwrap().kept.is_empty());
  }

  #[test]
  fn unset_field_is_rejected() {
    assert_eq!(format_line(plan("evil.example\t-\tnever\n").unwrap_err()), 3);
  }

  #[test]
  fn url_prefixes_are_rejected() {
    for indicator in ["www.evil.example", "http://evil.example", "https://evil.example"] {
      let err = plan(&format!("{indicator}\tfeed\tnever\n")).unwrap_err();
      assert!(err.to_string().contains("must not start with"), "got {err}");
    }
  }

  #[test]
  fn body_shape_errors() {
    let ok = "a.example\tfeed\tnever\n";
    assert_eq!(format_line(plan(&format!("{ok}\n{ok}")).unwrap_err()), 4);
    let short = plan("a.example\tfeed\n").unwrap_err();
    assert!(short.to_string().contains("expected 3 fields, found 2"), "got {short}");
    assert_eq!(format_line(short), 3);
    let long = plan("a.example\tfeed\tnever\textra\n").unwrap_err();
    assert_eq!(format_line(long), 3);
    assert_eq!(format_line(plan("a.example\tfeed\t2026-13-01\n").unwrap_err()), 3);
    assert_eq!(format_line(plan("a.example\tfeed\tsoon\n").unwrap_err()), 3);
  }

  #[test]
  fn header_errors() {
    let p = Path::new("/bb/x.brodata");
    let t = today();

    assert_eq!(format_line(plan_file(p, "", t).unwrap_err()), 1);
    assert_eq!(format_line(plan_file(p, "#separator \\x09\n", t).unwrap_err()), 2);
    assert_eq!(format_line(plan_file(p, "#separator ,\n", t).unwrap_err()), 1);

    let wrong_columns = "#separator \\x09\n#fields\tindicator\tfeed\tdate_to_remove\n";
    let err = plan_file(p, wrong_columns, t).unwrap_err();
    assert!(err.to_string().contains("`source`"), "got {err}");

    let too_many = "#separator \\x09\n#fields\ta\tsource\tdate_to_remove\textra\n";
    let err = plan_file(p, too_many, t).unwrap_err();
    assert!(err.to_string().contains("expected 4 columns"), "got {err}");
  }
}
