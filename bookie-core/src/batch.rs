//! Chooses which log files make up a run.
//!
//! The log archive is laid out as one directory per day, each holding hourly
//! rotated files named `<category>.<HH:MM:SS-HH:MM:SS>.log[.gz]`:
//!
//! ```text
//! logs/2015-01-01/notice.00:00:00-01:00:00.log.gz
//! logs/2015-01-01/intel.00:00:00-01:00:00.log.gz
//! logs/current -> ...
//! ```

use crate::config::{CategoryConfig, Config};
use crate::error::{BookieError, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRequest {
  Explicit(Vec<PathBuf>),
  /// Newest hourly batch of the newest non-empty day directory.
  Recent,
}

pub fn select(request: &BatchRequest, cfg: &Config) -> Result<Vec<PathBuf>> {
  let files = match request {
    BatchRequest::Explicit(paths) => explicit(paths, &cfg.categories)?,
    BatchRequest::Recent => {
      let root = cfg
        .log_dir
        .as_deref()
        .ok_or_else(|| BookieError::Batch("--recent needs log_dir in the configuration".to_string()))?;
      recent(root, &cfg.categories)?
    }
  };

  tracing::info!(files = files.len(), "batch selected");
  for f in &files {
    tracing::debug!(file = %f.display(), "batch member");
  }
  Ok(files)
}

fn explicit(paths: &[PathBuf], categories: &[CategoryConfig]) -> Result<Vec<PathBuf>> {
  if paths.is_empty() {
    return Err(BookieError::Batch("no log files given".to_string()));
  }
  for p in paths {
    if !p.is_file() {
      return Err(BookieError::Batch(format!("log file does not exist: {}", p.display())));
    }
    if !has_category_prefix(p, categories) {
      let labels: Vec<&str> = categories.iter().map(|c| c.label.as_str()).collect();
      return Err(BookieError::Batch(format!(
        "log file name must start with one of {labels:?}: {}",
        p.display()
      )));
    }
  }
  Ok(paths.to_vec())
}

fn recent(root: &Path, categories: &[CategoryConfig]) -> Result<Vec<PathBuf>> {
  if !root.is_dir() {
    return Err(BookieError::Batch(format!("log directory does not exist: {}", root.display())));
  }

  let mut days: Vec<(NaiveDate, PathBuf)> = entries(root)?
    .into_iter()
    .filter(|e| e.file_type().is_dir())
    .filter_map(|e| {
      let date = day_of(e.file_name().to_str()?)?;
      Some((date, e.into_path()))
    })
    .collect();
  days.sort();

  for (date, dir) in days.into_iter().rev() {
    let files = files_in(&dir)?;
    if files.is_empty() {
      tracing::debug!(dir = %dir.display(), "skipping empty day directory");
      continue;
    }

    let Some(token) = files.iter().filter_map(|f| batch_token(f)).max().map(str::to_string) else {
      continue;
    };

    let mut selected: Vec<PathBuf> = files
      .iter()
      .filter(|f| file_name(f).contains(token.as_str()))
      .filter(|f| has_category_prefix(f, categories))
      .cloned()
      .collect();
    selected.sort();

    if selected.is_empty() {
      return Err(BookieError::Batch(format!(
        "no alert logs for batch {token} in {}",
        dir.display()
      )));
    }
    tracing::info!(day = %date, batch = %token, dir = %dir.display(), "most recent batch");
    return Ok(selected);
  }

  Err(BookieError::Batch(format!("no dated log directories with files under {}", root.display())))
}

// Day directories are named `YYYY-MM-DD`, optionally with a suffix.
fn day_of(name: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(name.get(..10)?, "%Y-%m-%d").ok()
}

fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
  Ok(
    entries(dir)?
      .into_iter()
      .filter(|e| e.file_type().is_file())
      .map(|e| e.into_path())
      .collect(),
  )
}

/// Immediate children of `dir`. An unreadable entry fails the listing.
fn entries(dir: &Path) -> Result<Vec<walkdir::DirEntry>> {
  let mut out = Vec::new();
  for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
    let entry = entry.map_err(|e| {
      let path = e.path().unwrap_or(dir).to_path_buf();
      BookieError::io(path, e.into())
    })?;
    out.push(entry);
  }
  Ok(out)
}

fn file_name(path: &Path) -> &str {
  path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// The time-range component of a rotated log name: `notice.<token>.log`.
fn batch_token(path: &Path) -> Option<&str> {
  file_name(path).split('.').nth(1).filter(|t| !t.is_empty())
}

fn has_category_prefix(path: &Path, categories: &[CategoryConfig]) -> bool {
  let name = file_name(path);
  categories.iter().any(|c| name.starts_with(c.label.as_str()))
}
