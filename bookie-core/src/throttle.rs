//! Persistent alert throttle: `identity~subject` keys mapped to the Unix time
//! (seconds) at which the key may alert again.
//!
//! The flat file holds one `expiry,key` pair per line and is rewritten whole
//! at the end of every run.

use crate::error::{BookieError, Result};
use crate::paths;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleStore {
  entries: BTreeMap<String, i64>,
}

impl ThrottleStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_throttled(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  /// Inserts or extends `key` so it stays throttled until `now + period`.
  pub fn refresh(&mut self, key: &str, now: i64, period: i64) {
    self.entries.insert(key.to_string(), now.saturating_add(period));
  }

  pub fn get(&self, key: &str) -> Option<i64> {
    self.entries.get(key).copied()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), *v))
  }

  fn encode(&self) -> String {
    let mut out = String::new();
    for (key, expiry) in self.iter() {
      out.push_str(&format!("{expiry},{key}\n"));
    }
    out
  }
}

pub trait ThrottleBackend {
  /// Loads live entries; anything with `expiry <= now` is dropped.
  fn load(&self, now: i64) -> Result<ThrottleStore>;
  fn persist(&self, store: &ThrottleStore) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FlatFileBackend {
  path: PathBuf,
}

impl FlatFileBackend {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl ThrottleBackend for FlatFileBackend {
  fn load(&self, now: i64) -> Result<ThrottleStore> {
    let raw = match fs::read_to_string(&self.path) {
      Ok(r) => r,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        tracing::debug!(path = %self.path.display(), "no throttle file yet; starting empty");
        return Ok(ThrottleStore::new());
      }
      Err(e) => return Err(BookieError::io(&self.path, e)),
    };

    let store = parse(&self.path, &raw, now)?;
    tracing::debug!(path = %self.path.display(), live = store.len(), "throttle state loaded");
    Ok(store)
  }

  fn persist(&self, store: &ThrottleStore) -> Result<()> {
    paths::write_atomic(&self.path, &store.encode()).map_err(|e| BookieError::io(&self.path, e))?;
    tracing::debug!(path = %self.path.display(), entries = store.len(), "throttle state written");
    Ok(())
  }
}

fn parse(path: &Path, raw: &str, now: i64) -> Result<ThrottleStore> {
  let mut store = ThrottleStore::new();
  let mut expired = 0usize;

  for (idx, line) in raw.lines().enumerate() {
    let line_no = idx + 1;
    if line.trim().is_empty() {
      return Err(BookieError::format(path, line_no, "blank line in throttle file"));
    }

    // Keys contain the alert subject, which may itself contain commas.
    let (expiry, key) = line
      .split_once(',')
      .ok_or_else(|| BookieError::format(path, line_no, "expected `expiry,key`"))?;
    let expiry: i64 = expiry
      .trim()
      .parse()
      .map_err(|_| BookieError::format(path, line_no, format!("invalid expiry: {expiry}")))?;

    if expiry > now {
      store.entries.insert(key.to_string(), expiry);
    } else {
      expired += 1;
    }
  }

  if expired > 0 {
    tracing::debug!(path = %path.display(), expired, "dropped expired throttle entries");
  }
  Ok(store)
}
