use std::path::PathBuf;

/// Fatal conditions for an alerting run. Every variant aborts the run before
/// the throttle file is rewritten.
#[derive(Debug, thiserror::Error)]
pub enum BookieError {
  #[error("format error in {} line {line}: {reason}", file.display())]
  Format {
    file: PathBuf,
    line: usize,
    reason: String,
  },

  #[error("cannot attribute record in {} line {line} to a local identity: {reason}", file.display())]
  Attribution {
    file: PathBuf,
    line: usize,
    reason: String,
  },

  #[error("configuration error: {0}")]
  Config(String),

  #[error("too many alerts: found {found}, max is {max}")]
  Capacity { found: usize, max: usize },

  #[error("unrecognized log category for {}", file.display())]
  Category { file: PathBuf },

  #[error("batch selection failed: {0}")]
  Batch(String),

  #[error("I/O error on {}: {err}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    err: std::io::Error,
  },
}

impl BookieError {
  pub fn format(file: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
    Self::Format {
      file: file.into(),
      line,
      reason: reason.into(),
    }
  }

  pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      err,
    }
  }
}

pub type Result<T> = std::result::Result<T, BookieError>;
