use crate::config::LoggingConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Always logs to stderr; also writes a daily
/// rotated `<file_stem>.log` when `cfg.dir` is set. `debug` overrides the
/// configured level.
pub fn init(cfg: &LoggingConfig, file_stem: &str, debug: bool) -> anyhow::Result<()> {
  let level = if debug { "debug" } else { cfg.level.as_str() };
  let filter = tracing_subscriber::EnvFilter::try_new(level)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  let Some(dir) = cfg.dir.as_deref() else {
    let stderr_layer = tracing_subscriber::fmt::layer()
      .with_ansi(false)
      .with_writer(std::io::stderr)
      .with_target(debug);
    tracing_subscriber::registry()
      .with(filter)
      .with(stderr_layer)
      .try_init()?;
    return Ok(());
  };

  fs::create_dir_all(dir)?;
  cleanup_old_logs(dir, file_stem, cfg.retention_days)?;

  let file_name = format!("{file_stem}.log");
  let file_appender = tracing_appender::rolling::daily(dir, &file_name);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let _ = FILE_GUARD.set(guard);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(std::io::stderr)
    .with_target(debug);

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()?;

  Ok(())
}

fn cleanup_old_logs(log_dir: &Path, file_stem: &str, retention_days: u64) -> anyhow::Result<()> {
  if retention_days == 0 {
    return Ok(());
  }

  let cutoff = SystemTime::now()
    .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
    .unwrap_or(SystemTime::UNIX_EPOCH);

  let entries = match fs::read_dir(log_dir) {
    Ok(e) => e,
    Err(_) => return Ok(()),
  };

  for entry in entries.flatten() {
    let path: PathBuf = entry.path();
    if !is_rotated_log(&path, file_stem) {
      continue;
    }

    let modified = match entry.metadata().and_then(|m| m.modified()) {
      Ok(t) => t,
      Err(_) => continue,
    };

    if modified < cutoff {
      let _ = fs::remove_file(&path);
    }
  }

  Ok(())
}

fn is_rotated_log(path: &Path, file_stem: &str) -> bool {
  let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
    return false;
  };
  let base = format!("{file_stem}.log");
  name == base || name.starts_with(&format!("{base}."))
}
