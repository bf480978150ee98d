pub mod cli;
pub mod validate;

use anyhow::Context;
use bookie_core::config::{self, Config};
use bookie_core::error::BookieError;
use bookie_core::paths;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use validate::{CleanerError, FilePlan};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// Validate and drop expired entries.
  Clean,
  /// Validate only; never write.
  Check,
}

#[derive(Debug, Clone)]
pub struct CleanOptions {
  pub root: PathBuf,
  pub extension: String,
  pub mode: Mode,
  pub dry_run: bool,
  pub today: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanSummary {
  pub files: usize,
  pub lines_removed: usize,
  pub files_rewritten: usize,
}

pub fn run(cli: &cli::Cli) -> anyhow::Result<()> {
  let config_path = paths::resolve_config_path(cli.config.as_deref());
  let cfg = if cli.config.is_none() && !config_path.exists() {
    Config::default()
  } else {
    config::load_unvalidated(&config_path)?
  };

  bookie_core::logging::init(&cfg.logging, "blackbook-cleaner", cli.debug)
    .context("initialise logging")?;

  let root = cli
    .root
    .clone()
    .or_else(|| cfg.blackbook.root.clone())
    .ok_or(CleanerError::NoRoot)?;

  let opts = CleanOptions {
    root,
    extension: cfg.blackbook.extension.clone(),
    mode: if cli.check { Mode::Check } else { Mode::Clean },
    dry_run: cli.dry_run,
    today: chrono::Local::now().date_naive(),
  };
  clean(&opts)?;
  Ok(())
}

/// Validates every file under the root first; only if all of them pass are
/// expired entries removed.
pub fn clean(opts: &CleanOptions) -> anyhow::Result<CleanSummary> {
  let files = discover(&opts.root, &opts.extension)?;
  tracing::info!(root = %opts.root.display(), files = files.len(), "blackbook files found");

  let mut plans = Vec::with_capacity(files.len());
  for f in &files {
    let content = fs::read_to_string(f).map_err(|e| BookieError::io(f, e))?;
    let plan = validate::plan_file(f, &content, opts.today)?;
    tracing::info!(file = %f.display(), kept = plan.kept.len(), expired = plan.removed.len(), "file ok");
    plans.push(plan);
  }

  let mut summary = CleanSummary {
    files: plans.len(),
    ..CleanSummary::default()
  };

  for plan in plans.iter().filter(|p| p.changed()) {
    summary.lines_removed += plan.removed.len();
    match (opts.mode, opts.dry_run) {
      (Mode::Check, _) => {}
      (Mode::Clean, true) => {
        tracing::warn!(
          file = %plan.path.display(),
          removed = plan.removed.len(),
          "DRY-RUN: would rewrite blackbook file"
        );
      }
      (Mode::Clean, false) => {
        apply(plan).with_context(|| format!("rewrite {}", plan.path.display()))?;
        summary.files_rewritten += 1;
      }
    }
  }

  tracing::info!(
    mode = ?opts.mode,
    dry_run = opts.dry_run,
    files = summary.files,
    lines_removed = summary.lines_removed,
    files_rewritten = summary.files_rewritten,
    "blackbook run finished"
  );
  Ok(summary)
}

pub fn discover(root: &Path, extension: &str) -> Result<Vec<PathBuf>, CleanerError> {
  let mut files = Vec::new();
  for entry in WalkDir::new(root).follow_links(false) {
    let entry = entry.map_err(|e| {
      let path = e.path().unwrap_or(root).to_path_buf();
      BookieError::io(path, e.into())
    })?;
    let path = entry.path();
    if entry.file_type().is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
      files.push(entry.into_path());
    }
  }
  files.sort();

  if files.is_empty() {
    return Err(CleanerError::NoFiles {
      root: root.to_path_buf(),
      extension: extension.to_string(),
    });
  }
  Ok(files)
}

/// Keeps the original as `<file>.backup`, then swaps in the cleaned content.
fn apply(plan: &FilePlan) -> Result<(), BookieError> {
  let backup = paths::backup_path_for(&plan.path);
  fs::copy(&plan.path, &backup).map_err(|e| BookieError::io(&backup, e))?;
  paths::write_atomic(&plan.path, &plan.render()).map_err(|e| BookieError::io(&plan.path, e))?;
  tracing::info!(
    file = %plan.path.display(),
    backup = %backup.display(),
    removed = plan.removed.len(),
    "blackbook file rewritten"
  );
  Ok(())
}
