use crate::batch::BatchRequest;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Mails throttled alerts for intel, notice and blackbook hits in Bro logs.
#[derive(Parser, Debug)]
#[command(name = "bookie", version, about)]
#[command(group(ArgGroup::new("batch").required(true).args(["logs", "recent"])))]
pub struct Cli {
  /// Path to bookie.toml (default /etc/bookie/bookie.toml).
  #[arg(long, env = "BOOKIE_CONFIG", value_name = "PATH")]
  pub config: Option<PathBuf>,

  /// Explicit log files to process.
  #[arg(long, num_args = 1.., value_name = "FILE")]
  pub logs: Vec<PathBuf>,

  /// Process the most recent hourly batch under `log_dir`.
  #[arg(long)]
  pub recent: bool,

  /// Log what would be mailed; do not send or update throttle state.
  #[arg(long)]
  pub dry_run: bool,

  #[arg(long)]
  pub debug: bool,
}

impl Cli {
  pub fn batch_request(&self) -> BatchRequest {
    if self.recent {
      BatchRequest::Recent
    } else {
      BatchRequest::Explicit(self.logs.clone())
    }
  }
}
