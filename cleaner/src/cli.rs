use clap::Parser;
use std::path::PathBuf;

/// Validates blackbook data files and removes expired entries.
#[derive(Parser, Debug)]
#[command(name = "blackbook-cleaner", version, about)]
pub struct Cli {
  /// Path to bookie.toml (default /etc/bookie/bookie.toml, optional).
  #[arg(long, env = "BOOKIE_CONFIG", value_name = "PATH")]
  pub config: Option<PathBuf>,

  /// Directory searched recursively for blackbook files; overrides
  /// `blackbook.root`.
  #[arg(long, value_name = "DIR")]
  pub root: Option<PathBuf>,

  /// Validate only.
  #[arg(long, conflicts_with = "dry_run")]
  pub check: bool,

  /// Report expired entries without rewriting anything.
  #[arg(long)]
  pub dry_run: bool,

  #[arg(long)]
  pub debug: bool,
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;

  #[test]
  fn command_definition_is_valid() {
    Cli::command().debug_assert();
  }

  #[test]
  fn check_conflicts_with_dry_run() {
    assert!(Cli::try_parse_from(["blackbook-cleaner", "--check", "--dry-run"]).is_err());
    let cli = Cli::try_parse_from(["blackbook-cleaner", "--root", "/srv/bb", "--check"]).unwrap();
    assert!(cli.check);
    assert_eq!(cli.root, Some(PathBuf::from("/srv/bb")));
  }
}
