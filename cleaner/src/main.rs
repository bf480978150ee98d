use anyhow::Context;
use clap::Parser;

fn main() -> anyhow::Result<()> {
  let cli = cleaner::cli::Cli::parse();
  cleaner::run(&cli).context("blackbook cleaner run failed")
}
