use anyhow::Context;
use clap::Parser;

fn main() -> anyhow::Result<()> {
  let cli = bookie_core::cli::Cli::parse();
  bookie_core::run(&cli).context("bookie run failed")
}
