pub mod batch;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod logging;
pub mod nested;
pub mod notify;
pub mod paths;
pub mod pipeline;
pub mod record;
pub mod throttle;

use anyhow::Context;

pub fn run(cli: &cli::Cli) -> anyhow::Result<()> {
  let config_path = paths::resolve_config_path(cli.config.as_deref());
  let cfg = config::load(&config_path)?;

  logging::init(&cfg.logging, "bookie", cli.debug).context("initialise logging")?;
  tracing::debug!(config = %config_path.display(), "starting bookie");

  let opts = pipeline::RunOptions {
    batch: cli.batch_request(),
    dry_run: cli.dry_run,
  };
  pipeline::run(&cfg, &opts)?;
  Ok(())
}
