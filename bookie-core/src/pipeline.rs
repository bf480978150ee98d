use crate::batch::{self, BatchRequest};
use crate::config::Config;
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::identity::{CommandLookup, UserLookup};
use crate::notify::{DryRunSink, NotificationSink, SmtpSink};
use crate::record::{self, DecodePolicy};
use crate::throttle::{FlatFileBackend, ThrottleBackend};
use anyhow::Context;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunOptions {
  pub batch: BatchRequest,
  /// Log intended sends instead of mailing, and leave the throttle file alone.
  pub dry_run: bool,
}

pub fn run(cfg: &Config, opts: &RunOptions) -> anyhow::Result<DispatchSummary> {
  let now = chrono::Utc::now().timestamp();
  if opts.dry_run {
    let mut sink = DryRunSink::new();
    run_with_sink(cfg, opts, &mut sink, now)
  } else {
    let mut sink = SmtpSink::from_config(&cfg.mail).context("set up SMTP transport")?;
    run_with_sink(cfg, opts, &mut sink, now)
  }
}

/// One batch: select, decode, dispatch, then persist throttle state. Any
/// error before dispatch completes leaves the throttle file untouched.
pub fn run_with_sink(
  cfg: &Config,
  opts: &RunOptions,
  sink: &mut dyn NotificationSink,
  now: i64,
) -> anyhow::Result<DispatchSummary> {
  let run_id = uuid::Uuid::new_v4();
  let span = tracing::info_span!("run", run_id = %run_id);
  let _enter = span.enter();

  tracing::info!(dry_run = opts.dry_run, channel = sink.channel_name(), "alert run started");

  let files = batch::select(&opts.batch, cfg).context("select batch")?;

  let mut logs = Vec::with_capacity(files.len());
  for f in &files {
    let log = record::read_log_file(f, DecodePolicy::Lenient)
      .with_context(|| format!("read log {}", f.display()))?;
    logs.push(log);
  }

  let backend = FlatFileBackend::new(&cfg.throttle_file);
  let mut store = backend.load(now).context("load throttle state")?;

  let lookup = cfg
    .lookup
    .as_ref()
    .map(|l| CommandLookup::new(&l.command, Duration::from_secs(l.timeout_seconds)));
  let mut dispatcher = Dispatcher::new(cfg);
  if let Some(lookup) = &lookup {
    dispatcher = dispatcher.with_lookup(lookup as &dyn UserLookup);
  }

  let summary = dispatcher
    .dispatch(logs, &mut store, sink, now)
    .context("dispatch alerts")?;

  if opts.dry_run {
    tracing::warn!(
      path = %backend.path().display(),
      entries = store.len(),
      "DRY-RUN: would write throttle state"
    );
  } else {
    backend.persist(&store).context("write throttle state")?;
  }

  tracing::info!(
    files = files.len(),
    records = summary.records,
    alerted = summary.alerted,
    throttled = summary.throttled,
    sent = summary.sent,
    failed_sends = summary.failed_sends,
    "alert run finished"
  );
  Ok(summary)
}
