use crate::config::{CategoryConfig, Config};
use crate::error::{BookieError, Result};
use crate::identity::{self, LocalPrefixes, UserLookup};
use crate::nested;
use crate::notify::{NotificationSink, SendError};
use crate::record::{Header, LogFile, Record, ABSENT};
use crate::throttle::ThrottleStore;
use std::path::Path;

pub const SOURCE_LOG_ATTR: &str = "source_log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
  pub records: usize,
  /// Alerts that passed the throttle.
  pub alerted: usize,
  pub throttled: usize,
  /// Messages accepted by the sink (one per recipient).
  pub sent: usize,
  pub failed_sends: usize,
}

#[derive(Debug, Clone)]
struct PendingAlert {
  key: String,
  subject: String,
  body: String,
  source: String,
  line: usize,
}

pub struct Dispatcher<'a> {
  cfg: &'a Config,
  prefixes: LocalPrefixes,
  lookup: Option<&'a dyn UserLookup>,
}

impl<'a> Dispatcher<'a> {
  pub fn new(cfg: &'a Config) -> Self {
    Self {
      cfg,
      prefixes: LocalPrefixes::new(cfg.local_prefixes.clone()),
      lookup: None,
    }
  }

  pub fn with_lookup(mut self, lookup: &'a dyn UserLookup) -> Self {
    self.lookup = Some(lookup);
    self
  }

  /// Turns a decoded batch into notifications. Every record is categorised
  /// and attributed before the first message goes out, so a fatal record
  /// anywhere in the batch means nothing is sent.
  pub fn dispatch(
    &self,
    logs: Vec<LogFile>,
    store: &mut ThrottleStore,
    sink: &mut dyn NotificationSink,
    now: i64,
  ) -> Result<DispatchSummary> {
    let records: usize = logs.iter().map(|l| l.records.len()).sum();
    if records > self.cfg.max_alerts {
      return Err(BookieError::Capacity {
        found: records,
        max: self.cfg.max_alerts,
      });
    }

    let mut pending = Vec::with_capacity(records);
    for log in logs {
      let category = categorize(&log.source, &self.cfg.categories)?;
      for record in log.records {
        pending.push(self.prepare(record, &log.header, category)?);
      }
    }

    let period = i64::try_from(self.cfg.throttle_period_seconds).unwrap_or(i64::MAX);
    let mut summary = DispatchSummary {
      records,
      ..DispatchSummary::default()
    };

    for alert in pending {
      if store.is_throttled(&alert.key) {
        tracing::debug!(key = %alert.key, source = %alert.source, line = alert.line, "alert throttled");
        summary.throttled += 1;
        continue;
      }

      store.refresh(&alert.key, now, period);
      summary.alerted += 1;
      tracing::info!(subject = %alert.subject, source = %alert.source, line = alert.line, "dispatching alert");

      for recipient in &self.cfg.mail.recipients {
        match sink.send(recipient, &alert.subject, &alert.body) {
          Ok(()) => summary.sent += 1,
          Err(SendError::Retryable(e)) => {
            summary.failed_sends += 1;
            tracing::warn!(channel = sink.channel_name(), recipient = %recipient, subject = %alert.subject, error = %e, "send failed (retryable)");
          }
          Err(SendError::Permanent(e)) => {
            summary.failed_sends += 1;
            tracing::error!(channel = sink.channel_name(), recipient = %recipient, subject = %alert.subject, error = %e, "send failed");
          }
        }
      }
    }

    Ok(summary)
  }

  fn prepare(&self, mut record: Record, header: &Header, category: &CategoryConfig) -> Result<PendingAlert> {
    let id = identity::resolve(&record, &self.prefixes)?;
    identity::attach_identity(&mut record, &id);
    if let Some(lookup) = self.lookup {
      identity::attach_user(&mut record, &id, lookup);
    }
    let source = record.source_log.display().to_string();
    record.set_extra(SOURCE_LOG_ATTR, source.as_str());

    let subject = format!("{}{}", category.subject, id.address);
    Ok(PendingAlert {
      key: throttle_key(&id.address, &subject),
      body: format_body(&record, header),
      subject,
      source,
      line: record.line,
    })
  }
}

/// First configured category whose label appears in the log's file name.
pub fn categorize<'c>(source: &Path, categories: &'c [CategoryConfig]) -> Result<&'c CategoryConfig> {
  let name = source.file_name().and_then(|n| n.to_str()).unwrap_or("");
  categories
    .iter()
    .find(|c| name.contains(c.label.as_str()))
    .ok_or_else(|| BookieError::Category {
      file: source.to_path_buf(),
    })
}

pub fn throttle_key(address: &str, subject: &str) -> String {
  format!("{address}~{subject}")
}

/// `name = value` lines: header fields in header order, then extra
/// attributes in key order. Bracketed record values are expanded into dotted
/// sub-fields.
pub fn format_body(record: &Record, header: &Header) -> String {
  let mut lines = Vec::new();
  for name in header.fields() {
    let value = record.get(name).unwrap_or(ABSENT);
    push_field(&mut lines, name, value);
  }
  for (name, value) in record.extras() {
    lines.push(format!("{name} = {value}"));
  }

  let mut body = lines.join("\n");
  body.push('\n');
  body
}

fn push_field(lines: &mut Vec<String>, name: &str, value: &str) {
  if nested::looks_nested(value) {
    match nested::parse(value) {
      Ok(parsed) => {
        let mut flat = Vec::new();
        nested::flatten(name, &parsed, &mut flat);
        lines.extend(flat.into_iter().map(|(k, v)| format!("{k} = {v}")));
        return;
      }
      Err(e) => tracing::debug!(field = name, error = %e, "value is not a nested record; rendering raw"),
    }
  }
  lines.push(format!("{name} = {value}"));
}
