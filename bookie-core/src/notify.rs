use crate::config::MailConfig;
use crate::error::{BookieError, Result};
use lettre::message::Mailbox;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
  /// The message might go through on a later run (timeouts, 4xx replies,
  /// connection failures).
  #[error("retryable send failure: {0}")]
  Retryable(String),

  #[error("permanent send failure: {0}")]
  Permanent(String),
}

/// Outbound channel for alert messages. One call delivers to one recipient.
pub trait NotificationSink {
  fn send(&mut self, recipient: &str, subject: &str, body: &str) -> std::result::Result<(), SendError>;

  fn channel_name(&self) -> &str;
}

/// Plain SMTP relay, normally the local MTA.
pub struct SmtpSink {
  transport: SmtpTransport,
  from: Mailbox,
}

impl SmtpSink {
  pub fn from_config(mail: &MailConfig) -> Result<Self> {
    let from: Mailbox = mail
      .from
      .parse()
      .map_err(|e| BookieError::Config(format!("invalid mail.from {:?}: {e}", mail.from)))?;

    let transport = SmtpTransport::builder_dangerous(mail.smtp_host.as_str())
      .port(mail.smtp_port)
      .timeout(Some(Duration::from_secs(mail.timeout_seconds)))
      .build();

    Ok(Self { transport, from })
  }
}

impl NotificationSink for SmtpSink {
  fn send(&mut self, recipient: &str, subject: &str, body: &str) -> std::result::Result<(), SendError> {
    let to: Mailbox = recipient
      .parse()
      .map_err(|e| SendError::Permanent(format!("invalid recipient {recipient}: {e}")))?;

    let message = Message::builder()
      .from(self.from.clone())
      .to(to)
      .subject(subject)
      .body(body.to_string())
      .map_err(|e| SendError::Permanent(e.to_string()))?;

    self.transport.send(&message).map_err(|e| {
      if e.is_permanent() {
        SendError::Permanent(e.to_string())
      } else {
        SendError::Retryable(e.to_string())
      }
    })?;

    tracing::debug!(channel = "smtp", recipient, subject, "alert delivered");
    Ok(())
  }

  fn channel_name(&self) -> &str {
    "smtp"
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
  pub recipient: String,
  pub subject: String,
  pub body: String,
}

/// Records every message instead of delivering it.
#[derive(Debug, Default)]
pub struct DryRunSink {
  sent: Vec<SentMessage>,
}

impl DryRunSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn sent(&self) -> &[SentMessage] {
    &self.sent
  }
}

impl NotificationSink for DryRunSink {
  fn send(&mut self, recipient: &str, subject: &str, body: &str) -> std::result::Result<(), SendError> {
    tracing::warn!(recipient, subject, "DRY-RUN: would send alert");
    tracing::debug!(recipient, body, "DRY-RUN: alert body");
    self.sent.push(SentMessage {
      recipient: recipient.to_string(),
      subject: subject.to_string(),
      body: body.to_string(),
    });
    Ok(())
  }

  fn channel_name(&self) -> &str {
    "dry-run"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dry_run_sink_records_in_order() {
    let mut sink = DryRunSink::new();
    sink.send("a@example.edu", "s1", "b1").unwrap();
    sink.send("b@example.edu", "s2", "b2").unwrap();
    let recipients: Vec<&str> = sink.sent().iter().map(|m| m.recipient.as_str()).collect();
    assert_eq!(recipients, ["a@example.edu", "b@example.edu"]);
    assert_eq!(sink.sent()[1].body, "b2");
  }

  #[test]
  fn smtp_sink_rejects_bad_sender() {
    let mail = MailConfig {
      from: "nope".to_string(),
      ..MailConfig::default()
    };
    assert!(matches!(SmtpSink::from_config(&mail), Err(BookieError::Config(_))));
  }

  #[test]
  fn bad_recipient_is_permanent() {
    let mail = MailConfig {
      from: "bookie@example.edu".to_string(),
      ..MailConfig::default()
    };
    let mut sink = SmtpSink::from_config(&mail).unwrap();
    assert!(matches!(
      sink.send("not an address", "s", "b"),
      Err(SendError::Permanent(_))
    ));
  }
}
