use crate::error::{BookieError, Result};
use crate::record::Record;
use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const ORIG_HOST: &str = "id.orig_h";
pub const ORIG_PORT: &str = "id.orig_p";
pub const RESP_HOST: &str = "id.resp_h";
pub const RESP_PORT: &str = "id.resp_p";
pub const TX_HOSTS: &str = "tx_hosts";
pub const RX_HOSTS: &str = "rx_hosts";

pub const LOCAL_IP_ATTR: &str = "local_ip";
pub const LOCAL_PORT_ATTR: &str = "local_port";
pub const USER_ATTR: &str = "user";

/// The address shapes a log record can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoints<'a> {
  /// Connection logs: originator and responder host/port pairs.
  PortPair {
    orig_h: &'a str,
    orig_p: Option<&'a str>,
    resp_h: &'a str,
    resp_p: Option<&'a str>,
  },
  /// File-transfer style logs: transmitting and receiving hosts only.
  HostOnly { tx_hosts: &'a str, rx_hosts: &'a str },
  Unrecognized,
}

impl<'a> Endpoints<'a> {
  pub fn classify(record: &'a Record) -> Self {
    if let (Some(orig_h), Some(resp_h)) = (record.get(ORIG_HOST), record.get(RESP_HOST)) {
      return Endpoints::PortPair {
        orig_h,
        orig_p: record.get(ORIG_PORT),
        resp_h,
        resp_p: record.get(RESP_PORT),
      };
    }
    if let (Some(tx_hosts), Some(rx_hosts)) = (record.get(TX_HOSTS), record.get(RX_HOSTS)) {
      return Endpoints::HostOnly { tx_hosts, rx_hosts };
    }
    Endpoints::Unrecognized
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub address: String,
  pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct LocalPrefixes {
  prefixes: Vec<String>,
}

impl LocalPrefixes {
  pub fn new(prefixes: Vec<String>) -> Self {
    Self { prefixes }
  }

  pub fn matches(&self, address: &str) -> bool {
    self.prefixes.iter().any(|p| address.starts_with(p.as_str()))
  }
}

pub fn resolve(record: &Record, prefixes: &LocalPrefixes) -> Result<Identity> {
  match Endpoints::classify(record) {
    Endpoints::PortPair {
      orig_h,
      orig_p,
      resp_h,
      resp_p,
    } => {
      if prefixes.matches(orig_h) {
        return Ok(Identity {
          address: orig_h.to_string(),
          port: parse_port(record, orig_p)?,
        });
      }
      if prefixes.matches(resp_h) {
        return Ok(Identity {
          address: resp_h.to_string(),
          port: parse_port(record, resp_p)?,
        });
      }
      Err(attribution(
        record,
        format!("neither {orig_h} nor {resp_h} matches a local prefix"),
      ))
    }
    Endpoints::HostOnly { tx_hosts, rx_hosts } => {
      for host in [tx_hosts, rx_hosts] {
        if prefixes.matches(host) {
          return Ok(Identity {
            address: host.to_string(),
            port: None,
          });
        }
      }
      Err(attribution(
        record,
        format!("neither {tx_hosts} nor {rx_hosts} matches a local prefix"),
      ))
    }
    Endpoints::Unrecognized => Err(attribution(
      record,
      "record has neither id.orig_h/id.resp_h nor tx_hosts/rx_hosts".to_string(),
    )),
  }
}

fn attribution(record: &Record, reason: String) -> BookieError {
  BookieError::Attribution {
    file: record.source_log.clone(),
    line: record.line,
    reason,
  }
}

// Bro writes ports as `443` in ASCII logs, but `443/tcp` inside records.
fn parse_port(record: &Record, raw: Option<&str>) -> Result<Option<u16>> {
  let Some(raw) = raw else { return Ok(None) };
  let value = raw.split('/').next().unwrap_or("").trim();
  if value.is_empty() || value == "-" || value == "?" {
    return Ok(None);
  }
  value.parse::<u16>().map(Some).map_err(|_| {
    BookieError::format(&record.source_log, record.line, format!("invalid port: {raw}"))
  })
}

/// Stores the resolved identity on the record as extra attributes.
pub fn attach_identity(record: &mut Record, identity: &Identity) {
  record.set_extra(LOCAL_IP_ATTR, identity.address.as_str());
  if let Some(port) = identity.port {
    record.set_extra(LOCAL_PORT_ATTR, port.to_string());
  }
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
  #[error("failed to run lookup command: {0}")]
  Spawn(#[source] io::Error),

  #[error("lookup command timed out after {0:?}")]
  Timeout(Duration),

  #[error("lookup command exited with {status}: {stderr}")]
  Failed { status: ExitStatus, stderr: String },
}

/// Maps a connection endpoint at a point in time to the user behind it.
pub trait UserLookup {
  fn lookup(&self, ts: &str, address: &str, port: u16) -> std::result::Result<Option<String>, LookupError>;
}

/// Runs an external program as `<program> [args..] <ts> <address> <port>` and
/// reads the user name from its stdout.
#[derive(Debug, Clone)]
pub struct CommandLookup {
  program: String,
  args: Vec<String>,
  timeout: Duration,
}

impl CommandLookup {
  pub fn new(command: &str, timeout: Duration) -> Self {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_default();
    Self {
      program,
      args: parts.collect(),
      timeout,
    }
  }
}

impl UserLookup for CommandLookup {
  fn lookup(&self, ts: &str, address: &str, port: u16) -> std::result::Result<Option<String>, LookupError> {
    let mut child = Command::new(&self.program)
      .args(&self.args)
      .args([ts, address, port.to_string().as_str()])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(LookupError::Spawn)?;

    // Drain both pipes while waiting so a chatty child cannot fill them and stall.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + self.timeout;
    let status = loop {
      match child.try_wait().map_err(LookupError::Spawn)? {
        Some(status) => break status,
        None if Instant::now() >= deadline => {
          let _ = child.kill();
          let _ = child.wait();
          return Err(LookupError::Timeout(self.timeout));
        }
        None => thread::sleep(Duration::from_millis(25)),
      }
    };

    let stdout = stdout.join().unwrap_or_default();
    if !status.success() {
      let stderr = stderr.join().unwrap_or_default();
      return Err(LookupError::Failed {
        status,
        stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
      });
    }

    let user = String::from_utf8_lossy(&stdout).trim().to_string();
    if user.is_empty() || user == "?" {
      return Ok(None);
    }
    Ok(Some(user))
  }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
  thread::spawn(move || {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
      let _ = pipe.read_to_end(&mut buf);
    }
    buf
  })
}

/// Runs the optional user lookup for a record whose identity has a port.
/// Failures are logged and never abort the run.
pub fn attach_user(record: &mut Record, identity: &Identity, lookup: &dyn UserLookup) {
  let Some(port) = identity.port else { return };
  let ts = record.get("ts").unwrap_or("-").to_string();

  match lookup.lookup(&ts, &identity.address, port) {
    Ok(Some(user)) => {
      tracing::debug!(address = %identity.address, port, user = %user, "user lookup resolved");
      record.set_extra(USER_ATTR, user);
    }
    Ok(None) => {
      tracing::debug!(address = %identity.address, port, "user lookup found no user");
    }
    Err(e) => {
      tracing::warn!(
        source = %record.source_log.display(),
        line = record.line,
        address = %identity.address,
        port,
        error = %e,
        "user lookup failed; continuing without user"
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use indexmap::IndexMap;
  use std::cell::RefCell;

  fn record(pairs: &[(&str, &str)]) -> Record {
    let fields: IndexMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    Record::new("/logs/notice.00:00:00-01:00:00.log", 7, fields)
  }

  fn local() -> LocalPrefixes {
    LocalPrefixes::new(vec!["128.252.".to_string(), "65.254.".to_string()])
  }

  #[test]
  fn originator_match_wins() {
    let r = record(&[
      (ORIG_HOST, "128.252.1.1"),
      (ORIG_PORT, "443"),
      (RESP_HOST, "8.8.8.8"),
      (RESP_PORT, "53"),
    ]);
    let id = resolve(&r, &local()).unwrap();
    assert_eq!(
      id,
      Identity {
        address: "128.252.1.1".to_string(),
        port: Some(443)
      }
    );
  }

  #[test]
  fn responder_is_used_when_only_it_is_local() {
    let r = record(&[
      (ORIG_HOST, "8.8.8.8"),
      (ORIG_PORT, "53"),
      (RESP_HOST, "65.254.9.9"),
      (RESP_PORT, "22/tcp"),
    ]);
    let id = resolve(&r, &local()).unwrap();
    assert_eq!(id.address, "65.254.9.9");
    assert_eq!(id.port, Some(22));
  }

  #[test]
  fn host_only_shape_resolves_without_port() {
    let r = record(&[(TX_HOSTS, "1.2.3.4"), (RX_HOSTS, "128.252.7.7")]);
    let id = resolve(&r, &local()).unwrap();
    assert_eq!(id.address, "128.252.7.7");
    assert_eq!(id.port, None);
  }

  #[test]
  fn unset_port_resolves_to_none() {
    let r = record(&[(ORIG_HOST, "128.252.1.1"), (ORIG_PORT, "-"), (RESP_HOST, "8.8.8.8")]);
    assert_eq!(resolve(&r, &local()).unwrap().port, None);
  }

  #[test]
  fn unknown_shape_is_an_attribution_error() {
    let r = record(&[("indicator", "evil.example"), ("seen.where", "DNS")]);
    let err = resolve(&r, &local()).unwrap_err();
    assert!(matches!(err, BookieError::Attribution { line: 7, .. }), "got {err}");
  }

  #[test]
  fn no_local_side_is_an_attribution_error() {
    let r = record(&[(ORIG_HOST, "8.8.8.8"), (RESP_HOST, "1.1.1.1")]);
    assert!(matches!(
      resolve(&r, &local()),
      Err(BookieError::Attribution { .. })
    ));
  }

  #[test]
  fn garbage_port_is_a_format_error() {
    let r = record(&[(ORIG_HOST, "128.252.1.1"), (ORIG_PORT, "https"), (RESP_HOST, "8.8.8.8")]);
    assert!(matches!(resolve(&r, &local()), Err(BookieError::Format { .. })));
  }

  struct FakeLookup {
    answer: std::result::Result<Option<String>, ()>,
    calls: RefCell<Vec<(String, String, u16)>>,
  }

  impl UserLookup for FakeLookup {
    fn lookup(&self, ts: &str, address: &str, port: u16) -> std::result::Result<Option<String>, LookupError> {
      self
        .calls
        .borrow_mut()
        .push((ts.to_string(), address.to_string(), port));
      self
        .answer
        .clone()
        .map_err(|_| LookupError::Timeout(Duration::from_secs(1)))
    }
  }

  #[test]
  fn user_lookup_attaches_user() {
    let mut r = record(&[("ts", "1420070400.1"), (ORIG_HOST, "128.252.1.1"), (RESP_HOST, "8.8.8.8")]);
    let id = Identity {
      address: "128.252.1.1".to_string(),
      port: Some(443),
    };
    let lookup = FakeLookup {
      answer: Ok(Some("jdoe".to_string())),
      calls: RefCell::new(Vec::new()),
    };
    attach_user(&mut r, &id, &lookup);
    assert_eq!(r.extras().get(USER_ATTR).map(String::as_str), Some("jdoe"));
    assert_eq!(
      lookup.calls.borrow()[0],
      ("1420070400.1".to_string(), "128.252.1.1".to_string(), 443)
    );
  }

  #[test]
  fn failed_lookup_is_not_fatal() {
    let mut r = record(&[(ORIG_HOST, "128.252.1.1"), (RESP_HOST, "8.8.8.8")]);
    let id = Identity {
      address: "128.252.1.1".to_string(),
      port: Some(443),
    };
    let lookup = FakeLookup {
      answer: Err(()),
      calls: RefCell::new(Vec::new()),
    };
    attach_user(&mut r, &id, &lookup);
    assert!(!r.extras().contains_key(USER_ATTR));
  }

  #[test]
  fn lookup_is_skipped_without_port() {
    let mut r = record(&[(TX_HOSTS, "128.252.1.1"), (RX_HOSTS, "8.8.8.8")]);
    let id = Identity {
      address: "128.252.1.1".to_string(),
      port: None,
    };
    let lookup = FakeLookup {
      answer: Ok(Some("jdoe".to_string())),
      calls: RefCell::new(Vec::new()),
    };
    attach_user(&mut r, &id, &lookup);
    assert!(lookup.calls.borrow().is_empty());
  }

  #[cfg(unix)]
  #[test]
  fn command_lookup_reads_stdout_and_reports_failures() {
    let echo = CommandLookup::new("echo user:", Duration::from_secs(5));
    assert_eq!(
      echo.lookup("1.0", "128.252.1.1", 443).unwrap(),
      Some("user: 1.0 128.252.1.1 443".to_string())
    );

    let failing = CommandLookup::new("false", Duration::from_secs(5));
    assert!(matches!(
      failing.lookup("1.0", "128.252.1.1", 443),
      Err(LookupError::Failed { .. })
    ));

    let missing = CommandLookup::new("/nonexistent/usersearch", Duration::from_secs(5));
    assert!(matches!(
      missing.lookup("1.0", "128.252.1.1", 443),
      Err(LookupError::Spawn(_))
    ));
  }

  #[cfg(unix)]
  #[test]
  fn command_lookup_is_killed_at_the_deadline() {
    // `sleep 5 1 1 1` sleeps for 8s in total.
    let slow = CommandLookup::new("sleep 5", Duration::from_millis(100));
    let started = Instant::now();
    let res = slow.lookup("1", "1", 1);
    assert!(matches!(res, Err(LookupError::Timeout(_))), "got {res:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
  }

  #[cfg(unix)]
  #[test]
  fn command_lookup_reads_output_larger_than_a_pipe_buffer() {
    // `seq 1 1 20000` writes ~108 KiB.
    let chatty = CommandLookup::new("seq", Duration::from_secs(10));
    let user = chatty.lookup("1", "1", 20_000).unwrap().unwrap();
    assert!(user.len() > 64 * 1024);
    assert!(user.starts_with("1\n2\n"));
    assert!(user.ends_with("\n20000"));
  }
}
