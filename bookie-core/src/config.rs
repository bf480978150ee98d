use crate::error::{BookieError, Result};
use crate::paths;
use lettre::message::Mailbox;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
  pub log_dir: Option<PathBuf>,
  pub throttle_file: PathBuf,
  pub throttle_period_seconds: u64,
  pub max_alerts: usize,
  pub local_prefixes: Vec<String>,
  /// Checked in order; the first label found in a log's file name wins.
  pub categories: Vec<CategoryConfig>,
  pub mail: MailConfig,
  pub lookup: Option<LookupConfig>,
  pub logging: LoggingConfig,
  pub blackbook: BlackbookConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      log_dir: None,
      throttle_file: paths::default_throttle_path(),
      throttle_period_seconds: default_throttle_period_seconds(),
      max_alerts: default_max_alerts(),
      local_prefixes: Vec::new(),
      categories: default_categories(),
      mail: MailConfig::default(),
      lookup: None,
      logging: LoggingConfig::default(),
      blackbook: BlackbookConfig::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryConfig {
  pub label: String,
  pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
  #[serde(default)]
  pub from: String,

  #[serde(default)]
  pub recipients: Vec<String>,

  #[serde(default = "default_smtp_host")]
  pub smtp_host: String,

  #[serde(default = "default_smtp_port")]
  pub smtp_port: u16,

  #[serde(default = "default_mail_timeout_seconds")]
  pub timeout_seconds: u64,
}

impl Default for MailConfig {
  fn default() -> Self {
    Self {
      from: String::new(),
      recipients: Vec::new(),
      smtp_host: default_smtp_host(),
      smtp_port: default_smtp_port(),
      timeout_seconds: default_mail_timeout_seconds(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupConfig {
  pub command: String,

  #[serde(default = "default_lookup_timeout_seconds")]
  pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default)]
  pub dir: Option<PathBuf>,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      dir: None,
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlackbookConfig {
  #[serde(default)]
  pub root: Option<PathBuf>,

  #[serde(default = "default_blackbook_extension")]
  pub extension: String,
}

impl Default for BlackbookConfig {
  fn default() -> Self {
    Self {
      root: None,
      extension: default_blackbook_extension(),
    }
  }
}

fn default_throttle_period_seconds() -> u64 {
  86_400
}

fn default_max_alerts() -> usize {
  200
}

fn default_smtp_host() -> String {
  "localhost".to_string()
}

fn default_smtp_port() -> u16 {
  25
}

fn default_mail_timeout_seconds() -> u64 {
  30
}

fn default_lookup_timeout_seconds() -> u64 {
  10
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

fn default_blackbook_extension() -> String {
  "brodata".to_string()
}

fn default_categories() -> Vec<CategoryConfig> {
  [
    ("blackbook", "BLACKBOOK hit for IP: "),
    ("intel", "Intel hit for IP: "),
    ("notice", "NOTICE hit for IP: "),
  ]
  .into_iter()
  .map(|(label, subject)| CategoryConfig {
    label: label.to_string(),
    subject: subject.to_string(),
  })
  .collect()
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub log_dir: Option<PathBuf>,

  #[serde(default)]
  pub throttle_file: Option<PathBuf>,

  #[serde(default)]
  pub throttle_period_seconds: Option<u64>,

  #[serde(default)]
  pub max_alerts: Option<usize>,

  #[serde(default)]
  pub local_prefixes: Option<Vec<String>>,

  #[serde(default)]
  pub categories: Option<Vec<CategoryConfig>>,

  #[serde(default)]
  pub mail: Option<MailConfig>,

  #[serde(default)]
  pub lookup: Option<LookupConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub blackbook: Option<BlackbookConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    cfg.log_dir = self.log_dir;
    if let Some(p) = self.throttle_file {
      cfg.throttle_file = p;
    }
    if let Some(p) = self.throttle_period_seconds {
      cfg.throttle_period_seconds = p;
    }
    if let Some(m) = self.max_alerts {
      cfg.max_alerts = m;
    }
    if let Some(p) = self.local_prefixes {
      cfg.local_prefixes = p;
    }
    if let Some(c) = self.categories {
      cfg.categories = c;
    }
    if let Some(m) = self.mail {
      cfg.mail = m;
    }
    cfg.lookup = self.lookup;
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(b) = self.blackbook {
      cfg.blackbook = b;
    }
    cfg
  }
}

/// Loads and validates the alerting configuration. There is no usable
/// default: recipients and local prefixes must come from the file.
pub fn load(path: &Path) -> Result<Config> {
  let raw = fs::read_to_string(path).map_err(|e| {
    BookieError::Config(format!("cannot read config {}: {e}", path.display()))
  })?;
  let cfg = from_toml_str(&raw).map_err(|e| match e {
    BookieError::Config(msg) => BookieError::Config(format!("{}: {msg}", path.display())),
    other => other,
  })?;
  tracing::debug!(config = %path.display(), "configuration loaded");
  Ok(cfg)
}

/// Loads the configuration without the alerting checks. The blackbook
/// cleaner only needs the `[blackbook]` and `[logging]` tables.
pub fn load_unvalidated(path: &Path) -> Result<Config> {
  let raw = fs::read_to_string(path).map_err(|e| {
    BookieError::Config(format!("cannot read config {}: {e}", path.display()))
  })?;
  parse(&raw)
}

pub fn from_toml_str(raw: &str) -> Result<Config> {
  let cfg = parse(raw)?;
  validate(&cfg)?;
  Ok(cfg)
}

fn parse(raw: &str) -> Result<Config> {
  toml::from_str::<ConfigFile>(raw)
    .map(ConfigFile::normalize)
    .map_err(|e| BookieError::Config(format!("invalid TOML: {e}")))
}

pub fn validate(cfg: &Config) -> Result<()> {
  if let Some(reason) = validation_failure(cfg) {
    return Err(BookieError::Config(reason));
  }
  Ok(())
}

fn validation_failure(cfg: &Config) -> Option<String> {
  if cfg.mail.recipients.is_empty() {
    return Some("mail.recipients must not be empty".to_string());
  }
  for rcpt in &cfg.mail.recipients {
    if rcpt.parse::<Mailbox>().is_err() {
      return Some(format!("invalid recipient address: {rcpt}"));
    }
  }
  if cfg.mail.from.parse::<Mailbox>().is_err() {
    return Some(format!("invalid mail.from address: {:?}", cfg.mail.from));
  }
  if cfg.mail.timeout_seconds == 0 {
    return Some("mail.timeout_seconds must be > 0".to_string());
  }
  if cfg.max_alerts == 0 {
    return Some("max_alerts must be > 0".to_string());
  }
  if cfg.throttle_period_seconds == 0 {
    return Some("throttle_period_seconds must be > 0".to_string());
  }
  if cfg.local_prefixes.is_empty() {
    return Some("local_prefixes must not be empty".to_string());
  }
  if cfg.local_prefixes.iter().any(|p| p.trim().is_empty()) {
    return Some("local_prefixes must not contain empty prefixes".to_string());
  }
  if cfg.categories.is_empty() {
    return Some("categories must not be empty".to_string());
  }

  let mut seen = HashSet::new();
  for c in &cfg.categories {
    if c.label.trim().is_empty() {
      return Some("category labels must not be empty".to_string());
    }
    if !seen.insert(c.label.as_str()) {
      return Some(format!("duplicate category label: {}", c.label));
    }
  }

  if let Some(lookup) = &cfg.lookup {
    if lookup.command.trim().is_empty() {
      return Some("lookup.command must not be empty".to_string());
    }
    if lookup.timeout_seconds == 0 {
      return Some("lookup.timeout_seconds must be > 0".to_string());
    }
  }

  None
}
