use bookie_core::batch::BatchRequest;
use bookie_core::config;
use bookie_core::notify::DryRunSink;
use bookie_core::pipeline::{run_with_sink, RunOptions};
use std::fs;
use std::io::Write;
use std::path::Path;

const NOTICE: &str = "#separator \\x09\n\
#fields\tts\tid.orig_h\tid.orig_p\tid.resp_h\tid.resp_p\tnote\n\
#types\ttime\taddr\tport\taddr\tport\tenum\n\
1420070400.1\t128.252.1.1\t443\t8.8.8.8\t53\tScan::Port_Scan\n\
1420070460.0\t8.8.4.4\t5353\t65.254.3.3\t22\tSSH::Password_Guessing\n";

const INTEL: &str = "#separator \\x09\n\
#fields\tts\ttx_hosts\trx_hosts\tseen.indicator\n\
1420070410.0\t128.252.9.9\t1.2.3.4\tevil.example\n";

const NOW: i64 = 1_420_070_500;

fn config_for(root: &Path) -> config::Config {
  let raw = format!(
    r#"
log_dir = "{logs}"
throttle_file = "{throttle}"
local_prefixes = ["128.252.", "65.254."]

[mail]
from = "bookie@example.edu"
recipients = ["soc@example.edu"]
"#,
    logs = root.join("logs").display(),
    throttle = root.join("state").join("throttle").display(),
  );
  config::from_toml_str(&raw).unwrap()
}

fn write_gz(path: &Path, content: &str) {
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  let file = fs::File::create(path).unwrap();
  let mut gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
  gz.write_all(content.as_bytes()).unwrap();
  gz.finish().unwrap();
}

#[test]
fn recent_batch_is_mailed_once_and_throttled_afterwards() {
  let root = tempfile::TempDir::new().unwrap();
  let cfg = config_for(root.path());
  let day = root.path().join("logs").join("2015-01-01");
  write_gz(&day.join("notice.00:00:00-01:00:00.log.gz"), NOTICE);
  write_gz(&day.join("intel.00:00:00-01:00:00.log.gz"), INTEL);

  let opts = RunOptions {
    batch: BatchRequest::Recent,
    dry_run: false,
  };

  let mut sink = DryRunSink::new();
  let summary = run_with_sink(&cfg, &opts, &mut sink, NOW).unwrap();
  assert_eq!(summary.records, 3);
  assert_eq!(summary.alerted, 3);

  let mut subjects: Vec<&str> = sink.sent().iter().map(|m| m.subject.as_str()).collect();
  subjects.sort();
  assert_eq!(
    subjects,
    [
      "Intel hit for IP: 128.252.9.9",
      "NOTICE hit for IP: 128.252.1.1",
      "NOTICE hit for IP: 65.254.3.3",
    ]
  );

  let throttle = fs::read_to_string(&cfg.throttle_file).unwrap();
  assert_eq!(throttle.lines().count(), 3);
  assert!(throttle.contains(&format!("{},128.252.1.1~NOTICE hit for IP: 128.252.1.1", NOW + 86_400)));

  let mut again = DryRunSink::new();
  let summary = run_with_sink(&cfg, &opts, &mut again, NOW + 3_600).unwrap();
  assert_eq!(summary.throttled, 3);
  assert!(again.sent().is_empty());
}

#[test]
fn dry_run_leaves_throttle_state_alone() {
  let root = tempfile::TempDir::new().unwrap();
  let cfg = config_for(root.path());
  let log = root.path().join("notice.00:00:00-01:00:00.log");
  fs::write(&log, NOTICE).unwrap();

  let opts = RunOptions {
    batch: BatchRequest::Explicit(vec![log]),
    dry_run: true,
  };
  let mut sink = DryRunSink::new();
  let summary = run_with_sink(&cfg, &opts, &mut sink, NOW).unwrap();
  assert_eq!(summary.sent, 2);
  assert!(!cfg.throttle_file.exists());
}

#[test]
fn capacity_failure_keeps_previous_throttle_file() {
  let root = tempfile::TempDir::new().unwrap();
  let mut cfg = config_for(root.path());
  cfg.max_alerts = 1;
  fs::create_dir_all(cfg.throttle_file.parent().unwrap()).unwrap();
  fs::write(&cfg.throttle_file, "9999999999,1.1.1.1~x\n").unwrap();

  let log = root.path().join("notice.00:00:00-01:00:00.log");
  fs::write(&log, NOTICE).unwrap();
  let opts = RunOptions {
    batch: BatchRequest::Explicit(vec![log]),
    dry_run: false,
  };

  let mut sink = DryRunSink::new();
  let err = run_with_sink(&cfg, &opts, &mut sink, NOW).unwrap_err();
  assert!(format!("{err:#}").contains("too many alerts"), "got {err:#}");
  assert!(sink.sent().is_empty());
  assert_eq!(
    fs::read_to_string(&cfg.throttle_file).unwrap(),
    "9999999999,1.1.1.1~x\n"
  );
}
