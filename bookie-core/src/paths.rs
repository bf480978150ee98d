use std::fs;
use std::path::{Path, PathBuf};

/// Used when neither `--config` nor `$BOOKIE_CONFIG` is given.
pub fn default_config_path() -> PathBuf {
  PathBuf::from("/etc/bookie/bookie.toml")
}

pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
  explicit.map(Path::to_path_buf).unwrap_or_else(default_config_path)
}

pub fn default_throttle_path() -> PathBuf {
  PathBuf::from("/var/lib/bookie/throttle")
}

/// Sibling temp file used for atomic rewrites of `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
  let name = path.file_name().unwrap_or_default().to_string_lossy();
  path.with_file_name(format!(".{name}.tmp"))
}

pub fn backup_path_for(path: &Path) -> PathBuf {
  let mut os = path.as_os_str().to_owned();
  os.push(".backup");
  PathBuf::from(os)
}

/// Writes through a sibling temp file and renames it into place, so a killed
/// process never leaves a truncated file behind.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent)?;
  }
  let tmp = temp_path_for(path);
  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn explicit_config_path_wins() {
    let p = resolve_config_path(Some(Path::new("/tmp/x.toml")));
    assert_eq!(p, PathBuf::from("/tmp/x.toml"));
    assert_eq!(resolve_config_path(None), default_config_path());
  }

  #[test]
  fn sibling_paths() {
    let p = Path::new("/data/bb/phish.brodata");
    assert_eq!(temp_path_for(p), PathBuf::from("/data/bb/.phish.brodata.tmp"));
    assert_eq!(backup_path_for(p), PathBuf::from("/data/bb/phish.brodata.backup"));
  }

  #[test]
  fn write_atomic_replaces_content_and_leaves_no_temp() {
    let dir = tempfile::TempDir::new().unwrap();
    let p = dir.path().join("state").join("throttle");
    write_atomic(&p, "a\n").unwrap();
    write_atomic(&p, "b\n").unwrap();
    assert_eq!(fs::read_to_string(&p).unwrap(), "b\n");
    assert!(!temp_path_for(&p).exists());
  }
}
