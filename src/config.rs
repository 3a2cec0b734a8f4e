use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::Timeouts;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Root of the learning API, e.g. `https://learn.example.com`
  pub base_url: String,
  /// SQLite cache file (defaults to the platform data directory)
  pub cache_path: Option<PathBuf>,
  #[serde(default)]
  pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
  #[serde(default = "default_standard_secs")]
  pub standard_secs: u64,
  /// AI review, question generation, finalization and summaries
  #[serde(default = "default_extended_secs")]
  pub extended_secs: u64,
}

fn default_standard_secs() -> u64 {
  30
}

fn default_extended_secs() -> u64 {
  120
}

impl Default for TimeoutConfig {
  fn default() -> Self {
    Self {
      standard_secs: default_standard_secs(),
      extended_secs: default_extended_secs(),
    }
  }
}

impl From<TimeoutConfig> for Timeouts {
  fn from(cfg: TimeoutConfig) -> Self {
    Timeouts {
      standard: Duration::from_secs(cfg.standard_secs),
      extended: Duration::from_secs(cfg.extended_secs),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kpsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kpsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(Error::Config(
        "No configuration file found. Create one at ~/.config/kpsync/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("kpsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kpsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::parse(&contents)
      .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Signed-in user id from `KPSYNC_USER_ID`, if set.
  ///
  /// An unparseable value is an error rather than a silent fall back to guest.
  pub fn user_id_from_env() -> Result<Option<i64>> {
    match std::env::var("KPSYNC_USER_ID") {
      Ok(raw) if !raw.trim().is_empty() => raw
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("KPSYNC_USER_ID is not a user id: {:?}", raw))),
      _ => Ok(None),
    }
  }

  /// Account password from `KPSYNC_PASSWORD`.
  pub fn password_from_env() -> Result<String> {
    std::env::var("KPSYNC_PASSWORD").map_err(|_| {
      Error::Config("Password not found. Set the KPSYNC_PASSWORD environment variable.".to_string())
    })
  }
}
