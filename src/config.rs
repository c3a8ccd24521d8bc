use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::SqliteStorage;
use crate::live::{ChannelConfig, DEFAULT_MAX_RECONNECTS, DEFAULT_RECONNECT_DELAY};
use crate::stores::schedule::DEFAULT_REFRESH_INTERVAL;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub live: LiveConfig,
  pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// REST root, e.g. `http://localhost:8000/api`
  pub base_url: String,
  /// Push server root, e.g. `ws://localhost:8000`
  pub ws_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000/api".to_string(),
      ws_url: "ws://localhost:8000".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// SQLite file. Defaults to one file per API base URL in the data directory.
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
  pub enabled: bool,
  pub max_reconnects: u32,
  pub reconnect_delay_secs: u64,
}

impl Default for LiveConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_reconnects: DEFAULT_MAX_RECONNECTS,
      reconnect_delay_secs: DEFAULT_RECONNECT_DELAY.as_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  pub refresh_interval_secs: u64,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
    }
  }
}

impl ScheduleConfig {
  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.refresh_interval_secs.max(1))
  }
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./befa.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/befa/config.yaml
  ///
  /// Without a file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides(|name| std::env::var(name).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("befa.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("befa").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Apply BEFA_BASE_URL and BEFA_WS_URL.
  fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(url) = var("BEFA_BASE_URL").filter(|v| !v.trim().is_empty()) {
      self.api.base_url = url;
    }
    if let Some(url) = var("BEFA_WS_URL").filter(|v| !v.trim().is_empty()) {
      self.api.ws_url = url;
    }
    self
  }

  /// Get the access token from environment variables.
  ///
  /// Checks BEFA_TOKEN first, then BEFA_ACCESS_TOKEN as fallback. No token
  /// means read-only use.
  pub fn get_access_token() -> Option<String> {
    token_from(|name| std::env::var(name).ok())
  }

  /// SQLite cache file to use.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(&self.api.base_url),
    }
  }

  pub fn channel_config(&self) -> ChannelConfig {
    ChannelConfig {
      base_url: self.api.ws_url.clone(),
      max_reconnects: self.live.max_reconnects,
      reconnect_delay: Duration::from_secs(self.live.reconnect_delay_secs),
    }
  }

  /// Directory for the log file.
  pub fn log_dir() -> Result<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|dir| dir.join("befa"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }
}

fn token_from(var: impl Fn(&str) -> Option<String>) -> Option<String> {
  let non_blank = |t: &String| !t.trim().is_empty();
  var("BEFA_TOKEN")
    .filter(non_blank)
    .or_else(|| var("BEFA_ACCESS_TOKEN").filter(non_blank))
}
