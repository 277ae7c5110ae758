use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheNamespace, RoutePolicy, DEFAULT_ASSET_EXTENSIONS};
use crate::worker::{EngineConfig, DEFAULT_PRECACHE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Application origin, e.g. https://play.example.com
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub request: RequestConfig,
  #[serde(default)]
  pub autosave: AutosaveConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Disable to bypass partitions entirely (requests still go through the engine)
  pub enabled: bool,
  /// Partition name prefix
  pub prefix: String,
  /// Generation tag; change on every deployment
  pub generation: String,
  pub precache: Vec<String>,
  pub api_prefix: String,
  pub asset_extensions: Vec<String>,
  pub skip_waiting_on_install: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      prefix: "outpost".to_string(),
      generation: "v1".to_string(),
      precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
      api_prefix: "/api/".to_string(),
      asset_extensions: DEFAULT_ASSET_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect(),
      skip_waiting_on_install: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
  pub timeout_ms: u64,
}

impl Default for RequestConfig {
  fn default() -> Self {
    Self { timeout_ms: 30_000 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
  pub expiration_minutes: i64,
}

impl Default for AutosaveConfig {
  fn default() -> Self {
    Self {
      expiration_minutes: crate::autosave::EXPIRATION_MINUTES,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  pub reconnect_window_secs: u64,
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      reconnect_window_secs: 3,
      probe_interval_secs: 5,
    }
  }
}

impl Config {
  /// Defaults for everything but the origin.
  pub fn with_origin(origin: Url) -> Self {
    Self {
      origin,
      cache: CacheConfig::default(),
      request: RequestConfig::default(),
      autosave: AutosaveConfig::default(),
      connectivity: ConnectivityConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./outpost.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/outpost/config.yaml
  /// 4. ~/.config/outpost/config.yaml
  ///
  /// With no file found, `origin` (if given) yields a default config.
  pub fn load(explicit_path: Option<&Path>, origin: Option<Url>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match (path, origin.clone()) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(origin)) => Self::with_origin(origin),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/outpost/config.yaml\n\
                 or pass --origin."
        ))
      }
    };

    if let Some(origin) = origin {
      config.origin = origin;
    }
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("outpost.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("outpost").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request.timeout_ms)
  }

  pub fn autosave_window(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.autosave.expiration_minutes)
  }

  pub fn reconnect_window(&self) -> Duration {
    Duration::from_secs(self.connectivity.reconnect_window_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.probe_interval_secs)
  }

  /// Engine settings for the configured generation.
  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      origin: self.origin.clone(),
      namespace: CacheNamespace::new(&self.cache.prefix, &self.cache.generation),
      policy: RoutePolicy::new(
        &self.origin,
        &self.cache.api_prefix,
        &self.cache.asset_extensions,
      ),
      precache: self.cache.precache.clone(),
      skip_waiting_on_install: self.cache.skip_waiting_on_install,
    }
  }
}
