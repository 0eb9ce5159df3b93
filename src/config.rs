use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::intercept::{CachePartitions, RouteRules};

/// Environment variable that overrides `sync.base_url`.
pub const BASE_URL_ENV: &str = "SAFARI_SYNC_BASE_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Origin serving the app and its sync API
  pub base_url: String,
  /// Endpoint that accepts replayed progress writes
  pub progress_path: String,
  /// How often `watch` re-probes connectivity
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000".to_string(),
      progress_path: "/api/sync/quest-progress".to_string(),
      probe_interval_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix of the cache partition names
  pub name: String,
  /// Bump to discard partitions written by earlier versions
  pub version: String,
  pub data_prefix: String,
  pub static_markers: Vec<String>,
  /// Page served when an uncached navigation fails offline
  pub root_page: String,
  /// Paths precached at install
  pub precache: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    let rules = RouteRules::default();
    Self {
      name: "quest-academy".to_string(),
      version: "v1".to_string(),
      data_prefix: rules.data_prefix,
      static_markers: rules.static_markers,
      root_page: "/".to_string(),
      precache: [
        "/",
        "/teacher",
        "/manifest.json",
        "/icon-192.png",
        "/icon-512.png",
        "/student-avatar.png",
      ]
      .iter()
      .map(|p| p.to_string())
      .collect(),
    }
  }
}

impl CacheConfig {
  pub fn partitions(&self) -> CachePartitions {
    CachePartitions::new(&self.name, &self.version)
  }

  pub fn route_rules(&self) -> RouteRules {
    RouteRules {
      data_prefix: self.data_prefix.clone(),
      static_markers: self.static_markers.clone(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Write daily log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./safari-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/safari-sync/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
      config.sync.base_url = base_url;
    }
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("safari-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("safari-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty file parses as null; treat it as all defaults
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  fn validate(&self) -> Result<()> {
    self.base_url()?;
    if self.cache.name.is_empty() || self.cache.version.is_empty() {
      return Err(eyre!("cache.name and cache.version must not be empty"));
    }
    Ok(())
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.sync.base_url)
      .map_err(|e| eyre!("Invalid sync.base_url {:?}: {}", self.sync.base_url, e))
  }

  /// Resolve a path from the config against the base URL.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .base_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path {:?}: {}", path, e))
  }

  pub fn precache_manifest(&self) -> Result<Vec<Url>> {
    self.cache.precache.iter().map(|p| self.resolve(p)).collect()
  }
}
