use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::tile::ZoomBounds;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Name of the cache generation; bump it when shell assets change incompatibly
  pub cache_name: String,
  pub app: AppConfig,
  pub tiles: TileSourceConfig,
  pub prefetch: PrefetchConfig,
  pub storage: StorageConfig,
  pub logging: LoggingConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_name: "rs3-map-cache-v1".to_string(),
      app: AppConfig::default(),
      tiles: TileSourceConfig::default(),
      prefetch: PrefetchConfig::default(),
      storage: StorageConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

/// The map viewer application whose shell gets installed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Origin the viewer is served from; manifest paths resolve against it
  pub origin: String,
  /// Root-relative shell resources seeded at install time
  pub manifest: Vec<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      manifest: [
        "./",
        "./index.html",
        "./css/main.css",
        "./css/leaflet.css",
        "./js/leaflet.js",
        "./js/main/main.js",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

impl AppConfig {
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid app origin '{}': {}", self.origin, e))
  }

  /// Manifest entries as absolute URLs.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;
    self
      .manifest
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid manifest path '{}': {}", path, e))
      })
      .collect()
  }
}

/// The tile CDN.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TileSourceConfig {
  /// Host whose image requests are served cache-first
  pub cdn_host: String,
  /// Path fragment identifying tile requests regardless of extension
  pub path_signature: String,
  /// Prefix of every tile URL
  pub base_url: String,
}

impl Default for TileSourceConfig {
  fn default() -> Self {
    Self {
      cdn_host: "cdn.jsdelivr.net".to_string(),
      path_signature: "/mejrs/layers_rs3".to_string(),
      base_url: "https://cdn.jsdelivr.net/gh/mejrs/layers_rs3@master/map_squares".to_string(),
    }
  }
}

impl TileSourceConfig {
  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.base_url)
      .map_err(|e| eyre!("Invalid tile base URL '{}': {}", self.base_url, e))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
  /// Wait after the ready signal before the first fetch
  pub delay_ms: u64,
  pub map_id: i32,
  pub plane: u32,
  /// Cap on concurrent prefetch requests; 0 means unbounded
  pub max_in_flight: usize,
  /// Coordinate rectangle per zoom level
  pub zooms: Vec<ZoomBounds>,
}

impl Default for PrefetchConfig {
  fn default() -> Self {
    Self {
      delay_ms: 3000,
      map_id: -1,
      plane: 0,
      max_in_flight: 8,
      zooms: vec![
        ZoomBounds {
          zoom: -4,
          max_x: 1,
          max_y: 3,
        },
        ZoomBounds {
          zoom: -3,
          max_x: 3,
          max_y: 7,
        },
      ],
    }
  }
}

impl PrefetchConfig {
  pub fn delay(&self) -> Duration {
    Duration::from_millis(self.delay_ms)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database path (default: $XDG_DATA_HOME/tilecache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// tracing filter directive used when RUST_LOG is unset
  pub filter: Option<String>,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tilecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tilecache/config.yaml
  ///
  /// Without any file the built-in defaults are used.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tilecache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tilecache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty document deserializes as unit, not as an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}
