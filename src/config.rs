use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_ORIGIN: &str = "http://localhost:3001";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the worker is registered for; shell and sync URLs resolve against it
  pub origin: String,
  /// Cache database (defaults to $XDG_DATA_HOME/swcache/cache.db)
  pub database: Option<PathBuf>,
  /// Directory for rolling log files (defaults to $XDG_DATA_HOME/swcache/logs)
  pub log_dir: Option<PathBuf>,
  pub request_timeout_secs: u64,
  /// Fallback notification title
  pub app_name: String,
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Replays before a queued request is dropped
  pub max_attempts: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { max_attempts: 3 }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: DEFAULT_ORIGIN.to_string(),
      database: None,
      log_dir: None,
      request_timeout_secs: 10,
      app_name: "Heavy Parts".to_string(),
      sync: SyncConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Without a file the defaults apply. `SWCACHE_ORIGIN` overrides the origin.
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

    if let Ok(origin) = std::env::var("SWCACHE_ORIGIN") {
      config.origin = origin;
    }
    config.origin_url()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.origin_url()?;
    Ok(config)
  }

  /// The origin as a URL. It must be able to serve as a base for paths.
  pub fn origin_url(&self) -> Result<Url> {
    let origin = Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if origin.cannot_be_a_base() {
      return Err(eyre!("Origin must be an http(s) URL, got {}", self.origin));
    }
    Ok(origin)
  }

  /// Path of the cache database.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }
    Ok(Self::data_dir()?.join("cache.db"))
  }

  /// Directory for log files.
  pub fn log_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.log_dir {
      return Ok(dir.clone());
    }
    Ok(Self::data_dir()?.join("logs"))
  }

  fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("swcache"))
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(target)
      .map_err(|e| eyre!("Invalid URL {}: {}", target, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.origin_url().unwrap().as_str(), "http://localhost:3001/");
    assert_eq!(config.request_timeout_secs, 10);
    assert_eq!(config.sync.max_attempts, 3);
    assert_eq!(config.app_name, "Heavy Parts");
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      r#"
origin: https://parts.example.com
sync:
  max_attempts: 5
"#,
    )
    .unwrap();
    assert_eq!(config.origin_url().unwrap().host_str(), Some("parts.example.com"));
    assert_eq!(config.sync.max_attempts, 5);
    assert_eq!(config.request_timeout_secs, 10);
    assert!(config.database.is_none());
  }

  #[test]
  fn test_rejects_bad_origin() {
    assert!(Config::parse("origin: not a url").is_err());
    assert!(Config::parse("origin: mailto:ops@example.com").is_err());
  }

  #[test]
  fn test_resolve_against_origin() {
    let config = Config::default();
    assert_eq!(
      config.resolve("/api/products?page=2").unwrap().as_str(),
      "http://localhost:3001/api/products?page=2"
    );
    assert_eq!(
      config.resolve("https://cdn.example.com/logo.png").unwrap().host_str(),
      Some("cdn.example.com")
    );
  }

  #[test]
  fn test_explicit_missing_file_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/swcache.yaml"))).is_err());
  }
}
