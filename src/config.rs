use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Worker configuration provided by the hosting application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the hosting application, e.g. "https://app.example.com"
  pub origin: String,
  /// Current cache version name, e.g. "app-cache-v1.0.0".
  /// Exactly one version is current per worker lifetime.
  pub cache_version: String,
  /// Critical resource set: paths or absolute URLs that must be cached
  /// before the worker is considered ready to serve offline.
  #[serde(default)]
  pub precache: Vec<String>,
  /// Prefix or substring patterns identifying cacheable cross-origin
  /// resources (fonts, CDN assets). Read-only after configuration.
  #[serde(default)]
  pub runtime_patterns: Vec<String>,
  /// Page served when a navigation cannot be satisfied from network or cache
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  /// Sync tag under which failed mutating requests are queued
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  /// Optional network timeout in seconds. The default of `None` preserves
  /// the observed behavior: wait for the transport's own failure signal.
  #[serde(default)]
  pub request_timeout_secs: Option<u64>,
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_sync_tag() -> String {
  "contact-form-sync".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swkit.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swkit/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/swkit/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swkit.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swkit").join("config.yaml");
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

  /// Parsed application origin.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Resolve a precache path or URL against the application origin.
  pub fn resolve(&self, path_or_url: &str) -> Result<Url> {
    if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
      return Url::parse(path_or_url).map_err(|e| eyre!("Invalid URL {}: {}", path_or_url, e));
    }

    self
      .origin_url()?
      .join(path_or_url)
      .map_err(|e| eyre!("Failed to resolve {} against {}: {}", path_or_url, self.origin, e))
  }
}
