use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{Descriptor, DEFAULT_NAMESPACE, DEFAULT_TIMEOUT_MS};
use crate::response::DEFAULT_RESPONSE_LIFETIME_MS;
use crate::sampler::DEFAULT_SAMPLE_SIZE;

const HOUR_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the survey API; relative endpoints resolve against it.
  /// Should end with a slash.
  pub api_root: Url,
  #[serde(default = "default_save_endpoint")]
  pub save_endpoint: String,
  /// Database file (default: $XDG_DATA_HOME/surveysync/cache.db)
  pub database: Option<PathBuf>,
  #[serde(default = "default_namespace")]
  pub namespace: String,
  /// Milliseconds before an untouched active response counts as abandoned.
  #[serde(default = "default_response_lifetime")]
  pub response_lifetime: u64,
  #[serde(default = "default_sample_size")]
  pub sample_size: usize,
  /// Milliseconds, for resources without their own timeout and for pushes.
  #[serde(default = "default_timeout")]
  pub default_timeout: u64,
  /// Cached resources; the built-in catalogue is used when empty.
  #[serde(default)]
  pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ResourceConfig {
  pub name: String,
  /// Relative to `api_root`, or absolute. Omit for local-only resources.
  pub endpoint: Option<String>,
  #[serde(default)]
  pub lifetime: Lifetime,
  /// Milliseconds
  pub timeout: Option<u64>,
}

/// Milliseconds, or the keyword `infinite`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Lifetime {
  Millis(u64),
  Keyword(LifetimeKeyword),
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LifetimeKeyword {
  Infinite,
}

impl Default for Lifetime {
  fn default() -> Self {
    Lifetime::INFINITE
  }
}

impl Lifetime {
  pub const INFINITE: Lifetime = Lifetime::Keyword(LifetimeKeyword::Infinite);

  /// Stored form: `None` for never stale.
  pub fn as_millis(self) -> Option<i64> {
    match self {
      Lifetime::Millis(ms) => Some(i64::try_from(ms).unwrap_or(i64::MAX)),
      Lifetime::Keyword(LifetimeKeyword::Infinite) => None,
    }
  }
}

fn default_save_endpoint() -> String {
  "save-response/".to_string()
}

fn default_namespace() -> String {
  DEFAULT_NAMESPACE.to_string()
}

fn default_response_lifetime() -> u64 {
  DEFAULT_RESPONSE_LIFETIME_MS as u64
}

fn default_sample_size() -> usize {
  DEFAULT_SAMPLE_SIZE
}

fn default_timeout() -> u64 {
  DEFAULT_TIMEOUT_MS
}

/// Reference data every survey client caches.
fn builtin_resources() -> Vec<ResourceConfig> {
  let remote = |name: &str, endpoint: &str, lifetime: Lifetime| ResourceConfig {
    name: name.to_string(),
    endpoint: Some(endpoint.to_string()),
    lifetime,
    timeout: None,
  };

  vec![
    remote(
      "quantitative-questions",
      "fetch/quantitative-questions/",
      Lifetime::Millis(24 * HOUR_MS),
    ),
    remote(
      "option-questions",
      "fetch/option-questions/",
      Lifetime::Millis(24 * HOUR_MS),
    ),
    remote(
      "qualitative-questions",
      "fetch/qualitative-questions/",
      Lifetime::Millis(24 * HOUR_MS),
    ),
    remote("locations", "fetch/locations/", Lifetime::Millis(24 * HOUR_MS)),
    remote("comments", "fetch/comments/", Lifetime::Millis(12 * HOUR_MS)),
    remote(
      "bloom-icon",
      "/static/data/bloom-icon.json",
      Lifetime::INFINITE,
    ),
  ]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./surveysync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/surveysync/config.yaml
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
        "No configuration file found. Create one at ~/.config/surveysync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("surveysync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("surveysync").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Database path, falling back to the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("surveysync").join("cache.db"))
  }

  pub fn save_url(&self) -> Result<Url> {
    self.resolve(&self.save_endpoint)
  }

  /// Registry descriptors for the configured (or built-in) resources.
  pub fn descriptors(&self) -> Result<Vec<Descriptor>> {
    let resources = if self.resources.is_empty() {
      builtin_resources()
    } else {
      self.resources.clone()
    };

    resources
      .into_iter()
      .map(|resource| -> Result<Descriptor> {
        let descriptor = match &resource.endpoint {
          Some(endpoint) => Descriptor::remote(resource.name.clone(), self.resolve(endpoint)?),
          None => Descriptor::local(resource.name.clone()),
        };
        Ok(
          descriptor
            .with_lifetime(resource.lifetime.as_millis())
            .with_timeout(resource.timeout.unwrap_or(self.default_timeout)),
        )
      })
      .collect()
  }

  fn resolve(&self, endpoint: &str) -> Result<Url> {
    self
      .api_root
      .join(endpoint)
      .map_err(|e| eyre!("Invalid endpoint {:?}: {}", endpoint, e))
  }
}
