//! Resource registry: maps logical names to fetch behavior and staleness policy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::resource::{self, Resource};
use super::storage::ResourceStore;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Request timeout used when a descriptor does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Key the registry catalogue itself is persisted under.
pub const CATALOG_KEY: &str = "registry";

/// Registry metadata for one named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
  pub name: String,
  /// `None` marks a local-only resource that is never fetched.
  pub endpoint: Option<Url>,
  /// Milliseconds; `None` never goes stale.
  pub lifetime: Option<i64>,
  /// Milliseconds allowed for one fetch.
  pub timeout: u64,
}

impl Descriptor {
  pub fn local(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      endpoint: None,
      lifetime: None,
      timeout: DEFAULT_TIMEOUT_MS,
    }
  }

  pub fn remote(name: impl Into<String>, endpoint: Url) -> Self {
    Self {
      endpoint: Some(endpoint),
      ..Self::local(name)
    }
  }

  pub fn with_lifetime(mut self, lifetime: Option<i64>) -> Self {
    self.lifetime = lifetime;
    self
  }

  pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
    self.timeout = timeout_ms;
    self
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout)
  }
}

/// What `refresh_if_stale` did for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
  /// Stored data is still within its lifetime; no request made.
  Fresh,
  /// Fetched and stored new data.
  Refreshed,
  /// Descriptor has no endpoint.
  LocalOnly,
  /// Fetch failed or timed out; any existing data was left in place.
  Failed(String),
}

/// Registry of resource descriptors, persisted in the store under
/// [`CATALOG_KEY`] so settings survive restarts.
pub struct Registry<S: ResourceStore> {
  ctx: Context<S>,
}

impl<S: ResourceStore> Registry<S> {
  pub fn new(ctx: Context<S>) -> Self {
    Self { ctx }
  }

  /// Insert a descriptor.
  ///
  /// With `only_if_absent`, stored data for the name is kept and only the
  /// descriptor metadata is reattached. Without it, stored data is dropped
  /// and the resource reads as never fetched.
  pub fn register(&self, descriptor: Descriptor, only_if_absent: bool) -> Result<()> {
    check_name(&descriptor.name)?;
    if descriptor.lifetime.is_some_and(|l| l < 0) {
      return Err(Error::InvalidResource {
        name: descriptor.name,
        reason: "negative lifetime".to_string(),
      });
    }

    let store = self.ctx.store();
    if store.exists(&descriptor.name)? {
      if only_if_absent {
        store.set_lifetime(&descriptor.name, descriptor.lifetime)?;
      } else {
        store.delete(&descriptor.name)?;
      }
    }

    let mut catalog = self.catalog()?;
    debug!(resource = %descriptor.name, "registered resource");
    catalog.insert(descriptor.name.clone(), serde_json::to_value(&descriptor)?);
    store.put(Resource::new(CATALOG_KEY, Value::Object(catalog)))?;
    Ok(())
  }

  /// Descriptor registered under `name`.
  pub fn descriptor(&self, name: &str) -> Result<Descriptor> {
    let value = self
      .catalog()?
      .remove(name)
      .ok_or_else(|| Error::NotFound(name.to_string()))?;
    Ok(serde_json::from_value(value)?)
  }

  /// Every registered descriptor, in name order.
  pub fn descriptors(&self) -> Result<Vec<Descriptor>> {
    self
      .catalog()?
      .into_iter()
      .map(|(_, value)| serde_json::from_value(value).map_err(Error::from))
      .collect()
  }

  /// Load the data resource for `name`.
  pub fn load(&self, name: &str) -> Result<Resource> {
    self.ctx.store().load(name)
  }

  pub fn is_stale(&self, resource: &Resource) -> bool {
    resource::is_stale(resource, self.ctx.now())
  }

  /// Whether the resource behind `descriptor` is missing or stale.
  pub fn needs_refresh(&self, descriptor: &Descriptor) -> Result<bool> {
    Ok(match self.ctx.store().load_optional(&descriptor.name)? {
      Some(resource) => self.is_stale(&resource),
      None => true,
    })
  }

  /// Fetch the resource if it is stale.
  ///
  /// Network failures and timeouts come back as `RefreshOutcome::Failed` and
  /// leave stored data untouched. Only storage errors are returned as `Err`.
  pub async fn refresh_if_stale<T>(
    &self,
    descriptor: &Descriptor,
    transport: &T,
  ) -> Result<RefreshOutcome>
  where
    T: Transport + ?Sized,
  {
    let Some(endpoint) = &descriptor.endpoint else {
      return Ok(RefreshOutcome::LocalOnly);
    };

    if !self.needs_refresh(descriptor)? {
      debug!(resource = %descriptor.name, "cache fresh");
      return Ok(RefreshOutcome::Fresh);
    }

    let timeout = descriptor.timeout();
    match tokio::time::timeout(timeout, transport.fetch(endpoint, timeout)).await {
      Ok(Ok(data)) => {
        let resource =
          Resource::new(descriptor.name.clone(), data).with_lifetime(descriptor.lifetime);
        self.ctx.store().put(resource)?;
        debug!(resource = %descriptor.name, "cache refreshed");
        Ok(RefreshOutcome::Refreshed)
      }
      Ok(Err(e)) => Ok(RefreshOutcome::Failed(e.to_string())),
      Err(_) => Ok(RefreshOutcome::Failed(format!(
        "timed out after {}ms",
        descriptor.timeout
      ))),
    }
  }

  fn catalog(&self) -> Result<Map<String, Value>> {
    match self.ctx.store().load_optional(CATALOG_KEY)? {
      None => Ok(Map::new()),
      Some(resource) => match resource.data {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::InvalidResource {
          name: CATALOG_KEY.to_string(),
          reason: format!("expected an object, found {}", other),
        }),
      },
    }
  }
}

/// Names owned by the lifecycle manager, the sampler and the registry itself.
fn check_name(name: &str) -> Result<()> {
  let reserved = name == CATALOG_KEY
    || name == crate::response::CURRENT_KEY
    || name.starts_with(crate::response::RESPONSE_PREFIX)
    || name.starts_with(crate::sampler::SELECTION_PREFIX);

  if name.trim().is_empty() || reserved {
    return Err(Error::InvalidResource {
      name: name.to_string(),
      reason: "reserved or empty name".to_string(),
    });
  }
  Ok(())
}
