//! The cache entry record and the pure staleness rule over it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A named cache entry.
///
/// `timestamp` is stamped by the store on every write; `None` means the entry
/// was never written (always stale). `lifetime` is in milliseconds; `None`
/// means the entry never goes stale. JSON has no infinity, so `None` is the
/// only encoding of an unbounded lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
  pub name: String,
  pub timestamp: Option<i64>,
  pub lifetime: Option<i64>,
  pub data: Value,
}

impl Resource {
  pub fn new(name: impl Into<String>, data: Value) -> Self {
    Self {
      name: name.into(),
      timestamp: None,
      lifetime: None,
      data,
    }
  }

  pub fn with_lifetime(mut self, lifetime: Option<i64>) -> Self {
    self.lifetime = lifetime;
    self
  }

  /// Reject records the store must never persist.
  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::InvalidResource {
        name: self.name.clone(),
        reason: "name must not be empty".to_string(),
      });
    }
    if let Some(lifetime) = self.lifetime {
      if lifetime < 0 {
        return Err(Error::InvalidResource {
          name: self.name.clone(),
          reason: format!("negative lifetime {}", lifetime),
        });
      }
    }
    Ok(())
  }
}

/// Whether `resource` needs refreshing at time `now` (ms since epoch).
pub fn is_stale(resource: &Resource, now: i64) -> bool {
  match (resource.timestamp, resource.lifetime) {
    (None, _) => true,
    (Some(_), None) => false,
    (Some(timestamp), Some(lifetime)) => now - timestamp > lifetime,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn stamped(timestamp: i64, lifetime: Option<i64>) -> Resource {
    Resource {
      name: "questions".to_string(),
      timestamp: Some(timestamp),
      lifetime,
      data: json!({}),
    }
  }

  #[test]
  fn test_never_written_is_stale() {
    let resource = Resource::new("questions", json!({})).with_lifetime(None);
    assert!(is_stale(&resource, 0));
    assert!(is_stale(&resource, i64::MAX));
  }

  #[test]
  fn test_finite_lifetime_boundary() {
    let resource = stamped(1_000, Some(500));
    for now in [1_000, 1_200, 1_499, 1_500] {
      assert!(!is_stale(&resource, now), "fresh at {}", now);
    }
    for now in [1_501, 2_000, 10_000] {
      assert!(is_stale(&resource, now), "stale at {}", now);
    }
  }

  #[test]
  fn test_infinite_lifetime_never_expires() {
    let resource = stamped(1_000, None);
    for now in [1_000, 1_000_000, i64::MAX] {
      assert!(!is_stale(&resource, now));
    }
  }

  #[test]
  fn test_zero_lifetime_is_fresh_only_at_write_instant() {
    let resource = stamped(1_000, Some(0));
    assert!(!is_stale(&resource, 1_000));
    assert!(is_stale(&resource, 1_001));
  }

  #[test]
  fn test_infinite_lifetime_serializes_as_null() {
    let resource = stamped(5, None);
    let encoded = serde_json::to_value(&resource).unwrap();
    assert_eq!(encoded["lifetime"], Value::Null);
  }

  #[test]
  fn test_validate_rejects_empty_name_and_negative_lifetime() {
    assert!(Resource::new("  ", json!(1)).validate().is_err());
    assert!(Resource::new("x", json!(1))
      .with_lifetime(Some(-1))
      .validate()
      .is_err());
    assert!(Resource::new("x", json!(1))
      .with_lifetime(Some(0))
      .validate()
      .is_ok());
  }
}
