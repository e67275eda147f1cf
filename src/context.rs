//! Explicit context handed to every component constructor.

use std::path::Path;
use std::sync::Arc;

use crate::cache::{ResourceStore, SqliteStore};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Shared handle to the resource store and the clock.
///
/// Components never reach for process-wide state; two contexts built over two
/// stores are fully independent.
pub struct Context<S: ResourceStore> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
}

impl<S: ResourceStore> Context<S> {
  pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
    Self {
      store: Arc::new(store),
      clock,
    }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn clock(&self) -> Arc<dyn Clock> {
    Arc::clone(&self.clock)
  }

  /// Current time in milliseconds since the epoch.
  pub fn now(&self) -> i64 {
    self.clock.now_millis()
  }
}

impl Context<SqliteStore> {
  /// Open the on-disk store at `path` under `namespace`, using wall-clock time.
  pub fn open(path: &Path, namespace: &str) -> Result<Self> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = SqliteStore::open(path, namespace, Arc::clone(&clock))?;
    Ok(Self::new(store, clock))
  }

  /// Throwaway in-memory store driven by the given clock.
  pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
    let store = SqliteStore::in_memory(Arc::clone(&clock))?;
    Ok(Self::new(store, clock))
  }
}

impl<S: ResourceStore> Clone for Context<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      clock: Arc::clone(&self.clock),
    }
  }
}
