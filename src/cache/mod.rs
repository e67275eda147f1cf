//! Offline-first resource cache.
//!
//! This module provides:
//! - A durable key-value store of named, timestamped resources
//! - A registry of descriptors deciding which resources are fetched, from where,
//!   and how long a copy stays fresh
//! - Offline behavior: a failed refresh keeps serving the stale copy

mod registry;
mod resource;
mod storage;

pub use registry::{Descriptor, RefreshOutcome, Registry, CATALOG_KEY, DEFAULT_TIMEOUT_MS};
pub use resource::{is_stale, Resource};
pub use storage::{ResourceStore, SqliteStore, DEFAULT_NAMESPACE};
