//! Offline-first survey client core.
//!
//! Caches reference data (questions, locations, comments) in a local store,
//! records responses while offline, and synchronizes both directions when a
//! session starts.

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod response;
pub mod sampler;
pub mod session;
pub mod sync;
pub mod task;
pub mod transport;

pub use error::{Error, Result};
