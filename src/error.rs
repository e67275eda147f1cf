//! Error taxonomy shared by the store, registry, lifecycle manager and scheduler.

use thiserror::Error;

/// Errors surfaced by the data layer.
///
/// `NotFound` and `NoActiveResponse` are recoverable (the caller creates or
/// defaults). `Storage` means the local substrate is unusable and is never
/// retried. `Network` is only ever reported inside refresh/push outcomes; the
/// scheduler logs it instead of returning it.
#[derive(Debug, Error)]
pub enum Error {
  #[error("resource not found: {0}")]
  NotFound(String),

  #[error("no active response")]
  NoActiveResponse,

  #[error("storage error: {0}")]
  Storage(String),

  #[error("network error: {0}")]
  Network(String),

  #[error("invalid resource {name}: {reason}")]
  InvalidResource { name: String, reason: String },

  #[error("invalid path {path}: {reason}")]
  InvalidPath { path: String, reason: String },

  #[error("background task ended without a result")]
  TaskAborted,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// True for errors the caller is expected to recover from by creating or
  /// defaulting the missing object.
  pub fn is_not_found(&self) -> bool {
    matches!(self, Error::NotFound(_) | Error::NoActiveResponse)
  }

  pub(crate) fn invalid_path(path: &[&str], reason: impl Into<String>) -> Self {
    Error::InvalidPath {
      path: path.join("."),
      reason: reason.into(),
    }
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Error::Storage(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
