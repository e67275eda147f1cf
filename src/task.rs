//! Background task handle with a single completion event.
//!
//! Network work runs on the tokio runtime while the caller keeps going. The
//! result (success, failure, timeout) arrives exactly once and can either be
//! polled from a tick loop or awaited.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = Arc::clone(&scheduler);
//! let mut refresh = Task::spawn(async move { scheduler.refresh_all().await });
//!
//! // In event loop tick
//! if refresh.poll() {
//!     // Completion arrived
//! }
//! ```

use std::future::Future;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// The state of a task
#[derive(Debug)]
pub enum TaskState<T> {
  /// Still running
  Running,
  /// Completed successfully
  Finished(T),
  /// Completed with an error
  Failed(Error),
}

impl<T> TaskState<T> {
  pub fn is_running(&self) -> bool {
    matches!(self, TaskState::Running)
  }

  pub fn is_finished(&self) -> bool {
    matches!(self, TaskState::Finished(_))
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, TaskState::Failed(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      TaskState::Finished(data) => Some(data),
      _ => None,
    }
  }
}

/// Handle to one spawned unit of work.
///
/// There is no cancellation: dropping the handle detaches the work, which
/// still runs to completion (or to its own timeout).
pub struct Task<T> {
  state: TaskState<T>,
  receiver: Option<oneshot::Receiver<Result<T>>>,
}

impl<T: Send + 'static> Task<T> {
  /// Spawn `future` on the current tokio runtime.
  pub fn spawn<Fut>(future: Fut) -> Self
  where
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      // Receiver may have been dropped
      let _ = tx.send(future.await);
    });

    Self {
      state: TaskState::Running,
      receiver: Some(rx),
    }
  }

  pub fn state(&self) -> &TaskState<T> {
    &self.state
  }

  pub fn is_running(&self) -> bool {
    self.state.is_running()
  }

  /// Check for the completion event without blocking.
  ///
  /// Returns `true` when the state changed on this call.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.settle(result);
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.settle(Err(Error::TaskAborted));
        true
      }
    }
  }

  /// Wait for the completion event and return the result.
  pub async fn wait(mut self) -> Result<T> {
    if let Some(receiver) = self.receiver.take() {
      return receiver.await.unwrap_or(Err(Error::TaskAborted));
    }

    match self.state {
      TaskState::Finished(data) => Ok(data),
      TaskState::Failed(e) => Err(e),
      TaskState::Running => unreachable!("running task always holds its receiver"),
    }
  }

  fn settle(&mut self, result: Result<T>) {
    self.receiver = None;
    self.state = match result {
      Ok(data) => TaskState::Finished(data),
      Err(e) => TaskState::Failed(e),
    };
  }
}
