//! Synchronization scheduler: refresh stale resources, push completed responses.
//!
//! Network failures never escape this module as errors. They are logged and
//! reported in the outcome lists; the next session start retries them.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::cache::{RefreshOutcome, Registry, ResourceStore, DEFAULT_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::response::Responses;
use crate::task::Task;
use crate::transport::Transport;

/// What happened to one completed response during a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
  /// Server accepted it; the local copy is gone.
  Delivered,
  /// Kept locally for the next attempt.
  Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
  pub outcomes: Vec<(String, RefreshOutcome)>,
}

impl RefreshReport {
  pub fn refreshed(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| *o == RefreshOutcome::Refreshed)
      .count()
  }

  pub fn failed(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| matches!(o, RefreshOutcome::Failed(_)))
      .count()
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
  pub outcomes: Vec<(String, PushOutcome)>,
}

impl PushReport {
  pub fn delivered(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| *o == PushOutcome::Delivered)
      .count()
  }

  pub fn failed(&self) -> usize {
    self.outcomes.len() - self.delivered()
  }
}

/// Result of one session-start synchronization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
  pub refresh: RefreshReport,
  pub push: PushReport,
}

pub struct Scheduler<S: ResourceStore, T: Transport> {
  registry: Registry<S>,
  responses: Responses<S>,
  transport: Arc<T>,
  save_endpoint: Url,
  push_timeout: Duration,
}

impl<S: ResourceStore, T: Transport> Scheduler<S, T> {
  pub fn new(
    registry: Registry<S>,
    responses: Responses<S>,
    transport: Arc<T>,
    save_endpoint: Url,
  ) -> Self {
    Self {
      registry,
      responses,
      transport,
      save_endpoint,
      push_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
    }
  }

  pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
    self.push_timeout = timeout;
    self
  }

  pub fn registry(&self) -> &Registry<S> {
    &self.registry
  }

  pub fn responses(&self) -> &Responses<S> {
    &self.responses
  }

  /// Refresh every stale resource that has an endpoint.
  ///
  /// Resources are refreshed concurrently and independently; one failing
  /// never stops the others.
  pub async fn refresh_all(&self) -> Result<RefreshReport> {
    let descriptors: Vec<_> = self
      .registry
      .descriptors()?
      .into_iter()
      .filter(|d| d.endpoint.is_some())
      .collect();

    let results = join_all(descriptors.iter().map(|descriptor| async move {
      let outcome = self
        .registry
        .refresh_if_stale(descriptor, self.transport.as_ref())
        .await?;
      if let RefreshOutcome::Failed(reason) = &outcome {
        warn!(
          resource = %descriptor.name,
          error = %reason,
          "refresh failed; keeping cached copy"
        );
      }
      Ok::<_, Error>((descriptor.name.clone(), outcome))
    }))
    .await;

    let outcomes = results.into_iter().collect::<Result<Vec<_>>>()?;
    Ok(RefreshReport { outcomes })
  }

  /// Body sent for a completed response: its answers plus derived display fields.
  ///
  /// Derivation is a pure function of the stored response, so a retry after
  /// a failed push sends the same body.
  pub fn payload(&self, key: &str) -> Result<Value> {
    let response = self.responses.load(key)?.with_derived_fields();
    Ok(serde_json::to_value(response)?)
  }

  /// Push every completed response to the save endpoint.
  ///
  /// Delivered responses are deleted; failures stay for the next call. A
  /// stored response that cannot be decoded is reported as failed without
  /// holding back the others. Only storage errors are returned as `Err`.
  pub async fn push_completed(&self) -> Result<PushReport> {
    let keys = self.responses.completed_keys()?;

    let results = join_all(keys.iter().map(|key| self.push_one(key))).await;

    let mut outcomes = Vec::with_capacity(keys.len());
    for result in results {
      if let Some(outcome) = result? {
        outcomes.push(outcome);
      }
    }
    Ok(PushReport { outcomes })
  }

  async fn push_one(&self, key: &str) -> Result<Option<(String, PushOutcome)>> {
    let payload = match self.payload(key) {
      Ok(payload) => payload,
      // Already pushed and removed by another session on the same store
      Err(Error::NotFound(_)) => return Ok(None),
      Err(e @ (Error::Serialization(_) | Error::InvalidResource { .. })) => {
        warn!(key = %key, error = %e, "stored response unreadable; not pushed");
        return Ok(Some((key.to_string(), PushOutcome::Failed(e.to_string()))));
      }
      Err(e) => return Err(e),
    };

    let attempt = self
      .transport
      .push(&self.save_endpoint, &payload, self.push_timeout);
    let outcome = match tokio::time::timeout(self.push_timeout, attempt).await {
      Ok(Ok(())) => {
        self.responses.remove(key)?;
        info!(key = %key, "response delivered");
        PushOutcome::Delivered
      }
      Ok(Err(e)) => {
        warn!(key = %key, error = %e, "push failed; will retry next session");
        PushOutcome::Failed(e.to_string())
      }
      Err(_) => {
        warn!(
          key = %key,
          timeout_ms = self.push_timeout.as_millis() as u64,
          "push timed out; will retry next session"
        );
        PushOutcome::Failed(format!("timed out after {}ms", self.push_timeout.as_millis()))
      }
    };

    Ok(Some((key.to_string(), outcome)))
  }

  /// Run refresh and push side by side.
  pub async fn sync(&self) -> Result<SyncReport> {
    let (refresh, push) = tokio::join!(self.refresh_all(), self.push_completed());
    Ok(SyncReport {
      refresh: refresh?,
      push: push?,
    })
  }
}

impl<S, T> Scheduler<S, T>
where
  S: ResourceStore + 'static,
  T: Transport + 'static,
{
  /// Spawn refresh and push as background tasks and return their handles.
  pub fn spawn_sync(self: &Arc<Self>) -> (Task<RefreshReport>, Task<PushReport>) {
    let this = Arc::clone(self);
    let refresh = Task::spawn(async move { this.refresh_all().await });

    let this = Arc::clone(self);
    let push = Task::spawn(async move { this.push_completed().await });

    (refresh, push)
  }
}
