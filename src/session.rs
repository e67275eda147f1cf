//! Wiring of the components for one respondent session.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::{Descriptor, Registry, ResourceStore, SqliteStore};
use crate::config::Config;
use crate::context::Context;
use crate::response::Responses;
use crate::sampler::CommentSampler;
use crate::sync::{Scheduler, SyncReport};
use crate::transport::{HttpTransport, Transport};

/// Freshness of one registered resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStatus {
  pub name: String,
  pub remote: bool,
  /// Last successful write, ms since epoch.
  pub fetched_at: Option<i64>,
  pub stale: bool,
}

/// Snapshot of local state for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
  pub active: Option<String>,
  pub completed: Vec<String>,
  pub resources: Vec<ResourceStatus>,
  /// Bytes per stored key.
  pub usage: Vec<(String, usize)>,
}

pub struct Session<S: ResourceStore, T: Transport> {
  ctx: Context<S>,
  scheduler: Arc<Scheduler<S, T>>,
  sampler: CommentSampler<S>,
  descriptors: Vec<Descriptor>,
}

impl Session<SqliteStore, HttpTransport> {
  /// Open the on-disk store and HTTP transport described by `config`.
  pub fn open(config: &Config) -> Result<Self> {
    let ctx = Context::open(&config.database_path()?, &config.namespace)?;
    let transport = Arc::new(HttpTransport::new()?);
    Self::new(ctx, transport, config)
  }
}

impl<S: ResourceStore, T: Transport> Session<S, T> {
  pub fn new(ctx: Context<S>, transport: Arc<T>, config: &Config) -> Result<Self> {
    let lifetime = i64::try_from(config.response_lifetime).unwrap_or(i64::MAX);
    let scheduler = Scheduler::new(
      Registry::new(ctx.clone()),
      Responses::new(ctx.clone(), lifetime),
      transport,
      config.save_url()?,
    )
    .with_push_timeout(Duration::from_millis(config.default_timeout));

    Ok(Self {
      sampler: CommentSampler::new(ctx.clone(), config.sample_size),
      scheduler: Arc::new(scheduler),
      descriptors: config.descriptors()?,
      ctx,
    })
  }

  /// Attach the configured catalogue, keeping cached data, and retire an
  /// abandoned active response.
  pub fn init(&self) -> Result<()> {
    for descriptor in &self.descriptors {
      self.registry().register(descriptor.clone(), true)?;
    }
    if let Some(key) = self.responses().expire_abandoned()? {
      info!(key = %key, "retired abandoned response");
    }
    Ok(())
  }

  pub fn registry(&self) -> &Registry<S> {
    self.scheduler.registry()
  }

  pub fn responses(&self) -> &Responses<S> {
    self.scheduler.responses()
  }

  pub fn sampler(&self) -> &CommentSampler<S> {
    &self.sampler
  }

  pub fn scheduler(&self) -> &Arc<Scheduler<S, T>> {
    &self.scheduler
  }

  /// Refresh stale resources and push completed responses, concurrently.
  pub async fn sync(&self) -> Result<SyncReport> {
    Ok(self.scheduler.sync().await?)
  }

  pub fn status(&self) -> Result<Status> {
    let registry = self.registry();
    let mut resources = Vec::new();
    for descriptor in registry.descriptors()? {
      let stored = self.ctx.store().load_optional(&descriptor.name)?;
      resources.push(ResourceStatus {
        remote: descriptor.endpoint.is_some(),
        fetched_at: stored.as_ref().and_then(|r| r.timestamp),
        stale: stored.as_ref().map_or(true, |r| registry.is_stale(r)),
        name: descriptor.name,
      });
    }

    Ok(Status {
      active: self.responses().active_key()?,
      completed: self.responses().completed_keys()?,
      resources,
      usage: self.ctx.store().usage()?,
    })
  }
}
