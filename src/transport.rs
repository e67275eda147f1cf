//! HTTP access to the remote survey service.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// Network seam used by the registry (GET) and the scheduler (POST).
///
/// Failures are reported as `Error::Network`; callers turn them into
/// outcomes and never abort on them.
#[async_trait]
pub trait Transport: Send + Sync {
  /// GET `url` and decode the body as JSON.
  async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Value>;

  /// POST `body` as JSON to `url`. Any 2xx status is success.
  async fn push(&self, url: &Url, body: &Value, timeout: Duration) -> Result<()>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("surveysync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Value> {
    let response = self
      .client
      .get(url.clone())
      .timeout(timeout)
      .send()
      .await
      .map_err(|e| Error::Network(format!("Failed to fetch {}: {}", url, e)))?;

    let response = response
      .error_for_status()
      .map_err(|e| Error::Network(format!("Failed to fetch {}: {}", url, e)))?;

    response
      .json::<Value>()
      .await
      .map_err(|e| Error::Network(format!("Failed to decode {}: {}", url, e)))
  }

  async fn push(&self, url: &Url, body: &Value, timeout: Duration) -> Result<()> {
    let response = self
      .client
      .post(url.clone())
      .json(body)
      .timeout(timeout)
      .send()
      .await
      .map_err(|e| Error::Network(format!("Failed to push to {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(Error::Network(format!(
        "Push to {} rejected with status {}",
        url, status
      )));
    }
    Ok(())
  }
}
