//! Remote sync endpoint client.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::ReplayError;
use crate::types::SyncPayload;

/// Accepts one replayed write per call.
///
/// Any failure, including a non-success status, means "retry later".
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
  async fn replay(&self, payload: &SyncPayload) -> Result<(), ReplayError>;
}

/// HTTP implementation posting JSON to the configured origin.
#[derive(Clone)]
pub struct HttpRemote {
  client: Client,
  progress_url: Url,
}

impl HttpRemote {
  pub fn new(client: Client, base_url: &Url, progress_path: &str) -> Result<Self, url::ParseError> {
    Ok(Self {
      client,
      progress_url: base_url.join(progress_path)?,
    })
  }

  fn url_for(&self, payload: &SyncPayload) -> &Url {
    match payload {
      SyncPayload::Progress(_) => &self.progress_url,
    }
  }
}

#[async_trait]
impl RemoteEndpoint for HttpRemote {
  async fn replay(&self, payload: &SyncPayload) -> Result<(), ReplayError> {
    let url = self.url_for(payload);
    let request = match payload {
      SyncPayload::Progress(record) => self.client.post(url.clone()).json(record),
    };

    let response = request
      .send()
      .await
      .map_err(|e| ReplayError::Network(e.to_string()))?;

    let status = response.status();
    debug!(url = %url, status = status.as_u16(), kind = payload.kind(), "replayed outbox entry");

    if status.is_success() {
      Ok(())
    } else {
      Err(ReplayError::Status(status.as_u16()))
    }
  }
}
