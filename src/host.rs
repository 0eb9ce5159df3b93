//! Host connectivity signal.
//!
//! The host decides whether the device is online by probing the configured
//! origin. The result is published on a `watch` channel that the sync
//! coordinator and the background task runner both follow.

use reqwest::Client;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ConnectivityProbe {
  client: Client,
  target: Url,
}

impl ConnectivityProbe {
  pub fn new(client: Client, target: Url) -> Self {
    Self { client, target }
  }

  /// Any HTTP answer counts as online, even an error status.
  pub async fn probe(&self) -> bool {
    match self
      .client
      .head(self.target.clone())
      .timeout(PROBE_TIMEOUT)
      .send()
      .await
    {
      Ok(response) => {
        debug!(target = %self.target, status = response.status().as_u16(), "probe answered");
        true
      }
      Err(e) => {
        debug!(target = %self.target, error = %e, "probe failed");
        false
      }
    }
  }

  /// Re-probe every `interval`, publishing only actual changes.
  pub fn monitor(self, interval: Duration, signal: watch::Sender<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let online = self.probe().await;
        let changed = signal.send_if_modified(|current| {
          if *current == online {
            false
          } else {
            *current = online;
            true
          }
        });
        if changed {
          info!(online, "host connectivity changed");
        }
        if signal.is_closed() {
          debug!("no one follows connectivity anymore, stopping probe");
          break;
        }
      }
    })
  }
}
