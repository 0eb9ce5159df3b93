//! Background worker: the execution context that outlives any page.
//!
//! The worker installs by precaching a manifest, activates by pruning
//! partitions from earlier versions, and then serves fetches, page messages
//! and background sync events from its own task. Pages reach it only through
//! a [`WorkerHandle`].

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::fetcher::Fetcher;
use super::request::{Request, Response};
use super::response_cache::ResponseCache;
use super::runner::{QUEST_PROGRESS_SYNC, STUDENT_DATA_SYNC};
use super::strategy::Interceptor;
use crate::error::StoreError;
use crate::store::LocalStore;
use crate::sync::{DrainOrigin, DrainerHandle};
use crate::types::CachedLessonItem;

/// Partition names for one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePartitions {
  /// Holds the install manifest
  pub precache: String,
  /// Holds copies stored at runtime
  pub runtime: String,
}

impl CachePartitions {
  pub fn new(name: &str, version: &str) -> Self {
    Self {
      precache: format!("{}-static-{}", name, version),
      runtime: format!("{}-dynamic-{}", name, version),
    }
  }

  pub fn contains(&self, partition: &str) -> bool {
    partition == self.precache || partition == self.runtime
  }
}

/// Commands pages can post to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Store these catalog items for offline use
  CacheCatalogItems(Vec<CachedLessonItem>),
  /// Report whether the worker sees the network as down
  GetOfflineStatus,
  /// Drain the outbox now
  ForceSync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
  CatalogCached { stored: usize, failed: Vec<String> },
  OfflineStatus { offline: bool },
  SyncRequested,
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
  Installed { cached: usize },
  /// The worker now controls every page, including ones opened earlier
  Activated { version: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Activated,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
  /// Manifest entries that could not be fetched
  pub failed: Vec<String>,
}

/// Static settings for a worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub version: String,
  pub partitions: CachePartitions,
  /// Assets that must be available offline
  pub manifest: Vec<Url>,
}

/// The background worker itself. Use [`BackgroundWorker::spawn`] to run it.
pub struct BackgroundWorker {
  settings: WorkerSettings,
  interceptor: Interceptor,
  cache: Arc<dyn ResponseCache>,
  fetcher: Arc<dyn Fetcher>,
  store: LocalStore,
  drainer: DrainerHandle,
  online: watch::Receiver<bool>,
  state: WorkerState,
  events: broadcast::Sender<WorkerEvent>,
}

impl BackgroundWorker {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    settings: WorkerSettings,
    interceptor: Interceptor,
    cache: Arc<dyn ResponseCache>,
    fetcher: Arc<dyn Fetcher>,
    store: LocalStore,
    drainer: DrainerHandle,
    online: watch::Receiver<bool>,
  ) -> Self {
    let (events, _) = broadcast::channel(8);
    Self {
      settings,
      interceptor,
      cache,
      fetcher,
      store,
      drainer,
      online,
      state: WorkerState::Installing,
      events,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Precache the manifest. All or nothing: if any asset fails, none are stored.
  pub async fn install(&mut self) -> Result<InstallReport, StoreError> {
    info!(version = %self.settings.version, assets = self.settings.manifest.len(), "installing worker");

    let requests: Vec<Request> = self
      .settings
      .manifest
      .iter()
      .map(|url| Request::get(url.clone()))
      .collect();
    let fetched = join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

    let mut ready = Vec::new();
    let mut report = InstallReport::default();
    for (request, result) in requests.iter().zip(fetched) {
      match result {
        Ok(response) if response.is_ok() => ready.push((request, response)),
        Ok(response) => {
          report
            .failed
            .push(format!("{} ({})", request.url, response.status));
        }
        Err(e) => report.failed.push(format!("{} ({})", request.url, e)),
      }
    }

    self.cache.open(&self.settings.partitions.precache).await?;

    if report.failed.is_empty() {
      for (request, response) in ready {
        self
          .cache
          .put(&self.settings.partitions.precache, request, &response)
          .await?;
        report.cached += 1;
      }
      info!(cached = report.cached, "precached install manifest");
    } else {
      error!(failed = ?report.failed, "failed to precache install manifest");
    }

    self.state = WorkerState::Installed;
    let _ = self.events.send(WorkerEvent::Installed {
      cached: report.cached,
    });
    Ok(report)
  }

  /// Prune partitions from other versions and take control of pages.
  /// Returns the names of the pruned partitions.
  pub async fn activate(&mut self) -> Result<Vec<String>, StoreError> {
    let mut pruned = Vec::new();
    for partition in self.cache.partitions().await? {
      if !self.settings.partitions.contains(&partition) {
        info!(%partition, "deleting old cache partition");
        self.cache.delete_partition(&partition).await?;
        pruned.push(partition);
      }
    }
    self.cache.open(&self.settings.partitions.runtime).await?;

    self.state = WorkerState::Activated;
    info!(version = %self.settings.version, "worker activated");
    let _ = self.events.send(WorkerEvent::Activated {
      version: self.settings.version.clone(),
    });
    Ok(pruned)
  }

  pub async fn handle_fetch(&self, request: &Request) -> Response {
    self.interceptor.serve(request).await.response
  }

  pub async fn handle_message(&self, message: WorkerMessage) -> WorkerReply {
    match message {
      WorkerMessage::CacheCatalogItems(items) => {
        let report = self.store.put_catalog_items(&items).await;
        info!(stored = report.stored, failed = report.failures.len(), "catalog cached for offline access");
        WorkerReply::CatalogCached {
          stored: report.stored,
          failed: report.failures.into_iter().map(|(id, _)| id).collect(),
        }
      }
      WorkerMessage::GetOfflineStatus => WorkerReply::OfflineStatus {
        offline: !*self.online.borrow(),
      },
      WorkerMessage::ForceSync => {
        self.drainer.request(DrainOrigin::Forced);
        WorkerReply::SyncRequested
      }
    }
  }

  /// Handle a background sync event fired by the host.
  pub async fn handle_sync(&self, tag: &str) {
    info!(tag, "background sync triggered");
    match tag {
      QUEST_PROGRESS_SYNC | STUDENT_DATA_SYNC => {
        match self
          .drainer
          .drain(DrainOrigin::Background(tag.to_string()))
          .await
        {
          Ok(report) => debug!(tag, replayed = report.replayed, deferred = report.deferred, "background sync completed"),
          Err(e) => error!(tag, error = %e, "background sync failed"),
        }
      }
      other => warn!(tag = other, "ignoring unknown background sync tag"),
    }
  }

  /// Run install and activation, then serve commands on a dedicated task.
  pub fn spawn(mut self) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<WorkerCommand>(64);
    let handle = WorkerHandle {
      tx,
      events: self.events.clone(),
    };

    let task = tokio::spawn(async move {
      if let Err(e) = self.install().await {
        error!(error = %e, "worker install failed");
      }
      if let Err(e) = self.activate().await {
        error!(error = %e, "worker activation failed");
      }

      let worker = Arc::new(self);
      while let Some(command) = rx.recv().await {
        let worker = Arc::clone(&worker);
        // Fetches and messages run concurrently; replies are best effort
        tokio::spawn(async move {
          match command {
            WorkerCommand::Fetch { request, reply } => {
              let response = worker.handle_fetch(&request).await;
              let _ = reply.send(response);
            }
            WorkerCommand::Message { message, reply } => {
              let response = worker.handle_message(message).await;
              if let Some(reply) = reply {
                let _ = reply.send(response);
              }
            }
            WorkerCommand::Sync { tag } => worker.handle_sync(&tag).await,
          }
        });
      }
      debug!("worker stopped");
    });

    (handle, task)
  }
}

enum WorkerCommand {
  Fetch {
    request: Request,
    reply: oneshot::Sender<Response>,
  },
  Message {
    message: WorkerMessage,
    reply: Option<oneshot::Sender<WorkerReply>>,
  },
  Sync {
    tag: String,
  },
}

/// Page-side handle to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::Sender<WorkerCommand>,
  events: broadcast::Sender<WorkerEvent>,
}

impl WorkerHandle {
  /// Send a request through the worker. Falls back to the offline
  /// placeholder if the worker is gone.
  pub async fn fetch(&self, request: Request) -> Response {
    let (reply, rx) = oneshot::channel();
    if self
      .tx
      .send(WorkerCommand::Fetch { request, reply })
      .await
      .is_err()
    {
      warn!("worker is not running");
      return Response::offline_page();
    }
    rx.await.unwrap_or_else(|_| Response::offline_page())
  }

  /// Post a message without waiting for a reply.
  pub async fn post(&self, message: WorkerMessage) {
    if self
      .tx
      .send(WorkerCommand::Message {
        message,
        reply: None,
      })
      .await
      .is_err()
    {
      warn!("worker is not running, message dropped");
    }
  }

  /// Post a message and wait for the reply.
  pub async fn request(&self, message: WorkerMessage) -> Option<WorkerReply> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(WorkerCommand::Message {
        message,
        reply: Some(reply),
      })
      .await
      .ok()?;
    rx.await.ok()
  }

  /// Deliver a background sync event.
  pub async fn sync(&self, tag: &str) {
    if self
      .tx
      .send(WorkerCommand::Sync {
        tag: tag.to_string(),
      })
      .await
      .is_err()
    {
      warn!(tag, "worker is not running, background sync dropped");
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
    self.events.subscribe()
  }
}
