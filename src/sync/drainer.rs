//! Outbox draining, shared by the page context and the background worker.
//!
//! [`OutboxDrainer`] holds the replay logic. [`DrainerHandle::spawn`] runs it
//! behind a channel so both execution contexts request drains by message and
//! never run two at once.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::remote::RemoteEndpoint;
use crate::error::{StoreError, SyncError};
use crate::store::LocalStore;
use crate::types::SyncPayload;

/// Why a drain was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOrigin {
  /// Connectivity came back
  Reconnect,
  /// User asked for a sync
  Forced,
  /// Background sync fired for a tag
  Background(String),
}

impl fmt::Display for DrainOrigin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Reconnect => write!(f, "reconnect"),
      Self::Forced => write!(f, "forced"),
      Self::Background(tag) => write!(f, "background:{}", tag),
    }
  }
}

/// Summary of one drain run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Entries replayed and removed
  pub replayed: usize,
  /// Poison entries removed without replay
  pub dropped: usize,
  /// Entries left queued for a later run
  pub deferred: usize,
  /// Another drain was already running; nothing was attempted
  pub coalesced: bool,
}

/// Replays outbox entries in FIFO order against a remote endpoint.
pub struct OutboxDrainer {
  store: LocalStore,
  remote: Arc<dyn RemoteEndpoint>,
  running: Mutex<()>,
}

impl OutboxDrainer {
  pub fn new(store: LocalStore, remote: Arc<dyn RemoteEndpoint>) -> Self {
    Self {
      store,
      remote,
      running: Mutex::new(()),
    }
  }

  /// Run one drain pass.
  ///
  /// A failed replay stops further entries of the same kind for this run;
  /// entries of other kinds still go out. Entries that can't be decoded are
  /// dropped. Returns a coalesced report if a pass is already running.
  pub async fn drain(&self, origin: &DrainOrigin) -> Result<DrainReport, StoreError> {
    let _guard = match self.running.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!(%origin, "drain already running, coalescing");
        return Ok(DrainReport {
          coalesced: true,
          ..DrainReport::default()
        });
      }
    };

    let entries = self.store.list_outbox_entries().await?;
    if entries.is_empty() {
      debug!(%origin, "outbox empty");
      return Ok(DrainReport::default());
    }

    info!(%origin, pending = entries.len(), "draining outbox");

    let mut report = DrainReport::default();
    let mut blocked: HashSet<String> = HashSet::new();

    for entry in entries {
      if blocked.contains(&entry.kind) {
        report.deferred += 1;
        continue;
      }

      let payload = match SyncPayload::decode(&entry) {
        Ok(payload) => payload,
        Err(reason) => {
          error!(id = entry.id, kind = %entry.kind, %reason, "dropping poison outbox entry");
          self.store.delete_outbox_entry(entry.id).await?;
          report.dropped += 1;
          continue;
        }
      };

      match self.remote.replay(&payload).await {
        Ok(()) => {
          self.store.delete_outbox_entry(entry.id).await?;
          match &payload {
            SyncPayload::Progress(record) => {
              self.store.mark_progress_synced(record).await?;
            }
          }
          report.replayed += 1;
        }
        Err(e) => {
          warn!(id = entry.id, kind = %entry.kind, error = %e, "replay failed, keeping entry queued");
          blocked.insert(entry.kind.clone());
          report.deferred += 1;
        }
      }
    }

    info!(
      %origin,
      replayed = report.replayed,
      dropped = report.dropped,
      deferred = report.deferred,
      "outbox drain finished"
    );
    Ok(report)
  }
}

type DrainReply = oneshot::Sender<Result<DrainReport, String>>;

struct DrainRequest {
  origin: DrainOrigin,
  reply: Option<DrainReply>,
}

/// Message-passing front for a running [`OutboxDrainer`].
#[derive(Clone)]
pub struct DrainerHandle {
  tx: mpsc::Sender<DrainRequest>,
}

impl DrainerHandle {
  /// Start the drainer service. Requests that arrive while a drain is in
  /// flight join it and receive its report.
  pub fn spawn(drainer: Arc<OutboxDrainer>) -> (Self, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<DrainRequest>(32);

    let task = tokio::spawn(async move {
      while let Some(request) = rx.recv().await {
        let mut waiters = vec![request.reply];
        let result = drainer
          .drain(&request.origin)
          .await
          .map_err(|e| {
            error!(origin = %request.origin, error = %e, "outbox drain failed");
            e.to_string()
          });

        while let Ok(joined) = rx.try_recv() {
          debug!(origin = %joined.origin, "joined in-flight drain");
          waiters.push(joined.reply);
        }

        for reply in waiters.into_iter().flatten() {
          // The requester may have gone away
          let _ = reply.send(result.clone());
        }
      }
      debug!("drainer service stopped");
    });

    (Self { tx }, task)
  }

  /// Request a drain and wait for its report.
  pub async fn drain(&self, origin: DrainOrigin) -> Result<DrainReport, SyncError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(DrainRequest {
        origin,
        reply: Some(reply),
      })
      .await
      .map_err(|_| SyncError::DrainerStopped)?;

    match rx.await {
      Ok(Ok(report)) => Ok(report),
      Ok(Err(message)) => Err(SyncError::Store(StoreError::Backend(message))),
      Err(_) => Err(SyncError::DrainerStopped),
    }
  }

  /// Request a drain without waiting for it.
  pub fn request(&self, origin: DrainOrigin) {
    match self.tx.try_send(DrainRequest {
      origin,
      reply: None,
    }) {
      Ok(()) => {}
      Err(mpsc::error::TrySendError::Full(request)) => {
        debug!(origin = %request.origin, "drain requests backed up, coalescing");
      }
      Err(mpsc::error::TrySendError::Closed(_)) => {
        warn!("drainer service is not running");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{progress_payload, ScriptedRemote};
  use crate::types::PROGRESS_UPDATE;
  use serde_json::json;
  use std::time::Duration;

  async fn queued_store(count: usize) -> LocalStore {
    let store = LocalStore::memory();
    for i in 0..count {
      store
        .append_outbox_entry(PROGRESS_UPDATE, &progress_payload(&format!("q{}", i), 10.0, 1))
        .await
        .unwrap();
    }
    store
  }

  #[tokio::test]
  async fn test_drain_replays_in_fifo_order() {
    let store = queued_store(3).await;
    let remote = Arc::new(ScriptedRemote::new());
    let drainer = OutboxDrainer::new(store.clone(), remote.clone());

    let report = drainer.drain(&DrainOrigin::Forced).await.unwrap();

    assert_eq!(report.replayed, 3);
    assert_eq!(remote.replayed_items(), vec!["q0", "q1", "q2"]);
    assert!(store.list_outbox_entries().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failure_stops_same_kind_and_keeps_entries() {
    let store = queued_store(3).await;
    let remote = Arc::new(ScriptedRemote::new());
    remote.fail_after(1);
    let drainer = OutboxDrainer::new(store.clone(), remote.clone());

    let report = drainer.drain(&DrainOrigin::Forced).await.unwrap();

    assert_eq!(report.replayed, 1);
    assert_eq!(report.deferred, 2);
    // Second entry was attempted and failed; the third was never tried.
    assert_eq!(remote.attempts(), 2);
    let left: Vec<u64> = store
      .list_outbox_entries()
      .await
      .unwrap()
      .iter()
      .map(|e| e.id)
      .collect();
    assert_eq!(left, vec![2, 3]);
  }

  #[tokio::test]
  async fn test_poison_entries_are_dropped() {
    let store = LocalStore::memory();
    store
      .append_outbox_entry(PROGRESS_UPDATE, &json!({"itemId": 42}))
      .await
      .unwrap();
    store
      .append_outbox_entry("badge-earned", &json!({"badge": "gold"}))
      .await
      .unwrap();
    store
      .append_outbox_entry(PROGRESS_UPDATE, &progress_payload("q1", 50.0, 5))
      .await
      .unwrap();
    let remote = Arc::new(ScriptedRemote::new());
    let drainer = OutboxDrainer::new(store.clone(), remote.clone());

    let report = drainer.drain(&DrainOrigin::Forced).await.unwrap();

    assert_eq!(report.dropped, 2);
    assert_eq!(report.replayed, 1);
    assert_eq!(remote.replayed_items(), vec!["q1"]);
    assert!(store.list_outbox_entries().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_direct_concurrent_drain_coalesces() {
    let store = queued_store(2).await;
    let remote = Arc::new(ScriptedRemote::new().with_delay(Duration::from_millis(50)));
    let drainer = OutboxDrainer::new(store, remote.clone());

    let (a, b) = tokio::join!(
      drainer.drain(&DrainOrigin::Reconnect),
      drainer.drain(&DrainOrigin::Forced)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.coalesced != b.coalesced);
    assert_eq!(a.replayed + b.replayed, 2);
    assert_eq!(remote.attempts(), 2);
  }

  #[tokio::test]
  async fn test_handle_requests_join_in_flight_drain() {
    let store = queued_store(2).await;
    let remote = Arc::new(ScriptedRemote::new().with_delay(Duration::from_millis(30)));
    let (handle, _task) =
      DrainerHandle::spawn(Arc::new(OutboxDrainer::new(store.clone(), remote.clone())));

    let (a, b, c) = tokio::join!(
      handle.drain(DrainOrigin::Reconnect),
      handle.drain(DrainOrigin::Forced),
      handle.drain(DrainOrigin::Background("quest-progress-sync".to_string()))
    );

    assert_eq!(a.unwrap().replayed, 2);
    assert!(b.is_ok() && c.is_ok());
    assert_eq!(remote.attempts(), 2);
    assert!(store.list_outbox_entries().await.unwrap().is_empty());
  }
}
