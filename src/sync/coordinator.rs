//! Page-side sync coordinator.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connectivity::{Connectivity, ConnectivityEvent};
use super::drainer::{DrainOrigin, DrainReport, DrainerHandle};
use crate::error::SyncError;
use crate::intercept::{BackgroundTaskRunner, QUEST_PROGRESS_SYNC};
use crate::store::{CatalogPutReport, LocalStore};
use crate::types::{CachedLessonItem, ProgressRecord, MAX_XP_EARNED, PROGRESS_UPDATE};

/// Owns the online/offline state and decides whether a write is also queued.
///
/// This is the API page components use; they never touch the store directly.
pub struct SyncCoordinator {
  store: LocalStore,
  drainer: DrainerHandle,
  connectivity: watch::Sender<Connectivity>,
  pending: watch::Sender<bool>,
  events: broadcast::Sender<ConnectivityEvent>,
  background: Option<Arc<dyn BackgroundTaskRunner>>,
}

impl SyncCoordinator {
  /// Create a coordinator starting from the host's current connectivity.
  pub async fn new(
    store: LocalStore,
    drainer: DrainerHandle,
    initially_online: bool,
  ) -> Result<Self, SyncError> {
    let has_pending = !store.list_outbox_entries().await?.is_empty();
    let (connectivity, _) = watch::channel(Connectivity::from(initially_online));
    let (pending, _) = watch::channel(has_pending);
    let (events, _) = broadcast::channel(16);

    info!(
      connectivity = %Connectivity::from(initially_online),
      has_pending,
      backend = store.backend_name(),
      "sync coordinator started"
    );

    Ok(Self {
      store,
      drainer,
      connectivity,
      pending,
      events,
      background: None,
    })
  }

  /// Register deferred writes with a background runner so they drain even
  /// when no page is alive.
  pub fn with_background_runner(mut self, runner: Arc<dyn BackgroundTaskRunner>) -> Self {
    self.background = Some(runner);
    self
  }

  /// Follow the host connectivity signal until it closes.
  ///
  /// Each signal is applied as soon as it arrives. Reconnect drains run on
  /// their own task, so a later offline signal is never held up by one.
  pub fn listen(self: &Arc<Self>, mut host: watch::Receiver<bool>) -> JoinHandle<()> {
    let coordinator = Arc::clone(self);
    tokio::spawn(async move {
      while host.changed().await.is_ok() {
        let online = *host.borrow_and_update();
        if coordinator.apply_connectivity(online) {
          let coordinator = Arc::clone(&coordinator);
          tokio::spawn(async move {
            if let Err(e) = coordinator.drain_outbox().await {
              warn!(error = %e, "sync after reconnect failed");
            }
          });
        }
      }
      debug!("host connectivity signal closed");
    })
  }

  /// Apply a connectivity signal from the host.
  ///
  /// Going back online broadcasts the change and drains the outbox; the
  /// report of that drain is returned. Repeated signals for the current
  /// state are ignored.
  pub async fn set_online(&self, online: bool) -> Result<Option<DrainReport>, SyncError> {
    if self.apply_connectivity(online) {
      return self.drain_outbox().await.map(Some);
    }
    Ok(None)
  }

  /// Record the new state and broadcast it. True when this went back online.
  fn apply_connectivity(&self, online: bool) -> bool {
    let next = Connectivity::from(online);
    let previous = self.connectivity.send_replace(next);
    if previous == next {
      return false;
    }

    info!(from = %previous, to = %next, "connectivity changed");
    // No subscribers is fine
    let _ = self.events.send(ConnectivityEvent {
      online,
      at: Utc::now(),
    });
    next.is_online()
  }

  /// Persist progress for an item.
  ///
  /// The local write always happens first. While offline a snapshot is also
  /// queued for replay. Never waits on the network.
  pub async fn save_progress(
    &self,
    item_id: &str,
    progress: f64,
    xp_earned: u64,
  ) -> Result<ProgressRecord, SyncError> {
    if item_id.trim().is_empty() {
      return Err(SyncError::EmptyItemId);
    }
    if !progress.is_finite() || !(0.0..=100.0).contains(&progress) {
      return Err(SyncError::InvalidProgress(progress));
    }
    if xp_earned > MAX_XP_EARNED {
      return Err(SyncError::InvalidXp(xp_earned));
    }

    let online = self.is_online();
    let record = ProgressRecord {
      item_id: item_id.to_string(),
      progress,
      xp_earned,
      updated_at: Utc::now(),
      synced: online,
    };

    if online {
      self.store.put_progress(&record).await?;
    } else {
      let payload = serde_json::to_value(&record).map_err(crate::error::StoreError::from)?;
      let id = self
        .store
        .put_progress_and_enqueue(&record, PROGRESS_UPDATE, &payload)
        .await?;
      self.pending.send_replace(true);
      debug!(item = %item_id, outbox_id = id, "queued progress for sync");

      if let Some(runner) = &self.background {
        runner.register(QUEST_PROGRESS_SYNC);
      }
    }

    Ok(record)
  }

  pub async fn get_progress(&self, item_id: &str) -> Result<Option<ProgressRecord>, SyncError> {
    Ok(self.store.get_progress(item_id).await?)
  }

  /// Cached catalog for offline browsing.
  pub async fn cached_catalog(&self) -> Result<Vec<CachedLessonItem>, SyncError> {
    Ok(self.store.get_all_catalog_items().await?)
  }

  pub async fn cached_catalog_for(&self, subject: &str) -> Result<Vec<CachedLessonItem>, SyncError> {
    Ok(self.store.get_catalog_by_subject(subject).await?)
  }

  pub async fn cache_catalog(&self, items: &[CachedLessonItem]) -> CatalogPutReport {
    self.store.put_catalog_items(items).await
  }

  /// Replay queued writes. Safe to call concurrently; overlapping calls
  /// share one drain.
  pub async fn drain_outbox(&self) -> Result<DrainReport, SyncError> {
    self.run_drain(DrainOrigin::Reconnect).await
  }

  /// Drain the outbox now, whatever the connectivity state.
  pub async fn force_sync(&self) -> Result<DrainReport, SyncError> {
    self.run_drain(DrainOrigin::Forced).await
  }

  async fn run_drain(&self, origin: DrainOrigin) -> Result<DrainReport, SyncError> {
    let report = self.drainer.drain(origin).await;
    self.refresh_pending().await?;
    report
  }

  async fn refresh_pending(&self) -> Result<(), SyncError> {
    let has_pending = !self.store.list_outbox_entries().await?.is_empty();
    self.pending.send_replace(has_pending);
    Ok(())
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.borrow().is_online()
  }

  pub fn has_pending_sync(&self) -> bool {
    *self.pending.borrow()
  }

  pub fn watch_connectivity(&self) -> watch::Receiver<Connectivity> {
    self.connectivity.subscribe()
  }

  pub fn watch_pending(&self) -> watch::Receiver<bool> {
    self.pending.subscribe()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
    self.events.subscribe()
  }
}
