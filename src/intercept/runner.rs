//! Background task scheduling for deferred sync.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

use super::worker::WorkerHandle;

/// Tag that drains queued progress writes.
pub const QUEST_PROGRESS_SYNC: &str = "quest-progress-sync";

/// Tag reserved for profile data sync.
pub const STUDENT_DATA_SYNC: &str = "student-data-sync";

/// Schedules a tagged background task to run once connectivity allows,
/// independent of any page being alive.
pub trait BackgroundTaskRunner: Send + Sync {
  /// Register `tag`. Registering a tag that is already scheduled is a no-op.
  fn register(&self, tag: &str);
}

/// Fires registered tags at the background worker when the host reports
/// connectivity.
pub struct ConnectivityTaskRunner {
  worker: WorkerHandle,
  online: watch::Receiver<bool>,
  scheduled: Arc<Mutex<HashSet<String>>>,
}

impl ConnectivityTaskRunner {
  pub fn new(worker: WorkerHandle, online: watch::Receiver<bool>) -> Self {
    Self {
      worker,
      online,
      scheduled: Arc::new(Mutex::new(HashSet::new())),
    }
  }
}

impl BackgroundTaskRunner for ConnectivityTaskRunner {
  fn register(&self, tag: &str) {
    let newly_scheduled = match self.scheduled.lock() {
      Ok(mut scheduled) => scheduled.insert(tag.to_string()),
      Err(_) => false,
    };
    if !newly_scheduled {
      debug!(tag, "background sync already scheduled");
      return;
    }

    let mut online = self.online.clone();
    let worker = self.worker.clone();
    let scheduled = Arc::clone(&self.scheduled);
    let tag = tag.to_string();

    tokio::spawn(async move {
      if online.wait_for(|is_online| *is_online).await.is_err() {
        debug!(%tag, "connectivity signal closed before background sync ran");
        return;
      }
      if let Ok(mut scheduled) = scheduled.lock() {
        scheduled.remove(&tag);
      }
      debug!(%tag, "firing background sync");
      worker.sync(&tag).await;
    });
  }
}
