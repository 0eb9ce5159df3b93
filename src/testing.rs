//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{FetchError, ReplayError};
use crate::intercept::{BackgroundTaskRunner, Fetcher, Request, Response};
use crate::sync::RemoteEndpoint;
use crate::types::{ProgressRecord, SyncPayload};

pub fn progress_payload(item_id: &str, progress: f64, xp: u64) -> Value {
  serde_json::to_value(ProgressRecord {
    item_id: item_id.to_string(),
    progress,
    xp_earned: xp,
    updated_at: Utc::now(),
    synced: false,
  })
  .unwrap()
}

/// Remote endpoint that records replays and can be told to start failing.
pub struct ScriptedRemote {
  replayed: Mutex<Vec<ProgressRecord>>,
  attempts: AtomicUsize,
  fail_after: Mutex<Option<usize>>,
  delay: Duration,
}

impl ScriptedRemote {
  pub fn new() -> Self {
    Self {
      replayed: Mutex::new(Vec::new()),
      attempts: AtomicUsize::new(0),
      fail_after: Mutex::new(None),
      delay: Duration::ZERO,
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// Accept `successes` replays, then fail every later one.
  pub fn fail_after(&self, successes: usize) {
    *self.fail_after.lock().unwrap() = Some(successes);
  }

  pub fn attempts(&self) -> usize {
    self.attempts.load(Ordering::SeqCst)
  }

  pub fn replayed(&self) -> Vec<ProgressRecord> {
    self.replayed.lock().unwrap().clone()
  }

  pub fn replayed_items(&self) -> Vec<String> {
    self.replayed().into_iter().map(|r| r.item_id).collect()
  }
}

#[async_trait]
impl RemoteEndpoint for ScriptedRemote {
  async fn replay(&self, payload: &SyncPayload) -> Result<(), ReplayError> {
    self.attempts.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }

    let mut replayed = self.replayed.lock().unwrap();
    if let Some(limit) = *self.fail_after.lock().unwrap() {
      if replayed.len() >= limit {
        return Err(ReplayError::Status(503));
      }
    }
    match payload {
      SyncPayload::Progress(record) => replayed.push(record.clone()),
    }
    Ok(())
  }
}

/// Network stand-in keyed by URL path.
pub struct FakeFetcher {
  responses: Mutex<HashMap<String, Response>>,
  calls: Mutex<HashMap<String, usize>>,
  offline: AtomicBool,
  gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      calls: Mutex::new(HashMap::new()),
      offline: AtomicBool::new(false),
      gate: Mutex::new(None),
    }
  }

  pub fn respond(&self, path: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(path.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Make every fetch wait until the returned gate is notified.
  pub fn hold(&self) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    *self.gate.lock().unwrap() = Some(gate.clone());
    gate
  }

  pub fn calls(&self, path: &str) -> usize {
    self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let path = request.url.path().to_string();
    *self.calls.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.notified().await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(FetchError::Network("offline".to_string()));
    }
    Ok(
      self
        .responses
        .lock()
        .unwrap()
        .get(&path)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

/// Background runner that only records registrations.
#[derive(Default)]
pub struct RecordingRunner {
  tags: Mutex<Vec<String>>,
}

impl RecordingRunner {
  pub fn tags(&self) -> Vec<String> {
    self.tags.lock().unwrap().clone()
  }
}

impl BackgroundTaskRunner for RecordingRunner {
  fn register(&self, tag: &str) {
    self.tags.lock().unwrap().push(tag.to_string());
  }
}
