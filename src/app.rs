//! Wires both execution contexts together from a [`Config`].
//!
//! The page context is the [`SyncCoordinator`]; the background context is
//! the [`BackgroundWorker`] behind a [`WorkerHandle`]. They share the durable
//! store and the drainer service, and otherwise talk over channels.

use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::host::ConnectivityProbe;
use crate::intercept::{
  BackgroundWorker, ConnectivityTaskRunner, Fetcher, HttpFetcher, Interceptor, MemoryResponseCache,
  ResponseCache, SqliteResponseCache, WorkerHandle, WorkerSettings,
};
use crate::store::LocalStore;
use crate::sync::{DrainerHandle, HttpRemote, OutboxDrainer, RemoteEndpoint, SyncCoordinator};

/// Collaborators the app is assembled from.
pub struct Parts {
  pub store: LocalStore,
  pub cache: Arc<dyn ResponseCache>,
  pub fetcher: Arc<dyn Fetcher>,
  pub remote: Arc<dyn RemoteEndpoint>,
}

impl Parts {
  /// Durable parts backed by the configured database and real HTTP.
  ///
  /// When the database can't be opened everything still works, but only in
  /// memory.
  pub fn from_config(config: &Config, client: Client) -> Result<Self> {
    let path = match &config.storage.path {
      Some(path) => Ok(path.clone()),
      None => Database::default_path(),
    };

    let (store, cache): (LocalStore, Arc<dyn ResponseCache>) =
      match path.and_then(|p| Database::open(&p)) {
        Ok(db) => (
          LocalStore::from_database(db.clone()),
          Arc::new(SqliteResponseCache::new(db)),
        ),
        Err(e) => {
          warn!(error = %e, "offline cache disabled, using memory-only store");
          (LocalStore::memory(), Arc::new(MemoryResponseCache::new()))
        }
      };

    let remote = HttpRemote::new(client.clone(), &config.base_url()?, &config.sync.progress_path)
      .map_err(|e| eyre!("Invalid sync.progress_path {:?}: {}", config.sync.progress_path, e))?;

    Ok(Self {
      store,
      cache,
      fetcher: Arc::new(HttpFetcher::new(client)),
      remote: Arc::new(remote),
    })
  }
}

pub struct App {
  config: Config,
  store: LocalStore,
  cache: Arc<dyn ResponseCache>,
  coordinator: Arc<SyncCoordinator>,
  worker: WorkerHandle,
  signal: Option<watch::Sender<bool>>,
  tasks: Vec<JoinHandle<()>>,
}

impl App {
  /// Probe the origin and start both contexts with real collaborators.
  pub async fn start(config: Config, force_offline: bool) -> Result<Self> {
    let client = Client::builder()
      .user_agent(concat!("safari-sync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let online = if force_offline {
      false
    } else {
      ConnectivityProbe::new(client.clone(), config.base_url()?)
        .probe()
        .await
    };
    let parts = Parts::from_config(&config, client)?;
    Self::assemble(config, parts, online).await
  }

  pub async fn assemble(config: Config, parts: Parts, initially_online: bool) -> Result<Self> {
    let Parts {
      store,
      cache,
      fetcher,
      remote,
    } = parts;
    let (signal, online) = watch::channel(initially_online);
    let mut tasks = Vec::new();

    let (drainer, drainer_task) =
      DrainerHandle::spawn(Arc::new(OutboxDrainer::new(store.clone(), remote)));
    tasks.push(drainer_task);

    let partitions = config.cache.partitions();
    let interceptor = Interceptor::new(
      cache.clone(),
      fetcher.clone(),
      config.cache.route_rules(),
      partitions.runtime.clone(),
      config.resolve(&config.cache.root_page)?,
    );
    let settings = WorkerSettings {
      version: config.cache.version.clone(),
      partitions,
      manifest: config.precache_manifest()?,
    };
    let worker = BackgroundWorker::new(
      settings,
      interceptor,
      cache.clone(),
      fetcher,
      store.clone(),
      drainer.clone(),
      online.clone(),
    );
    let (worker, worker_task) = worker.spawn();
    tasks.push(worker_task);

    let runner = ConnectivityTaskRunner::new(worker.clone(), online.clone());
    let coordinator = SyncCoordinator::new(store.clone(), drainer, initially_online)
      .await?
      .with_background_runner(Arc::new(runner));
    let coordinator = Arc::new(coordinator);
    tasks.push(coordinator.listen(online));

    info!(
      online = initially_online,
      durable = store.is_durable(),
      version = %config.cache.version,
      "safari-sync started"
    );

    Ok(Self {
      config,
      store,
      cache,
      coordinator,
      worker,
      signal: Some(signal),
      tasks,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn store(&self) -> &LocalStore {
    &self.store
  }

  pub fn response_cache(&self) -> &Arc<dyn ResponseCache> {
    &self.cache
  }

  pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
    &self.coordinator
  }

  pub fn worker(&self) -> &WorkerHandle {
    &self.worker
  }

  /// Push a host connectivity signal by hand.
  pub fn set_host_online(&self, online: bool) {
    if let Some(signal) = &self.signal {
      signal.send_replace(online);
    }
  }

  /// Hand the connectivity signal to a periodic probe of the origin.
  pub fn monitor_connectivity(&mut self, client: Client) -> Result<()> {
    let signal = self
      .signal
      .take()
      .ok_or_else(|| eyre!("Connectivity is already being monitored"))?;
    let probe = ConnectivityProbe::new(client, self.config.base_url()?);
    let interval = Duration::from_secs(self.config.sync.probe_interval_secs.max(1));
    self.tasks.push(probe.monitor(interval, signal));
    Ok(())
  }

  /// Stop background tasks and close the store. Queued writes stay in it.
  pub async fn shutdown(self) {
    for task in self.tasks {
      task.abort();
    }
    if let Err(e) = self.store.close().await {
      warn!(error = %e, "failed to close local store");
    }
  }
}
