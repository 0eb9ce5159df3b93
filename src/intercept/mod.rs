//! Network interception layer.
//!
//! Every request a page makes passes through the [`Interceptor`], which picks
//! a caching strategy from the request's shape and serves from the network,
//! the [`ResponseCache`], or a synthesized offline response. The
//! [`BackgroundWorker`] hosts the interceptor together with install,
//! activation, page messages and background sync.

mod fetcher;
mod request;
mod response_cache;
mod runner;
mod strategy;
mod worker;

pub use fetcher::{Fetcher, HttpFetcher};
pub use request::{Destination, Request, RequestMode, Response, OFFLINE_STATUS};
pub use response_cache::{MemoryResponseCache, ResponseCache, SqliteResponseCache};
pub use runner::{BackgroundTaskRunner, ConnectivityTaskRunner, QUEST_PROGRESS_SYNC, STUDENT_DATA_SYNC};
pub use strategy::{CacheSource, Interceptor, RouteRules, Served, Strategy};
pub use worker::{
  BackgroundWorker, CachePartitions, InstallReport, WorkerEvent, WorkerHandle, WorkerMessage,
  WorkerReply, WorkerSettings, WorkerState,
};
