//! Caching strategies and the dispatch table that picks one per request.

use reqwest::Method;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::fetcher::Fetcher;
use super::request::{Request, RequestMode, Response};
use super::response_cache::ResponseCache;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Data endpoints: network, then stored copy, then offline marker
  NetworkFirst,
  /// Build assets: stored copy, network only on a miss
  CacheFirst,
  /// Page navigations: stored copy now, refresh in the background
  StaleWhileRevalidate,
  /// Non-GET requests are never cached
  Passthrough,
}

/// Request shapes that select a strategy.
#[derive(Debug, Clone)]
pub struct RouteRules {
  /// Path prefix reserved for data APIs
  pub data_prefix: String,
  /// Path fragments marking bundler-hashed static output
  pub static_markers: Vec<String>,
}

impl Default for RouteRules {
  fn default() -> Self {
    Self {
      data_prefix: "/api/".to_string(),
      static_markers: vec!["/_next/static/".to_string()],
    }
  }
}

impl RouteRules {
  pub fn is_data(&self, request: &Request) -> bool {
    request.url.path().starts_with(&self.data_prefix)
  }

  /// Pick the strategy for a request. Data endpoints win over everything
  /// else; unmatched GETs fall back to network-first.
  pub fn classify(&self, request: &Request) -> Strategy {
    if request.method != Method::GET {
      return Strategy::Passthrough;
    }
    if self.is_data(request) {
      return Strategy::NetworkFirst;
    }

    let path = request.url.path();
    if request.destination.is_static_asset()
      || self.static_markers.iter().any(|m| path.contains(m.as_str()))
    {
      return Strategy::CacheFirst;
    }
    if request.mode == RequestMode::Navigate {
      return Strategy::StaleWhileRevalidate;
    }
    Strategy::NetworkFirst
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Stored copy for this request
  Cache,
  /// Stored copy of the root page standing in for a missing page
  RootFallback,
  /// Synthesized offline response
  Offline,
}

/// A response plus, for stale-while-revalidate hits, the background refresh.
#[derive(Debug)]
pub struct Served {
  pub response: Response,
  pub source: CacheSource,
  pub revalidation: Option<JoinHandle<()>>,
}

impl Served {
  fn new(response: Response, source: CacheSource) -> Self {
    Self {
      response,
      source,
      revalidation: None,
    }
  }
}

/// Serves requests through the response cache using the dispatch table.
#[derive(Clone)]
pub struct Interceptor {
  cache: Arc<dyn ResponseCache>,
  fetcher: Arc<dyn Fetcher>,
  rules: RouteRules,
  /// Partition that receives runtime copies
  runtime_partition: String,
  root_page: Url,
}

impl Interceptor {
  pub fn new(
    cache: Arc<dyn ResponseCache>,
    fetcher: Arc<dyn Fetcher>,
    rules: RouteRules,
    runtime_partition: impl Into<String>,
    root_page: Url,
  ) -> Self {
    Self {
      cache,
      fetcher,
      rules,
      runtime_partition: runtime_partition.into(),
      root_page,
    }
  }

  pub fn rules(&self) -> &RouteRules {
    &self.rules
  }

  /// Serve a request. Never fails; network errors turn into a stored copy
  /// or a synthesized offline response.
  pub async fn serve(&self, request: &Request) -> Served {
    let strategy = self.rules.classify(request);
    debug!(url = %request.url, ?strategy, "intercepted request");

    match strategy {
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
      Strategy::Passthrough => self.passthrough(request).await,
    }
  }

  async fn network_first(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store_copy(request, &response).await;
        }
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        if let Some(cached) = self.lookup(request).await {
          return Served::new(cached, CacheSource::Cache);
        }
        Served::new(self.offline_for(request), CacheSource::Offline)
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Served {
    if let Some(cached) = self.lookup(request).await {
      return Served::new(cached, CacheSource::Cache);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store_copy(request, &response).await;
        }
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "failed to fetch asset");
        Served::new(Response::offline_page(), CacheSource::Offline)
      }
    }
  }

  async fn stale_while_revalidate(&self, request: &Request) -> Served {
    if let Some(cached) = self.lookup(request).await {
      let revalidation = self.spawn_revalidation(request.clone());
      return Served {
        response: cached,
        source: CacheSource::Cache,
        revalidation: Some(revalidation),
      };
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store_copy(request, &response).await;
        }
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "page unavailable, falling back to root page");
        match self.lookup(&Request::navigate(self.root_page.clone())).await {
          Some(root) => Served::new(root, CacheSource::RootFallback),
          None => Served::new(Response::offline_page(), CacheSource::Offline),
        }
      }
    }
  }

  async fn passthrough(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => Served::new(response, CacheSource::Network),
      Err(e) => {
        debug!(url = %request.url, method = %request.method, error = %e, "passthrough failed");
        Served::new(self.offline_for(request), CacheSource::Offline)
      }
    }
  }

  /// Refresh the stored copy of `request` in the background.
  fn spawn_revalidation(&self, request: Request) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      match this.fetcher.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          this.store_copy(&request, &response).await;
          debug!(url = %request.url, "revalidated cached page");
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "revalidation returned error status");
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "revalidation failed, keeping cached page");
        }
      }
    })
  }

  fn offline_for(&self, request: &Request) -> Response {
    if self.rules.is_data(request) {
      Response::offline_data()
    } else {
      Response::offline_page()
    }
  }

  async fn lookup(&self, request: &Request) -> Option<Response> {
    match self.cache.lookup(request).await {
      Ok(found) => found,
      Err(e) => {
        warn!(url = %request.url, error = %e, "response cache lookup failed");
        None
      }
    }
  }

  async fn store_copy(&self, request: &Request, response: &Response) {
    if let Err(e) = self
      .cache
      .put(&self.runtime_partition, request, response)
      .await
    {
      warn!(url = %request.url, error = %e, "failed to store response copy");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intercept::request::Destination;
  use crate::intercept::response_cache::MemoryResponseCache;
  use crate::testing::FakeFetcher;

  const RUNTIME: &str = "academy-dynamic-v1";

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:3000").unwrap().join(path).unwrap()
  }

  fn interceptor(fetcher: Arc<FakeFetcher>) -> (Interceptor, Arc<MemoryResponseCache>) {
    let cache = Arc::new(MemoryResponseCache::new());
    let interceptor = Interceptor::new(
      cache.clone(),
      fetcher,
      RouteRules::default(),
      RUNTIME,
      url("/"),
    );
    (interceptor, cache)
  }

  #[test]
  fn test_dispatch_table() {
    let rules = RouteRules::default();
    assert_eq!(rules.classify(&Request::get(url("/api/quests"))), Strategy::NetworkFirst);
    assert_eq!(
      rules.classify(&Request::navigate(url("/api/quests"))),
      Strategy::NetworkFirst
    );
    assert_eq!(
      rules.classify(&Request::asset(url("/avatar.png"), Destination::Image)),
      Strategy::CacheFirst
    );
    assert_eq!(
      rules.classify(&Request::get(url("/_next/static/chunks/main-abc123.js"))),
      Strategy::CacheFirst
    );
    assert_eq!(
      rules.classify(&Request::navigate(url("/journey"))),
      Strategy::StaleWhileRevalidate
    );
    assert_eq!(rules.classify(&Request::get(url("/manifest.json"))), Strategy::NetworkFirst);
    assert_eq!(
      rules.classify(&Request::get(url("/api/sync")).with_method(Method::POST)),
      Strategy::Passthrough
    );
  }

  #[tokio::test]
  async fn test_network_first_stores_and_falls_back() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.respond("/api/quests", Response::new(200, "[1,2]"));
    let (interceptor, _cache) = interceptor(fetcher.clone());
    let request = Request::get(url("/api/quests"));

    let served = interceptor.serve(&request).await;
    assert_eq!(served.source, CacheSource::Network);

    fetcher.set_offline(true);
    let served = interceptor.serve(&request).await;
    assert_eq!(served.source, CacheSource::Cache);
    assert_eq!(served.response.text(), "[1,2]");
  }

  #[tokio::test]
  async fn test_network_first_offline_marker_without_copy() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_offline(true);
    let (interceptor, _cache) = interceptor(fetcher);

    let served = interceptor.serve(&Request::get(url("/api/leaderboard"))).await;

    assert_eq!(served.source, CacheSource::Offline);
    assert!(served.response.is_offline_marker());
  }

  #[tokio::test]
  async fn test_network_first_does_not_store_error_status() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.respond("/api/quests", Response::new(500, "boom"));
    let (interceptor, cache) = interceptor(fetcher);
    let request = Request::get(url("/api/quests"));

    let served = interceptor.serve(&request).await;

    assert_eq!(served.response.status, 500);
    assert!(cache.lookup(&request).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_cache_first_never_refetches_existing_copy() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.respond("/_next/static/app.js", Response::new(200, "network copy"));
    let (interceptor, cache) = interceptor(fetcher.clone());
    let request = Request::asset(url("/_next/static/app.js"), Destination::Script);

    interceptor.serve(&request).await;
    assert_eq!(fetcher.calls("/_next/static/app.js"), 1);

    cache
      .put(RUNTIME, &request, &Response::new(200, "mutated copy"))
      .await
      .unwrap();
    let served = interceptor.serve(&request).await;

    assert_eq!(served.source, CacheSource::Cache);
    assert_eq!(served.response.text(), "mutated copy");
    assert_eq!(fetcher.calls("/_next/static/app.js"), 1);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_updates_after_refetch() {
    let fetcher = Arc::new(FakeFetcher::new());
    let (interceptor, cache) = interceptor(fetcher.clone());
    let request = Request::navigate(url("/journey"));
    cache
      .put(RUNTIME, &request, &Response::new(200, "old page"))
      .await
      .unwrap();
    fetcher.respond("/journey", Response::new(200, "new page"));
    let gate = fetcher.hold();

    let served = interceptor.serve(&request).await;

    assert_eq!(served.response.text(), "old page");
    assert_eq!(cache.lookup(&request).await.unwrap().unwrap().text(), "old page");

    gate.notify_one();
    served.revalidation.unwrap().await.unwrap();
    assert_eq!(cache.lookup(&request).await.unwrap().unwrap().text(), "new page");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_keeps_copy_when_network_fails() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_offline(true);
    let (interceptor, cache) = interceptor(fetcher);
    let request = Request::navigate(url("/journey"));
    cache
      .put(RUNTIME, &request, &Response::new(200, "stored page"))
      .await
      .unwrap();

    let served = interceptor.serve(&request).await;
    served.revalidation.unwrap().await.unwrap();

    assert_eq!(served.response.text(), "stored page");
    assert_eq!(cache.lookup(&request).await.unwrap().unwrap().text(), "stored page");
  }

  #[tokio::test]
  async fn test_navigation_falls_back_to_root_then_placeholder() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_offline(true);
    let (interceptor, cache) = interceptor(fetcher);

    let served = interceptor.serve(&Request::navigate(url("/profile"))).await;
    assert_eq!(served.source, CacheSource::Offline);
    assert_eq!(served.response.status, 503);

    cache
      .put("academy-static-v1", &Request::navigate(url("/")), &Response::new(200, "home"))
      .await
      .unwrap();
    let served = interceptor.serve(&Request::navigate(url("/profile"))).await;
    assert_eq!(served.source, CacheSource::RootFallback);
    assert_eq!(served.response.text(), "home");
  }

  #[tokio::test]
  async fn test_passthrough_is_not_cached() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.respond("/api/sync/quest-progress", Response::new(201, "ok"));
    let (interceptor, cache) = interceptor(fetcher);
    let request = Request::get(url("/api/sync/quest-progress")).with_method(Method::POST);

    let served = interceptor.serve(&request).await;

    assert_eq!(served.response.status, 201);
    assert!(cache.partitions().await.unwrap().is_empty());
  }
}
