//! Request and response types seen by the interception layer.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// What kind of resource the request is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Script,
  Style,
  Image,
  Font,
}

impl Destination {
  pub fn is_static_asset(self) -> bool {
    matches!(
      self,
      Destination::Script | Destination::Style | Destination::Image | Destination::Font
    )
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  #[default]
  Cors,
  Navigate,
  NoCors,
  SameOrigin,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
    }
  }

  /// A full-page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn asset(url: Url, destination: Destination) -> Self {
    Self {
      destination,
      mode: RequestMode::NoCors,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  /// Stable, fixed-length key identifying this request in the response cache.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response, either from the network, the cache or synthesized offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

/// Status used for synthesized offline responses.
pub const OFFLINE_STATUS: u16 = 503;

const OFFLINE_PAGE_BODY: &str = "Offline - Please check your connection";

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// Offline answer for data endpoints. Carries `"offline": true` so callers
  /// can tell "you are offline" apart from "no data".
  pub fn offline_data() -> Self {
    let body = serde_json::json!({
      "error": "Offline",
      "message": "This feature requires internet connection",
      "offline": true,
    });
    Self::new(OFFLINE_STATUS, body.to_string()).with_header("content-type", "application/json")
  }

  /// Last-resort placeholder for pages and assets.
  pub fn offline_page() -> Self {
    Self::new(OFFLINE_STATUS, OFFLINE_PAGE_BODY).with_header("content-type", "text/plain")
  }

  /// Whether this is a synthesized offline data response.
  pub fn is_offline_marker(&self) -> bool {
    if self.status != OFFLINE_STATUS {
      return false;
    }
    serde_json::from_slice::<serde_json::Value>(&self.body)
      .map(|v| v.get("offline") == Some(&serde_json::Value::Bool(true)))
      .unwrap_or(false)
  }
}
