//! Network fetch abstraction shared by the policy router, installer and prefetcher.
//!
//! Requests and responses are modelled after browser fetch semantics: a request
//! carries a mode that decides how cross-origin responses are typed, and a
//! response carries a type (`basic`, `cors`, `opaque`) that decides whether it
//! may be cached.

mod http;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

pub use http::HttpFetcher;

/// How cross-origin responses to a request are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Cross-origin responses are a network error
  SameOrigin,
  /// Cross-origin responses must pass an Access-Control-Allow-Origin check
  Cors,
  /// Cross-origin responses are returned opaque
  NoCors,
}

/// Scheduling hint for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
  #[default]
  High,
  /// Background work that should not compete with interactive requests
  Low,
}

/// An outgoing resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub url: Url,
  pub method: Method,
  pub mode: RequestMode,
  pub priority: Priority,
}

impl FetchRequest {
  /// A GET request in cors mode with normal priority.
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::Cors,
      priority: Priority::High,
    }
  }

  /// Parse `url` and build a GET request for it.
  pub fn parse(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self::get(url))
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  #[allow(dead_code)]
  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }
}

/// How a response may be inspected by the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response that passed the CORS check
  Cors,
  /// Cross-origin no-cors response; status, headers and body are hidden
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      other => Err(eyre!("Unknown response type '{}'", other)),
    }
  }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
  pub status: u16,
  pub response_type: ResponseType,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  /// The filtered response a browser hands out for no-cors requests.
  pub fn opaque() -> Self {
    Self {
      status: 0,
      response_type: ResponseType::Opaque,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// Status in the 200-299 range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Something that can perform a network fetch.
///
/// A returned `Err` means the fetch itself failed (offline, DNS, CORS
/// rejection). HTTP error statuses resolve to `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}
