//! Recording fetcher for tests.

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Mutex;
use tokio::time::Instant;

use super::{FetchRequest, FetchResponse, Fetcher, ResponseType};

type Responder = Box<dyn Fn(&FetchRequest) -> Result<FetchResponse> + Send + Sync>;

/// Fetcher that answers from a closure and records every call.
pub struct MockFetcher {
  responder: Responder,
  calls: Mutex<Vec<(FetchRequest, Instant)>>,
}

impl MockFetcher {
  pub fn new<F>(responder: F) -> Self
  where
    F: Fn(&FetchRequest) -> Result<FetchResponse> + Send + Sync + 'static,
  {
    Self {
      responder: Box::new(responder),
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Always answers 200 cors with the URL as body.
  pub fn ok() -> Self {
    Self::new(|req| Ok(response(200, ResponseType::Cors, req.url.as_str())))
  }

  /// Every request seen, in call order.
  pub fn requests(&self) -> Vec<FetchRequest> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|(r, _)| r.clone())
      .collect()
  }

  pub fn urls(&self) -> Vec<String> {
    self
      .requests()
      .into_iter()
      .map(|r| r.url.to_string())
      .collect()
  }

  pub fn times(&self) -> Vec<Instant> {
    self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    self
      .calls
      .lock()
      .unwrap()
      .push((request.clone(), Instant::now()));
    (self.responder)(request)
  }
}

pub fn response(status: u16, response_type: ResponseType, body: &str) -> FetchResponse {
  FetchResponse {
    status,
    response_type,
    headers: vec![("content-type".to_string(), "image/png".to_string())],
    body: body.as_bytes().to_vec(),
  }
}
