//! Generation handles over a storage backend.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;

use super::storage::{CacheStorage, GenerationInfo};
use super::traits::{RequestIdentity, StoredResponse};
use crate::net::{FetchRequest, FetchResponse, Fetcher, ResponseType};

/// Process-wide entry point to the cache.
///
/// Opened once at startup and handed to the router and prefetcher.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheStore<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Open (creating if needed) a named cache generation.
  pub fn open(&self, generation: &str) -> Result<Cache<S>> {
    self.storage.open_generation(generation)?;

    Ok(Cache {
      storage: Arc::clone(&self.storage),
      generation: generation.to_string(),
    })
  }

  pub fn generations(&self) -> Result<Vec<GenerationInfo>> {
    self.storage.generations()
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Handle to one cache generation.
pub struct Cache<S: CacheStorage> {
  storage: Arc<S>,
  generation: String,
}

impl<S: CacheStorage> Cache<S> {
  /// Whether background fetches through this handle can persist anything.
  pub fn supports_background_fetch(&self) -> bool {
    self.storage.supports_background_fetch()
  }

  /// Find the stored response for a request, if any.
  pub fn match_request(&self, request: &FetchRequest) -> Result<Option<StoredResponse>> {
    let identity = RequestIdentity::from_request(request);
    self.storage.lookup(&self.generation, &identity)
  }

  /// Store a response under the request's identity, replacing any previous one.
  pub fn put(&self, request: &FetchRequest, response: &FetchResponse) -> Result<()> {
    let identity = RequestIdentity::from_request(request);
    self.storage.store(
      &self.generation,
      &identity,
      &StoredResponse::from_response(response),
    )
  }

  /// Fetch every request and store all responses, or store nothing.
  ///
  /// Fails if any fetch fails, returns a non-2xx status, or is opaque.
  pub async fn add_all(&self, fetcher: &dyn Fetcher, requests: &[FetchRequest]) -> Result<()> {
    let responses = try_join_all(requests.iter().map(|request| async move {
      let response = fetcher.fetch(request).await?;
      if response.response_type == ResponseType::Opaque {
        return Err(eyre!("Opaque response for {} cannot be cached", request.url));
      }
      if !response.is_ok() {
        return Err(eyre!(
          "Unexpected status {} for {}",
          response.status,
          request.url
        ));
      }
      Ok((
        RequestIdentity::from_request(request),
        StoredResponse::from_response(&response),
      ))
    }))
    .await?;

    self.storage.store_all(&self.generation, &responses)
  }
}

impl<S: CacheStorage> Clone for Cache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::mock::{response, MockFetcher};
  use crate::net::RequestMode;

  fn shell(paths: &[&str]) -> Vec<FetchRequest> {
    paths
      .iter()
      .map(|p| {
        FetchRequest::parse(&format!("http://localhost:8080{}", p))
          .unwrap()
          .with_mode(RequestMode::SameOrigin)
      })
      .collect()
  }

  #[test]
  fn test_put_then_match() {
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let cache = store.open("v1").unwrap();
    let req = FetchRequest::parse("https://cdn.jsdelivr.net/a.png").unwrap();

    assert!(cache.match_request(&req).unwrap().is_none());
    cache
      .put(&req, &response(200, ResponseType::Cors, "a"))
      .unwrap();
    assert_eq!(cache.match_request(&req).unwrap().unwrap().body, b"a");
  }

  #[test]
  fn test_put_same_identity_twice_keeps_latest() {
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let cache = store.open("v1").unwrap();
    let req = FetchRequest::parse("https://cdn.jsdelivr.net/a.png").unwrap();

    cache
      .put(&req, &response(200, ResponseType::Cors, "old"))
      .unwrap();
    cache
      .put(&req, &response(200, ResponseType::Cors, "new"))
      .unwrap();
    assert_eq!(cache.match_request(&req).unwrap().unwrap().body, b"new");
  }

  #[tokio::test]
  async fn test_add_all_stores_every_request() {
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let cache = store.open("v1").unwrap();
    let fetcher = MockFetcher::new(|req| Ok(response(200, ResponseType::Basic, req.url.path())));
    let requests = shell(&["/", "/index.html", "/css/main.css"]);

    cache.add_all(&fetcher, &requests).await.unwrap();

    assert_eq!(fetcher.call_count(), 3);
    for req in &requests {
      let stored = cache.match_request(req).unwrap().unwrap();
      assert_eq!(stored.body, req.url.path().as_bytes());
    }
    assert_eq!(store.generations().unwrap()[0].entries, 3);
  }

  #[tokio::test]
  async fn test_add_all_is_all_or_nothing_on_bad_status() {
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let cache = store.open("v1").unwrap();
    let fetcher = MockFetcher::new(|req| {
      let status = if req.url.path() == "/css/main.css" { 404 } else { 200 };
      Ok(response(status, ResponseType::Basic, "x"))
    });
    let requests = shell(&["/", "/index.html", "/css/main.css"]);

    assert!(cache.add_all(&fetcher, &requests).await.is_err());
    for req in &requests {
      assert!(cache.match_request(req).unwrap().is_none());
    }
  }

  #[tokio::test]
  async fn test_add_all_fails_on_network_error() {
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let cache = store.open("v1").unwrap();
    let fetcher = MockFetcher::new(|req| {
      if req.url.path() == "/index.html" {
        Err(eyre!("offline"))
      } else {
        Ok(response(200, ResponseType::Basic, "x"))
      }
    });
    let requests = shell(&["/", "/index.html"]);

    assert!(cache.add_all(&fetcher, &requests).await.is_err());
    assert!(cache.match_request(&requests[0]).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_add_all_rejects_opaque() {
    let store = CacheStore::new(SqliteStorage::open_in_memory().unwrap());
    let cache = store.open("v1").unwrap();
    let fetcher = MockFetcher::new(|_| Ok(FetchResponse::opaque()));

    assert!(cache.add_all(&fetcher, &shell(&["/"])).await.is_err());
  }
}
