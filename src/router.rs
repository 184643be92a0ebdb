//! Per-request cache policy selection and dispatch.
//!
//! Every request is first classified into a [`Policy`], then handed to the
//! strategy for that policy:
//!
//! - **Cache-first** for remote tile images: a stored response is returned
//!   without touching the network; misses are fetched and successful CORS
//!   responses are stored.
//! - **Network-first** for everything else: the live response always wins and
//!   the store is only consulted when the fetch itself fails.

use color_eyre::Result;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{Cache, CacheResult, CacheStorage};
use crate::config::TileSourceConfig;
use crate::net::{FetchRequest, FetchResponse, Fetcher, ResponseType};

/// Fetch strategy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
  CacheFirst,
  NetworkFirst,
}

/// Routes requests through the cache according to their policy.
pub struct PolicyRouter<S: CacheStorage> {
  cache: Cache<S>,
  fetcher: Arc<dyn Fetcher>,
  tiles: TileSourceConfig,
}

impl<S: CacheStorage> PolicyRouter<S> {
  pub fn new(cache: Cache<S>, fetcher: Arc<dyn Fetcher>, tiles: TileSourceConfig) -> Self {
    Self {
      cache,
      fetcher,
      tiles,
    }
  }

  pub fn cache(&self) -> &Cache<S> {
    &self.cache
  }

  /// Tile images on the CDN are cache-first, everything else network-first.
  pub fn classify(&self, request: &FetchRequest) -> Policy {
    if request.method != Method::GET {
      return Policy::NetworkFirst;
    }

    let url = &request.url;
    let on_cdn = url.host_str() == Some(self.tiles.cdn_host.as_str());
    let tile_path = url.path().contains(&self.tiles.path_signature) || url.path().ends_with(".png");

    if on_cdn && tile_path {
      Policy::CacheFirst
    } else {
      Policy::NetworkFirst
    }
  }

  /// Serve a request according to its policy.
  pub async fn handle(&self, request: &FetchRequest) -> Result<CacheResult<FetchResponse>> {
    match self.classify(request) {
      Policy::CacheFirst => self.cache_first(request).await,
      Policy::NetworkFirst => self.network_first(request).await,
    }
  }

  async fn cache_first(&self, request: &FetchRequest) -> Result<CacheResult<FetchResponse>> {
    match self.cache.match_request(request) {
      Ok(Some(stored)) => {
        debug!(url = %request.url, "tile cache hit");
        let cached_at = stored.cached_at;
        return Ok(CacheResult::from_cache(stored.into_response(), cached_at));
      }
      Ok(None) => {}
      Err(e) => info!(url = %request.url, error = %e, "tile cache lookup failed"),
    }

    // Transport failures propagate; the renderer leaves the cell blank
    let response = self.fetcher.fetch(request).await?;

    if response.status != 200 || response.response_type != ResponseType::Cors {
      debug!(
        url = %request.url,
        status = response.status,
        response_type = response.response_type.as_str(),
        "not caching tile response"
      );
      return Ok(CacheResult::from_network(response));
    }

    if let Err(e) = self.cache.put(request, &response) {
      info!(url = %request.url, error = %e, "failed to store tile");
    }

    Ok(CacheResult::from_network(response))
  }

  async fn network_first(&self, request: &FetchRequest) -> Result<CacheResult<FetchResponse>> {
    let error = match self.fetcher.fetch(request).await {
      Ok(response) => return Ok(CacheResult::from_network(response)),
      Err(e) => e,
    };

    if request.method == Method::GET {
      if let Ok(Some(stored)) = self.cache.match_request(request) {
        info!(url = %request.url, error = %error, "network unavailable, serving cached copy");
        let cached_at = stored.cached_at;
        return Ok(CacheResult::offline(stored.into_response(), cached_at));
      }
    }

    Err(error)
  }
}
