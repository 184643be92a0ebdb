//! Background cache warming for low-zoom tiles.
//!
//! Shortly after the viewer becomes interactive, a fixed rectangle of low-zoom
//! tiles is requested through the policy router so that its cache-first path
//! persists them. The sweep is fire-and-forget: individual failures (including
//! the expected 404s for empty space) are swallowed and never retried.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::PrefetchConfig;
use crate::net::{FetchRequest, Priority, RequestMode};
use crate::router::PolicyRouter;
use crate::tile::{self, TileCoordinate};

/// Lifecycle of the prefetch sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchState {
  /// Waiting for the ready signal (or background fetch unavailable)
  Idle,
  /// Delay timer pending
  Scheduled,
  /// Issuing fetches
  Running,
  Done,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrefetchReport {
  pub scheduled: usize,
  /// Tiles fetched with status 200. A tile whose store write failed still
  /// counts here, so this is not the number of cached tiles.
  pub succeeded: usize,
  pub failed: usize,
}

pub struct TilePrefetcher<S: CacheStorage> {
  router: Arc<PolicyRouter<S>>,
  config: PrefetchConfig,
  base_url: Url,
  state: watch::Sender<PrefetchState>,
}

impl<S: CacheStorage + 'static> TilePrefetcher<S> {
  pub fn new(router: Arc<PolicyRouter<S>>, config: PrefetchConfig, base_url: Url) -> Self {
    let (state, _) = watch::channel(PrefetchState::Idle);
    Self {
      router,
      config,
      base_url,
      state,
    }
  }

  pub fn state(&self) -> PrefetchState {
    *self.state.borrow()
  }

  /// Watch state transitions.
  #[allow(dead_code)]
  pub fn subscribe(&self) -> watch::Receiver<PrefetchState> {
    self.state.subscribe()
  }

  /// Handle the "viewer ready" signal.
  ///
  /// Returns the handle of the spawned sweep, or `None` when background fetch
  /// is unavailable or a sweep was already started.
  pub fn on_ready(self: &Arc<Self>) -> Option<JoinHandle<PrefetchReport>> {
    if !self.router.cache().supports_background_fetch() {
      debug!("background fetch unavailable, skipping tile prefetch");
      return None;
    }

    let scheduled = self.state.send_if_modified(|state| {
      if *state == PrefetchState::Idle {
        *state = PrefetchState::Scheduled;
        true
      } else {
        false
      }
    });
    if !scheduled {
      return None;
    }

    let this = Arc::clone(self);
    Some(tokio::spawn(async move {
      tokio::time::sleep(this.config.delay()).await;
      this.state.send_replace(PrefetchState::Running);
      let report = this.sweep().await;
      this.state.send_replace(PrefetchState::Done);
      report
    }))
  }

  async fn sweep(&self) -> PrefetchReport {
    let scheduled = tile::total_tiles(&self.config.zooms);
    let tiles = tile::coordinates(self.config.map_id, self.config.plane, &self.config.zooms);

    info!(tiles = scheduled, "warming cache for low zoom levels");

    let limit = match self.config.max_in_flight {
      0 => scheduled.max(1),
      n => n,
    };

    let outcomes: Vec<bool> = stream::iter(tiles)
      .map(|tile| self.fetch_tile(tile))
      .buffer_unordered(limit)
      .collect()
      .await;

    let succeeded = outcomes.iter().filter(|ok| **ok).count();
    let report = PrefetchReport {
      scheduled,
      succeeded,
      failed: scheduled - succeeded,
    };

    info!(
      scheduled = report.scheduled,
      succeeded = report.succeeded,
      failed = report.failed,
      "tile prefetch finished"
    );

    report
  }

  /// Fetch one tile, discarding the response. Returns whether it succeeded.
  async fn fetch_tile(&self, tile: TileCoordinate) -> bool {
    let url = match tile.url(&self.base_url) {
      Ok(url) => url,
      Err(e) => {
        debug!(?tile, error = %e, "skipping tile");
        return false;
      }
    };

    let request = FetchRequest::get(url)
      .with_mode(RequestMode::Cors)
      .with_priority(Priority::Low);

    match self.router.handle(&request).await {
      Ok(result) if result.data.status == 200 => true,
      Ok(result) => {
        debug!(url = %request.url, status = result.data.status, "tile not available");
        false
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "tile fetch failed");
        false
      }
    }
  }
}
