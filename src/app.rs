use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::{CacheResult, CacheStorage, CacheStore, GenerationInfo};
use crate::config::Config;
use crate::install;
use crate::net::{FetchRequest, FetchResponse, Fetcher};
use crate::prefetch::{PrefetchReport, PrefetchState, TilePrefetcher};
use crate::router::PolicyRouter;

/// Process-wide wiring of the cache store, router and prefetcher.
pub struct App<S: CacheStorage> {
  config: Config,
  store: CacheStore<S>,
  fetcher: Arc<dyn Fetcher>,
  router: Arc<PolicyRouter<S>>,
  prefetcher: Arc<TilePrefetcher<S>>,
}

impl<S: CacheStorage + 'static> App<S> {
  pub fn new(config: Config, storage: S, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
    let store = CacheStore::new(storage);
    let cache = store.open(&config.cache_name)?;
    let router = Arc::new(PolicyRouter::new(
      cache,
      Arc::clone(&fetcher),
      config.tiles.clone(),
    ));
    let prefetcher = Arc::new(TilePrefetcher::new(
      Arc::clone(&router),
      config.prefetch.clone(),
      config.tiles.base_url()?,
    ));

    Ok(Self {
      config,
      store,
      fetcher,
      router,
      prefetcher,
    })
  }

  /// Seed the shell generation.
  ///
  /// Returns the number of entries the generation now holds, which is 0 when
  /// the storage backend keeps nothing.
  pub async fn install(&self) -> Result<usize> {
    install::install(&self.store, self.fetcher.as_ref(), &self.config).await?;
    let entries = self
      .generations()?
      .into_iter()
      .find(|g| g.name == self.config.cache_name)
      .map_or(0, |g| g.entries);
    Ok(entries)
  }

  /// Route one request through the cache policies.
  pub async fn fetch(&self, request: &FetchRequest) -> Result<CacheResult<FetchResponse>> {
    self.router.handle(request).await
  }

  /// Signal that the viewer is interactive; starts the prefetch sweep.
  pub fn viewer_ready(&self) -> Option<JoinHandle<PrefetchReport>> {
    self.prefetcher.on_ready()
  }

  pub fn prefetch_state(&self) -> PrefetchState {
    self.prefetcher.state()
  }

  pub fn generations(&self) -> Result<Vec<GenerationInfo>> {
    self.store.generations()
  }
}
