//! Install-time seeding of the application shell.

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::cache::{Cache, CacheStorage, CacheStore};
use crate::config::Config;
use crate::net::{FetchRequest, Fetcher, RequestMode};

/// Open the configured cache generation and store every shell resource in it.
///
/// Either the whole manifest is stored or nothing is; a failed install can
/// simply be run again.
pub async fn install<S: CacheStorage>(
  store: &CacheStore<S>,
  fetcher: &dyn Fetcher,
  config: &Config,
) -> Result<Cache<S>> {
  let requests: Vec<FetchRequest> = config
    .app
    .manifest_urls()?
    .into_iter()
    .map(|url| FetchRequest::get(url).with_mode(RequestMode::SameOrigin))
    .collect();

  let cache = store.open(&config.cache_name)?;
  cache
    .add_all(fetcher, &requests)
    .await
    .map_err(|e| eyre!("Install of '{}' failed: {}", config.cache_name, e))?;

  info!(
    generation = %config.cache_name,
    resources = requests.len(),
    "installed application shell"
  );

  Ok(cache)
}
