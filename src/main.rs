mod app;
mod cache;
mod config;
mod install;
mod logging;
mod net;
mod prefetch;
mod router;
mod tile;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::app::App;
use crate::cache::{CacheSource, CacheStorage, NoopStorage, SqliteStorage};
use crate::net::{FetchRequest, HttpFetcher, RequestMode};
use crate::prefetch::PrefetchState;

#[derive(Parser, Debug)]
#[command(name = "tilecache")]
#[command(about = "Offline tile cache and cache warmer for the RS3 world map viewer")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tilecache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Path to the cache database (overrides storage.path)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Disable the cache store entirely
  #[arg(long, global = true)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the cache generation with the application shell
  Install,
  /// Route a single request through the cache policies
  Fetch {
    url: String,
    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Issue the request in no-cors mode
    #[arg(long)]
    no_cors: bool,
  },
  /// Signal viewer readiness and wait for the tile prefetch sweep
  Warm {
    /// Override the delay before the first prefetch request
    #[arg(long)]
    delay_ms: Option<u64>,
  },
  /// List stored cache generations
  Generations,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(db) = args.db {
    config.storage.path = Some(db);
  }
  if let Command::Warm {
    delay_ms: Some(delay_ms),
  } = args.command
  {
    config.prefetch.delay_ms = delay_ms;
  }

  let _guard = logging::init(&config.logging)?;

  if args.no_cache {
    run(config, NoopStorage, args.command).await
  } else {
    let storage = SqliteStorage::open(config.storage.path.as_deref())?;
    run(config, storage, args.command).await
  }
}

async fn run<S: CacheStorage + 'static>(
  config: config::Config,
  storage: S,
  command: Command,
) -> Result<()> {
  let fetcher = Arc::new(HttpFetcher::new(&config.app.origin_url()?)?);
  let app = App::new(config, storage, fetcher)?;

  match command {
    Command::Install => {
      match app.install().await? {
        0 => println!("caching disabled, nothing installed"),
        n => println!("installed {} resources", n),
      }
    }
    Command::Fetch {
      url,
      output,
      no_cors,
    } => {
      let mut request = FetchRequest::parse(&url)?;
      if no_cors {
        request = request.with_mode(RequestMode::NoCors);
      }

      let result = app.fetch(&request).await?;
      println!(
        "{} {} ({} bytes, {})",
        result.data.status,
        result.data.response_type.as_str(),
        result.data.body.len(),
        result.source.as_str()
      );
      if let Some(cached_at) = result.cached_at {
        println!("cached at {}", cached_at.format("%Y-%m-%d %H:%M:%S"));
      }
      if result.source == CacheSource::Offline {
        eprintln!("network unavailable, served a stored copy");
      }

      if let Some(path) = output {
        std::fs::write(&path, &result.data.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      }
    }
    Command::Warm { .. } => match app.viewer_ready() {
      Some(handle) => {
        let report = handle
          .await
          .map_err(|e| eyre!("Prefetch task failed: {}", e))?;
        println!(
          "prefetched {}/{} tiles ({} unavailable)",
          report.succeeded, report.scheduled, report.failed
        );
      }
      None => match app.prefetch_state() {
        PrefetchState::Idle => println!("background fetch unavailable, nothing to warm"),
        state => println!("prefetch already started ({:?})", state),
      },
    },
    Command::Generations => {
      for generation in app.generations()? {
        println!(
          "{}\t{}\t{} entries",
          generation.name,
          generation.created_at.format("%Y-%m-%d %H:%M:%S"),
          generation.entries
        );
      }
    }
  }

  Ok(())
}
