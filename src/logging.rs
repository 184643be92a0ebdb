use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter. The returned guard flushes the
/// log file on drop and must be kept alive for the program lifetime.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
    Ok(_) => EnvFilter::builder().from_env_lossy(),
    Err(_) => EnvFilter::builder().parse_lossy(config.filter.as_deref().unwrap_or("info")),
  };

  let Some(path) = &config.file else {
    // An already installed global subscriber is kept
    let _ = tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .try_init();
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| std::path::Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
  // Same as above: a subscriber installed earlier stays in place
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(writer)
    .try_init();

  Ok(Some(guard))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_second_init_keeps_first_subscriber() {
    let config = LoggingConfig::default();
    assert!(init(&config).unwrap().is_none());
    assert!(init(&config).unwrap().is_none());
  }

  #[test]
  fn test_file_init_after_global_subscriber_is_ok() {
    let dir = std::env::temp_dir().join(format!("tilecache-log-{}", std::process::id()));
    let config = LoggingConfig {
      filter: Some("debug".to_string()),
      file: Some(dir.join("tilecache.log")),
    };
    let _ = init(&LoggingConfig::default());

    let guard = init(&config).unwrap();
    assert!(guard.is_some());
    assert!(dir.is_dir());
    let _ = std::fs::remove_dir_all(&dir);
  }
}
