use crate::config::config::LoggingConfig;
use crate::utils::app_paths::AppPaths;
use anyhow::Result;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Log directory, with a temp-dir fallback when the data dir is unavailable
fn get_log_dir() -> PathBuf {
    AppPaths::log_dir().unwrap_or_else(|_| std::env::temp_dir().join("sltax"))
}

fn log_file_name(timestamp: &str) -> String {
    format!("sltax_{}.log", timestamp)
}

/// Create a timestamped log file and point `latest.log` at it
fn open_log_file(log_dir: &Path) -> Result<(File, PathBuf)> {
    std::fs::create_dir_all(log_dir)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let log_path = log_dir.join(log_file_name(&timestamp));

    let latest_path = log_dir.join("latest.log");

    #[cfg(unix)]
    {
        // On Unix, use symlink (doesn't require elevated privileges)
        let _ = std::fs::remove_file(&latest_path);
        let _ = std::os::unix::fs::symlink(&log_path, &latest_path);
    }

    #[cfg(windows)]
    {
        // Symlinks need admin rights on Windows, write a pointer file instead
        let pointer_content = format!("Current log file: {}\n", log_path.display());
        let _ = std::fs::write(&latest_path, pointer_content);
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    Ok((file, log_path))
}

/// RUST_LOG wins; otherwise the configured level, or "info" if that does not parse
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing for the process.
///
/// Returns the log file path when logging to a file. Calling this twice is
/// harmless; the second subscriber is simply not installed.
pub fn init_tracing(config: &LoggingConfig) -> Option<PathBuf> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = build_filter(&config.level);

    if config.log_to_file {
        match open_log_file(&get_log_dir()) {
            Ok((file, path)) => {
                let fmt_layer = fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(false)
                    .compact();
                let installed = tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .is_ok();
                if installed {
                    tracing::info!(target: "sltax", "Logging to {}", path.display());
                }
                return Some(path);
            }
            Err(e) => {
                eprintln!("Could not open log file, logging to stderr: {:#}", e);
            }
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .compact();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_file_name() {
        assert_eq!(log_file_name("20260101_120000"), "sltax_20260101_120000.log");
    }

    #[test]
    fn test_open_log_file_creates_latest_pointer() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let (_file, path) = open_log_file(&log_dir).unwrap();

        assert!(path.exists());
        assert!(path.starts_with(&log_dir));
        #[cfg(unix)]
        assert_eq!(std::fs::read_link(log_dir.join("latest.log")).unwrap(), path);
    }
}
