//! # Logging Module
//!
//! Sets up `tracing` for the monitor.
//!
//! Diagnostics always go to stderr, keeping stdout for operator events. When
//! file logging is enabled, every run also writes into its own numbered
//! session directory:
//!
//! ```text
//! logs/
//! ├── 0_04.03.2026-10:15:00_compass_calibration/
//! │   └── 0_04.03.2026-10:15:00_compass_calibration.log
//! └── 1_04.03.2026-11:02:41_compass_calibration/
//!     └── 1_04.03.2026-11:02:41_compass_calibration.log
//! ```
//!
//! Only directories named `<digits>_...` count towards the numbering.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::Result;

/// Extension of the log file inside a session directory
pub const LOG_FILE_EXTENSION: &str = "log";

/// Timestamp format of session directory names
const SESSION_TIMESTAMP_FORMAT: &str = "%d.%m.%Y-%H:%M:%S";

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level when set.
///
/// # Returns
///
/// * `Ok(Some(guard))` - File logging is active; keep the guard alive until
///   exit so buffered lines are flushed
/// * `Ok(None)` - Logging to stderr only
///
/// # Errors
///
/// Returns error if the session directory cannot be created
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    if !config.file_enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    }

    let session_dir = create_session_dir(Path::new(&config.dir), &config.name, Local::now())?;
    let appender = tracing_appender::rolling::never(&session_dir, log_file_name(&session_dir));
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    info!("Logging to {}", session_dir.display());
    Ok(Some(guard))
}

/// Next free session index in `dir`
///
/// One more than the highest index among the session directories in `dir`,
/// or 0 when there is none. A missing directory counts as empty.
pub fn next_session_index(dir: &Path) -> Result<u32> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut highest: Option<u32> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(index) = entry.file_name().to_str().and_then(session_index) {
            highest = Some(highest.map_or(index, |highest| highest.max(index)));
        }
    }

    Ok(highest.map_or(0, |index| index.saturating_add(1)))
}

/// Index of a session directory name: leading ASCII digits followed by `_`
fn session_index(name: &str) -> Option<u32> {
    let (prefix, _) = name.split_once('_')?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// Log file of a session directory, named after the directory
pub fn log_file_name(session_dir: &Path) -> String {
    let stem = session_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}.{}", stem, LOG_FILE_EXTENSION)
}

/// Name of a session directory
pub fn session_dir_name(index: u32, timestamp: DateTime<Local>, name: &str) -> String {
    format!("{}_{}_{}", index, timestamp.format(SESSION_TIMESTAMP_FORMAT), name)
}

/// Create the next numbered session directory under `dir`
///
/// # Errors
///
/// Returns error if `dir` cannot be read or the directory cannot be created
pub fn create_session_dir(dir: &Path, name: &str, timestamp: DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let index = next_session_index(dir)?;
    let path = dir.join(session_dir_name(index, timestamp, name));
    fs::create_dir(&path)?;
    debug!("Created session directory {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn timestamp() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 4, 10, 15, 0).unwrap()
    }

    #[test]
    fn test_session_dir_name() {
        assert_eq!(
            session_dir_name(3, timestamp(), "compass_calibration"),
            "3_04.03.2026-10:15:00_compass_calibration"
        );
    }

    #[test]
    fn test_next_index_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert_eq!(next_session_index(&temp.path().join("absent")).unwrap(), 0);
    }

    #[test]
    fn test_next_index_empty_dir() {
        let temp = TempDir::new().unwrap();
        assert_eq!(next_session_index(temp.path()).unwrap(), 0);
    }

    #[test]
    fn test_next_index_skips_gaps_and_foreign_entries() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("2_01.01.2026-00:00:00_a")).unwrap();
        fs::create_dir(temp.path().join("7_01.01.2026-00:00:00_b")).unwrap();
        fs::create_dir(temp.path().join("notes")).unwrap();
        fs::write(temp.path().join("readme_1.txt"), b"").unwrap();

        assert_eq!(next_session_index(temp.path()).unwrap(), 8);
    }

    #[test]
    fn test_next_index_counts_only_numbered_dirs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("3_01.01.2026-00:00:00_a")).unwrap();
        // A bare number has no separator
        fs::create_dir(temp.path().join("12")).unwrap();
        // Files never count
        fs::write(temp.path().join("40_notes.txt"), b"").unwrap();
        fs::create_dir(temp.path().join("x5_b")).unwrap();
        fs::create_dir(temp.path().join("_9")).unwrap();

        assert_eq!(next_session_index(temp.path()).unwrap(), 4);
    }

    #[test]
    fn test_next_index_starts_at_zero_after_foreign_dirs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("notes")).unwrap();
        assert_eq!(next_session_index(temp.path()).unwrap(), 0);

        fs::create_dir(temp.path().join("0_01.01.2026-00:00:00_a")).unwrap();
        assert_eq!(next_session_index(temp.path()).unwrap(), 1);
    }

    #[test]
    fn test_log_file_named_after_session_dir() {
        assert_eq!(
            log_file_name(Path::new("logs/0_04.03.2026-10:15:00_compass_calibration")),
            "0_04.03.2026-10:15:00_compass_calibration.log"
        );
    }

    #[test]
    fn test_create_session_dir_increments() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("logs");

        let first = create_session_dir(&root, "compass_calibration", timestamp()).unwrap();
        let second = create_session_dir(&root, "compass_calibration", timestamp()).unwrap();

        assert!(first.is_dir());
        assert!(second.is_dir());
        assert_eq!(
            first.file_name().unwrap(),
            "0_04.03.2026-10:15:00_compass_calibration"
        );
        assert_eq!(
            second.file_name().unwrap(),
            "1_04.03.2026-10:15:00_compass_calibration"
        );
    }
}
