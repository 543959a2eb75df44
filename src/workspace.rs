//! # Scoped Workspace
//!
//! A private directory per pipeline run for the normalized input and the inference
//! output. The directory is removed when the run ends:
//! - after the body returns, successfully or with an error (explicit close, failures logged)
//! - when the body panics (`TempDir` is dropped during unwinding)
//!
//! Names carry a fresh UUID, so concurrent runs never share a directory. Directories
//! orphaned by a killed process are swept on the next startup.

use crate::error::{AppError, AppResult};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::Builder;
use tracing::{debug, info, warn};

/// Minimum age before a leftover workspace is considered orphaned.
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Run `body` inside a fresh directory under `root`, removing it afterwards.
pub fn with_workspace<T, F>(root: &Path, prefix: &str, body: F) -> AppResult<T>
where
    F: FnOnce(&Path) -> AppResult<T>,
{
    let dir = Builder::new()
        .prefix(&format!("{}{}-", prefix, uuid::Uuid::new_v4()))
        .tempdir_in(root)
        .map_err(|e| {
            AppError::Internal(format!(
                "Failed to create workspace under {}: {}",
                root.display(),
                e
            ))
        })?;
    debug!(workspace = %dir.path().display(), "Workspace created");

    let result = body(dir.path());

    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        warn!(workspace = %path.display(), error = %e, "Failed to remove workspace");
    } else {
        debug!(workspace = %path.display(), "Workspace removed");
    }

    result
}

/// Remove workspaces under `root` older than `min_age` left behind by an earlier process.
///
/// Returns the number of directories removed. Never fails; problems are logged.
pub fn sweep_stale(root: &Path, prefix: &str, min_age: Duration) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Cannot scan workspace root");
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) if m.is_dir() => m,
            _ => continue,
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < min_age {
            continue;
        }

        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove stale workspace")
            }
        }
    }

    if removed > 0 {
        info!(root = %root.display(), removed, "Removed stale workspaces");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_workspace_is_removed_after_success() {
        let root = tempfile::tempdir().unwrap();
        let mut seen = PathBuf::new();

        let value = with_workspace(root.path(), "transcribe-", |dir| {
            seen = dir.to_path_buf();
            fs::create_dir(dir.join("output"))?;
            fs::write(dir.join("output").join("a.mid"), b"MThd")?;
            Ok(42)
        })
        .unwrap();

        assert_eq!(value, 42);
        assert!(seen.starts_with(root.path()));
        assert!(!seen.exists());
    }

    #[test]
    fn test_workspace_is_removed_after_error() {
        let root = tempfile::tempdir().unwrap();
        let mut seen = PathBuf::new();

        let err = with_workspace::<(), _>(root.path(), "transcribe-", |dir| {
            seen = dir.to_path_buf();
            fs::write(dir.join("input.wav"), b"RIFF")?;
            Err(AppError::NoOutput("nothing here".to_string()))
        })
        .unwrap_err();

        assert!(matches!(err, AppError::NoOutput(_)));
        assert!(!seen.exists());
    }

    #[test]
    fn test_workspace_is_removed_after_panic() {
        let root = tempfile::tempdir().unwrap();
        let seen = std::sync::Mutex::new(PathBuf::new());

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_workspace::<(), _>(root.path(), "transcribe-", |dir| {
                *seen.lock().unwrap() = dir.to_path_buf();
                fs::write(dir.join("input.wav"), b"RIFF").unwrap();
                panic!("inference blew up");
            })
        }));

        assert!(outcome.is_err());
        let seen = seen.lock().unwrap().clone();
        assert!(!seen.as_os_str().is_empty());
        assert!(!seen.exists());
    }

    #[test]
    fn test_concurrent_workspaces_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let outer = with_workspace(root.path(), "transcribe-", |a| {
            with_workspace(root.path(), "transcribe-", |b| Ok(a != b))
        })
        .unwrap();
        assert!(outer);
    }

    #[test]
    fn test_sweep_removes_only_prefixed_directories() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("transcribe-old")).unwrap();
        fs::write(root.path().join("transcribe-old").join("input.wav"), b"RIFF").unwrap();
        fs::create_dir(root.path().join("unrelated")).unwrap();
        fs::write(root.path().join("transcribe-file"), b"not a dir").unwrap();

        assert_eq!(sweep_stale(root.path(), "transcribe-", Duration::ZERO), 1);
        assert!(!root.path().join("transcribe-old").exists());
        assert!(root.path().join("unrelated").exists());
        assert!(root.path().join("transcribe-file").exists());
    }

    #[test]
    fn test_sweep_keeps_recent_directories() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("transcribe-live")).unwrap();

        assert_eq!(sweep_stale(root.path(), "transcribe-", STALE_AFTER), 0);
        assert!(root.path().join("transcribe-live").exists());
    }
}
