//! Utility functions for logging, URL handling, retry delays and output directories.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for log previews
//! - URL normalization for duplicate detection
//! - Jittered backoff delays
//! - Run directory naming and file system validation

use chrono::{DateTime, Utc};
use rand::{Rng, rng};
use std::fs as stdfs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

/// Upper bound on random jitter added to retry delays.
const MAX_JITTER_MS: u64 = 250;

/// Truncate a string for logging purposes.
///
/// Long strings are cut after `max` characters with an ellipsis and a byte
/// count appended. Cuts always land on a character boundary.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Normalize a URL for duplicate detection.
///
/// Drops the fragment and a trailing slash on non-root paths, so
/// `https://habr.com/ru/articles/1/#comments` and
/// `https://habr.com/ru/articles/1` compare equal.
pub fn normalize_url(url: &str) -> String {
    let mut normalized = url.trim().to_string();

    if let Some(pos) = normalized.find('#') {
        normalized.truncate(pos);
    }

    if let Some(query_pos) = normalized.find('?') {
        if normalized[..query_pos].ends_with('/') && normalized[..query_pos].matches('/').count() > 3
        {
            normalized.remove(query_pos - 1);
        }
    } else if normalized.ends_with('/') && normalized.matches('/').count() > 3 {
        normalized.pop();
    }

    normalized
}

/// Add up to 250ms of random jitter, never more than `delay` itself.
///
/// A zero delay stays zero.
pub fn jittered(delay: Duration) -> Duration {
    let cap = (delay.as_millis() as u64).min(MAX_JITTER_MS);
    if cap == 0 {
        return delay;
    }
    delay + Duration::from_millis(rng().random_range(0..=cap))
}

/// Directory name for one run, e.g. `2023-01-02T10-15-00Z`.
pub fn run_id(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a scratch file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn ensure_writable_dir(path: impl AsRef<Path>) -> io::Result<PathBuf> {
    let path = path.as_ref();
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let scratch_path = path.join("..__write_check__");
    stdfs::File::create(&scratch_path)?;
    let _ = stdfs::remove_file(&scratch_path);
    info!("Output directory is writable");
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let s = "Привет, мир";
        assert_eq!(truncate_for_log(s, 6), "Привет…(+8 bytes)");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://habr.com/ru/articles/1/#comments"),
            "https://habr.com/ru/articles/1"
        );
        assert_eq!(
            normalize_url("https://habr.com/ru/articles/1/?utm=x"),
            "https://habr.com/ru/articles/1?utm=x"
        );
        assert_eq!(normalize_url("https://habr.com/"), "https://habr.com/");
    }

    #[test]
    fn test_jittered_bounds() {
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
        let d = jittered(Duration::from_millis(100));
        assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        let d = jittered(Duration::from_secs(2));
        assert!(d <= Duration::from_millis(2250));
    }

    #[test]
    fn test_run_id() {
        let t = Utc.with_ymd_and_hms(2023, 1, 2, 10, 15, 0).unwrap();
        assert_eq!(run_id(t), "2023-01-02T10-15-00Z");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let created = ensure_writable_dir(&nested).await.unwrap();
        assert!(created.is_dir());
        assert!(!nested.join("..__write_check__").exists());
    }
}
