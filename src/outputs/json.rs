//! JSON manifest output.
//!
//! The manifest records, per category, how many articles were exported and
//! every job that was discarded with its reason, so nothing a run dropped
//! goes unaccounted for.
//!
//! # Output Path
//!
//! ```text
//! run_dir/
//! └── manifest.json
//! ```

use crate::report::RunManifest;
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info, instrument};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Write a [`RunManifest`] as pretty-printed JSON into the run directory.
///
/// The JSON goes to a temp file in the same directory which is then
/// persisted over `manifest.json`, so an interrupted write never leaves a
/// truncated manifest.
#[instrument(level = "info", skip_all, fields(run_dir = %run_dir.display()))]
pub async fn write_manifest(manifest: &RunManifest, run_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(manifest)?;
    let path = run_dir.join(MANIFEST_FILE);

    info!(path = %path.display(), "Writing manifest");
    let dir = run_dir.to_path_buf();
    let target = path.clone();
    let written = tokio::task::spawn_blocking(move || persist_atomically(&dir, &target, json.as_bytes())).await?;
    if let Err(e) = written {
        error!(path = %path.display(), error = %e, "Failed to write manifest");
        return Err(e.into());
    }
    info!(
        path = %path.display(),
        exported = manifest.total_exported(),
        discarded = manifest.total_discarded(),
        "Wrote manifest"
    );

    Ok(path)
}

fn persist_atomically(dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    // the temp file is removed on drop if persisting fails
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
