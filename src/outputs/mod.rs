//! Output generation for finished runs.
//!
//! This module contains submodules responsible for writing a run's results:
//!
//! # Submodules
//!
//! - [`tabular`]: Writes one CSV file per category from a [`RunSnapshot`]
//! - [`json`]: Writes the run manifest for downstream tooling
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! └── 2025-05-06T10-15-00Z/
//!     ├── develop.csv
//!     ├── admin.csv
//!     ├── ...
//!     └── manifest.json
//! ```

use crate::aggregator::RunSnapshot;
use crate::error::ExportError;
use std::path::PathBuf;

pub mod json;
pub mod tabular;

/// Persists one category's snapshot.
///
/// Implementations must be atomic from the reader's point of view: either
/// the whole snapshot lands at the returned path, or an error is returned
/// and no partial file is left behind.
pub trait Exporter {
    fn export(&self, snapshot: &RunSnapshot) -> Result<PathBuf, ExportError>;
}
