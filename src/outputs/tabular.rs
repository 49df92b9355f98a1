//! CSV export, one file per category.
//!
//! Columns are fixed:
//!
//! ```text
//! identifier,title,category,published_at,rating,comments,views,author,tags
//! ```
//!
//! Tags are joined with `"; "`, a missing author is written as an empty
//! cell, and `published_at` is RFC 3339 in the site's offset. Rows follow
//! the snapshot order.
//!
//! Each file is written to a temporary file in the target directory and
//! renamed into place, so readers never observe a half-written table.

use super::Exporter;
use crate::aggregator::RunSnapshot;
use crate::error::ExportError;
use crate::models::ArticleRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

pub const COLUMNS: [&str; 9] = [
    "identifier",
    "title",
    "category",
    "published_at",
    "rating",
    "comments",
    "views",
    "author",
    "tags",
];

pub const TAG_SEPARATOR: &str = "; ";

fn row(record: &ArticleRecord) -> [String; 9] {
    [
        record.id.clone(),
        record.title.clone(),
        record.category.slug().to_string(),
        record.published_at.to_rfc3339(),
        record.rating.to_string(),
        record.comments.to_string(),
        record.views.to_string(),
        record.author.clone().unwrap_or_default(),
        record.tags.join(TAG_SEPARATOR),
    ]
}

/// Writes `<slug>.csv` files into one run directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
}

impl CsvExporter {
    /// The directory must already exist; creating it is the caller's job.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, snapshot: &RunSnapshot) -> PathBuf {
        self.dir.join(format!("{}.csv", snapshot.category.slug()))
    }

    fn write_table(&self, path: &Path, snapshot: &RunSnapshot) -> Result<NamedTempFile, ExportError> {
        let io_err = |source: std::io::Error| ExportError::Io {
            path: path.to_path_buf(),
            source,
        };
        let csv_err = |source: csv::Error| ExportError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            writer.write_record(COLUMNS).map_err(csv_err)?;
            for record in &snapshot.records {
                writer.write_record(row(record)).map_err(csv_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file_mut().flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        Ok(tmp)
    }
}

impl Exporter for CsvExporter {
    #[instrument(level = "info", skip_all, fields(category = snapshot.category.slug(), rows = snapshot.len()))]
    fn export(&self, snapshot: &RunSnapshot) -> Result<PathBuf, ExportError> {
        let path = self.path_for(snapshot);
        if snapshot.is_empty() {
            debug!(taken_at = %snapshot.taken_at, "No records; writing header only");
        }
        // the temp file is removed on drop if anything fails before persist
        let tmp = self.write_table(&path, snapshot)?;
        tmp.persist(&path).map_err(|source| ExportError::Persist {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "Wrote category CSV");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use chrono::{FixedOffset, TimeZone, Utc};

    fn snapshot(records: Vec<ArticleRecord>) -> RunSnapshot {
        RunSnapshot {
            category: Category::Develop,
            taken_at: Utc::now(),
            records,
        }
    }

    fn record(id: &str, author: Option<&str>, tags: &[&str]) -> ArticleRecord {
        ArticleRecord {
            id: id.into(),
            url: format!("https://habr.com/ru/articles/{id}/"),
            title: format!("Title, with \"quotes\" {id}"),
            category: Category::Develop,
            published_at: FixedOffset::east_opt(3 * 3600)
                .unwrap()
                .with_ymd_and_hms(2023, 1, 1, 12, 15, 0)
                .unwrap(),
            rating: -4,
            comments: 3,
            views: 1200,
            author: author.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path());
        let snap = snapshot(vec![
            record("1", Some("alice"), &["rust", "tokio"]),
            record("2", None, &[]),
        ]);

        let path = exporter.export(&snap).unwrap();
        assert_eq!(path, dir.path().join("develop.csv"));

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], COLUMNS.map(str::to_string).to_vec());
        assert_eq!(
            rows[1],
            vec![
                "1",
                "Title, with \"quotes\" 1",
                "develop",
                "2023-01-01T12:15:00+03:00",
                "-4",
                "3",
                "1200",
                "alice",
                "rust; tokio",
            ]
        );
        assert_eq!(rows[2][7], "");
        assert_eq!(rows[2][8], "");
    }

    #[test]
    fn test_export_replaces_previous_file_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path());

        exporter
            .export(&snapshot(vec![record("1", None, &[]), record("2", None, &[])]))
            .unwrap();
        let path = exporter.export(&snapshot(vec![record("3", None, &[])])).unwrap();

        assert_eq!(read_rows(&path).len(), 2);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_export_into_missing_directory_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-created");
        let exporter = CsvExporter::new(&missing);

        let err = exporter.export(&snapshot(vec![record("1", None, &[])])).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
        assert!(!missing.exists());
    }
}
