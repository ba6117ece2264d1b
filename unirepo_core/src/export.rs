//! Incremental archival export.
//!
//! Every canonical object created after the last export run is compressed into the
//! output directory as `<object file name>.<suffix>`. The start time of each run is
//! persisted in `root/export-lock` and becomes the cutoff for the next run.

use crate::error::{Error, Result};
use crate::object::CanonicalObject;
use crate::store::{Repository, read_optional, write_atomic};
use chrono::{DateTime, SecondsFormat, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Watermark file under the repository root.
pub const WATERMARK_FILE: &str = "export-lock";

/// Default compression level.
pub const DEFAULT_LEVEL: i32 = 6;

/// Compresses one object's bytes. Implementations may fail per object.
pub trait Compressor: Send + Sync {
    /// Suffix appended to exported file names, without the dot.
    fn suffix(&self) -> &str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// zstd compression at a fixed level.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Level 0 selects zstd's own default.
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

impl Compressor for ZstdCompressor {
    fn suffix(&self) -> &str {
        "zst"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| Error::compression(e.to_string()))
    }
}

/// An object that could not be exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of an export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub output: PathBuf,
    pub previous_watermark: Option<DateTime<Utc>>,
    /// Start time of this run, now persisted as the watermark.
    pub watermark: DateTime<Utc>,
    pub scanned: usize,
    /// Files written to the output directory, sorted.
    pub exported: Vec<PathBuf>,
    /// Objects at or before the previous watermark.
    pub skipped: usize,
    pub failures: Vec<ExportFailure>,
}

/// Parse a persisted watermark.
pub fn parse_watermark(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::invalid_watermark(value, e.to_string()))
}

/// Format a watermark for persistence (RFC 3339, UTC, nanoseconds).
pub fn format_watermark(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Creation instant of a file: its birth time, or its modification time when the
/// platform reports no birth time (or reports the epoch).
pub fn creation_time(path: &Path, metadata: &fs::Metadata) -> Result<DateTime<Utc>> {
    match metadata.created() {
        Ok(created) if created != SystemTime::UNIX_EPOCH => Ok(created.into()),
        _ => {
            tracing::warn!(path = %path.display(), "birth time unavailable, using modification time");
            Ok(metadata.modified()?.into())
        }
    }
}

impl Repository {
    /// Path of the export watermark.
    pub fn watermark_path(&self) -> PathBuf {
        self.root().join(WATERMARK_FILE)
    }

    /// The last export's start time. An unparseable watermark is logged and treated
    /// as absent.
    pub fn read_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        let path = self.watermark_path();
        let Some(content) = read_optional(&path)? else {
            return Ok(None);
        };
        match parse_watermark(&content) {
            Ok(at) => Ok(Some(at)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable export watermark");
                Ok(None)
            }
        }
    }

    fn write_watermark(&self, at: &DateTime<Utc>) -> Result<()> {
        write_atomic(&self.watermark_path(), format_watermark(at).as_bytes())
    }

    /// Export every object created after the watermark into `output`.
    ///
    /// Per-object failures (unreadable object, compression error, write error) are
    /// logged and reported; only failure to enumerate the store or create `output`
    /// aborts the run. The watermark is set to the run's start time on completion,
    /// even when nothing was exported.
    pub fn export(&self, output: &Path, compressor: &dyn Compressor) -> Result<ExportReport> {
        let _lock = self.lock()?;
        let started = Utc::now();
        let previous = self.read_watermark()?;

        fs::create_dir_all(output).map_err(|e| Error::from_io(output, e))?;
        let objects = self.scan_objects()?;
        let scanned = objects.len();

        let mut skipped = 0;
        let mut failures = Vec::new();
        let mut pending = Vec::new();
        for object in objects {
            let created = fs::metadata(&object.path)
                .map_err(|e| Error::from_io(&object.path, e))
                .and_then(|meta| creation_time(&object.path, &meta));
            match created {
                Ok(created) if previous.is_some_and(|cutoff| created <= cutoff) => {
                    tracing::debug!(object = %object.path.display(), %created, "already exported");
                    skipped += 1;
                }
                Ok(_) => pending.push(object),
                Err(e) => {
                    tracing::warn!(object = %object.path.display(), error = %e, "could not stat object");
                    failures.push(ExportFailure {
                        path: object.path,
                        error: e.to_string(),
                    });
                }
            }
        }

        let results: Vec<Result<PathBuf>> = pending
            .par_iter()
            .map(|object| export_object(object, output, compressor))
            .collect();

        // Per-object events are emitted on the calling thread.
        let mut exported = Vec::new();
        for (object, result) in pending.iter().zip(results) {
            match result {
                Ok(path) => {
                    tracing::debug!(object = %object.path.display(), output = %path.display(), "exported");
                    exported.push(path);
                }
                Err(e) => {
                    tracing::warn!(object = %object.path.display(), error = %e, "failed to export object");
                    failures.push(ExportFailure {
                        path: object.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        exported.sort();

        self.write_watermark(&started)?;

        tracing::info!(
            scanned,
            exported = exported.len(),
            skipped,
            failed = failures.len(),
            watermark = %format_watermark(&started),
            "export complete"
        );

        Ok(ExportReport {
            output: output.to_path_buf(),
            previous_watermark: previous,
            watermark: started,
            scanned,
            exported,
            skipped,
            failures,
        })
    }
}

fn export_object(object: &CanonicalObject, output: &Path, compressor: &dyn Compressor) -> Result<PathBuf> {
    let file_name = object
        .path
        .file_name()
        .ok_or_else(|| Error::not_found(&object.path))?
        .to_string_lossy();
    let out_path = output.join(format!("{}.{}", file_name, compressor.suffix()));

    let data = fs::read(&object.path).map_err(|e| Error::from_io(&object.path, e))?;
    let compressed = compressor.compress(&data)?;
    write_atomic(&out_path, &compressed)?;
    Ok(out_path)
}
