//! Garbage collection ("prune").
//!
//! Mark and sweep over the canonical store. The mark phase is the usage collector:
//! whatever digests the registered consumers list are live, everything else is an
//! orphan.
//!
//! Operational risk: correctness depends entirely on the catalogue being complete.
//! A consumer that stored files but is missing from `leeches.txt` (for instance
//! because the catalogue was edited by hand) has its objects reported as orphans,
//! and a real prune deletes them. Run with `dry_run` first when in doubt.

use crate::error::Result;
use crate::hash::Hash;
use crate::object::CanonicalObject;
use crate::store::Repository;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// An object that failed to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a prune run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub dry_run: bool,
    /// Number of objects in the store before the sweep.
    pub scanned: usize,
    /// Unreferenced objects, sorted by path.
    pub orphans: Vec<CanonicalObject>,
    /// Orphans actually deleted (always zero on a dry run).
    pub deleted: usize,
    pub bytes_freed: u64,
    pub failures: Vec<PruneFailure>,
}

impl PruneReport {
    /// Bytes the orphans occupy.
    pub fn orphan_bytes(&self) -> u64 {
        self.orphans.iter().map(|o| o.size).sum()
    }
}

/// Objects whose digest is not in `used`, in the input order.
///
/// Liveness is by digest alone: an object is kept if its digest is referenced under
/// any extension.
pub fn find_orphans(objects: Vec<CanonicalObject>, used: &HashSet<Hash>) -> Vec<CanonicalObject> {
    objects
        .into_iter()
        .filter(|object| !used.contains(&object.hash))
        .collect()
}

impl Repository {
    /// Delete (or with `dry_run`, only report) every unreferenced object.
    ///
    /// A dry run takes no lock and changes nothing on disk; running it twice over an
    /// unchanged repository yields identical reports. A real run holds the repository
    /// lock, finishes the mark phase before deleting anything, deletes each orphan
    /// independently (a failure is recorded and the sweep continues), and then
    /// removes shard directories left empty.
    pub fn prune(&self, dry_run: bool) -> Result<PruneReport> {
        let _lock = if dry_run { None } else { Some(self.lock()?) };

        let objects = self.scan_objects()?;
        let scanned = objects.len();
        let used = self.collect_used()?;
        let orphans = find_orphans(objects, &used);

        tracing::info!(scanned, used = used.len(), orphans = orphans.len(), dry_run, "mark complete");

        let mut report = PruneReport {
            dry_run,
            scanned,
            orphans,
            deleted: 0,
            bytes_freed: 0,
            failures: Vec::new(),
        };

        if dry_run {
            return Ok(report);
        }

        let mut touched_dirs = BTreeSet::new();
        for orphan in &report.orphans {
            match self.remove_object(&orphan.path) {
                Ok(size) => {
                    tracing::debug!(object = %orphan.path.display(), size, "deleted orphan");
                    report.deleted += 1;
                    report.bytes_freed += size;
                    if let Some(shard) = orphan.path.parent() {
                        touched_dirs.insert(shard.to_path_buf());
                    }
                }
                Err(e) => {
                    tracing::warn!(object = %orphan.path.display(), error = %e, "failed to delete orphan");
                    report.failures.push(PruneFailure {
                        path: orphan.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for shard in touched_dirs {
            remove_if_empty(&shard);
            if let Some(ext_dir) = shard.parent() {
                remove_if_empty(ext_dir);
            }
        }

        tracing::info!(
            deleted = report.deleted,
            bytes_freed = report.bytes_freed,
            failures = report.failures.len(),
            "prune complete"
        );
        Ok(report)
    }
}

fn remove_if_empty(dir: &Path) {
    let removed = match fs::read_dir(dir) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return;
            }
            fs::remove_dir(dir)
        }
        Err(e) => Err(e),
    };
    if let Err(e) = removed {
        tracing::debug!(dir = %dir.display(), error = %e, "directory cleanup skipped");
    }
}
