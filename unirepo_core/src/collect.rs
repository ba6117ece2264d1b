//! Usage collection: the union of every registered consumer's dependencies.

use crate::deps::DependencyRegistry;
use crate::error::Result;
use crate::hash::Hash;
use crate::store::Repository;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// One dependency of one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEntry {
    pub consumer: PathBuf,
    pub filename: String,
    pub hash: Hash,
}

/// Every dependency found across the registered consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    /// Consumers whose registry was read (including empty ones).
    pub consumers: usize,
    /// Consumers skipped because their registry could not be read.
    pub skipped: usize,
    pub entries: Vec<UsageEntry>,
}

impl UsageReport {
    /// The set of referenced digests.
    pub fn used(&self) -> HashSet<Hash> {
        self.entries.iter().map(|e| e.hash).collect()
    }

    pub fn unique_digests(&self) -> usize {
        self.used().len()
    }
}

impl Repository {
    /// List the dependencies of every registered consumer.
    ///
    /// Fails open per consumer: a vanished directory or a missing registry contributes
    /// nothing, and an unreadable registry is logged and skipped. Only a failure to
    /// read `leeches.txt` itself (other than absence) is returned as an error.
    pub fn collect_usage(&self) -> Result<UsageReport> {
        let mut report = UsageReport::default();

        for consumer in self.leeches().existing()? {
            let registry = DependencyRegistry::new(&consumer);
            match registry.load() {
                Ok(Some(entries)) => {
                    report.consumers += 1;
                    report
                        .entries
                        .extend(entries.into_iter().map(|entry| UsageEntry {
                            consumer: consumer.clone(),
                            filename: entry.filename,
                            hash: entry.hash,
                        }));
                }
                Ok(None) => {
                    tracing::debug!(consumer = %consumer.display(), "consumer has no dependency registry");
                }
                Err(e) => {
                    tracing::warn!(consumer = %consumer.display(), error = %e, "could not read dependency registry, skipping");
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            consumers = report.consumers,
            entries = report.entries.len(),
            "collected usage"
        );
        Ok(report)
    }

    /// The set of digests referenced by any registered consumer.
    pub fn collect_used(&self) -> Result<HashSet<Hash>> {
        Ok(self.collect_usage()?.used())
    }
}
