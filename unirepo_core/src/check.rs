//! Integrity checking and repair of consumer dependencies.
//!
//! Each registry entry is classified into one of six states:
//!
//! | Condition                                   | State      |
//! |---------------------------------------------|------------|
//! | path absent (or dangling link)              | `missing`  |
//! | current digest equals the registered one    | `valid`    |
//! | digests differ, no strategy                 | `invalid`  |
//! | digests differ, [`RepairStrategy::Drop`]     | `dropped`  |
//! | digests differ, [`RepairStrategy::ForceFix`] | `repaired` |
//! | digests differ, [`RepairStrategy::Store`]    | `stored`   |
//!
//! A repair that cannot run downgrades the entry to `invalid` with a detail message.
//! Hashing runs in parallel; classification and repairs then run one entry at a
//! time under the repository lock.

use crate::deps::{DependencyEntry, DependencyRegistry};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::link;
use crate::store::Repository;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// What to do with an entry whose file no longer matches its registered digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairStrategy {
    /// Report only.
    #[default]
    None,
    /// Remove the registry entry and leave the file alone.
    Drop,
    /// Re-link the file to the existing object for its current digest.
    ForceFix,
    /// Store the current content and rewrite the entry to its digest.
    Store,
}

impl RepairStrategy {
    /// Whether this strategy can change anything on disk.
    pub fn mutates(&self) -> bool {
        !matches!(self, RepairStrategy::None)
    }
}

/// Final state of one checked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Valid,
    Invalid,
    Missing,
    Repaired,
    Dropped,
    Stored,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Valid => "valid",
            CheckStatus::Invalid => "invalid",
            CheckStatus::Missing => "missing",
            CheckStatus::Repaired => "repaired",
            CheckStatus::Dropped => "dropped",
            CheckStatus::Stored => "stored",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub filename: String,
    pub status: CheckStatus,
    pub registered: Hash,
    /// Digest of the file as found; absent when the file is missing or unreadable.
    pub current: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Tally over the six states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub valid: usize,
    pub invalid: usize,
    pub missing: usize,
    pub repaired: usize,
    pub dropped: usize,
    pub stored: usize,
}

impl CheckSummary {
    pub fn record(&mut self, status: CheckStatus) {
        match status {
            CheckStatus::Valid => self.valid += 1,
            CheckStatus::Invalid => self.invalid += 1,
            CheckStatus::Missing => self.missing += 1,
            CheckStatus::Repaired => self.repaired += 1,
            CheckStatus::Dropped => self.dropped += 1,
            CheckStatus::Stored => self.stored += 1,
        }
    }

    pub fn merge(&mut self, other: &CheckSummary) {
        self.valid += other.valid;
        self.invalid += other.invalid;
        self.missing += other.missing;
        self.repaired += other.repaired;
        self.dropped += other.dropped;
        self.stored += other.stored;
    }

    pub fn total(&self) -> usize {
        self.valid + self.invalid + self.missing + self.repaired + self.dropped + self.stored
    }

    /// Whether every entry ended up valid or repaired in some way.
    pub fn is_clean(&self) -> bool {
        self.invalid == 0 && self.missing == 0
    }
}

/// Check results of one consumer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    pub consumer: PathBuf,
    /// False when the consumer has no registry at all.
    pub registry_found: bool,
    pub results: Vec<CheckResult>,
    pub summary: CheckSummary,
    /// Set in global mode when the consumer could not be checked at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Check results across consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub strategy: RepairStrategy,
    pub consumers: Vec<ConsumerReport>,
    pub summary: CheckSummary,
}

impl CheckReport {
    fn from_consumers(strategy: RepairStrategy, consumers: Vec<ConsumerReport>) -> Self {
        let mut summary = CheckSummary::default();
        for consumer in &consumers {
            summary.merge(&consumer.summary);
        }
        Self {
            strategy,
            consumers,
            summary,
        }
    }

    /// Number of registry entries checked.
    pub fn files_checked(&self) -> usize {
        self.summary.total()
    }
}

/// State of a consumer file at hashing time.
enum Observation {
    Missing,
    Hashed(Hash),
    Unreadable(String),
}

impl Repository {
    /// Check one consumer directory, applying `strategy` to mismatched entries.
    pub fn check(&self, consumer: &Path, strategy: RepairStrategy) -> Result<CheckReport> {
        let _lock = if strategy.mutates() { Some(self.lock()?) } else { None };
        let report = self.check_consumer(consumer, strategy)?;
        Ok(CheckReport::from_consumers(strategy, vec![report]))
    }

    /// Check every registered consumer.
    ///
    /// Vanished consumer directories are skipped with a warning; a consumer whose
    /// registry cannot be read is reported with an error and the run continues.
    pub fn check_global(&self, strategy: RepairStrategy) -> Result<CheckReport> {
        let _lock = if strategy.mutates() { Some(self.lock()?) } else { None };

        let mut reports = Vec::new();
        for consumer in self.leeches().existing()? {
            match self.check_consumer(&consumer, strategy) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::warn!(consumer = %consumer.display(), error = %e, "failed to check consumer, continuing");
                    reports.push(ConsumerReport {
                        consumer,
                        registry_found: false,
                        results: Vec::new(),
                        summary: CheckSummary::default(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let report = CheckReport::from_consumers(strategy, reports);
        tracing::info!(
            consumers = report.consumers.len(),
            files = report.files_checked(),
            invalid = report.summary.invalid,
            missing = report.summary.missing,
            "global check complete"
        );
        Ok(report)
    }

    /// Check one consumer. The caller holds the lock when `strategy` mutates.
    fn check_consumer(&self, consumer: &Path, strategy: RepairStrategy) -> Result<ConsumerReport> {
        let registry = DependencyRegistry::new(consumer);
        let Some(entries) = registry.load()? else {
            tracing::info!(consumer = %consumer.display(), "no dependency registry, nothing to check");
            return Ok(ConsumerReport {
                consumer: consumer.to_path_buf(),
                registry_found: false,
                results: Vec::new(),
                summary: CheckSummary::default(),
                error: None,
            });
        };

        tracing::debug!(consumer = %consumer.display(), entries = entries.len(), "checking dependencies");

        let observations: Vec<Observation> = entries
            .par_iter()
            .map(|entry| self.observe(&consumer.join(&entry.filename)))
            .collect();

        let mut results = Vec::with_capacity(entries.len());
        let mut summary = CheckSummary::default();
        for (entry, observation) in entries.into_iter().zip(observations) {
            let result = self.classify(&registry, entry, observation, strategy);
            summary.record(result.status);
            results.push(result);
        }

        Ok(ConsumerReport {
            consumer: consumer.to_path_buf(),
            registry_found: true,
            results,
            summary,
            error: None,
        })
    }

    fn observe(&self, path: &Path) -> Observation {
        match self.digest(path) {
            Ok(hash) => Observation::Hashed(hash),
            Err(e) if e.is_not_found() => Observation::Missing,
            Err(e) => Observation::Unreadable(e.to_string()),
        }
    }

    fn classify(
        &self,
        registry: &DependencyRegistry,
        entry: DependencyEntry,
        observation: Observation,
        strategy: RepairStrategy,
    ) -> CheckResult {
        let mut result = CheckResult {
            filename: entry.filename,
            status: CheckStatus::Invalid,
            registered: entry.hash,
            current: None,
            detail: None,
        };

        let current = match observation {
            Observation::Missing => {
                result.status = CheckStatus::Missing;
                return result;
            }
            Observation::Unreadable(reason) => {
                result.detail = Some(reason);
                return result;
            }
            Observation::Hashed(hash) => hash,
        };
        result.current = Some(current);

        if current == entry.hash {
            result.status = CheckStatus::Valid;
            return result;
        }

        let path = registry.consumer().join(&result.filename);
        tracing::debug!(
            path = %path.display(),
            registered = %entry.hash,
            current = %current,
            "digest mismatch"
        );

        let repaired = match strategy {
            RepairStrategy::None => return result,
            RepairStrategy::Drop => registry
                .remove(&result.filename)
                .map(|_| CheckStatus::Dropped),
            RepairStrategy::ForceFix => self
                .force_fix(&path, &current, &result.filename)
                .map(|_| CheckStatus::Repaired),
            RepairStrategy::Store => self
                .store_current(registry, &path, &result.filename)
                .map(|hash| {
                    result.current = Some(hash);
                    CheckStatus::Stored
                }),
        };

        match repaired {
            Ok(status) => {
                tracing::info!(path = %path.display(), status = %status, "repaired entry");
                result.status = status;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "repair failed");
                result.detail = Some(e.to_string());
            }
        }
        result
    }

    /// Point `path` at the existing object for its current digest. Never creates objects.
    fn force_fix(&self, path: &Path, current: &Hash, filename: &str) -> Result<()> {
        let target = self.canonical_path_for(current, filename);
        if !target.is_file() {
            return Err(Error::repair_unavailable(
                path,
                format!("no canonical object at {}", target.display()),
            ));
        }
        link::replace_with_link(path, &target)
    }

    /// Store the current content of `path` and rewrite its entry. Returns the new digest.
    fn store_current(&self, registry: &DependencyRegistry, path: &Path, filename: &str) -> Result<Hash> {
        let outcome = self.put_object(path)?;
        self.leeches().register_if_absent(registry.consumer())?;
        registry.update(filename, &outcome.key.hash)?;
        link::replace_with_link(path, &outcome.path)?;
        Ok(outcome.key.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        temp_dir: TempDir,
        repo: Repository,
        consumer: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let repo = Repository::init(temp_dir.path().join("repo"), Algorithm::Sha256).unwrap();
            let consumer = temp_dir.path().join("consumer");
            fs::create_dir(&consumer).unwrap();
            repo.leeches().register_if_absent(&consumer).unwrap();
            Self {
                temp_dir,
                repo,
                consumer,
            }
        }

        fn registry(&self) -> DependencyRegistry {
            DependencyRegistry::new(&self.consumer)
        }

        /// Store `content` as `name`: object, registry line, and link.
        fn stored(&self, name: &str, content: &[u8]) -> Hash {
            let file = self.consumer.join(name);
            fs::write(&file, content).unwrap();
            let outcome = self.repo.put(&file).unwrap();
            self.registry().append(name, &outcome.key.hash).unwrap();
            outcome.key.hash
        }

        /// Replace `name` with a plain file holding `content`.
        fn overwrite(&self, name: &str, content: &[u8]) {
            let file = self.consumer.join(name);
            fs::remove_file(&file).unwrap();
            fs::write(&file, content).unwrap();
        }

        fn status_of(&self, report: &CheckReport, name: &str) -> CheckStatus {
            report.consumers[0]
                .results
                .iter()
                .find(|r| r.filename == name)
                .unwrap()
                .status
        }
    }

    #[test]
    fn test_stored_file_checks_valid() {
        let fx = Fixture::new();
        fx.stored("a.txt", b"hello");

        let report = fx.repo.check(&fx.consumer, RepairStrategy::None).unwrap();
        assert_eq!(fx.status_of(&report, "a.txt"), CheckStatus::Valid);
        assert_eq!(report.summary.valid, 1);
        assert!(report.summary.is_clean());
    }

    #[test]
    fn test_missing_and_dangling_are_missing() {
        let fx = Fixture::new();
        fx.stored("a.txt", b"a");
        let b_hash = fx.stored("b.txt", b"b");
        fs::remove_file(fx.consumer.join("a.txt")).unwrap();
        // Dangling link: the object is gone.
        fs::remove_file(fx.repo.canonical_path(&b_hash, "txt")).unwrap();

        let report = fx.repo.check(&fx.consumer, RepairStrategy::None).unwrap();
        assert_eq!(fx.status_of(&report, "a.txt"), CheckStatus::Missing);
        assert_eq!(fx.status_of(&report, "b.txt"), CheckStatus::Missing);
        assert_eq!(report.summary.missing, 2);
    }

    #[test]
    fn test_mismatch_without_strategy_is_invalid() {
        let fx = Fixture::new();
        let registered = fx.stored("a.txt", b"old");
        fx.overwrite("a.txt", b"new");

        let report = fx.repo.check(&fx.consumer, RepairStrategy::None).unwrap();
        let result = &report.consumers[0].results[0];
        assert_eq!(result.status, CheckStatus::Invalid);
        assert_eq!(result.registered, registered);
        assert_eq!(result.current, Some(Hash::hash_bytes(Algorithm::Sha256, b"new")));
        assert!(!fx.repo.root().join(crate::lock::LOCK_FILE).exists());
    }

    #[test]
    fn test_drop_removes_exactly_one_line() {
        let fx = Fixture::new();
        fx.stored("a.txt", b"a");
        fx.stored("b.txt", b"b");
        fx.stored("c.txt", b"c");
        fx.overwrite("b.txt", b"changed");
        let before = fs::read_to_string(fx.registry().path()).unwrap();

        let report = fx.repo.check(&fx.consumer, RepairStrategy::Drop).unwrap();
        assert_eq!(fx.status_of(&report, "b.txt"), CheckStatus::Dropped);
        assert_eq!(report.summary.valid, 2);

        let after = fs::read_to_string(fx.registry().path()).unwrap();
        let expected: String = before
            .lines()
            .filter(|l| !l.ends_with(" b.txt"))
            .map(|l| format!("{}\n", l))
            .collect();
        assert_eq!(after, expected);
        // File untouched.
        assert_eq!(fs::read(fx.consumer.join("b.txt")).unwrap(), b"changed");
    }

    #[test]
    fn test_force_fix_relinks_to_existing_object() {
        let fx = Fixture::new();
        let registered = fx.stored("a.txt", b"old");
        // The new content already exists as an object.
        let scratch = fx.temp_dir.path().join("scratch.txt");
        fs::write(&scratch, b"new").unwrap();
        let existing = fx.repo.put_object(&scratch).unwrap();
        fx.overwrite("a.txt", b"new");

        let report = fx.repo.check(&fx.consumer, RepairStrategy::ForceFix).unwrap();
        assert_eq!(fx.status_of(&report, "a.txt"), CheckStatus::Repaired);
        let file = fx.consumer.join("a.txt");
        assert_eq!(fs::read_link(&file).unwrap(), existing.path);
        // The registry is not rewritten by force-fix.
        assert_eq!(fx.registry().get("a.txt").unwrap(), Some(registered));
    }

    #[test]
    fn test_force_fix_without_object_is_invalid() {
        let fx = Fixture::new();
        fx.stored("a.txt", b"old");
        fx.overwrite("a.txt", b"never stored");

        let report = fx.repo.check(&fx.consumer, RepairStrategy::ForceFix).unwrap();
        let result = &report.consumers[0].results[0];
        assert_eq!(result.status, CheckStatus::Invalid);
        assert!(result.detail.as_ref().unwrap().contains("no canonical object"));
        // Never creates objects.
        assert_eq!(fx.repo.scan_objects().unwrap().len(), 1);
        assert!(!link::is_link(&fx.consumer.join("a.txt")));
    }

    #[test]
    fn test_store_strategy_stores_and_updates_registry() {
        let fx = Fixture::new();
        fx.stored("a.txt", b"old");
        fx.overwrite("a.txt", b"new");
        let new_hash = Hash::hash_bytes(Algorithm::Sha256, b"new");

        let report = fx.repo.check(&fx.consumer, RepairStrategy::Store).unwrap();
        assert_eq!(fx.status_of(&report, "a.txt"), CheckStatus::Stored);
        assert_eq!(fx.registry().get("a.txt").unwrap(), Some(new_hash));
        let file = fx.consumer.join("a.txt");
        assert_eq!(fs::read_link(&file).unwrap(), fx.repo.canonical_path(&new_hash, "txt"));

        let recheck = fx.repo.check(&fx.consumer, RepairStrategy::None).unwrap();
        assert_eq!(fx.status_of(&recheck, "a.txt"), CheckStatus::Valid);
    }

    #[test]
    fn test_store_strategy_failure_falls_back_to_invalid() {
        let fx = Fixture::new();
        fx.stored("a.dat", b"old");
        fx.overwrite("a.dat", b"new");
        let before = fs::read_to_string(fx.registry().path()).unwrap();

        // A plain file where the extension directory belongs makes the object write fail.
        let ext_dir = fx.repo.objects_dir().join("dat");
        fs::remove_dir_all(&ext_dir).unwrap();
        fs::write(&ext_dir, b"blocker").unwrap();

        let report = fx.repo.check(&fx.consumer, RepairStrategy::Store).unwrap();
        let result = &report.consumers[0].results[0];
        assert_eq!(result.status, CheckStatus::Invalid);
        assert!(result.detail.is_some());
        assert_eq!(result.current, Some(Hash::hash_bytes(Algorithm::Sha256, b"new")));
        assert_eq!(report.summary.invalid, 1);

        assert_eq!(fs::read_to_string(fx.registry().path()).unwrap(), before);
        let file = fx.consumer.join("a.dat");
        assert!(!link::is_link(&file));
        assert_eq!(fs::read(&file).unwrap(), b"new");
    }

    #[test]
    fn test_no_registry() {
        let fx = Fixture::new();
        let report = fx.repo.check(&fx.consumer, RepairStrategy::None).unwrap();
        assert!(!report.consumers[0].registry_found);
        assert_eq!(report.files_checked(), 0);
    }

    #[test]
    fn test_global_aggregates_and_continues() {
        let fx = Fixture::new();
        fx.stored("a.txt", b"a");

        let other = fx.temp_dir.path().join("other");
        fs::create_dir(&other).unwrap();
        fs::write(other.join("x.bin"), b"x").unwrap();
        let hash = fx.repo.put(&other.join("x.bin")).unwrap().key.hash;
        DependencyRegistry::new(&other).append("x.bin", &hash).unwrap();
        fx.repo.leeches().register_if_absent(&other).unwrap();
        fs::remove_file(other.join("x.bin")).unwrap();

        // An unreadable registry fails only its own consumer.
        let broken = fx.temp_dir.path().join("broken");
        fs::create_dir_all(DependencyRegistry::new(&broken).path()).unwrap();
        fx.repo.leeches().register_if_absent(&broken).unwrap();

        let report = fx.repo.check_global(RepairStrategy::None).unwrap();
        assert_eq!(report.consumers.len(), 3);
        assert_eq!(report.summary.valid, 1);
        assert_eq!(report.summary.missing, 1);
        assert_eq!(report.files_checked(), 2);
        assert!(report.consumers[2].error.is_some());
    }

    #[test]
    fn test_summary_tally() {
        let mut summary = CheckSummary::default();
        for status in [
            CheckStatus::Valid,
            CheckStatus::Valid,
            CheckStatus::Invalid,
            CheckStatus::Stored,
        ] {
            summary.record(status);
        }
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_report_serializes_statuses() {
        let fx = Fixture::new();
        fx.stored("a.txt", b"a");
        let report = fx.repo.check(&fx.consumer, RepairStrategy::None).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["strategy"], "none");
        assert_eq!(json["consumers"][0]["results"][0]["status"], "valid");
        assert_eq!(json["summary"]["valid"], 1);
    }
}
