//! Storing consumer files: single files and directory walks.

use crate::deps::{AppendOutcome, DependencyRegistry, REGISTRY_DIR, validate_filename};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::link;
use crate::store::{Repository, file_name_str};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// What happened to one stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StoreStatus {
    /// The file now links to its canonical object.
    Linked,
    /// The consumer already registers another digest for this filename. Nothing was
    /// changed; `check --store` resolves it.
    Conflict { registered: Hash },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub path: PathBuf,
    pub consumer: PathBuf,
    pub filename: String,
    pub hash: Hash,
    /// Canonical object path; not created on conflict.
    pub object: PathBuf,
    /// Whether a new object was written to the store.
    pub created: bool,
    #[serde(flatten)]
    pub status: StoreStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of storing a file or a directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    pub files: Vec<StoredFile>,
    /// Existing links left as they are.
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<StoreFailure>,
}

impl StoreReport {
    pub fn linked(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == StoreStatus::Linked)
            .count()
    }

    pub fn created(&self) -> usize {
        self.files.iter().filter(|f| f.created).count()
    }

    pub fn conflicts(&self) -> usize {
        self.files.len() - self.linked()
    }

    fn merge(&mut self, other: StoreReport) {
        self.files.extend(other.files);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }
}

impl Repository {
    /// Store a file, or every regular file below a directory.
    ///
    /// Each file's parent directory is its consumer. For one file the order is: copy
    /// the object, register the consumer in the catalogue, register the dependency,
    /// and only then replace the file with a link, so an interrupted run never leaves
    /// a link to an unreferenced object.
    ///
    /// Directory walks honor `.gitignore`, never descend into `.unirepo/` or the
    /// repository itself, and leave existing links alone. A file that fails is
    /// recorded and the walk continues. Storing a single file fails on error, as does
    /// any path inside the repository root.
    pub fn store(&self, path: &Path) -> Result<StoreReport> {
        let _lock = self.lock()?;
        let path = std::path::absolute(path)?;
        if path.starts_with(self.root()) {
            return Err(Error::invalid_filename(
                path.display().to_string(),
                "path lies inside the repository",
            ));
        }
        let meta = fs::symlink_metadata(&path).map_err(|e| Error::from_io(&path, e))?;

        let report = if meta.file_type().is_symlink() {
            tracing::info!(path = %path.display(), "already a link, skipping");
            StoreReport {
                skipped: vec![path],
                ..StoreReport::default()
            }
        } else if meta.is_dir() {
            self.store_dir(&path)?
        } else {
            StoreReport {
                files: vec![self.store_file(&path)?],
                ..StoreReport::default()
            }
        };

        tracing::info!(
            linked = report.linked(),
            created = report.created(),
            conflicts = report.conflicts(),
            failures = report.failures.len(),
            "store complete"
        );
        Ok(report)
    }

    /// Store several paths, continuing past paths that fail entirely.
    pub fn store_all<P: AsRef<Path>>(&self, paths: &[P]) -> StoreReport {
        let mut report = StoreReport::default();
        for path in paths {
            let path = path.as_ref();
            match self.store(path) {
                Ok(partial) => report.merge(partial),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to store");
                    report.failures.push(StoreFailure {
                        path: path.to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    fn store_dir(&self, dir: &Path) -> Result<StoreReport> {
        let repo_root = self.root().to_path_buf();
        let walker = ignore::WalkBuilder::new(dir)
            .hidden(false)
            .git_ignore(true)
            .require_git(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                name != REGISTRY_DIR
                    && !name.starts_with(link::TEMP_LINK_PREFIX)
                    && !entry.path().starts_with(&repo_root)
            })
            .build();

        let mut report = StoreReport::default();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    report.failures.push(StoreFailure {
                        path: dir.to_path_buf(),
                        error: Error::from(e).to_string(),
                    });
                    continue;
                }
            };
            let Some(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_symlink() {
                tracing::debug!(path = %entry.path().display(), "already a link, skipping");
                report.skipped.push(entry.path().to_path_buf());
            } else if file_type.is_file() {
                match self.store_file(entry.path()) {
                    Ok(stored) => report.files.push(stored),
                    Err(e) => {
                        tracing::warn!(path = %entry.path().display(), error = %e, "failed to store file");
                        report.failures.push(StoreFailure {
                            path: entry.path().to_path_buf(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(report)
    }

    /// Store one regular file at an absolute path. The caller holds the lock.
    fn store_file(&self, path: &Path) -> Result<StoredFile> {
        let filename = file_name_str(path)?.to_string();
        validate_filename(&filename)?;
        let consumer = path
            .parent()
            .ok_or_else(|| Error::invalid_filename(&filename, "file has no parent directory"))?
            .to_path_buf();
        let registry = DependencyRegistry::new(&consumer);

        let hash = self.digest(path)?;
        if let Some(registered) = registry.get(&filename)?
            && registered != hash
        {
            tracing::warn!(
                path = %path.display(),
                registered = %registered,
                current = %hash,
                "file is registered with a different hash, not storing"
            );
            let object = self.canonical_path_for(&hash, &filename);
            return Ok(StoredFile {
                path: path.to_path_buf(),
                consumer,
                filename,
                hash,
                object,
                created: false,
                status: StoreStatus::Conflict { registered },
            });
        }

        let outcome = self.put_hashed(path, hash)?;
        self.leeches().register_if_absent(&consumer)?;

        if let AppendOutcome::Conflict { registered } = registry.append(&filename, &hash)? {
            return Ok(StoredFile {
                path: path.to_path_buf(),
                consumer,
                filename,
                hash,
                object: outcome.path,
                created: outcome.created,
                status: StoreStatus::Conflict { registered },
            });
        }

        link::replace_with_link(path, &outcome.path)?;
        tracing::debug!(path = %path.display(), object = %outcome.path.display(), "stored");

        Ok(StoredFile {
            path: path.to_path_buf(),
            consumer,
            filename,
            hash,
            object: outcome.path,
            created: outcome.created,
            status: StoreStatus::Linked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckStatus, RepairStrategy};
    use crate::hash::Algorithm;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn setup() -> (TempDir, Repository) {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path().join("repo"), Algorithm::Sha256).unwrap();
        (temp_dir, repo)
    }

    #[test]
    fn test_store_hello_scenario() {
        let (temp_dir, repo) = setup();
        let consumer = temp_dir.path().join("project");
        fs::create_dir(&consumer).unwrap();
        let file = consumer.join("a.txt");
        fs::write(&file, b"hello").unwrap();

        let report = repo.store(&file).unwrap();
        assert_eq!(report.linked(), 1);

        let object = repo
            .root()
            .join(format!("sha256/txt/2c/{}.txt", HELLO_SHA256));
        assert!(object.is_file());
        assert_eq!(fs::read_link(&file).unwrap(), object);

        let registry = fs::read_to_string(consumer.join(".unirepo/dependencies.txt")).unwrap();
        assert_eq!(registry, format!("{} a.txt\n", HELLO_SHA256));

        let leeches = fs::read_to_string(repo.root().join("leeches.txt")).unwrap();
        assert_eq!(leeches, format!("{}\n", consumer.display()));
    }

    #[test]
    fn test_store_then_check_is_valid() {
        let (temp_dir, repo) = setup();
        let file = temp_dir.path().join("data.bin");
        fs::write(&file, b"\x00\x01\x02").unwrap();
        repo.store(&file).unwrap();

        let report = repo.check(temp_dir.path(), RepairStrategy::None).unwrap();
        assert_eq!(report.consumers[0].results[0].status, CheckStatus::Valid);
    }

    #[test]
    fn test_identical_content_in_unrelated_directories() {
        let (temp_dir, repo) = setup();
        let c1 = temp_dir.path().join("one");
        let c2 = temp_dir.path().join("two/nested");
        fs::create_dir_all(&c1).unwrap();
        fs::create_dir_all(&c2).unwrap();
        fs::write(c1.join("x.txt"), b"shared").unwrap();
        fs::write(c2.join("y.txt"), b"shared").unwrap();

        let first = repo.store(&c1.join("x.txt")).unwrap();
        let second = repo.store(&c2.join("y.txt")).unwrap();
        assert!(first.files[0].created);
        assert!(!second.files[0].created);
        assert_eq!(repo.scan_objects().unwrap().len(), 1);

        let h1 = DependencyRegistry::new(&c1).get("x.txt").unwrap();
        let h2 = DependencyRegistry::new(&c2).get("y.txt").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(repo.leeches().read().unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_restoring_same_bytes_does_not_grow_store() {
        let (temp_dir, repo) = setup();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"same").unwrap();
        repo.store(&file).unwrap();

        let copy = temp_dir.path().join("b.txt");
        fs::write(&copy, b"same").unwrap();
        repo.store(&copy).unwrap();

        assert_eq!(repo.scan_objects().unwrap().len(), 1);
    }

    #[test]
    fn test_store_existing_link_is_skipped() {
        let (temp_dir, repo) = setup();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();
        repo.store(&file).unwrap();

        let again = repo.store(&file).unwrap();
        assert!(again.files.is_empty());
        assert_eq!(again.skipped, vec![file]);
    }

    #[test]
    fn test_store_conflict_leaves_file_and_registry() {
        let (temp_dir, repo) = setup();
        let consumer = temp_dir.path().join("c");
        fs::create_dir(&consumer).unwrap();
        let registry = DependencyRegistry::new(&consumer);
        let old = Hash::hash_bytes(Algorithm::Sha256, b"old");
        registry.append("a.txt", &old).unwrap();

        let file = consumer.join("a.txt");
        fs::write(&file, b"new").unwrap();
        let report = repo.store(&file).unwrap();

        assert_eq!(report.conflicts(), 1);
        assert_eq!(
            report.files[0].status,
            StoreStatus::Conflict { registered: old }
        );
        assert!(!link::is_link(&file));
        assert_eq!(registry.get("a.txt").unwrap(), Some(old));
        assert!(repo.scan_objects().unwrap().is_empty());
    }

    #[test]
    fn test_store_rejects_whitespace_filename() {
        let (temp_dir, repo) = setup();
        let file = temp_dir.path().join("my notes.txt");
        fs::write(&file, b"x").unwrap();

        let err = repo.store(&file).unwrap_err();
        assert!(matches!(err, Error::InvalidFilename { .. }));
        assert!(!link::is_link(&file));
        assert!(repo.scan_objects().unwrap().is_empty());
    }

    #[test]
    fn test_store_directory_walk() {
        let (temp_dir, repo) = setup();
        let project = temp_dir.path().join("project");
        fs::create_dir_all(project.join("sub")).unwrap();
        fs::write(project.join("a.txt"), b"a").unwrap();
        fs::write(project.join("sub/b.txt"), b"b").unwrap();
        fs::write(project.join("skip.log"), b"log").unwrap();
        fs::write(project.join("bad name.txt"), b"bad").unwrap();
        fs::write(project.join(".gitignore"), b"*.log\n").unwrap();

        let report = repo.store(&project).unwrap();

        // a.txt, sub/b.txt and .gitignore itself.
        assert_eq!(report.linked(), 3);
        assert_eq!(report.failures.len(), 1);
        assert!(!link::is_link(&project.join("skip.log")));
        assert!(link::is_link(&project.join("sub/b.txt")));

        // Each file's own directory is its consumer.
        assert!(DependencyRegistry::new(project.join("sub")).get("b.txt").unwrap().is_some());
        assert!(DependencyRegistry::new(&project).get("a.txt").unwrap().is_some());

        // A second walk skips the links and never reads its own registries.
        let again = repo.store(&project).unwrap();
        assert!(again.files.is_empty());
        assert_eq!(again.skipped.len(), 3);
    }

    #[test]
    fn test_store_directory_skips_repository_inside_it() {
        let temp_dir = TempDir::new().unwrap();
        let workdir = temp_dir.path().to_path_buf();
        let repo = Repository::init(workdir.join(".unirepo-root"), Algorithm::Sha256).unwrap();
        fs::write(workdir.join("a.txt"), b"a").unwrap();

        let report = repo.store(&workdir).unwrap();
        assert_eq!(report.linked(), 1);
        assert!(report.failures.is_empty());
        assert_eq!(repo.scan_objects().unwrap().len(), 1);
    }

    #[test]
    fn test_store_rejects_paths_inside_repository() {
        let (temp_dir, repo) = setup();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();
        let stored = repo.store(&file).unwrap();
        let object = stored.files[0].object.clone();

        let err = repo.store(&object).unwrap_err();
        assert!(matches!(err, Error::InvalidFilename { .. }));
        assert!(!link::is_link(&object));
        assert_eq!(fs::read(&object).unwrap(), b"a");
        assert_eq!(fs::read(&file).unwrap(), b"a");

        let config = repo.root().join("config");
        assert!(repo.store(&config).is_err());
        assert!(repo.store(repo.root()).is_err());
        assert!(!link::is_link(&config));
        assert_eq!(repo.store_all(&[&config]).failures.len(), 1);
    }

    #[test]
    fn test_store_all_continues_past_missing_path() {
        let (temp_dir, repo) = setup();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();

        let report = repo.store_all(&[temp_dir.path().join("absent.txt"), file]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.linked(), 1);
    }
}
