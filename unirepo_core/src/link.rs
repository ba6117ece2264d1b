//! Consumer-side links: atomic replace-with-link, inflate and deflate.

use crate::deps::DependencyRegistry;
use crate::error::{Error, Result};
use crate::store::Repository;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Prefix of the temporary link created next to a file before it is renamed over it.
pub(crate) const TEMP_LINK_PREFIX: &str = ".unirepo-link";

/// Create a symbolic link at `link` pointing to `target`.
pub fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Whether `path` itself is a symbolic link (not followed).
pub fn is_link(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Replace `path` with a link to `target` without the path ever being absent.
///
/// The link is created under a unique temporary name in the same directory and then
/// renamed over `path`.
pub fn replace_with_link(path: &Path, target: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let temp = tempfile::Builder::new()
        .prefix(TEMP_LINK_PREFIX)
        .make_in(dir, |candidate| create_link(target, candidate))
        .map_err(|e| Error::from_io(dir, e))?;
    temp.into_temp_path().persist(path)?;

    tracing::debug!(path = %path.display(), target = %target.display(), "replaced file with link");
    Ok(())
}

/// What inflate did for one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InflateStatus {
    /// The link was created.
    Linked,
    /// Something already exists at the path; left untouched.
    AlreadyPresent,
    /// No canonical object for the registered digest.
    MissingObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InflateItem {
    pub filename: String,
    pub path: PathBuf,
    pub status: InflateStatus,
}

/// Result of inflating one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InflateReport {
    pub consumer: PathBuf,
    /// False when the consumer has no registry at all.
    pub registry_found: bool,
    pub items: Vec<InflateItem>,
}

impl InflateReport {
    pub fn count(&self, status: InflateStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }
}

/// What deflate did for one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeflateStatus {
    /// The link was removed.
    Removed,
    /// A regular file or directory sits at the path; skipped.
    NotALink,
    /// Nothing at the path.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeflateItem {
    pub filename: String,
    pub path: PathBuf,
    pub status: DeflateStatus,
}

/// Result of deflating one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeflateReport {
    pub consumer: PathBuf,
    pub registry_found: bool,
    pub items: Vec<DeflateItem>,
}

impl DeflateReport {
    pub fn count(&self, status: DeflateStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }
}

impl Repository {
    /// Recreate the link of every registry entry whose consumer path is absent.
    ///
    /// Existing paths, including dangling links, are never touched, so running it
    /// twice changes nothing the second time.
    pub fn inflate(&self, consumer: &Path) -> Result<InflateReport> {
        let _lock = self.lock()?;
        let registry = DependencyRegistry::new(consumer);

        let Some(entries) = registry.load()? else {
            tracing::info!(consumer = %consumer.display(), "no dependency registry, nothing to inflate");
            return Ok(InflateReport {
                consumer: consumer.to_path_buf(),
                registry_found: false,
                items: Vec::new(),
            });
        };

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = consumer.join(&entry.filename);

            let status = if fs::symlink_metadata(&path).is_ok() {
                InflateStatus::AlreadyPresent
            } else {
                let target = self.canonical_path_for(&entry.hash, &entry.filename);
                if target.is_file() {
                    create_link(&target, &path).map_err(|e| Error::from_io(&path, e))?;
                    tracing::debug!(path = %path.display(), target = %target.display(), "linked");
                    InflateStatus::Linked
                } else {
                    tracing::warn!(
                        path = %path.display(),
                        hash = %entry.hash,
                        "canonical object missing, cannot inflate"
                    );
                    InflateStatus::MissingObject
                }
            };

            items.push(InflateItem {
                filename: entry.filename,
                path,
                status,
            });
        }

        let report = InflateReport {
            consumer: consumer.to_path_buf(),
            registry_found: true,
            items,
        };
        tracing::info!(
            consumer = %consumer.display(),
            linked = report.count(InflateStatus::Linked),
            missing = report.count(InflateStatus::MissingObject),
            "inflate complete"
        );
        Ok(report)
    }

    /// Remove every registry-listed consumer path that is a link.
    ///
    /// Regular files are left in place with a warning. The registry itself is kept so
    /// a later inflate can restore the links.
    pub fn deflate(&self, consumer: &Path) -> Result<DeflateReport> {
        let _lock = self.lock()?;
        let registry = DependencyRegistry::new(consumer);

        let Some(entries) = registry.load()? else {
            tracing::info!(consumer = %consumer.display(), "no dependency registry, nothing to deflate");
            return Ok(DeflateReport {
                consumer: consumer.to_path_buf(),
                registry_found: false,
                items: Vec::new(),
            });
        };

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = consumer.join(&entry.filename);

            let status = match fs::symlink_metadata(&path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => DeflateStatus::Missing,
                Err(e) => return Err(Error::from_io(&path, e)),
                Ok(meta) if meta.file_type().is_symlink() => {
                    fs::remove_file(&path).map_err(|e| Error::from_io(&path, e))?;
                    tracing::debug!(path = %path.display(), "removed link");
                    DeflateStatus::Removed
                }
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "not a link, leaving in place");
                    DeflateStatus::NotALink
                }
            };

            items.push(DeflateItem {
                filename: entry.filename,
                path,
                status,
            });
        }

        let report = DeflateReport {
            consumer: consumer.to_path_buf(),
            registry_found: true,
            items,
        };
        tracing::info!(
            consumer = %consumer.display(),
            removed = report.count(DeflateStatus::Removed),
            "deflate complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn setup() -> (TempDir, Repository, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path().join("repo"), Algorithm::Sha256).unwrap();
        let consumer = temp_dir.path().join("consumer");
        fs::create_dir(&consumer).unwrap();
        (temp_dir, repo, consumer)
    }

    #[test]
    fn test_replace_with_link_leaves_no_temp_files() {
        let (_temp_dir, _repo, consumer) = setup();
        let target = consumer.join("target.bin");
        let file = consumer.join("f.bin");
        fs::write(&target, b"target").unwrap();
        fs::write(&file, b"original").unwrap();

        replace_with_link(&file, &target).unwrap();

        assert!(is_link(&file));
        assert_eq!(fs::read_link(&file).unwrap(), target);
        assert_eq!(fs::read(&file).unwrap(), b"target");
        let names: Vec<_> = fs::read_dir(&consumer)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.starts_with(TEMP_LINK_PREFIX)));
    }

    #[test]
    fn test_replace_existing_link() {
        let (_temp_dir, _repo, consumer) = setup();
        let a = consumer.join("a");
        let b = consumer.join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        let link = consumer.join("l");
        create_link(&a, &link).unwrap();

        replace_with_link(&link, &b).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), b);
    }

    #[test]
    fn test_inflate_without_registry() {
        let (_temp_dir, repo, consumer) = setup();
        let report = repo.inflate(&consumer).unwrap();
        assert!(!report.registry_found);
        assert!(report.items.is_empty());
    }

    #[test]
    fn test_deflate_then_inflate_restores_links() {
        let (_temp_dir, repo, consumer) = setup();
        let file = consumer.join("a.txt");
        fs::write(&file, b"hello").unwrap();
        let outcome = repo.put(&file).unwrap();
        DependencyRegistry::new(&consumer)
            .append("a.txt", &outcome.key.hash)
            .unwrap();

        let deflated = repo.deflate(&consumer).unwrap();
        assert_eq!(deflated.count(DeflateStatus::Removed), 1);
        assert!(fs::symlink_metadata(&file).is_err());
        // Registry survives deflate.
        assert!(DependencyRegistry::new(&consumer).path().is_file());

        let inflated = repo.inflate(&consumer).unwrap();
        assert_eq!(inflated.count(InflateStatus::Linked), 1);
        assert_eq!(fs::read_link(&file).unwrap(), outcome.path);
        assert_eq!(fs::read(&file).unwrap(), b"hello");
    }

    #[test]
    fn test_inflate_is_idempotent() {
        let (_temp_dir, repo, consumer) = setup();
        let file = consumer.join("a.txt");
        fs::write(&file, b"hello").unwrap();
        let outcome = repo.put_object(&file).unwrap();
        fs::remove_file(&file).unwrap();
        DependencyRegistry::new(&consumer)
            .append("a.txt", &outcome.key.hash)
            .unwrap();

        let first = repo.inflate(&consumer).unwrap();
        assert_eq!(first.count(InflateStatus::Linked), 1);
        let link_before = fs::read_link(&file).unwrap();

        let second = repo.inflate(&consumer).unwrap();
        assert_eq!(second.count(InflateStatus::Linked), 0);
        assert_eq!(second.count(InflateStatus::AlreadyPresent), 1);
        assert_eq!(fs::read_link(&file).unwrap(), link_before);
    }

    #[test]
    fn test_inflate_leaves_regular_file_alone() {
        let (_temp_dir, repo, consumer) = setup();
        let file = consumer.join("a.txt");
        fs::write(&file, b"hello").unwrap();
        let hash = repo.put_object(&file).unwrap().key.hash;
        DependencyRegistry::new(&consumer).append("a.txt", &hash).unwrap();

        let report = repo.inflate(&consumer).unwrap();
        assert_eq!(report.items[0].status, InflateStatus::AlreadyPresent);
        assert!(!is_link(&file));
    }

    #[test]
    #[traced_test]
    fn test_inflate_reports_missing_object() {
        let (_temp_dir, repo, consumer) = setup();
        let hash = crate::hash::Hash::hash_bytes(Algorithm::Sha256, b"never stored");
        DependencyRegistry::new(&consumer).append("gone.txt", &hash).unwrap();

        let report = repo.inflate(&consumer).unwrap();
        assert_eq!(report.items[0].status, InflateStatus::MissingObject);
        assert!(fs::symlink_metadata(consumer.join("gone.txt")).is_err());
        assert!(logs_contain("canonical object missing"));
    }

    #[test]
    fn test_deflate_skips_regular_files_and_missing_paths() {
        let (_temp_dir, repo, consumer) = setup();
        fs::write(consumer.join("plain.txt"), b"plain").unwrap();
        let registry = DependencyRegistry::new(&consumer);
        let hash = crate::hash::Hash::hash_bytes(Algorithm::Sha256, b"plain");
        registry.append("plain.txt", &hash).unwrap();
        registry.append("absent.txt", &hash).unwrap();

        let report = repo.deflate(&consumer).unwrap();
        assert_eq!(report.count(DeflateStatus::NotALink), 1);
        assert_eq!(report.count(DeflateStatus::Missing), 1);
        assert!(consumer.join("plain.txt").is_file());
    }
}
