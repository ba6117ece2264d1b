//! Global catalogue of consumer directories ("leeches").
//!
//! `root/leeches.txt` holds one absolute consumer directory per line. Entries are
//! only ever appended, deduplicated by their exact string form. Two spellings of the
//! same directory are two entries.

use crate::error::Result;
use crate::store::{Repository, read_optional, write_atomic};
use std::path::{Path, PathBuf};

/// File name of the catalogue under the repository root.
pub const LEECHES_FILE: &str = "leeches.txt";

/// Manages the leech catalogue of one repository.
pub struct LeechRegistry<'a> {
    repo: &'a Repository,
}

impl<'a> LeechRegistry<'a> {
    pub(crate) fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Path of `leeches.txt`.
    pub fn path(&self) -> PathBuf {
        self.repo.root().join(LEECHES_FILE)
    }

    /// Every registered consumer, in registration order. `None` if the file is absent.
    pub fn read(&self) -> Result<Option<Vec<PathBuf>>> {
        Ok(read_optional(&self.path())?.map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect()
        }))
    }

    /// Register `consumer` unless the exact same path string is already listed.
    ///
    /// Relative paths are made absolute against the current directory first; they
    /// are not canonicalized. Returns whether a line was added.
    pub fn register_if_absent(&self, consumer: &Path) -> Result<bool> {
        let consumer = std::path::absolute(consumer)?;
        let line = consumer.to_string_lossy();

        let path = self.path();
        let content = read_optional(&path)?.unwrap_or_default();
        if content.lines().any(|existing| existing.trim() == line) {
            return Ok(false);
        }

        let mut new_content = content;
        if !new_content.is_empty() && !new_content.ends_with('\n') {
            new_content.push('\n');
        }
        new_content.push_str(&line);
        new_content.push('\n');
        write_atomic(&path, new_content.as_bytes())?;

        tracing::debug!(consumer = %consumer.display(), "registered consumer");
        Ok(true)
    }

    /// Registered consumers that still exist as directories.
    ///
    /// Vanished directories are skipped with a warning. An absent catalogue yields an
    /// empty list; any other read failure is returned.
    pub fn existing(&self) -> Result<Vec<PathBuf>> {
        let Some(consumers) = self.read()? else {
            tracing::debug!(catalogue = %self.path().display(), "no consumers registered");
            return Ok(Vec::new());
        };

        Ok(consumers
            .into_iter()
            .filter(|consumer| {
                let present = consumer.is_dir();
                if !present {
                    tracing::warn!(consumer = %consumer.display(), "registered consumer no longer exists, skipping");
                }
                present
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;
    use std::fs;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn setup() -> (TempDir, Repository) {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path().join("repo"), Algorithm::Sha256).unwrap();
        (temp_dir, repo)
    }

    #[test]
    fn test_read_absent() {
        let (_temp_dir, repo) = setup();
        assert_eq!(repo.leeches().read().unwrap(), None);
        assert!(repo.leeches().existing().unwrap().is_empty());
    }

    #[test]
    fn test_register_dedupes_exact_string() {
        let (temp_dir, repo) = setup();
        let consumer = temp_dir.path().join("c1");
        fs::create_dir(&consumer).unwrap();

        assert!(repo.leeches().register_if_absent(&consumer).unwrap());
        assert!(!repo.leeches().register_if_absent(&consumer).unwrap());
        assert_eq!(repo.leeches().read().unwrap(), Some(vec![consumer.clone()]));

        // A different spelling of the same directory is a separate entry.
        let spelled = temp_dir.path().join("c1/../c1");
        assert!(repo.leeches().register_if_absent(&spelled).unwrap());
        assert_eq!(repo.leeches().read().unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_register_keeps_order() {
        let (temp_dir, repo) = setup();
        let dirs: Vec<_> = ["b", "a", "c"]
            .iter()
            .map(|n| temp_dir.path().join(n))
            .collect();
        for dir in &dirs {
            repo.leeches().register_if_absent(dir).unwrap();
        }

        let content = fs::read_to_string(repo.leeches().path()).unwrap();
        let expected: String = dirs
            .iter()
            .map(|d| format!("{}\n", d.display()))
            .collect();
        assert_eq!(content, expected);
    }

    #[test]
    #[traced_test]
    fn test_existing_skips_vanished_directories() {
        let (temp_dir, repo) = setup();
        let alive = temp_dir.path().join("alive");
        let gone = temp_dir.path().join("gone");
        fs::create_dir(&alive).unwrap();
        fs::create_dir(&gone).unwrap();
        repo.leeches().register_if_absent(&alive).unwrap();
        repo.leeches().register_if_absent(&gone).unwrap();
        fs::remove_dir(&gone).unwrap();

        assert_eq!(repo.leeches().existing().unwrap(), vec![alive]);
        assert!(logs_contain("registered consumer no longer exists"));
        // The catalogue itself is never pruned.
        assert_eq!(repo.leeches().read().unwrap().unwrap().len(), 2);
    }
}
