//! Per-consumer dependency registry.
//!
//! Each consumer directory records the files it materialized from the repository in
//! `<consumer>/.unirepo/dependencies.txt`, one `<hexdigest> <filename>` line per file.
//! Every mutation rewrites the whole file through a temporary file and a rename, and
//! lines that are not touched are carried over byte-for-byte.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::store::{read_optional, write_atomic};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Directory inside a consumer that holds its registry.
pub const REGISTRY_DIR: &str = ".unirepo";

/// File name of the registry.
pub const REGISTRY_FILE: &str = "dependencies.txt";

/// One registered file of a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEntry {
    pub filename: String,
    pub hash: Hash,
}

/// What `append` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AppendOutcome {
    /// A new line was written.
    Added,
    /// The same digest was already registered for the filename.
    AlreadyRegistered,
    /// A different digest is registered for the filename; nothing was changed.
    Conflict { registered: Hash },
}

/// Check that a filename can be recorded in a registry line.
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_filename(name, "empty file name"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(Error::invalid_filename(
            name,
            "file names recorded in a registry must not contain whitespace",
        ));
    }
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || name.contains('/') || name.contains('\\') {
        return Err(Error::invalid_filename(name, "must be a plain file name"));
    }
    Ok(())
}

/// Split a registry line into `(digest, filename)` fields.
fn split_fields(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split_whitespace();
    let digest = fields.next()?;
    let filename = fields.next()?;
    Some((digest, filename))
}

/// Parse registry text.
///
/// Blank lines are ignored. Lines missing a field, whose digest is not a valid hex
/// digest, or whose filename is not a plain file name, are skipped with a warning. If a filename appears more than once the
/// later line wins, also with a warning.
pub fn parse(text: &str) -> Vec<DependencyEntry> {
    parse_from(text, None)
}

fn parse_from(text: &str, origin: Option<&Path>) -> Vec<DependencyEntry> {
    let origin = origin.map(Path::to_path_buf).unwrap_or_default();
    let mut entries: Vec<DependencyEntry> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = split_fields(line)
            .filter(|(_, filename)| validate_filename(filename).is_ok())
            .and_then(|(digest, filename)| Some((Hash::from_hex(digest).ok()?, filename)));
        let Some((hash, filename)) = parsed else {
            tracing::warn!(
                error = %Error::malformed_entry(&origin, line),
                "skipping malformed dependency entry"
            );
            continue;
        };

        if let Some(existing) = entries.iter_mut().find(|e| e.filename == filename) {
            tracing::warn!(registry = %origin.display(), filename, "duplicate dependency entry, later line wins");
            existing.hash = hash;
        } else {
            entries.push(DependencyEntry {
                filename: filename.to_string(),
                hash,
            });
        }
    }

    entries
}

/// The dependency registry of one consumer directory.
#[derive(Debug, Clone)]
pub struct DependencyRegistry {
    consumer: PathBuf,
}

impl DependencyRegistry {
    /// Registry of the given consumer directory.
    pub fn new(consumer: impl Into<PathBuf>) -> Self {
        Self {
            consumer: consumer.into(),
        }
    }

    /// The consumer directory.
    pub fn consumer(&self) -> &Path {
        &self.consumer
    }

    /// Path of the registry file.
    pub fn path(&self) -> PathBuf {
        self.consumer.join(REGISTRY_DIR).join(REGISTRY_FILE)
    }

    /// Load the entries.
    ///
    /// Returns `None` when the registry file does not exist, and `Some(vec![])` when
    /// it exists but holds no entries.
    pub fn load(&self) -> Result<Option<Vec<DependencyEntry>>> {
        let path = self.path();
        Ok(read_optional(&path)?.map(|text| parse_from(&text, Some(&path))))
    }

    /// Registered digest for a filename.
    pub fn get(&self, filename: &str) -> Result<Option<Hash>> {
        Ok(self
            .load()?
            .and_then(|entries| entries.into_iter().find(|e| e.filename == filename))
            .map(|e| e.hash))
    }

    /// Register `filename` if it has no entry yet.
    ///
    /// An existing entry is never changed here: the same digest is a no-op and a
    /// different digest is reported as [`AppendOutcome::Conflict`] with a warning.
    pub fn append(&self, filename: &str, hash: &Hash) -> Result<AppendOutcome> {
        validate_filename(filename)?;
        let path = self.path();
        let content = read_optional(&path)?.unwrap_or_default();

        if let Some(existing) = parse_from(&content, Some(&path))
            .into_iter()
            .find(|e| e.filename == filename)
        {
            if existing.hash == *hash {
                tracing::debug!(filename, "dependency already registered");
                return Ok(AppendOutcome::AlreadyRegistered);
            }
            tracing::warn!(
                filename,
                registered = %existing.hash,
                current = %hash,
                "file is registered with a different hash, leaving registry unchanged"
            );
            return Ok(AppendOutcome::Conflict {
                registered: existing.hash,
            });
        }

        let mut new_content = content;
        push_line(&mut new_content, filename, hash);
        write_atomic(&path, new_content.as_bytes())?;
        tracing::debug!(filename, hash = %hash, registry = %path.display(), "registered dependency");
        Ok(AppendOutcome::Added)
    }

    /// Rewrite the digest recorded for `filename`, appending a line if it is absent.
    ///
    /// Only repair flows use this; plain registration goes through [`append`](Self::append).
    pub fn update(&self, filename: &str, hash: &Hash) -> Result<()> {
        validate_filename(filename)?;
        let path = self.path();
        let content = read_optional(&path)?.unwrap_or_default();

        let mut found = false;
        let mut new_content = String::with_capacity(content.len());
        for line in content.split_inclusive('\n') {
            if line_filename(line) == Some(filename) {
                found = true;
                new_content.push_str(&format!("{} {}\n", hash, filename));
            } else {
                new_content.push_str(line);
            }
        }
        if !found {
            push_line(&mut new_content, filename, hash);
        }

        write_atomic(&path, new_content.as_bytes())?;
        tracing::debug!(filename, hash = %hash, registry = %path.display(), "updated dependency");
        Ok(())
    }

    /// Remove the entry for `filename`. Returns whether a line was removed.
    ///
    /// An absent registry is left absent.
    pub fn remove(&self, filename: &str) -> Result<bool> {
        let path = self.path();
        let Some(content) = read_optional(&path)? else {
            return Ok(false);
        };

        let mut removed = false;
        let mut new_content = String::with_capacity(content.len());
        for line in content.split_inclusive('\n') {
            if line_filename(line) == Some(filename) {
                removed = true;
            } else {
                new_content.push_str(line);
            }
        }

        if removed {
            write_atomic(&path, new_content.as_bytes())?;
            tracing::debug!(filename, registry = %path.display(), "removed dependency");
        }
        Ok(removed)
    }
}

/// Filename field of a raw registry line.
fn line_filename(line: &str) -> Option<&str> {
    split_fields(line.trim()).map(|(_, filename)| filename)
}

fn push_line(content: &mut String, filename: &str, hash: &Hash) {
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&format!("{} {}\n", hash, filename));
}
