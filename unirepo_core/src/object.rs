//! Canonical object keys, the deterministic path scheme, and store scanning.
//!
//! A canonical object lives at:
//!
//! ```text
//! <root>/<algorithm>/<extension>/<digest[0:2]>/<digest>.<extension>
//! ```
//!
//! The extension of the original filename is part of the key: the same bytes stored
//! as `a.txt` and `a.md` are two objects. Files without an extension go under the
//! [`NO_EXTENSION_DIR`] directory and their object file is named `<digest>`.

use crate::error::{Error, Result};
use crate::hash::{Algorithm, Hash};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Extension directory used for files that have no extension.
pub const NO_EXTENSION_DIR: &str = "_";

/// Identity of a canonical object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectKey {
    pub algorithm: Algorithm,
    pub hash: Hash,
    /// Extension without the leading dot; empty when the file has none.
    pub extension: String,
}

impl ObjectKey {
    pub fn new(algorithm: Algorithm, hash: Hash, extension: impl Into<String>) -> Self {
        Self {
            algorithm,
            hash,
            extension: extension.into(),
        }
    }

    /// Object file name: `<digest>.<extension>`, or `<digest>` without extension.
    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.hash.to_hex()
        } else {
            format!("{}.{}", self.hash.to_hex(), self.extension)
        }
    }

    /// Canonical path of this object under `root`. Pure and deterministic.
    pub fn path_in(&self, root: &Path) -> PathBuf {
        canonical_path(root, self.algorithm, &self.hash, &self.extension)
    }
}

/// Compute `root/<algo>/<extension>/<digest[0:2]>/<digest>.<extension>`.
pub fn canonical_path(root: &Path, algorithm: Algorithm, hash: &Hash, extension: &str) -> PathBuf {
    let (ext_dir, file_name) = if extension.is_empty() {
        (NO_EXTENSION_DIR.to_string(), hash.to_hex())
    } else {
        (extension.to_string(), format!("{}.{}", hash.to_hex(), extension))
    };

    root.join(algorithm.as_str())
        .join(ext_dir)
        .join(hash.prefix())
        .join(file_name)
}

/// Extension of a filename, without the leading dot.
///
/// Dotfiles such as `.bashrc` and names ending in a dot have no extension.
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_string()
}

/// Recover the key from an object file name, or `None` for foreign files.
pub fn parse_object_file_name(algorithm: Algorithm, file_name: &str) -> Option<ObjectKey> {
    let (digest, extension) = match file_name.split_once('.') {
        Some((digest, extension)) => (digest, extension),
        None => (file_name, ""),
    };
    let hash = Hash::from_hex(digest).ok()?;
    Some(ObjectKey::new(algorithm, hash, extension))
}

/// A canonical object found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalObject {
    pub hash: Hash,
    pub extension: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Walk the three-level layout under `objects_dir` (`root/<algo>`).
///
/// Returns every object sorted by path. A missing `objects_dir` yields an empty list;
/// any other failure to read a directory of the layout is an error, since the object
/// set could not be enumerated. Stray files (temporary files, non-hex names) and
/// misplaced entries are skipped.
pub fn scan_objects(objects_dir: &Path, algorithm: Algorithm) -> Result<Vec<CanonicalObject>> {
    let ext_entries = match fs::read_dir(objects_dir) {
        Ok(entries) => entries,
        Err(e) => {
            let err = Error::from_io(objects_dir, e);
            if err.is_not_found() {
                return Ok(Vec::new());
            }
            return Err(err);
        }
    };

    let mut objects = Vec::new();

    for ext_entry in ext_entries {
        let ext_entry = ext_entry?;
        if !ext_entry.file_type()?.is_dir() {
            continue;
        }
        let ext_name = ext_entry.file_name().to_string_lossy().into_owned();

        for shard_entry in fs::read_dir(ext_entry.path())? {
            let shard_entry = shard_entry?;
            if !shard_entry.file_type()?.is_dir() {
                continue;
            }
            let shard_name = shard_entry.file_name().to_string_lossy().into_owned();

            for obj_entry in fs::read_dir(shard_entry.path())? {
                let obj_entry = obj_entry?;
                let metadata = obj_entry.metadata()?;
                if !metadata.is_file() {
                    continue;
                }

                let file_name = obj_entry.file_name();
                let Some(key) = file_name
                    .to_str()
                    .and_then(|name| parse_object_file_name(algorithm, name))
                else {
                    continue;
                };

                let key_dir = if key.extension.is_empty() {
                    NO_EXTENSION_DIR
                } else {
                    key.extension.as_str()
                };
                if key_dir != ext_name || key.hash.prefix() != shard_name {
                    tracing::debug!(path = %obj_entry.path().display(), "skipping misplaced object file");
                    continue;
                }

                objects.push(CanonicalObject {
                    hash: key.hash,
                    extension: key.extension,
                    path: obj_entry.path(),
                    size: metadata.len(),
                });
            }
        }
    }

    objects.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(objects)
}
