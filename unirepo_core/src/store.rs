//! Repository handle and canonical object I/O.

use crate::error::{Error, Result};
use crate::hash::{Algorithm, Hash};
use crate::leeches::LeechRegistry;
use crate::link;
use crate::lock::RepoLock;
use crate::object::{self, CanonicalObject, ObjectKey};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the repository configuration file.
const CONFIG_FILE: &str = "config";

/// A handle on one repository root.
///
/// Every operation takes the handle explicitly; there is no process-wide registry.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    algorithm: Algorithm,
}

/// Result of placing a file's content in the canonical store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub key: ObjectKey,
    pub path: PathBuf,
    /// False when an object already existed at the canonical path.
    pub created: bool,
}

impl Repository {
    /// Initialize a repository at the given path.
    ///
    /// Creates the root and the `<algorithm>/` objects directory and writes the
    /// `config` file. Initializing an existing repository with its own algorithm is a
    /// no-op; asking for a different algorithm fails and leaves the config untouched.
    pub fn init<P: AsRef<Path>>(root: P, algorithm: Algorithm) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        let config_path = root.join(CONFIG_FILE);

        if let Some(existing) = read_optional(&config_path)? {
            let current = Self::parse_config(&root, &existing)?;
            if current != algorithm {
                return Err(Error::invalid_repository(
                    &root,
                    format!("already initialized with {}, refusing to switch to {}", current, algorithm),
                ));
            }
            fs::create_dir_all(root.join(algorithm.as_str()))?;
            tracing::debug!(root = %root.display(), algorithm = %algorithm, "repository already initialized");
            return Ok(Self { root, algorithm });
        }

        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join(algorithm.as_str()))?;

        let config_content = format!("version=1\nalgo={}\n", algorithm.as_str());
        write_atomic(&config_path, config_content.as_bytes())?;

        tracing::info!(root = %root.display(), algorithm = %algorithm, "initialized repository");
        Ok(Self { root, algorithm })
    }

    /// Open an existing repository at the given path.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;

        if !root.is_dir() {
            return Err(Error::invalid_repository(&root, "directory does not exist"));
        }

        let config_path = root.join(CONFIG_FILE);
        let config_content = match fs::read_to_string(&config_path) {
            Ok(content) => content,
            Err(e) => {
                let err = Error::from_io(&config_path, e);
                if err.is_not_found() {
                    return Err(Error::invalid_repository(&root, "config file not found"));
                }
                return Err(err);
            }
        };
        let algorithm = Self::parse_config(&root, &config_content)?;

        Ok(Self { root, algorithm })
    }

    /// Open the repository, initializing it with `algorithm` if it has no config yet.
    pub fn open_or_init<P: AsRef<Path>>(root: P, algorithm: Algorithm) -> Result<Self> {
        let root = root.as_ref();
        if root.join(CONFIG_FILE).exists() {
            Self::open(root)
        } else {
            Self::init(root, algorithm)
        }
    }

    /// Parse the config file to extract the algorithm.
    fn parse_config(root: &Path, content: &str) -> Result<Algorithm> {
        let mut version = None;
        let mut algo = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "version" => version = Some(value.trim()),
                    "algo" => algo = Some(value.trim()),
                    _ => {}
                }
            }
        }

        if version != Some("1") {
            return Err(Error::invalid_repository(
                root,
                format!("unsupported config version: {:?}", version),
            ));
        }

        let algo_str = algo.ok_or_else(|| Error::invalid_repository(root, "missing algo in config"))?;
        Algorithm::parse(algo_str)
    }

    /// Get the root directory of the repository.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the algorithm used by this repository.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Directory holding all objects: `root/<algorithm>`.
    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(self.algorithm.as_str())
    }

    /// Canonical path for a digest and extension.
    pub fn canonical_path(&self, hash: &Hash, extension: &str) -> PathBuf {
        object::canonical_path(&self.root, self.algorithm, hash, extension)
    }

    /// Canonical path of the object a consumer file named `file_name` would map to.
    pub fn canonical_path_for(&self, hash: &Hash, file_name: &str) -> PathBuf {
        self.canonical_path(hash, &object::extension_of(file_name))
    }

    /// Get the leech registry of this repository.
    pub fn leeches(&self) -> LeechRegistry<'_> {
        LeechRegistry::new(self)
    }

    /// Take the exclusive write lock on this repository, blocking until it is free.
    pub fn lock(&self) -> Result<RepoLock> {
        RepoLock::acquire(&self.root)
    }

    /// Digest of a file's current content with this repository's algorithm.
    pub fn digest(&self, path: &Path) -> Result<Hash> {
        Hash::hash_file(self.algorithm, path)
    }

    /// Whether an object exists for this digest and extension.
    pub fn contains(&self, hash: &Hash, extension: &str) -> bool {
        self.canonical_path(hash, extension).is_file()
    }

    /// Copy a file's content into the canonical store if it is not there yet.
    ///
    /// An existing object at the canonical path is trusted as-is: it is never
    /// overwritten and never compared byte-for-byte. New objects are written to a
    /// temporary file in the shard directory and renamed into place without
    /// clobbering, so a concurrent writer of the same object simply wins.
    pub fn put_object(&self, source: &Path) -> Result<PutOutcome> {
        let hash = self.digest(source)?;
        self.put_hashed(source, hash)
    }

    /// [`put_object`](Self::put_object) for a source whose digest is already known.
    pub(crate) fn put_hashed(&self, source: &Path, hash: Hash) -> Result<PutOutcome> {
        let file_name = file_name_str(source)?;
        let key = ObjectKey::new(self.algorithm, hash, object::extension_of(file_name));
        let obj_path = key.path_in(&self.root);

        if obj_path.exists() {
            tracing::debug!(object = %obj_path.display(), "canonical object already present");
            return Ok(PutOutcome {
                key,
                path: obj_path,
                created: false,
            });
        }

        let parent = obj_path
            .parent()
            .ok_or_else(|| Error::invalid_repository(&self.root, "object path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        let mut reader = fs::File::open(source).map_err(|e| Error::from_io(source, e))?;
        io::copy(&mut reader, &mut temp_file)?;
        temp_file.flush()?;
        temp_file
            .as_file()
            .set_permissions(reader.metadata()?.permissions())?;
        temp_file.as_file().sync_all()?;

        let created = match temp_file.persist_noclobber(&obj_path) {
            Ok(_) => true,
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => false,
            Err(e) => return Err(e.into()),
        };

        if created {
            tracing::debug!(source = %source.display(), object = %obj_path.display(), "created canonical object");
        }

        Ok(PutOutcome {
            key,
            path: obj_path,
            created,
        })
    }

    /// Place `source` in the canonical store and replace it with a link to the object.
    ///
    /// The replacement creates the link under a temporary name beside `source` and
    /// renames it over `source`, so the consumer path never goes missing.
    pub fn put(&self, source: &Path) -> Result<PutOutcome> {
        let outcome = self.put_object(source)?;
        link::replace_with_link(source, &outcome.path)?;
        Ok(outcome)
    }

    /// Remove one canonical object. Returns the number of bytes freed.
    pub fn remove_object(&self, path: &Path) -> Result<u64> {
        let size = fs::metadata(path)
            .map_err(|e| Error::from_io(path, e))?
            .len();
        fs::remove_file(path).map_err(|e| Error::from_io(path, e))?;
        Ok(size)
    }

    /// Enumerate every canonical object of this repository, sorted by path.
    pub fn scan_objects(&self) -> Result<Vec<CanonicalObject>> {
        object::scan_objects(&self.objects_dir(), self.algorithm)
    }
}

/// File name of `path` as UTF-8.
pub(crate) fn file_name_str(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::invalid_filename(path.display().to_string(), "not a valid UTF-8 file name")
        })
}

/// Read a whole text file, mapping absence to `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) => {
            let err = Error::from_io(path, e);
            if err.is_not_found() {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

/// Replace `path` with `contents` atomically (temp file, fsync, rename).
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::not_found(path))?;
    fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(contents)?;
    temp_file.flush()?;
    if let Ok(existing) = fs::metadata(path) {
        temp_file.as_file().set_permissions(existing.permissions())?;
    }
    temp_file.as_file().sync_all()?;
    temp_file.persist(path)?;

    Ok(())
}
