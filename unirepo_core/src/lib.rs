//! # Unirepo Core
//!
//! A content-addressed file store that deduplicates files across unrelated
//! directories by replacing each stored file with a symbolic link into one shared,
//! hash-addressed repository.
//!
//! ## Features
//!
//! - Canonical objects at `root/<algo>/<ext>/<digest[0:2]>/<digest>.<ext>`
//! - Per-directory dependency registries (`.unirepo/dependencies.txt`)
//! - A global catalogue of consumer directories (`leeches.txt`)
//! - Garbage collection of objects no consumer references
//! - Integrity checking with drop, force-fix and store repairs
//! - Incremental zstd export driven by a persisted watermark
//!
//! ## Example
//!
//! ```no_run
//! use unirepo_core::{Algorithm, RepairStrategy, Repository, ZstdCompressor};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = Repository::open_or_init("./.unirepo-root", Algorithm::Sha256)?;
//!
//! // Replace a file with a link into the repository
//! repo.store(Path::new("./assets/logo.png"))?;
//!
//! // Verify every registered directory
//! let report = repo.check_global(RepairStrategy::None)?;
//! println!("{} files checked", report.files_checked());
//!
//! // Drop objects nobody references any more
//! let pruned = repo.prune(false)?;
//! println!("Deleted {} objects", pruned.deleted);
//!
//! // Archive what was added since the last export
//! repo.export(Path::new("./export"), &ZstdCompressor::default())?;
//! # Ok(())
//! # }
//! ```

mod check;
mod collect;
mod deps;
mod error;
mod export;
mod gc;
mod hash;
mod leeches;
mod link;
mod lock;
mod object;
mod store;
mod walk;

pub use check::{
    CheckReport, CheckResult, CheckStatus, CheckSummary, ConsumerReport, RepairStrategy,
};
pub use collect::{UsageEntry, UsageReport};
pub use deps::{
    AppendOutcome, DependencyEntry, DependencyRegistry, REGISTRY_DIR, REGISTRY_FILE,
    validate_filename,
};
pub use error::{Error, Result};
pub use export::{
    Compressor, DEFAULT_LEVEL, ExportFailure, ExportReport, WATERMARK_FILE, ZstdCompressor,
    format_watermark, parse_watermark,
};
pub use gc::{PruneFailure, PruneReport, find_orphans};
pub use hash::{Algorithm, HASH_SIZE, Hash};
pub use leeches::{LEECHES_FILE, LeechRegistry};
pub use link::{
    DeflateItem, DeflateReport, DeflateStatus, InflateItem, InflateReport, InflateStatus,
    create_link, is_link, replace_with_link,
};
pub use lock::{LOCK_FILE, RepoLock};
pub use object::{CanonicalObject, NO_EXTENSION_DIR, ObjectKey, canonical_path, extension_of};
pub use store::{PutOutcome, Repository};
pub use walk::{StoreFailure, StoreReport, StoreStatus, StoredFile};
