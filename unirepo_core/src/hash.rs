//! Content hashing (SHA-256 and BLAKE3).

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use sha2::Digest;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Digest size in bytes. Both supported algorithms produce 256-bit digests.
pub const HASH_SIZE: usize = 32;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// SHA-256, the default. Registries written by earlier tooling use it.
    #[default]
    Sha256,
    /// BLAKE3 with 256-bit output.
    Blake3,
}

impl Algorithm {
    /// Returns the string representation of the algorithm.
    ///
    /// This is also the name of the algorithm directory under the repository root.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Blake3 => "blake3",
        }
    }

    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "blake3" => Ok(Algorithm::Blake3),
            _ => Err(Error::unsupported_algorithm(s)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 32-byte content digest, rendered as 64 lowercase hex characters in registries
/// and object file names.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    /// Parse the digest column of a registry line. Either case is accepted.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != HASH_SIZE * 2 {
            return Err(Error::invalid_hash(format!(
                "Expected {} hex characters, got {}",
                HASH_SIZE * 2,
                hex_str.len()
            )));
        }

        let mut hash = [0u8; HASH_SIZE];
        hex::decode_to_slice(hex_str, &mut hash)
            .map_err(|e| Error::invalid_hash(format!("Invalid hex: {}", e)))?;
        Ok(Hash(hash))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Shard directory name: the first byte as two hex characters.
    pub fn prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Hash raw bytes.
    pub fn hash_bytes(algorithm: Algorithm, data: &[u8]) -> Self {
        match algorithm {
            Algorithm::Sha256 => Hash(sha2::Sha256::digest(data).into()),
            Algorithm::Blake3 => Hash(*blake3::hash(data).as_bytes()),
        }
    }

    /// Hash data from a reader, streaming it through the algorithm.
    pub fn hash_reader<R: Read>(algorithm: Algorithm, mut reader: R) -> Result<Self> {
        match algorithm {
            Algorithm::Sha256 => {
                let mut hasher = sha2::Sha256::new();
                std::io::copy(&mut reader, &mut hasher)?;
                Ok(Hash(hasher.finalize().into()))
            }
            Algorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                std::io::copy(&mut reader, &mut hasher)?;
                Ok(Hash(*hasher.finalize().as_bytes()))
            }
        }
    }

    /// Hash a file. An absent file yields [`Error::NotFound`].
    pub fn hash_file(algorithm: Algorithm, path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::from_io(path, e))?;
        Self::hash_reader(algorithm, file)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
