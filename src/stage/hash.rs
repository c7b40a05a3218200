//! Content checksums
//!
//! Formulae declare a checksum per archive, either as bare SHA-256 hex or
//! with an explicit algorithm prefix (`sha512:...`, `blake3:...`).

use sha2::Digest;
use std::fmt;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Chunk size for reading files during hashing (1MB)
const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("unknown hash algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("{algorithm} digest must be {expected} hex characters, got {actual:?}")]
    BadDigest {
        algorithm: &'static str,
        expected: usize,
        actual: String,
    },
}

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 64,
            Self::Sha512 => 128,
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }
}

/// An expected digest for a downloaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: HashAlgorithm,
    hex: String,
}

impl Checksum {
    /// Parse `"<hex>"` (SHA-256) or `"<algorithm>:<hex>"`.
    pub fn parse(value: &str) -> Result<Self, ChecksumError> {
        let value = value.trim();
        let (algorithm, digest) = match value.split_once(':') {
            Some((prefix, digest)) => (
                HashAlgorithm::from_prefix(prefix)
                    .ok_or_else(|| ChecksumError::UnknownAlgorithm(prefix.to_string()))?,
                digest,
            ),
            None => (HashAlgorithm::Sha256, value),
        };

        let digest = digest.to_ascii_lowercase();
        if digest.len() != algorithm.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::BadDigest {
                algorithm: algorithm.name(),
                expected: algorithm.hex_len(),
                actual: digest,
            });
        }

        Ok(Self {
            algorithm,
            hex: digest,
        })
    }

    /// SHA-256 checksum of an in-memory buffer.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            hex: hex::encode(sha2::Sha256::digest(bytes)),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Hash `file` with this checksum's algorithm and compare.
    ///
    /// Returns the actual digest on mismatch.
    pub fn matches_file(&self, file: &Path) -> std::io::Result<Result<(), String>> {
        let actual = compute_file(file, self.algorithm)?;
        if actual == self.hex {
            Ok(Ok(()))
        } else {
            Ok(Err(actual))
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.hex)
    }
}

/// Hash a file with the given algorithm, returning lowercase hex.
pub fn compute_file(file: &Path, algorithm: HashAlgorithm) -> std::io::Result<String> {
    let mut f = std::fs::File::open(file)?;
    match algorithm {
        HashAlgorithm::Sha256 => digest_reader::<sha2::Sha256>(&mut f),
        HashAlgorithm::Sha512 => digest_reader::<sha2::Sha512>(&mut f),
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            let mut buffer = vec![0u8; CHUNK_SIZE];
            loop {
                let n = f.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
    }
}

fn digest_reader<D: Digest>(reader: &mut impl Read) -> std::io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
