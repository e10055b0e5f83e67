//! Content hashing using SHA-256.

use crate::encode::{decode, encode};
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// Hash digest size in bytes (SHA-256 produces 256-bit hashes).
pub const HASH_SIZE: usize = 32;

/// Length of a digest rendered by [`ContentHash::to_b32`].
pub const HASH_B32_LEN: usize = 52;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// SHA-256 with 256-bit output.
    Sha256,
}

impl Algorithm {
    /// Returns the string representation of the algorithm (for config files).
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
        }
    }

    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            _ => Err(Error::config(format!("Unsupported hash algorithm: {}", s))),
        }
    }
}

/// A 32-byte SHA-256 digest of an object's content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    /// Create a ContentHash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        ContentHash(bytes)
    }

    /// Parse the lowercase, unpadded base32 form (52 characters).
    pub fn from_b32(s: &str) -> Result<Self> {
        if s.len() != HASH_B32_LEN {
            return Err(Error::invalid_hash(format!(
                "Expected {} base32 characters, got {}",
                HASH_B32_LEN,
                s.len()
            )));
        }

        let bytes = decode(s)
            .ok_or_else(|| Error::invalid_hash(format!("Invalid base32: {}", s)))?;

        let hash: [u8; HASH_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::invalid_hash(format!("Wrong digest length: {}", s)))?;
        Ok(ContentHash(hash))
    }

    /// Lowercase, unpadded base32 form. This is the name objects are stored under.
    pub fn to_b32(&self) -> String {
        encode(&self.0)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Hash raw bytes.
    pub fn hash_bytes(data: &[u8]) -> Self {
        ContentHash(Sha256::digest(data).into())
    }

    /// Hash everything a reader yields.
    pub fn hash_reader<R: Read>(reader: R) -> Result<Self> {
        let mut hashing = HashingReader::new(reader);
        io::copy(&mut hashing, &mut io::sink())?;
        Ok(hashing.digest())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b32())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_b32())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b32())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_b32(&s).map_err(serde::de::Error::custom)
    }
}

/// Read-through adapter that hashes every byte it hands to the caller.
///
/// Reads are passed straight to the inner reader with the caller's buffer, so
/// nothing is buffered beyond what the caller asked for. The digest covers
/// exactly the bytes delivered so far; call [`HashingReader::digest`] only after
/// the inner reader is drained.
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    /// Number of bytes delivered downstream.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Digest of the bytes delivered so far.
    pub fn digest(&self) -> ContentHash {
        ContentHash(self.hasher.clone().finalize().into())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}
