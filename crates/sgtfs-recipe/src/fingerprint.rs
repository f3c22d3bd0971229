//! Content fingerprinting: streaming BLAKE3 and SHA-2 digests

use sha2::Digest;
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use crate::error::RecipeError;

/// Read buffer used while streaming a chunk through a digest.
const STREAM_BUFFER: usize = 64 * 1024;

/// Digest used for chunk hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// BLAKE3, 32-byte output
    Blake3,
    /// SHA-256, 32-byte output
    Sha256,
    /// SHA-512, 64-byte output
    Sha512,
}

impl HashAlgorithm {
    /// Canonical name, as recorded in recipes.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "BLAKE3",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Blake3 | HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Fresh incremental hasher.
    pub fn hasher(&self) -> StreamHasher {
        match self {
            HashAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => StreamHasher::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Sha512 => StreamHasher::Sha512(sha2::Sha512::new()),
        }
    }

    /// One-shot digest of an in-memory buffer.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Streams exactly `length` bytes of `reader` through the digest.
    ///
    /// Fails with `UnexpectedEof` if the reader ends early.
    pub fn digest_reader<R: Read>(&self, reader: &mut R, length: u64) -> io::Result<Vec<u8>> {
        let mut hasher = self.hasher();
        let mut buf = vec![0u8; STREAM_BUFFER];
        let mut remaining = length;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match reader.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended with {remaining} bytes left"),
                    ))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
            remaining -= n as u64;
        }
        Ok(hasher.finalize())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BLAKE3" => Ok(HashAlgorithm::Blake3),
            "SHA-256" | "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA-512" | "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(RecipeError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Incremental hasher over one of the supported digests.
pub enum StreamHasher {
    /// BLAKE3 state (boxed, it is large)
    Blake3(Box<blake3::Hasher>),
    /// SHA-256 state
    Sha256(sha2::Sha256),
    /// SHA-512 state
    Sha512(sha2::Sha512),
}

impl StreamHasher {
    /// Feeds more input.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Sha512(h) => h.update(data),
        }
    }

    /// Consumes the hasher and returns the digest bytes.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            StreamHasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
            StreamHasher::Sha256(h) => h.finalize().to_vec(),
            StreamHasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}
