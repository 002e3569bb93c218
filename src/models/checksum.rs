//! MD5 digest value type.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{FsError, FsResult};

/// Number of bytes in an MD5 checksum.
pub const MD5_LENGTH: usize = 16;

/// An MD5 digest, always exactly 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5Digest([u8; MD5_LENGTH]);

impl Md5Digest {
    pub const ALGORITHM: &'static str = "md5";

    /// Build a digest from a byte buffer of exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> FsResult<Self> {
        let array: [u8; MD5_LENGTH] = bytes
            .try_into()
            .map_err(|_| FsError::InvalidChecksumLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Decode a plain-text hex string, ignoring surrounding whitespace.
    pub fn from_hex(hex_str: &str) -> FsResult<Self> {
        let bytes = hex::decode(hex_str.trim())?;
        Self::from_slice(&bytes)
    }

    /// Digest of an in-memory buffer.
    pub fn compute(data: impl AsRef<[u8]>) -> Self {
        Self(md5::compute(data).0)
    }

    pub fn algorithm_name(&self) -> &'static str {
        Self::ALGORITHM
    }

    pub fn as_bytes(&self) -> &[u8; MD5_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<md5::Digest> for Md5Digest {
    fn from(digest: md5::Digest) -> Self {
        Self(digest.0)
    }
}

impl TryFrom<&[u8]> for Md5Digest {
    type Error = FsError;

    fn try_from(bytes: &[u8]) -> FsResult<Self> {
        Self::from_slice(bytes)
    }
}

impl fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5Digest({})", self.to_hex())
    }
}

impl Serialize for Md5Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Md5Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Md5Digest::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}
