//! 32-byte Curve25519 keys in their base64 textual form.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::proto::layout::{RawKey, KEY_LEN};

/// Errors parsing a textual key.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid base64 key: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Key must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// A public, private or preshared key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Key(RawKey);

impl Key {
    pub const fn new(bytes: RawKey) -> Self {
        Key(bytes)
    }

    pub fn as_bytes(&self) -> &RawKey {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD.decode(s.trim())?;
        let raw: RawKey = bytes.as_slice().try_into().map_err(|_| KeyError::Length {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Key(raw))
    }
}

impl From<RawKey> for Key {
    fn from(bytes: RawKey) -> Self {
        Key(bytes)
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::from_base64(s)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_base64())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
