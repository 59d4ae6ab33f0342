//! Time-ordered keys for the datastore.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A unique, time-ordered 16-byte key.
///
/// Layout: 4 random bytes, then an 8-byte big-endian UNIX-seconds
/// timestamp, then 4 big-endian bytes of nanoseconds-of-second. Byte
/// order therefore matches creation order at second granularity; ties
/// within a second are broken by nanoseconds and then by the random
/// prefix. Uniqueness is practical, not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeKey([u8; 16]);

/// Error returned when a dashed-hex key string cannot be parsed.
#[derive(Debug, Error)]
#[error("invalid time key {0:?}")]
pub struct ParseKeyError(String);

impl TimeKey {
    /// Generates a new key from the current wall clock.
    ///
    /// Panics if the system RNG fails; keys cannot be safely minted
    /// without entropy.
    pub fn new() -> TimeKey {
        Self::at(Utc::now())
    }

    /// Generates a key carrying the given timestamp.
    pub fn at(when: DateTime<Utc>) -> TimeKey {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes[..4]);
        bytes[4..12].copy_from_slice(&when.timestamp().to_be_bytes());
        bytes[12..16].copy_from_slice(&when.timestamp_subsec_nanos().to_be_bytes());
        TimeKey(bytes)
    }

    /// The underlying bytes, used as the datastore key.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Recovers the wall-clock time embedded in the key.
    pub fn time(&self) -> DateTime<Utc> {
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&self.0[4..12]);
        let mut nanos = [0u8; 4];
        nanos.copy_from_slice(&self.0[12..16]);

        DateTime::from_timestamp(i64::from_be_bytes(secs), u32::from_be_bytes(nanos))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Renders the key as dashed hex in the 8-4-4-4-12 shape of a UUID.
    pub fn uuid(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            hex::encode(&self.0[0..4]),
            hex::encode(&self.0[4..6]),
            hex::encode(&self.0[6..8]),
            hex::encode(&self.0[8..10]),
            hex::encode(&self.0[10..16]),
        )
    }

    /// Parses the dashed-hex form produced by [`TimeKey::uuid`].
    pub fn parse(s: &str) -> Result<TimeKey, ParseKeyError> {
        let hex_str: String = s.split('-').collect();
        if s.split('-').count() != 5 || hex_str.len() != 32 {
            return Err(ParseKeyError(s.to_string()));
        }

        let decoded = hex::decode(&hex_str).map_err(|_| ParseKeyError(s.to_string()))?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&decoded);
        Ok(TimeKey(bytes))
    }
}

impl From<[u8; 16]> for TimeKey {
    fn from(bytes: [u8; 16]) -> TimeKey {
        TimeKey(bytes)
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uuid())
    }
}

impl Serialize for TimeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.uuid())
    }
}

impl<'de> Deserialize<'de> for TimeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<TimeKey, D::Error> {
        let s = String::deserialize(deserializer)?;
        TimeKey::parse(&s).map_err(DeError::custom)
    }
}
