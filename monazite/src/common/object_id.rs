use crate::errors::{ErrorKind, MonaziteError, MonaziteResult};
use rand::rngs::OsRng;
use rand::Rng;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

/// Random machine/process bytes shared by all identifiers generated in
/// this process, and a counter seeded randomly at startup. Both follow the
/// classic 12-byte object identifier layout: 4 timestamp bytes, 5 machine
/// bytes, 3 counter bytes.
static MACHINE_BYTES: LazyLock<[u8; 5]> = LazyLock::new(|| {
    let mut bytes = [0u8; 5];
    OsRng.fill(&mut bytes);
    bytes
});

static COUNTER: LazyLock<AtomicU32> = LazyLock::new(|| AtomicU32::new(OsRng.gen::<u32>() & 0x00FF_FFFF));

/// A unique identifier for stored documents.
///
/// An `ObjectId` is a 12-byte value rendered as 24 lowercase hexadecimal
/// characters. It is the native identifier type of the backing document
/// store: the `_id` field of every persisted record carries one unless the
/// caller supplied an identifier of another type.
///
/// # Parsing
///
/// A 24-character string converts to an `ObjectId` only if re-rendering
/// the parsed value reproduces the identical string. This exact round-trip
/// check is what decides whether an identifier-like string is cast to the
/// native type or kept as a plain string (see [`cast_identifier`]).
///
/// # Examples
///
/// ```rust,ignore
/// use monazite::common::ObjectId;
///
/// let id = ObjectId::new();
/// let hex = id.to_string();
/// assert_eq!(hex.len(), 24);
/// assert_eq!(ObjectId::parse(&hex)?, id);
/// ```
#[derive(PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectId {
    bytes: [u8; 12],
}

impl ObjectId {
    /// Generates a new unique `ObjectId` from the current timestamp,
    /// the process-wide machine bytes, and a monotonically increasing
    /// counter.
    pub fn new() -> Self {
        let timestamp = chrono::Utc::now().timestamp() as u32;
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..9].copy_from_slice(&*MACHINE_BYTES);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        ObjectId { bytes }
    }

    /// Creates an `ObjectId` from raw bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId { bytes }
    }

    /// Returns the raw bytes of this identifier.
    pub fn bytes(&self) -> &[u8; 12] {
        &self.bytes
    }

    /// Parses a 24-character lowercase hexadecimal string into an `ObjectId`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::InvalidId`] if the input is not exactly
    /// 24 characters or contains anything other than lowercase hex digits.
    /// Uppercase digits are rejected because re-rendering would not
    /// reproduce the original string.
    pub fn parse(hex: &str) -> MonaziteResult<ObjectId> {
        if hex.len() != 24 {
            log::error!("Object id must be 24 hex characters, got {} characters", hex.len());
            return Err(MonaziteError::new(
                "Object id must be 24 hex characters",
                ErrorKind::InvalidId,
            ));
        }

        let mut bytes = [0u8; 12];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let high = hex_value(chunk[0])?;
            let low = hex_value(chunk[1])?;
            bytes[i] = (high << 4) | low;
        }
        Ok(ObjectId { bytes })
    }

    /// Extracts the timestamp (seconds since epoch) encoded in the
    /// leading four bytes of this identifier.
    pub fn timestamp(&self) -> i64 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]) as i64
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::new()
    }
}

fn hex_value(c: u8) -> MonaziteResult<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => {
            log::error!("Object id contains non-hex character '{}'", c as char);
            Err(MonaziteError::new(
                "Object id must contain only lowercase hex characters",
                ErrorKind::InvalidId,
            ))
        }
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in &self.bytes {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId(\"{}\")", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unique() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_round_trip() {
        let id = ObjectId::new();
        let hex = id.to_string();
        assert_eq!(hex.len(), 24);
        let parsed = ObjectId::parse(&hex).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.to_string(), hex);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(ObjectId::parse("abc").is_err());
        assert!(ObjectId::parse("4af9f23d8ead0e1d32000000ff").is_err());
    }

    #[test]
    fn test_parse_rejects_uppercase() {
        // uppercase would not survive the re-render round trip
        assert!(ObjectId::parse("4AF9F23D8EAD0E1D32000000").is_err());
        assert!(ObjectId::parse("4af9f23d8ead0e1d32000000").is_ok());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(ObjectId::parse("zzf9f23d8ead0e1d32000000").is_err());
    }

    #[test]
    fn test_timestamp_is_recent() {
        let before = chrono::Utc::now().timestamp();
        let id = ObjectId::new();
        assert!(id.timestamp() >= before - 1);
    }
}
