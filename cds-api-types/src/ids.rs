//! Strongly typed identities.
//!
//! Promoting ids and hashes to distinct types (rather than passing `String`
//! everywhere) means the compiler rejects code that confuses a node-id for a
//! chunk-id or a stream-id, per the re-architecture note on "hash values and
//! ids as plain strings" in the design notes.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

/// Characters allowed in a storage-node chunk id: alphanumeric, `_`, `-`.
fn is_safe_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Opaque 128-bit stream identity, rendered as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(u128);

impl StreamId {
    pub fn new(value: u128) -> Self {
        StreamId(value)
    }

    /// Generates a fresh random id for a newly created stream, using the
    /// same `openssl`-backed RNG already depended on for content hashing.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        openssl::rand::rand_bytes(&mut bytes).expect("system RNG unavailable");
        StreamId(u128::from_be_bytes(bytes))
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!("invalid stream id '{s}': expected 32 hex characters");
        }
        let value = u128::from_str_radix(s, 16)?;
        Ok(StreamId(value))
    }
}

impl TryFrom<String> for StreamId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> String {
        id.to_string()
    }
}

/// Storage-node chunk id: 1-64 bytes of `[A-Za-z0-9_-]`.
///
/// The coordinator derives this deterministically from `(stream_id,
/// sequence_num)` via [`ChunkId::derive`] so that chunk-ids never need to be
/// invented or transmitted separately from the pair they are derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId(String);

impl ChunkId {
    pub const MAX_LEN: usize = 64;

    pub fn parse<S: Into<String>>(s: S) -> Result<Self, Error> {
        let s = s.into();
        if s.is_empty() || s.len() > Self::MAX_LEN {
            bail!(
                "invalid chunk id: length {} not in 1..={}",
                s.len(),
                Self::MAX_LEN
            );
        }
        if !s.bytes().all(is_safe_id_byte) {
            bail!("invalid chunk id '{s}': only [A-Za-z0-9_-] allowed");
        }
        Ok(ChunkId(s))
    }

    /// Derives the storage-node chunk id for a `(stream_id, sequence_num)` pair.
    pub fn derive(stream_id: StreamId, sequence_num: u64) -> Self {
        // fits comfortably under the 64 byte ceiling: 32 + 1 + 10 = 43 bytes
        let s = format!("{stream_id}-{sequence_num:010}");
        ChunkId(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the storage-node id under which one erasure fragment of this
    /// chunk is stored (a fragment is itself an opaque blob on its node, put
    /// through the ordinary chunk `PUT` surface).
    pub fn fragment_storage_id(&self, fragment_index: u8) -> ChunkId {
        ChunkId(format!("{}-f{fragment_index:03}", self.0))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChunkId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        Self::parse(s)
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> String {
        id.0
    }
}

/// Opaque node identity assigned at registration time.
///
/// Never parsed to derive routing; the manifest and catalog carry node URLs
/// verbatim alongside the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn parse<S: Into<String>>(s: S) -> Result<Self, Error> {
        let s = s.into();
        if s.is_empty() || s.len() > 64 {
            bail!("invalid node id: length {} not in 1..=64", s.len());
        }
        Ok(NodeId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        Self::parse(s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> String {
        id.0
    }
}

/// Monotonic ballot number used to order competing commit proposals for a
/// single chunk-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ballot(pub u64);

impl Ballot {
    pub const NONE: Ballot = Ballot(0);

    pub fn next(self) -> Ballot {
        Ballot(self.0 + 1)
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_derive_roundtrips() {
        let sid = StreamId::new(0x1234_5678_9abc_def0_1122_3344_5566_7788);
        let cid = ChunkId::derive(sid, 7);
        assert_eq!(cid.as_str(), format!("{sid}-0000000007"));
        assert!(ChunkId::parse(cid.as_str()).is_ok());
    }

    #[test]
    fn fragment_storage_id_stays_within_length_limit() {
        let sid = StreamId::new(u128::MAX);
        let cid = ChunkId::derive(sid, u64::MAX);
        let fid = cid.fragment_storage_id(4);
        assert!(ChunkId::parse(fid.as_str()).is_ok());
        assert!(fid.as_str().ends_with("-f004"));
    }

    #[test]
    fn chunk_id_rejects_bad_chars() {
        assert!(ChunkId::parse("has space").is_err());
        assert!(ChunkId::parse("").is_err());
        assert!(ChunkId::parse("a".repeat(65)).is_err());
        assert!(ChunkId::parse("a".repeat(64)).is_ok());
    }

    #[test]
    fn stream_id_roundtrip() {
        let sid: StreamId = "00000000000000000000000000002a".parse().unwrap();
        assert_eq!(sid.as_u128(), 42);
        assert_eq!(sid.to_string(), "00000000000000000000000000002a");
    }
}
