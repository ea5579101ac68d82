//! Core type definitions for MemOSD
//!
//! Object identities, timestamps and placement-group ids. These types are
//! carried on the wire and used as index keys by the object store, so their
//! ordering is part of the protocol contract.

use std::cmp::Ordering;
use std::fmt;

/// Maximum length of an object name in bytes
pub const MAX_NAME_LEN: usize = 2048;

/// Second/nanosecond timestamp as carried on the wire
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds since the epoch
    pub secs: u32,
    /// Nanoseconds within the second
    pub nsecs: u32,
}

impl Timestamp {
    /// Create a timestamp
    #[must_use]
    pub const fn new(secs: u32, nsecs: u32) -> Self {
        Self { secs, nsecs }
    }

    /// The zero timestamp
    pub const ZERO: Self = Self::new(0, 0);

    /// The current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self::new(elapsed.as_secs() as u32, elapsed.subsec_nanos())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nsecs)
    }
}

/// Raw placement-group id: pool plus placement seed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PgId {
    /// Storage pool
    pub pool: u64,
    /// Placement seed within the pool
    pub seed: u32,
}

/// Sharded placement-group id, the routing target of a request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Spg {
    /// The placement group
    pub pgid: PgId,
    /// Shard within the group, -1 when unsharded
    pub shard: i8,
}

impl fmt::Display for Spg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:x}s{}", self.pgid.pool, self.pgid.seed, self.shard)
    }
}

/// Placement hash of an object name
#[must_use]
pub fn name_hash(name: &[u8]) -> u32 {
    crc32c::crc32c(name)
}

/// The addressable name of an object.
///
/// Ordering is total and shared between the wire and the object index:
/// `(pool, namespace, bit-reversed hash, name, key, snapshot_id)`. Reversing
/// the hash bits spreads lexicographically-close names across the keyspace,
/// which keeps range scans of one placement group contiguous.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectIdentity {
    /// Owning pool
    pub pool: i64,
    /// Placement hash, precomputed from the name by the client
    pub hash: u32,
    /// Object name (byte string, at most [`MAX_NAME_LEN`] bytes)
    pub name: Vec<u8>,
    /// Optional locator key overriding the name for placement
    pub key: Option<Vec<u8>>,
    /// Optional namespace
    pub namespace: Option<Vec<u8>>,
    /// Snapshot this identity addresses
    pub snapshot_id: u64,
}

impl ObjectIdentity {
    /// Create an identity for a plain (un-namespaced, head) object,
    /// computing the placement hash from the name.
    #[must_use]
    pub fn from_name(pool: i64, name: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let hash = name_hash(&name);
        Self {
            pool,
            hash,
            name,
            key: None,
            namespace: None,
            snapshot_id: 0,
        }
    }

    fn sort_key(&self) -> (i64, Option<&[u8]>, u32, &[u8], Option<&[u8]>, u64) {
        (
            self.pool,
            self.namespace.as_deref(),
            self.hash.reverse_bits(),
            &self.name,
            self.key.as_deref(),
            self.snapshot_id,
        )
    }
}

impl Ord for ObjectIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ObjectIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Names are byte strings; fall back to hex for non-UTF-8 names.
        match std::str::from_utf8(&self.name) {
            Ok(name) => write!(f, "{}:{}", self.pool, name),
            Err(_) => write!(f, "{}:0x{}", self.pool, hex::encode(&self.name)),
        }
    }
}
