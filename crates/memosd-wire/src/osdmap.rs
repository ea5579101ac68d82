//! The cluster map
//!
//! A monotonically versioned view of cluster membership. The OSD core
//! only reads the epoch to stamp replies and watches its own entry during
//! startup and shutdown; monitors own every mutation.

use crate::decode::{
    encode_struct, get_i32, get_lpbytes, get_u8, get_u32, put_lpbytes, start_decoding,
};
use bytes::{BufMut, Bytes, BytesMut};
use memosd_common::{Error, Result};
use std::collections::BTreeMap;

/// One member of the map
#[derive(Clone, Debug, PartialEq, Eq)]
struct OsdEntry {
    addr: String,
    up: bool,
}

/// Versioned cluster membership view
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterMap {
    epoch: u32,
    osds: BTreeMap<i32, OsdEntry>,
}

impl ClusterMap {
    /// An empty map at epoch zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current map version
    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Whether `osd` is a member registered at `addr`
    #[must_use]
    pub fn contains(&self, osd: i32, addr: &str) -> bool {
        self.osds.get(&osd).is_some_and(|e| e.addr == addr)
    }

    /// Whether `osd` is currently up
    #[must_use]
    pub fn is_up(&self, osd: i32) -> bool {
        self.osds.get(&osd).is_some_and(|e| e.up)
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.osds.len()
    }

    /// Whether the map has no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.osds.is_empty()
    }

    /// Insert or replace a member and bump the epoch (monitor side)
    pub fn upsert(&mut self, osd: i32, addr: impl Into<String>, up: bool) {
        self.osds.insert(
            osd,
            OsdEntry {
                addr: addr.into(),
                up,
            },
        );
        self.epoch += 1;
    }

    /// Flip a member's up state and bump the epoch (monitor side)
    pub fn set_up(&mut self, osd: i32, up: bool) {
        if let Some(entry) = self.osds.get_mut(&osd) {
            entry.up = up;
            self.epoch += 1;
        }
    }

    /// Serialize for an `OSD_MAP` message
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_struct(&mut buf, 1, 1, |b| {
            b.put_u32_le(self.epoch);
            b.put_u32_le(self.osds.len() as u32);
            for (id, entry) in &self.osds {
                b.put_i32_le(*id);
                b.put_u8(u8::from(entry.up));
                put_lpbytes(b, entry.addr.as_bytes());
            }
        });
        buf.freeze()
    }

    /// Parse from an `OSD_MAP` message
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let bounds = start_decoding(buf, 1, "osdmap")?;
        let epoch = get_u32(buf)?;
        let count = get_u32(buf)? as usize;
        let mut osds = BTreeMap::new();
        for _ in 0..count {
            let id = get_i32(buf)?;
            let up = get_u8(buf)? != 0;
            let addr = get_lpbytes(buf)?;
            let addr = String::from_utf8(addr)
                .map_err(|_| Error::corrupted("non-utf8 address in map"))?;
            osds.insert(id, OsdEntry { addr, up });
        }
        bounds.finish(buf)?;
        Ok(Self { epoch, osds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_queries() {
        let mut map = ClusterMap::new();
        assert_eq!(map.epoch(), 0);
        assert!(!map.contains(0, "10.0.0.1:6802"));

        map.upsert(0, "10.0.0.1:6802", true);
        assert_eq!(map.epoch(), 1);
        assert!(map.contains(0, "10.0.0.1:6802"));
        assert!(!map.contains(0, "10.0.0.2:6802"));
        assert!(map.is_up(0));

        map.set_up(0, false);
        assert_eq!(map.epoch(), 2);
        assert!(map.contains(0, "10.0.0.1:6802"));
        assert!(!map.is_up(0));
    }

    #[test]
    fn test_map_roundtrip() {
        let mut map = ClusterMap::new();
        map.upsert(0, "10.0.0.1:6802", true);
        map.upsert(3, "10.0.0.2:6802", false);

        let mut buf = map.encode();
        let decoded = ClusterMap::decode(&mut buf).unwrap();
        assert_eq!(decoded, map);
    }
}
