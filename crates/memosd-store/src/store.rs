//! The object table and block engine
//!
//! An ordered table maps object identities to sparse ordered block maps.
//! Writes allocate zeroed 64 KiB blocks on demand and copy payload bytes
//! straight from the request cursor; reads assemble one contiguous
//! zero-initialised output buffer, so holes and the tail need no explicit
//! fill. Object size and mtime move only when bytes actually land, and a
//! failed write keeps whatever landed first (there is no rollback).

use memosd_buf::{BufferCursor, BufferRef, PAGE_SHIFT, Page, PageVec};
use memosd_common::{Error, ObjectIdentity, Result, Timestamp};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Block order: 64 KiB, power of two
pub const BLOCK_SHIFT: u32 = 16;

/// Allocation unit of object data
pub const BLOCK_SIZE: u64 = 1 << BLOCK_SHIFT;

/// Compound-page order backing one block
const BLOCK_PAGE_ORDER: u32 = BLOCK_SHIFT - PAGE_SHIFT;

/// Writes at least this long become no-ops under the noop-write option
const NOOP_WRITE_MIN: u64 = 4096;

/// A single allocated block; its offset is the key in the block map
#[derive(Debug)]
struct Block {
    page: Page,
}

/// One logical object: logical size, mtime and the sparse block map
/// keyed by block-aligned offset.
#[derive(Debug, Default)]
pub struct StoredObject {
    size: u64,
    mtime: Timestamp,
    blocks: BTreeMap<u64, Block>,
}

impl StoredObject {
    /// Logical end of data; may exceed the resident bytes (trailing holes)
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last successful mutation time
    #[must_use]
    pub fn mtime(&self) -> Timestamp {
        self.mtime
    }

    /// Number of resident blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Offsets of resident blocks, in ascending order
    pub fn block_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.blocks.keys().copied()
    }
}

/// The in-memory object store of one OSD
#[derive(Debug)]
pub struct ObjectStore {
    objects: BTreeMap<ObjectIdentity, StoredObject>,
    noop_write: bool,
}

impl ObjectStore {
    /// Create an empty store
    #[must_use]
    pub fn new(noop_write: bool) -> Self {
        Self {
            objects: BTreeMap::new(),
            noop_write,
        }
    }

    /// Number of objects resident
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Look up an object for inspection
    #[must_use]
    pub fn object(&self, identity: &ObjectIdentity) -> Option<&StoredObject> {
        self.objects.get(identity)
    }

    /// Write `length` bytes from `cursor` at `offset`, creating the
    /// object and any missing blocks on the way. On failure the bytes
    /// already copied stay in place, and size/mtime are updated iff at
    /// least one byte landed.
    pub fn write(
        &mut self,
        identity: &ObjectIdentity,
        offset: u64,
        length: u64,
        mtime: Timestamp,
        cursor: &mut BufferCursor<'_>,
    ) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        if self.noop_write && length >= NOOP_WRITE_MIN {
            trace!(object = %identity, length, "noop write");
            return Ok(());
        }

        let obj = self.objects.entry(identity.clone()).or_insert_with(|| {
            debug!(object = %identity, "creating object");
            StoredObject::default()
        });

        let mut dst_off = offset;
        let mut left = length;
        let mut modified = false;
        let mut result = Ok(());

        while left > 0 {
            let block_base = dst_off & !(BLOCK_SIZE - 1);
            let block = match obj.blocks.entry(block_base) {
                std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::btree_map::Entry::Vacant(v) => {
                    match Page::alloc(BLOCK_PAGE_ORDER) {
                        Ok(page) => {
                            trace!(object = %identity, block_base, "allocating block");
                            v.insert(Block { page })
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
            };

            let in_block = (dst_off - block_base) as usize;
            let want = left.min(BLOCK_SIZE - in_block as u64).min(cursor.remaining());
            if want == 0 {
                // The data segment ran out before the claimed extent did.
                result = Err(Error::BadAddress);
                break;
            }

            let dst = &mut block.page.as_mut_slice()[in_block..in_block + want as usize];
            let copied = cursor.copy_from(dst);
            if copied > 0 {
                modified = true;
                dst_off += copied as u64;
                left -= copied as u64;
            }
            if (copied as u64) < want {
                result = Err(Error::BadAddress);
                break;
            }
        }

        if modified {
            obj.mtime = mtime;
            if dst_off > obj.size {
                obj.size = dst_off;
            }
        }
        result
    }

    /// Read up to `length` bytes at `offset` into a single contiguous
    /// page-backed buffer. Holes inside the range and any tail short of
    /// `length` read as zeros; a read at or past the end of the object
    /// yields an empty buffer.
    pub fn read(&self, identity: &ObjectIdentity, offset: u64, length: u64) -> Result<BufferRef> {
        let obj = self.objects.get(identity).ok_or(Error::NotFound)?;

        if offset >= obj.size {
            return Ok(BufferRef::Empty);
        }
        let len = length.min(obj.size - offset);
        let mut out = PageVec::alloc_contiguous(len)?;

        let mut read_off = offset;
        let mut pos = 0u64;
        let mut left = len;

        // Start from the block holding the first byte, or the nearest one
        // to its right.
        let first_base = read_off & !(BLOCK_SIZE - 1);
        for (&block_base, block) in obj.blocks.range(first_base..) {
            if left == 0 {
                break;
            }
            if block_base > read_off {
                // Hole before this block; output pages start zeroed.
                let hole = (block_base - read_off).min(left);
                read_off += hole;
                pos += hole;
                left -= hole;
                if left == 0 {
                    break;
                }
            }
            let in_block = (read_off - block_base) as usize;
            let n = (BLOCK_SIZE - in_block as u64).min(left) as usize;
            out.write_at(pos, &block.page.as_slice()[in_block..in_block + n]);
            read_off += n as u64;
            pos += n as u64;
            left -= n as u64;
        }
        // Anything past the last block stays zero.

        Ok(BufferRef::Pages(out))
    }

    /// Report object size and mtime as a 16-byte payload:
    /// `u64 size, u32 secs, u32 nsecs`.
    pub fn stat(&self, identity: &ObjectIdentity) -> Result<BufferRef> {
        let obj = self.objects.get(identity).ok_or(Error::NotFound)?;

        let mut payload = [0u8; 16];
        payload[0..8].copy_from_slice(&obj.size.to_le_bytes());
        payload[8..12].copy_from_slice(&obj.mtime.secs.to_le_bytes());
        payload[12..16].copy_from_slice(&obj.mtime.nsecs.to_le_bytes());

        let mut out = PageVec::alloc_contiguous(16)?;
        out.write_at(0, &payload);
        Ok(BufferRef::Pages(out))
    }

    /// Drop every object, returning how many objects and blocks were freed
    pub fn clear(&mut self) -> (usize, usize) {
        let objects = self.objects.len();
        let blocks = self.objects.values().map(|o| o.blocks.len()).sum();
        self.objects.clear();
        (objects, blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memosd_buf::{CursorBuf, Direction};

    fn id(name: &str) -> ObjectIdentity {
        ObjectIdentity::from_name(1, name)
    }

    /// Write `data` at `offset` through a page-backed cursor, as the
    /// dispatcher would.
    fn write_bytes(
        store: &mut ObjectStore,
        identity: &ObjectIdentity,
        offset: u64,
        data: &[u8],
        mtime: Timestamp,
    ) -> Result<()> {
        let mut pv = PageVec::from_bytes(data).unwrap();
        let len = pv.len();
        let mut cursor = BufferCursor::new(CursorBuf::Pages(&mut pv), len, Direction::Write);
        store.write(identity, offset, data.len() as u64, mtime, &mut cursor)
    }

    #[test]
    fn test_sparse_write_then_read_spanning_hole() {
        let mut store = ObjectStore::new(false);
        let obj = id("sparse");

        write_bytes(&mut store, &obj, 0, &[b'A'; 100], Timestamp::new(1, 0)).unwrap();
        write_bytes(
            &mut store,
            &obj,
            2 * BLOCK_SIZE,
            &[b'B'; 100],
            Timestamp::new(2, 0),
        )
        .unwrap();

        assert_eq!(store.object(&obj).unwrap().size(), 2 * BLOCK_SIZE + 100);

        let buf = store.read(&obj, 0, 200_000).unwrap();
        let data = buf.to_vec();
        assert_eq!(data.len(), 200_000);
        assert!(data[..100].iter().all(|&b| b == b'A'));
        assert!(data[100..131_072].iter().all(|&b| b == 0));
        assert!(data[131_072..131_172].iter().all(|&b| b == b'B'));
        assert!(data[131_172..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_past_eof_is_empty() {
        let mut store = ObjectStore::new(false);
        let obj = id("short");

        write_bytes(&mut store, &obj, 0, &[b'X'; 10], Timestamp::ZERO).unwrap();

        let buf = store.read(&obj, 20, 50).unwrap();
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_clamped_to_size() {
        let mut store = ObjectStore::new(false);
        let obj = id("clamp");

        write_bytes(&mut store, &obj, 0, &[b'Y'; 10], Timestamp::ZERO).unwrap();

        let buf = store.read(&obj, 5, 50).unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.to_vec(), vec![b'Y'; 5]);
    }

    #[test]
    fn test_stat_after_offset_write() {
        let mut store = ObjectStore::new(false);
        let obj = id("stat");

        let offset = 5 * BLOCK_SIZE + 7;
        write_bytes(&mut store, &obj, offset, &[1], Timestamp::new(42, 0)).unwrap();

        let buf = store.stat(&obj).unwrap();
        let data = buf.to_vec();
        assert_eq!(data.len(), 16);
        assert_eq!(
            u64::from_le_bytes(data[0..8].try_into().unwrap()),
            5 * BLOCK_SIZE + 8
        );
        assert_eq!(u32::from_le_bytes(data[8..12].try_into().unwrap()), 42);
        assert_eq!(u32::from_le_bytes(data[12..16].try_into().unwrap()), 0);
    }

    #[test]
    fn test_stat_missing_object() {
        let store = ObjectStore::new(false);
        assert!(matches!(
            store.stat(&id("nope")),
            Err(Error::NotFound)
        ));
        assert!(matches!(
            store.read(&id("nope"), 0, 10),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_write_across_two_blocks() {
        let mut store = ObjectStore::new(false);
        let obj = id("straddle");

        let data = vec![0xAB; BLOCK_SIZE as usize + 1];
        write_bytes(&mut store, &obj, BLOCK_SIZE - 1, &data, Timestamp::ZERO).unwrap();

        let stored = store.object(&obj).unwrap();
        assert_eq!(stored.size(), 2 * BLOCK_SIZE);
        assert_eq!(stored.block_count(), 2);
        assert_eq!(
            stored.block_offsets().collect::<Vec<_>>(),
            vec![0, BLOCK_SIZE]
        );

        // Last byte of block zero is set, everything before it untouched.
        let head = store.read(&obj, 0, BLOCK_SIZE).unwrap().to_vec();
        assert!(head[..BLOCK_SIZE as usize - 1].iter().all(|&b| b == 0));
        assert_eq!(head[BLOCK_SIZE as usize - 1], 0xAB);

        // Block one is fully set.
        let tail = store.read(&obj, BLOCK_SIZE, BLOCK_SIZE).unwrap().to_vec();
        assert!(tail.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_block_offsets_stay_aligned() {
        let mut store = ObjectStore::new(false);
        let obj = id("aligned");

        for offset in [3, BLOCK_SIZE + 17, 7 * BLOCK_SIZE - 1, 9 * BLOCK_SIZE] {
            write_bytes(&mut store, &obj, offset, &[9, 9], Timestamp::ZERO).unwrap();
        }
        for base in store.object(&obj).unwrap().block_offsets() {
            assert_eq!(base % BLOCK_SIZE, 0);
        }
    }

    #[test]
    fn test_overwrite_keeps_single_block() {
        let mut store = ObjectStore::new(false);
        let obj = id("overwrite");

        write_bytes(&mut store, &obj, 0, &[1; 100], Timestamp::new(1, 0)).unwrap();
        write_bytes(&mut store, &obj, 50, &[2; 100], Timestamp::new(2, 0)).unwrap();

        let stored = store.object(&obj).unwrap();
        assert_eq!(stored.size(), 150);
        assert_eq!(stored.block_count(), 1);
        assert_eq!(stored.mtime(), Timestamp::new(2, 0));

        let data = store.read(&obj, 0, 150).unwrap().to_vec();
        assert!(data[..50].iter().all(|&b| b == 1));
        assert!(data[50..].iter().all(|&b| b == 2));
    }

    #[test]
    fn test_zero_length_write_is_noop() {
        let mut store = ObjectStore::new(false);
        let obj = id("empty");

        write_bytes(&mut store, &obj, 0, &[], Timestamp::new(9, 9)).unwrap();
        assert!(store.object(&obj).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_read_and_stat_leave_mtime() {
        let mut store = ObjectStore::new(false);
        let obj = id("mtime");

        write_bytes(&mut store, &obj, 0, &[5; 10], Timestamp::new(7, 3)).unwrap();
        store.read(&obj, 0, 10).unwrap();
        store.stat(&obj).unwrap();
        assert_eq!(store.object(&obj).unwrap().mtime(), Timestamp::new(7, 3));
    }

    #[test]
    fn test_noop_write_option() {
        let mut store = ObjectStore::new(true);
        let obj = id("noop");

        // Long writes short-circuit without touching the store.
        write_bytes(&mut store, &obj, 0, &[1; 4096], Timestamp::ZERO).unwrap();
        assert!(store.object(&obj).is_none());

        // Short writes still land.
        write_bytes(&mut store, &obj, 0, &[1; 100], Timestamp::ZERO).unwrap();
        assert_eq!(store.object(&obj).unwrap().size(), 100);
    }

    #[test]
    fn test_short_data_segment_faults() {
        let mut store = ObjectStore::new(false);
        let obj = id("short-data");

        // Claim 100 bytes but supply 40.
        let mut pv = PageVec::from_bytes(&[3; 40]).unwrap();
        let mut cursor = BufferCursor::new(CursorBuf::Pages(&mut pv), 40, Direction::Write);
        let err = store
            .write(&obj, 0, 100, Timestamp::new(4, 0), &mut cursor)
            .unwrap_err();
        assert!(matches!(err, Error::BadAddress));

        // The bytes that landed stay, and metadata reflects them.
        let stored = store.object(&obj).unwrap();
        assert_eq!(stored.size(), 40);
        assert_eq!(stored.mtime(), Timestamp::new(4, 0));
    }

    #[test]
    fn test_clear() {
        let mut store = ObjectStore::new(false);
        write_bytes(&mut store, &id("a"), 0, &[1; 10], Timestamp::ZERO).unwrap();
        write_bytes(
            &mut store,
            &id("b"),
            BLOCK_SIZE,
            &[2; 10],
            Timestamp::ZERO,
        )
        .unwrap();

        let (objects, blocks) = store.clear();
        assert_eq!(objects, 2);
        assert_eq!(blocks, 2);
        assert!(store.is_empty());
    }
}
