//! Message framing
//!
//! Frame layout:
//! ```text
//! +------------------+
//! |  Header (32 B)   |  magic, type, version, tid, lengths, CRCs
//! +------------------+
//! |  Front           |  the typed message body (decoded by this crate)
//! +------------------+
//! |  Data            |  bulk payload, page-backed, not interpreted here
//! +------------------+
//! ```
//!
//! The front carries the envelope a codec interprets; data carries op
//! payload bytes that flow straight between sockets and store blocks.

use bytes::{Buf, BufMut, Bytes};
use memosd_buf::BufferRef;
use memosd_common::{Error, Result};

/// Magic identifying a MemOSD frame
pub const MSG_MAGIC: u32 = u32::from_le_bytes(*b"MOSD");

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Upper bound on the front region
pub const MAX_FRONT_LEN: u32 = 64 * 1024;

/// Upper bound on the data region
pub const MAX_DATA_LEN: u32 = 64 * 1024 * 1024;

/// Message type tags
pub mod msg_type {
    /// Cluster map push from a monitor
    pub const OSD_MAP: u16 = 41;
    /// Composite object op request
    pub const OSD_OP: u16 = 42;
    /// Reply to an op request
    pub const OSD_OP_REPLY: u16 = 43;
    /// Ask a monitor for its latest map
    pub const MON_GET_MAP: u16 = 60;
    /// Announce this OSD as booted
    pub const MON_BOOT: u16 = 61;
    /// Ask the monitors to mark this OSD down
    pub const MON_MARK_DOWN: u16 = 62;
    /// Register this OSD in the placement hierarchy
    pub const MON_CRUSH_ADD: u16 = 63;
    /// Generic monitor acknowledgement
    pub const MON_ACK: u16 = 64;

    /// Human-readable tag name for logs
    #[must_use]
    pub fn name(t: u16) -> &'static str {
        match t {
            OSD_MAP => "osd_map",
            OSD_OP => "osd_op",
            OSD_OP_REPLY => "osd_op_reply",
            MON_GET_MAP => "mon_get_map",
            MON_BOOT => "mon_boot",
            MON_MARK_DOWN => "mon_mark_down",
            MON_CRUSH_ADD => "mon_crush_add",
            MON_ACK => "mon_ack",
            _ => "unknown",
        }
    }
}

/// Fixed frame header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message type tag
    pub msg_type: u16,
    /// Envelope version of the front region
    pub version: u16,
    /// Transaction id, unique per peer
    pub tid: u64,
    /// Length of the front region
    pub front_len: u32,
    /// Length of the data region
    pub data_len: u32,
    /// CRC32C over the front region
    pub front_crc: u32,
    /// CRC32C over the data region
    pub data_crc: u32,
}

impl MessageHeader {
    /// Serialize to the fixed wire form
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(MSG_MAGIC);
        buf.put_u16_le(self.msg_type);
        buf.put_u16_le(self.version);
        buf.put_u64_le(self.tid);
        buf.put_u32_le(self.front_len);
        buf.put_u32_le(self.data_len);
        buf.put_u32_le(self.front_crc);
        buf.put_u32_le(self.data_crc);
        out
    }

    /// Parse from the fixed wire form
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut buf = &raw[..];
        let magic = buf.get_u32_le();
        if magic != MSG_MAGIC {
            return Err(Error::corrupted(format!("bad frame magic {magic:#010x}")));
        }
        Ok(Self {
            msg_type: buf.get_u16_le(),
            version: buf.get_u16_le(),
            tid: buf.get_u64_le(),
            front_len: buf.get_u32_le(),
            data_len: buf.get_u32_le(),
            front_crc: buf.get_u32_le(),
            data_crc: buf.get_u32_le(),
        })
    }
}

/// A framed message: header, front bytes, and zero or more owned data
/// buffers. The data buffers belong to the message once added; handing
/// the message to the messenger sends them without further copies.
#[derive(Debug)]
pub struct Message {
    /// Frame header; lengths track the payload, CRCs are filled at send
    pub header: MessageHeader,
    /// Front region
    pub front: Bytes,
    /// Data region as a list of owned buffers
    pub data: Vec<BufferRef>,
}

impl Message {
    /// Build a message around a front payload
    #[must_use]
    pub fn new(msg_type: u16, version: u16, tid: u64, front: Bytes) -> Self {
        Self {
            header: MessageHeader {
                msg_type,
                version,
                tid,
                front_len: front.len() as u32,
                data_len: 0,
                front_crc: 0,
                data_crc: 0,
            },
            front,
            data: Vec::new(),
        }
    }

    /// Append an owned data buffer, growing the header's data length
    pub fn add_data(&mut self, buf: BufferRef) {
        self.header.data_len += buf.len() as u32;
        self.data.push(buf);
    }

    /// Total bytes across the data buffers
    #[must_use]
    pub fn data_len(&self) -> u64 {
        self.data.iter().map(BufferRef::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memosd_buf::PageVec;

    #[test]
    fn test_header_roundtrip() {
        let hdr = MessageHeader {
            msg_type: msg_type::OSD_OP,
            version: 8,
            tid: 0x1122_3344_5566_7788,
            front_len: 100,
            data_len: 4096,
            front_crc: 0xaabb_ccdd,
            data_crc: 0x1020_3040,
        };
        let raw = hdr.encode();
        assert_eq!(MessageHeader::decode(&raw).unwrap(), hdr);
    }

    #[test]
    fn test_header_bad_magic() {
        let mut raw = MessageHeader {
            msg_type: 0,
            version: 0,
            tid: 0,
            front_len: 0,
            data_len: 0,
            front_crc: 0,
            data_crc: 0,
        }
        .encode();
        raw[0] ^= 0xff;
        assert!(MessageHeader::decode(&raw).is_err());
    }

    #[test]
    fn test_add_data_tracks_len() {
        let mut msg = Message::new(msg_type::OSD_OP_REPLY, 7, 1, Bytes::new());
        msg.add_data(BufferRef::Pages(PageVec::from_bytes(&[1; 10]).unwrap()));
        msg.add_data(BufferRef::Pages(PageVec::from_bytes(&[2; 6]).unwrap()));
        assert_eq!(msg.header.data_len, 16);
        assert_eq!(msg.data_len(), 16);
    }
}
