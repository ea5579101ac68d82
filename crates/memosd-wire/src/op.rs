//! The tagged op struct
//!
//! Every op travels as a fixed 64-byte struct: `opcode u16`, `flags u32`,
//! `payload_len u32`, then 54 bytes of opcode-tagged union. The payload
//! length counts in-data on requests and out-data on replies; the caller
//! supplies the right one. Unknown opcodes are rejected on ingest, never
//! silently skipped.

use crate::decode::need;
use bytes::{Buf, BufMut, BytesMut};
use memosd_buf::BufferRef;
use memosd_common::{Error, Result};

/// Wire size of one op struct
pub const OSD_OP_SIZE: usize = 64;

/// Maximum ops per request
pub const MAX_OPS: usize = 16;

/// Maximum snapshot ids per request
pub const MAX_SNAPS: usize = 1024;

/// Per-op flag: a failure of this op does not fail the request
pub const OP_FLAG_FAILOK: u32 = 0x0002;

/// Opcode values, composed as `mode | type | id`
pub mod opcode {
    /// Read-side ops
    pub const MODE_RD: u16 = 0x1000;
    /// Write-side ops
    pub const MODE_WR: u16 = 0x2000;
    /// Object data ops
    pub const TYPE_DATA: u16 = 0x0200;
    /// Extended attribute ops
    pub const TYPE_ATTR: u16 = 0x0300;
    /// Object-class execution ops
    pub const TYPE_EXEC: u16 = 0x0400;

    pub const STAT: u16 = MODE_RD | TYPE_DATA | 0x01;
    pub const READ: u16 = MODE_RD | TYPE_DATA | 0x02;
    pub const LIST_WATCHERS: u16 = MODE_RD | TYPE_DATA | 0x03;
    pub const NOTIFY: u16 = MODE_RD | TYPE_DATA | 0x04;
    pub const NOTIFY_ACK: u16 = MODE_RD | TYPE_DATA | 0x05;

    pub const WRITE: u16 = MODE_WR | TYPE_DATA | 0x01;
    pub const WRITEFULL: u16 = MODE_WR | TYPE_DATA | 0x02;
    pub const ZERO: u16 = MODE_WR | TYPE_DATA | 0x03;
    pub const TRUNCATE: u16 = MODE_WR | TYPE_DATA | 0x04;
    pub const CREATE: u16 = MODE_WR | TYPE_DATA | 0x05;
    pub const DELETE: u16 = MODE_WR | TYPE_DATA | 0x06;
    pub const WATCH: u16 = MODE_WR | TYPE_DATA | 0x07;
    pub const SETALLOCHINT: u16 = MODE_WR | TYPE_DATA | 0x08;
    pub const COPY_FROM2: u16 = MODE_WR | TYPE_DATA | 0x09;

    pub const CALL: u16 = MODE_RD | TYPE_EXEC | 0x01;

    pub const SETXATTR: u16 = MODE_WR | TYPE_ATTR | 0x01;
    pub const CMPXATTR: u16 = MODE_RD | TYPE_ATTR | 0x02;

    /// Human-readable opcode name for logs
    #[must_use]
    pub fn name(op: u16) -> &'static str {
        match op {
            STAT => "stat",
            READ => "read",
            WRITE => "write",
            WRITEFULL => "writefull",
            ZERO => "zero",
            TRUNCATE => "truncate",
            CREATE => "create",
            DELETE => "delete",
            WATCH => "watch",
            NOTIFY => "notify",
            NOTIFY_ACK => "notify-ack",
            LIST_WATCHERS => "list-watchers",
            SETALLOCHINT => "set-alloc-hint",
            COPY_FROM2 => "copy-from2",
            CALL => "call",
            SETXATTR => "setxattr",
            CMPXATTR => "cmpxattr",
            _ => "unknown",
        }
    }
}

/// Byte extent within an object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
    pub truncate_size: u64,
    pub truncate_seq: u32,
}

impl Extent {
    /// An extent covering `[offset, offset + length)`
    #[must_use]
    pub const fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            truncate_size: 0,
            truncate_seq: 0,
        }
    }
}

/// Object-class invocation lengths; class name, method name and in-data
/// follow in the data region, in that order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassCall {
    pub class_len: u8,
    pub method_len: u8,
    pub indata_len: u32,
}

/// Watch registration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchInfo {
    pub cookie: u64,
    pub ver: u64,
    pub op: u8,
    pub gen: u32,
}

/// Expected-size hints for allocation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocHint {
    pub expected_object_size: u64,
    pub expected_write_size: u64,
}

/// Extended-attribute op parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XattrInfo {
    pub name_len: u32,
    pub value_len: u32,
    pub cmp_op: u8,
    pub cmp_mode: u8,
}

/// Cross-object copy parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyFromInfo {
    pub snapid: u64,
    pub src_version: u64,
    pub flags: u8,
    pub src_fadvise_flags: u32,
}

/// Decoded union of one op
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpPayload {
    Stat,
    Read(Extent),
    Write(Extent),
    WriteFull(Extent),
    Zero(Extent),
    Truncate(Extent),
    Call(ClassCall),
    Watch(WatchInfo),
    Notify { cookie: u64 },
    NotifyAck,
    ListWatchers,
    SetAllocHint(AllocHint),
    SetXattr(XattrInfo),
    CmpXattr(XattrInfo),
    Create,
    Delete,
    CopyFrom(CopyFromInfo),
}

impl OpPayload {
    /// The wire opcode of this payload
    #[must_use]
    pub fn opcode(&self) -> u16 {
        match self {
            Self::Stat => opcode::STAT,
            Self::Read(_) => opcode::READ,
            Self::Write(_) => opcode::WRITE,
            Self::WriteFull(_) => opcode::WRITEFULL,
            Self::Zero(_) => opcode::ZERO,
            Self::Truncate(_) => opcode::TRUNCATE,
            Self::Call(_) => opcode::CALL,
            Self::Watch(_) => opcode::WATCH,
            Self::Notify { .. } => opcode::NOTIFY,
            Self::NotifyAck => opcode::NOTIFY_ACK,
            Self::ListWatchers => opcode::LIST_WATCHERS,
            Self::SetAllocHint(_) => opcode::SETALLOCHINT,
            Self::SetXattr(_) => opcode::SETXATTR,
            Self::CmpXattr(_) => opcode::CMPXATTR,
            Self::Create => opcode::CREATE,
            Self::Delete => opcode::DELETE,
            Self::CopyFrom(_) => opcode::COPY_FROM2,
        }
    }
}

/// One operation of a composite request, with its execution state
#[derive(Debug)]
pub struct Op {
    /// The decoded op union
    pub payload: OpPayload,
    /// Per-op flags (`OP_FLAG_FAILOK` et al)
    pub flags: u32,
    /// Bytes this op consumes from the request data region
    pub indata_len: u32,
    /// Bytes this op contributes to the reply data region
    pub outdata_len: u32,
    /// Execution result, reported back per op
    pub rval: i32,
    /// Reply out-data owned by the op until the reply message takes it
    pub outdata: Option<BufferRef>,
}

impl Op {
    /// A fresh op around a payload
    #[must_use]
    pub fn new(payload: OpPayload) -> Self {
        Self {
            payload,
            flags: 0,
            indata_len: 0,
            outdata_len: 0,
            rval: 0,
            outdata: None,
        }
    }

    /// Same, with per-op flags
    #[must_use]
    pub fn with_flags(payload: OpPayload, flags: u32) -> Self {
        Self {
            flags,
            ..Self::new(payload)
        }
    }

    /// Decode one 64-byte op struct. Returns the op and its raw
    /// `payload_len` field; the caller knows whether that counts in-data
    /// (request) or out-data (reply).
    pub fn decode(buf: &mut impl Buf) -> Result<(Self, u32)> {
        need(buf, OSD_OP_SIZE)?;
        let mut raw = [0u8; OSD_OP_SIZE];
        buf.copy_to_slice(&mut raw);
        let mut p = &raw[..];

        let code = p.get_u16_le();
        let flags = p.get_u32_le();
        let payload_len = p.get_u32_le();

        let payload = match code {
            opcode::STAT => OpPayload::Stat,
            opcode::READ | opcode::WRITE | opcode::WRITEFULL | opcode::ZERO | opcode::TRUNCATE => {
                let extent = Extent {
                    offset: p.get_u64_le(),
                    length: p.get_u64_le(),
                    truncate_size: p.get_u64_le(),
                    truncate_seq: p.get_u32_le(),
                };
                match code {
                    opcode::READ => OpPayload::Read(extent),
                    opcode::WRITE => OpPayload::Write(extent),
                    opcode::WRITEFULL => OpPayload::WriteFull(extent),
                    opcode::ZERO => OpPayload::Zero(extent),
                    _ => OpPayload::Truncate(extent),
                }
            }
            opcode::CALL => OpPayload::Call(ClassCall {
                class_len: p.get_u8(),
                method_len: p.get_u8(),
                indata_len: p.get_u32_le(),
            }),
            opcode::WATCH => OpPayload::Watch(WatchInfo {
                cookie: p.get_u64_le(),
                ver: p.get_u64_le(),
                op: p.get_u8(),
                gen: p.get_u32_le(),
            }),
            opcode::NOTIFY => OpPayload::Notify {
                cookie: p.get_u64_le(),
            },
            opcode::NOTIFY_ACK => OpPayload::NotifyAck,
            opcode::LIST_WATCHERS => OpPayload::ListWatchers,
            opcode::SETALLOCHINT => OpPayload::SetAllocHint(AllocHint {
                expected_object_size: p.get_u64_le(),
                expected_write_size: p.get_u64_le(),
            }),
            opcode::SETXATTR | opcode::CMPXATTR => {
                let xattr = XattrInfo {
                    name_len: p.get_u32_le(),
                    value_len: p.get_u32_le(),
                    cmp_op: p.get_u8(),
                    cmp_mode: p.get_u8(),
                };
                if code == opcode::SETXATTR {
                    OpPayload::SetXattr(xattr)
                } else {
                    OpPayload::CmpXattr(xattr)
                }
            }
            opcode::CREATE => OpPayload::Create,
            opcode::DELETE => OpPayload::Delete,
            opcode::COPY_FROM2 => OpPayload::CopyFrom(CopyFromInfo {
                snapid: p.get_u64_le(),
                src_version: p.get_u64_le(),
                flags: p.get_u8(),
                src_fadvise_flags: p.get_u32_le(),
            }),
            other => return Err(Error::UnsupportedOp { opcode: other }),
        };

        Ok((
            Self {
                payload,
                flags,
                indata_len: 0,
                outdata_len: 0,
                rval: 0,
                outdata: None,
            },
            payload_len,
        ))
    }

    /// Encode one 64-byte op struct with the given `payload_len`
    pub fn encode(&self, buf: &mut BytesMut, payload_len: u32) {
        let mut raw = [0u8; OSD_OP_SIZE];
        let mut p = &mut raw[..];

        p.put_u16_le(self.payload.opcode());
        p.put_u32_le(self.flags);
        p.put_u32_le(payload_len);

        match &self.payload {
            OpPayload::Stat
            | OpPayload::NotifyAck
            | OpPayload::ListWatchers
            | OpPayload::Create
            | OpPayload::Delete => {}
            OpPayload::Read(e)
            | OpPayload::Write(e)
            | OpPayload::WriteFull(e)
            | OpPayload::Zero(e)
            | OpPayload::Truncate(e) => {
                p.put_u64_le(e.offset);
                p.put_u64_le(e.length);
                p.put_u64_le(e.truncate_size);
                p.put_u32_le(e.truncate_seq);
            }
            OpPayload::Call(c) => {
                p.put_u8(c.class_len);
                p.put_u8(c.method_len);
                p.put_u32_le(c.indata_len);
            }
            OpPayload::Watch(w) => {
                p.put_u64_le(w.cookie);
                p.put_u64_le(w.ver);
                p.put_u8(w.op);
                p.put_u32_le(w.gen);
            }
            OpPayload::Notify { cookie } => p.put_u64_le(*cookie),
            OpPayload::SetAllocHint(h) => {
                p.put_u64_le(h.expected_object_size);
                p.put_u64_le(h.expected_write_size);
            }
            OpPayload::SetXattr(x) | OpPayload::CmpXattr(x) => {
                p.put_u32_le(x.name_len);
                p.put_u32_le(x.value_len);
                p.put_u8(x.cmp_op);
                p.put_u8(x.cmp_mode);
            }
            OpPayload::CopyFrom(c) => {
                p.put_u64_le(c.snapid);
                p.put_u64_le(c.src_version);
                p.put_u8(c.flags);
                p.put_u32_le(c.src_fadvise_flags);
            }
        }

        buf.put_slice(&raw);
    }
}
