//! Composite op request codec
//!
//! Request envelope, in wire order: sharded placement group, raw name
//! hash, map epoch, request flags, a fixed-size request id (skipped), a
//! trace blob (skipped), client incarnation (always zero, skipped),
//! mtime, object locator, object name, the op array, snapshot context,
//! attempts and the peer feature bits. The transaction id rides in the
//! frame header, not the body.

use crate::decode::{
    encode_struct, get_i8, get_i32, get_i64, get_lpbytes, get_u8, get_u16, get_u32, get_u64,
    put_lpbytes, skip, start_decoding,
};
use crate::message::{Message, msg_type};
use crate::op::{MAX_OPS, MAX_SNAPS, Op};
use bytes::{BufMut, Bytes, BytesMut};
use memosd_common::{Error, MAX_NAME_LEN, ObjectIdentity, PgId, Result, Spg, Timestamp};

/// Envelope version of an op request frame
pub const REQUEST_VERSION: u16 = 8;

/// Fixed size of the request id carried inside its versioned wrapper:
/// entity (type u8 + id u64), tid u64, incarnation u32
pub const REQID_SIZE: usize = 21;

/// Fixed size of the trace blob: trace id, span id, parent span id
pub const TRACE_SIZE: usize = 24;

/// Request flag: acknowledge when the op is applied in memory
pub const FLAG_ACK: u32 = 0x0001;
/// Request flag: acknowledge when the op is stable in NVRAM
pub const FLAG_ONNVRAM: u32 = 0x0002;
/// Request flag: acknowledge when the op is stable on disk
pub const FLAG_ONDISK: u32 = 0x0004;
/// Request flag: the request reads object state
pub const FLAG_READ: u32 = 0x0010;
/// Request flag: the request mutates object state
pub const FLAG_WRITE: u32 = 0x0020;

/// A decoded composite request
#[derive(Debug)]
pub struct OpRequest {
    /// Transaction id, unique per peer
    pub tid: u64,
    /// Feature bits of the sending peer
    pub features: u64,
    /// Map epoch the sender acted on
    pub epoch: u32,
    /// Routing target
    pub spg: Spg,
    /// Request flags
    pub flags: u32,
    /// Delivery attempts so far
    pub attempts: u32,
    /// Mutation timestamp to stamp onto touched objects
    pub mtime: Timestamp,
    /// The object every op addresses
    pub identity: ObjectIdentity,
    /// Snapshot sequence of the sender's context
    pub snap_seq: u64,
    /// Snapshot ids of the sender's context
    pub snaps: Vec<u64>,
    /// The ops, executed in order
    pub ops: Vec<Op>,
}

fn decode_spg(buf: &mut Bytes) -> Result<Spg> {
    let bounds = start_decoding(buf, 1, "spg")?;
    let pg_ver = get_u8(buf)?;
    if pg_ver != 1 {
        return Err(Error::corrupted(format!("bad pgid version {pg_ver}")));
    }
    let pool = get_u64(buf)?;
    let seed = get_u32(buf)?;
    let _preferred = get_i32(buf)?; // always -1
    let shard = get_i8(buf)?;
    bounds.finish(buf)?;
    Ok(Spg {
        pgid: PgId { pool, seed },
        shard,
    })
}

fn encode_spg(buf: &mut BytesMut, spg: &Spg) {
    encode_struct(buf, 1, 1, |b| {
        b.put_u8(1); // pgid version
        b.put_u64_le(spg.pgid.pool);
        b.put_u32_le(spg.pgid.seed);
        b.put_i32_le(-1); // preferred
        b.put_i8(spg.shard);
    });
}

/// Object locator: pool plus optional namespace
fn decode_oloc(buf: &mut Bytes) -> Result<(i64, Option<Vec<u8>>)> {
    let bounds = start_decoding(buf, 3, "oloc")?;
    let pool = get_i64(buf)?;
    let namespace = get_lpbytes(buf)?;
    bounds.finish(buf)?;
    let namespace = if namespace.is_empty() {
        None
    } else {
        Some(namespace)
    };
    Ok((pool, namespace))
}

fn encode_oloc(buf: &mut BytesMut, pool: i64, namespace: Option<&[u8]>) {
    encode_struct(buf, 3, 3, |b| {
        b.put_i64_le(pool);
        put_lpbytes(b, namespace.unwrap_or_default());
    });
}

impl OpRequest {
    /// Decode a request from an `OSD_OP` message
    pub fn decode(msg: &Message) -> Result<Self> {
        let mut buf = msg.front.clone();

        let spg = decode_spg(&mut buf)?;
        let raw_hash = get_u32(&mut buf)?;
        let epoch = get_u32(&mut buf)?;
        let flags = get_u32(&mut buf)?;

        let reqid = start_decoding(&mut buf, 2, "reqid")?;
        skip(&mut buf, REQID_SIZE)?;
        reqid.finish(&mut buf)?;

        skip(&mut buf, TRACE_SIZE)?;
        skip(&mut buf, 4)?; // client incarnation, always 0

        let mtime = Timestamp::new(get_u32(&mut buf)?, get_u32(&mut buf)?);
        // The locator repeats the pool carried by the placement group.
        let (_pool, namespace) = decode_oloc(&mut buf)?;

        let name = get_lpbytes(&mut buf)?;
        if name.len() > MAX_NAME_LEN {
            return Err(Error::corrupted(format!(
                "object name too long: {} bytes",
                name.len()
            )));
        }

        let num_ops = get_u16(&mut buf)? as usize;
        if num_ops > MAX_OPS {
            return Err(Error::corrupted(format!("too many ops: {num_ops}")));
        }
        let mut ops = Vec::with_capacity(num_ops);
        for _ in 0..num_ops {
            let (mut op, payload_len) = Op::decode(&mut buf)?;
            op.indata_len = payload_len;
            ops.push(op);
        }

        let snapshot_id = get_u64(&mut buf)?;
        let snap_seq = get_u64(&mut buf)?;
        let num_snaps = get_u32(&mut buf)? as usize;
        if num_snaps > MAX_SNAPS {
            return Err(Error::corrupted(format!("too many snaps: {num_snaps}")));
        }
        let mut snaps = Vec::with_capacity(num_snaps);
        for _ in 0..num_snaps {
            snaps.push(get_u64(&mut buf)?);
        }

        let attempts = get_u32(&mut buf)?;
        let features = get_u64(&mut buf)?;

        let identity = ObjectIdentity {
            pool: spg.pgid.pool as i64,
            hash: raw_hash,
            name,
            key: None,
            namespace,
            snapshot_id,
        };

        Ok(Self {
            tid: msg.header.tid,
            features,
            epoch,
            spg,
            flags,
            attempts,
            mtime,
            identity,
            snap_seq,
            snaps,
            ops,
        })
    }

    /// Encode this request into an `OSD_OP` message. Op payload lengths
    /// are taken from each op's `indata_len`; the data region itself is
    /// attached by the caller.
    #[must_use]
    pub fn encode(&self) -> Message {
        let mut buf = BytesMut::new();

        encode_spg(&mut buf, &self.spg);
        buf.put_u32_le(self.identity.hash);
        buf.put_u32_le(self.epoch);
        buf.put_u32_le(self.flags);

        encode_struct(&mut buf, 2, 2, |b| {
            b.put_slice(&[0u8; REQID_SIZE]);
        });
        buf.put_slice(&[0u8; TRACE_SIZE]);
        buf.put_u32_le(0); // client incarnation

        buf.put_u32_le(self.mtime.secs);
        buf.put_u32_le(self.mtime.nsecs);

        encode_oloc(&mut buf, self.identity.pool, self.identity.namespace.as_deref());
        put_lpbytes(&mut buf, &self.identity.name);

        buf.put_u16_le(self.ops.len() as u16);
        for op in &self.ops {
            op.encode(&mut buf, op.indata_len);
        }

        buf.put_u64_le(self.identity.snapshot_id);
        buf.put_u64_le(self.snap_seq);
        buf.put_u32_le(self.snaps.len() as u32);
        for snap in &self.snaps {
            buf.put_u64_le(*snap);
        }

        buf.put_u32_le(self.attempts);
        buf.put_u64_le(self.features);

        Message::new(msg_type::OSD_OP, REQUEST_VERSION, self.tid, buf.freeze())
    }
}
