//! Op reply codec
//!
//! The reply mirrors the request's op array back with per-op payload
//! lengths set to the out-data each op produced, followed by the per-op
//! result codes. Replay versions and the user version are reserved fields,
//! always zero today.

use crate::decode::{get_i32, get_lpbytes, get_u8, get_u32, get_u64, skip};
use crate::message::{Message, msg_type};
use crate::op::{MAX_OPS, Op};
use crate::request::{FLAG_ACK, FLAG_ONDISK, FLAG_ONNVRAM, OpRequest};
use bytes::{BufMut, BytesMut};
use memosd_common::{Error, PgId, Result};

/// Envelope version of an op reply frame
pub const REPLY_VERSION: u16 = 7;

/// Size of an object version stamp: version u64 + epoch u32
const EVERSION_SIZE: usize = 12;

/// Encode the reply to `req`. Out-data buffers move from the ops into the
/// reply message; the header's data length becomes the sum of per-op
/// out-data lengths.
pub fn encode_reply(req: &mut OpRequest, result: i32, epoch: u32, acktype: u32) -> Message {
    let flags =
        u64::from(req.flags & !(FLAG_ONDISK | FLAG_ONNVRAM | FLAG_ACK)) | u64::from(acktype);

    let mut buf = BytesMut::new();
    buf.put_u32_le(req.identity.name.len() as u32);
    buf.put_slice(&req.identity.name);

    // Packed placement-group id.
    buf.put_u8(1);
    buf.put_u64_le(req.spg.pgid.pool);
    buf.put_u32_le(req.spg.pgid.seed);
    buf.put_i32_le(-1); // preferred

    buf.put_u64_le(flags);
    buf.put_i32_le(result);
    buf.put_slice(&[0u8; EVERSION_SIZE]); // bad replay version
    buf.put_u32_le(epoch);

    buf.put_u32_le(req.ops.len() as u32);
    for op in &req.ops {
        op.encode(&mut buf, op.outdata_len);
    }

    buf.put_u32_le(req.attempts);
    for op in &req.ops {
        buf.put_i32_le(op.rval);
    }

    buf.put_slice(&[0u8; EVERSION_SIZE]); // replay version
    buf.put_u64_le(0); // user version
    buf.put_u8(0); // redirect

    let mut msg = Message::new(msg_type::OSD_OP_REPLY, REPLY_VERSION, req.tid, buf.freeze());
    for op in &mut req.ops {
        if let Some(outdata) = op.outdata.take() {
            msg.add_data(outdata);
        }
    }
    msg
}

/// A decoded op reply, as seen by a client
#[derive(Debug)]
pub struct OpReply {
    /// Transaction id this reply answers
    pub tid: u64,
    /// Object name echoed back
    pub name: Vec<u8>,
    /// Placement group the request was routed to
    pub pgid: PgId,
    /// Reply flags: request flags with the ack type substituted
    pub flags: u64,
    /// Aggregate result of the request
    pub result: i32,
    /// Map epoch at the serving node
    pub epoch: u32,
    /// Delivery attempts echoed back
    pub attempts: u32,
    /// The op array with out-data lengths filled in
    pub ops: Vec<Op>,
    /// Out-data per op, split out of the reply data region
    pub outdata: Vec<Vec<u8>>,
    /// Reserved ordering stamp, zero today
    pub user_version: u64,
}

impl OpReply {
    /// Decode a reply from an `OSD_OP_REPLY` message
    pub fn decode(msg: &Message) -> Result<Self> {
        let mut buf = msg.front.clone();

        let name = get_lpbytes(&mut buf)?;

        let pg_ver = get_u8(&mut buf)?;
        if pg_ver != 1 {
            return Err(Error::corrupted(format!("bad pgid version {pg_ver}")));
        }
        let pool = get_u64(&mut buf)?;
        let seed = get_u32(&mut buf)?;
        let _preferred = get_i32(&mut buf)?;

        let flags = get_u64(&mut buf)?;
        let result = get_i32(&mut buf)?;
        skip(&mut buf, EVERSION_SIZE)?;
        let epoch = get_u32(&mut buf)?;

        let num_ops = get_u32(&mut buf)? as usize;
        if num_ops > MAX_OPS {
            return Err(Error::corrupted(format!("too many ops: {num_ops}")));
        }
        let mut ops = Vec::with_capacity(num_ops);
        for _ in 0..num_ops {
            let (mut op, payload_len) = Op::decode(&mut buf)?;
            op.outdata_len = payload_len;
            ops.push(op);
        }

        let attempts = get_u32(&mut buf)?;
        for op in &mut ops {
            op.rval = get_i32(&mut buf)?;
        }

        skip(&mut buf, EVERSION_SIZE)?;
        let user_version = get_u64(&mut buf)?;
        let redirect = get_u8(&mut buf)?;
        if redirect != 0 {
            return Err(Error::corrupted("unexpected redirect in reply"));
        }

        // Split the data region into per-op out-data runs.
        let data: Vec<u8> = msg.data.iter().flat_map(|b| b.to_vec()).collect();
        let mut outdata = Vec::with_capacity(num_ops);
        let mut at = 0usize;
        for op in &ops {
            let len = op.outdata_len as usize;
            if at + len > data.len() {
                return Err(Error::corrupted("reply data shorter than op out-data"));
            }
            outdata.push(data[at..at + len].to_vec());
            at += len;
        }

        Ok(Self {
            tid: msg.header.tid,
            name,
            pgid: PgId { pool, seed },
            flags,
            result,
            epoch,
            attempts,
            ops,
            outdata,
            user_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{Extent, OpPayload};
    use crate::request::{FLAG_WRITE, REQID_SIZE, TRACE_SIZE};
    use memosd_buf::{BufferRef, PageVec};
    use memosd_common::{ObjectIdentity, Spg, Timestamp};

    fn request_with_ops(ops: Vec<Op>) -> OpRequest {
        OpRequest {
            tid: 5,
            features: 0,
            epoch: 0,
            spg: Spg {
                pgid: PgId { pool: 1, seed: 9 },
                shard: -1,
            },
            flags: FLAG_WRITE | FLAG_ONDISK,
            attempts: 1,
            mtime: Timestamp::ZERO,
            identity: ObjectIdentity::from_name(1, "obj"),
            snap_seq: 0,
            snaps: Vec::new(),
            ops,
        }
    }

    #[test]
    fn test_reply_roundtrip_with_outdata() {
        let mut read_op = Op::new(OpPayload::Read(Extent::new(0, 6)));
        read_op.outdata_len = 6;
        read_op.outdata = Some(BufferRef::Pages(PageVec::from_bytes(b"result").unwrap()));
        let mut stat_op = Op::new(OpPayload::Stat);
        stat_op.rval = -2;

        let mut req = request_with_ops(vec![read_op, stat_op]);
        let msg = encode_reply(&mut req, -2, 33, FLAG_ACK | FLAG_ONDISK);

        assert_eq!(msg.header.msg_type, msg_type::OSD_OP_REPLY);
        assert_eq!(msg.header.version, REPLY_VERSION);
        assert_eq!(msg.header.data_len, 6);
        // Ownership of out-data moved into the message.
        assert!(req.ops[0].outdata.is_none());

        let reply = OpReply::decode(&msg).unwrap();
        assert_eq!(reply.tid, 5);
        assert_eq!(reply.name, b"obj");
        assert_eq!(reply.pgid, PgId { pool: 1, seed: 9 });
        assert_eq!(reply.result, -2);
        assert_eq!(reply.epoch, 33);
        assert_eq!(reply.attempts, 1);
        assert_eq!(reply.user_version, 0);
        assert_eq!(reply.ops.len(), 2);
        assert_eq!(reply.ops[0].rval, 0);
        assert_eq!(reply.ops[1].rval, -2);
        assert_eq!(reply.outdata[0], b"result");
        assert!(reply.outdata[1].is_empty());
    }

    #[test]
    fn test_reply_flags_substitute_acktype() {
        let mut req = request_with_ops(vec![Op::new(OpPayload::Stat)]);
        req.flags = FLAG_WRITE | FLAG_ONNVRAM | FLAG_ACK;
        let msg = encode_reply(&mut req, 0, 1, FLAG_ACK | FLAG_ONDISK);
        let reply = OpReply::decode(&msg).unwrap();

        // Durability bits are replaced by the chosen ack type.
        assert_eq!(
            reply.flags,
            u64::from(FLAG_WRITE | FLAG_ACK | FLAG_ONDISK)
        );
    }

    #[test]
    fn test_fixed_skip_sizes() {
        // The request codec depends on these wire sizes; pin them.
        assert_eq!(REQID_SIZE, 21);
        assert_eq!(TRACE_SIZE, 24);
        assert_eq!(EVERSION_SIZE, 12);
    }
}
