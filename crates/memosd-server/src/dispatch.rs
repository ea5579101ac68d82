//! Per-request op dispatch
//!
//! Ops of one request execute in order against the store, sharing a
//! single cursor over the request's data region: each data-consuming op
//! advances it past the bytes it claimed, while reads and stats never
//! touch it. A failing op short-circuits the rest unless it carries
//! FAILOK, in which case its error is recorded in the op's rval and
//! swallowed; transient errors are never swallowed. Ops after a
//! short-circuit keep rval zero without executing.

use memosd_buf::{BufferCursor, BufferRef, CursorBuf, Direction};
use memosd_common::{Error, ObjectIdentity, Result, Timestamp};
use memosd_store::ObjectStore;
use memosd_wire::reply::encode_reply;
use memosd_wire::request::{FLAG_ACK, FLAG_ONDISK, OpRequest};
use memosd_wire::{Message, OP_FLAG_FAILOK, Op, OpPayload, opcode};
use tracing::debug;

/// Object-class execution capability backing the CALL op. Out-data it
/// produces travels in the reply like any other op out-data.
pub trait ClassLoader {
    /// Invoke `method` of `class` with `indata`, returning its out-data
    fn call(&mut self, class: &[u8], method: &[u8], indata: &[u8]) -> Result<BufferRef>;
}

fn execute_op(
    store: &mut ObjectStore,
    loader: &mut Option<&mut dyn ClassLoader>,
    identity: &ObjectIdentity,
    mtime: Timestamp,
    op: &mut Op,
    cursor: &mut BufferCursor<'_>,
) -> Result<()> {
    match &op.payload {
        OpPayload::Write(extent) => {
            store.write(identity, extent.offset, extent.length, mtime, cursor)
        }
        OpPayload::Read(extent) => {
            let buf = store.read(identity, extent.offset, extent.length)?;
            if !buf.is_empty() {
                op.outdata_len = buf.len() as u32;
                op.outdata = Some(buf);
            }
            Ok(())
        }
        OpPayload::Stat => {
            let buf = store.stat(identity)?;
            op.outdata_len = buf.len() as u32;
            op.outdata = Some(buf);
            Ok(())
        }
        OpPayload::Call(call) => {
            let Some(loader) = loader else {
                return Err(Error::UnsupportedOp {
                    opcode: opcode::CALL,
                });
            };
            let mut class = vec![0u8; call.class_len as usize];
            let mut method = vec![0u8; call.method_len as usize];
            let mut indata = vec![0u8; call.indata_len as usize];
            for dst in [&mut class, &mut method, &mut indata] {
                if cursor.copy_from(dst) < dst.len() {
                    return Err(Error::BadAddress);
                }
            }
            let out = loader.call(&class, &method, &indata)?;
            if !out.is_empty() {
                op.outdata_len = out.len() as u32;
                op.outdata = Some(out);
            }
            Ok(())
        }
        other => Err(Error::UnsupportedOp {
            opcode: other.opcode(),
        }),
    }
}

/// Execute every op of `req` and build the reply message. `data` is the
/// request's inbound data region; `epoch` stamps the reply.
pub fn execute_request(
    store: &mut ObjectStore,
    mut loader: Option<&mut dyn ClassLoader>,
    req: &mut OpRequest,
    data: &mut [BufferRef],
    epoch: u32,
) -> Message {
    let total: u64 = data.iter().map(BufferRef::len).sum();
    let mut cursor = match data.first_mut() {
        Some(BufferRef::Pages(pages)) => {
            BufferCursor::new(CursorBuf::Pages(pages), total, Direction::Write)
        }
        _ => BufferCursor::new(CursorBuf::Discard, 0, Direction::Write),
    };

    let mut overall = 0i32;
    for op in req.ops.iter_mut() {
        match execute_op(
            store,
            &mut loader,
            &req.identity,
            req.mtime,
            op,
            &mut cursor,
        ) {
            Ok(()) => op.rval = 0,
            Err(e) => {
                op.rval = e.wire_code();
                debug!(
                    op = opcode::name(op.payload.opcode()),
                    object = %req.identity,
                    rval = op.rval,
                    "op failed: {e}"
                );
                if op.flags & OP_FLAG_FAILOK != 0 && !e.is_transient() {
                    // Swallowed; the remaining ops keep going.
                } else {
                    overall = op.rval;
                    break;
                }
            }
        }
    }

    encode_reply(req, overall, epoch, FLAG_ACK | FLAG_ONDISK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memosd_buf::PageVec;
    use memosd_common::{PgId, Spg};
    use memosd_wire::op::Extent;
    use memosd_wire::reply::OpReply;
    use memosd_wire::request::FLAG_WRITE;

    fn request(name: &str, ops: Vec<Op>) -> OpRequest {
        OpRequest {
            tid: 1,
            features: 0,
            epoch: 0,
            spg: Spg {
                pgid: PgId { pool: 1, seed: 0 },
                shard: -1,
            },
            flags: FLAG_WRITE | FLAG_ONDISK,
            attempts: 0,
            mtime: Timestamp::new(10, 0),
            identity: ObjectIdentity::from_name(1, name),
            snap_seq: 0,
            snaps: Vec::new(),
            ops,
        }
    }

    fn data_of(bytes: &[u8]) -> Vec<BufferRef> {
        if bytes.is_empty() {
            Vec::new()
        } else {
            vec![BufferRef::Pages(PageVec::from_bytes(bytes).unwrap())]
        }
    }

    #[test]
    fn test_write_then_read_same_request() {
        let mut store = ObjectStore::new(false);
        let mut write = Op::new(OpPayload::Write(Extent::new(0, 5)));
        write.indata_len = 5;
        let read = Op::new(OpPayload::Read(Extent::new(0, 5)));
        let mut req = request("obj", vec![write, read]);
        let mut data = data_of(b"hello");

        let reply = execute_request(&mut store, None, &mut req, &mut data, 12);
        let reply = OpReply::decode(&reply).unwrap();

        assert_eq!(reply.result, 0);
        assert_eq!(reply.epoch, 12);
        assert_eq!(reply.ops[0].rval, 0);
        assert_eq!(reply.ops[1].rval, 0);
        assert_eq!(reply.outdata[1], b"hello");
    }

    #[test]
    fn test_failok_swallows_error() {
        let mut store = ObjectStore::new(false);

        let missing = Op::with_flags(
            OpPayload::Read(Extent::new(0, 10)),
            OP_FLAG_FAILOK,
        );
        let mut write = Op::new(OpPayload::Write(Extent::new(0, 2)));
        write.indata_len = 2;
        let mut req = request("obj-x", vec![missing, write]);
        let mut data = data_of(b"hi");

        let reply = execute_request(&mut store, None, &mut req, &mut data, 1);
        let reply = OpReply::decode(&reply).unwrap();

        // The failed read reports its rval but the request succeeds and
        // the write landed.
        assert_eq!(reply.ops[0].rval, -2);
        assert_eq!(reply.ops[1].rval, 0);
        assert_eq!(reply.result, 0);
        assert_eq!(
            store
                .read(&ObjectIdentity::from_name(1, "obj-x"), 0, 2)
                .unwrap()
                .to_vec(),
            b"hi"
        );
    }

    #[test]
    fn test_failure_short_circuits_without_failok() {
        let mut store = ObjectStore::new(false);

        let missing = Op::new(OpPayload::Read(Extent::new(0, 10)));
        let mut write = Op::new(OpPayload::Write(Extent::new(0, 2)));
        write.indata_len = 2;
        let mut req = request("obj-y", vec![missing, write]);
        let mut data = data_of(b"hi");

        let reply = execute_request(&mut store, None, &mut req, &mut data, 1);
        let reply = OpReply::decode(&reply).unwrap();

        assert_eq!(reply.result, -2);
        assert_eq!(reply.ops[0].rval, -2);
        // The write never executed; its rval stays zero.
        assert_eq!(reply.ops[1].rval, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_unsupported_op_rval() {
        let mut store = ObjectStore::new(false);
        let mut req = request("obj", vec![Op::new(OpPayload::Create)]);
        let mut data = Vec::new();

        let reply = execute_request(&mut store, None, &mut req, &mut data, 1);
        let reply = OpReply::decode(&reply).unwrap();

        assert_eq!(reply.result, -95);
        assert_eq!(reply.ops[0].rval, -95);
    }

    #[test]
    fn test_read_past_eof_has_no_outdata() {
        let mut store = ObjectStore::new(false);

        let mut write = Op::new(OpPayload::Write(Extent::new(0, 10)));
        write.indata_len = 10;
        let read = Op::new(OpPayload::Read(Extent::new(20, 50)));
        let mut req = request("obj", vec![write, read]);
        let mut data = data_of(&[b'X'; 10]);

        let reply = execute_request(&mut store, None, &mut req, &mut data, 1);
        let reply = OpReply::decode(&reply).unwrap();

        assert_eq!(reply.result, 0);
        assert_eq!(reply.ops[1].outdata_len, 0);
        assert!(reply.outdata[1].is_empty());
    }

    #[test]
    fn test_reply_carries_ack_and_ondisk() {
        let mut store = ObjectStore::new(false);
        let mut req = request("obj", vec![Op::new(OpPayload::Stat)]);
        req.flags = FLAG_WRITE;
        let mut data = Vec::new();

        let reply = execute_request(&mut store, None, &mut req, &mut data, 1);
        let reply = OpReply::decode(&reply).unwrap();

        assert_ne!(reply.flags & u64::from(FLAG_ACK), 0);
        assert_ne!(reply.flags & u64::from(FLAG_ONDISK), 0);
    }

    struct EchoLoader;

    impl ClassLoader for EchoLoader {
        fn call(&mut self, class: &[u8], method: &[u8], indata: &[u8]) -> Result<BufferRef> {
            let mut out = Vec::new();
            out.extend_from_slice(class);
            out.push(b'.');
            out.extend_from_slice(method);
            out.push(b':');
            out.extend_from_slice(indata);
            Ok(BufferRef::Pages(PageVec::from_bytes(&out).unwrap()))
        }
    }

    #[test]
    fn test_call_without_loader_is_unsupported() {
        let mut store = ObjectStore::new(false);
        let mut call = Op::new(OpPayload::Call(memosd_wire::ClassCall {
            class_len: 3,
            method_len: 4,
            indata_len: 2,
        }));
        call.indata_len = 9;
        let mut req = request("obj", vec![call]);
        let mut data = data_of(b"clsnameXY");

        let reply = execute_request(&mut store, None, &mut req, &mut data, 1);
        let reply = OpReply::decode(&reply).unwrap();
        assert_eq!(reply.result, -95);
    }

    #[test]
    fn test_call_through_loader() {
        let mut store = ObjectStore::new(false);
        let mut loader = EchoLoader;

        let mut call = Op::new(OpPayload::Call(memosd_wire::ClassCall {
            class_len: 3,
            method_len: 4,
            indata_len: 2,
        }));
        call.indata_len = 9;
        let mut req = request("obj", vec![call]);
        let mut data = data_of(b"clsnameXY");

        let reply = execute_request(&mut store, Some(&mut loader), &mut req, &mut data, 1);
        let reply = OpReply::decode(&reply).unwrap();

        assert_eq!(reply.result, 0);
        assert_eq!(reply.outdata[0], b"cls.name:XY");
    }
}
