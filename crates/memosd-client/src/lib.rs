//! MemOSD client
//!
//! A thin typed client over the shared wire crate: builds composite op
//! requests, sends them over one framed connection, and parses replies.
//! Convenience wrappers cover the single-op write/read/stat cases; `exec`
//! takes an arbitrary op list for composite requests.

use memosd_buf::{BufferRef, PageVec};
use memosd_common::{Error, ObjectIdentity, PgId, Result, Spg, Timestamp};
use memosd_wire::op::Extent;
use memosd_wire::reply::OpReply;
use memosd_wire::request::{FLAG_ONDISK, FLAG_READ, FLAG_WRITE, OpRequest};
use memosd_wire::{Message, Op, OpPayload, msg_type, read_message, write_message};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Map a non-zero reply result onto an error
fn rval_error(rval: i32) -> Error {
    match rval {
        -2 => Error::NotFound,
        other => Error::Remote(other),
    }
}

/// A connection to one OSD, bound to a pool
pub struct OsdClient {
    stream: TcpStream,
    pool: u64,
    next_tid: u64,
}

impl OsdClient {
    /// Connect to an OSD and address objects within `pool`
    pub async fn connect(addr: SocketAddr, pool: u64) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        debug!(%addr, pool, "osd session opened");
        Ok(Self {
            stream,
            pool,
            next_tid: 1,
        })
    }

    /// Send a composite request against `name` and return the decoded
    /// reply. `data` becomes the request's data region, consumed by the
    /// ops in order.
    pub async fn exec(
        &mut self,
        name: &[u8],
        ops: Vec<Op>,
        data: Option<&[u8]>,
        flags: u32,
        mtime: Timestamp,
    ) -> Result<OpReply> {
        let tid = self.next_tid;
        self.next_tid += 1;

        let identity = ObjectIdentity::from_name(self.pool as i64, name);
        let seed = identity.hash;
        let req = OpRequest {
            tid,
            features: 0,
            epoch: 0,
            spg: Spg {
                pgid: PgId {
                    pool: self.pool,
                    seed,
                },
                shard: -1,
            },
            flags,
            attempts: 0,
            mtime,
            identity,
            snap_seq: 0,
            snaps: Vec::new(),
            ops,
        };

        let mut msg = req.encode();
        if let Some(bytes) = data {
            msg.add_data(BufferRef::Pages(PageVec::from_bytes(bytes)?));
        }
        trace!(tid, ops = req.ops.len(), data_len = msg.header.data_len, "sending request");
        write_message(&mut self.stream, &mut msg).await?;

        let reply = match read_message(&mut self.stream).await? {
            Some(reply) => reply,
            None => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "osd closed the session",
                )));
            }
        };
        if reply.header.msg_type != msg_type::OSD_OP_REPLY {
            return Err(Error::corrupted(format!(
                "expected op reply, got {}",
                msg_type::name(reply.header.msg_type)
            )));
        }
        let reply = OpReply::decode(&reply)?;
        if reply.tid != tid {
            return Err(Error::corrupted(format!(
                "reply tid {} does not match request tid {tid}",
                reply.tid
            )));
        }
        Ok(reply)
    }

    /// Write `data` into `name` at `offset`
    pub async fn write(&mut self, name: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        let mut op = Op::new(OpPayload::Write(Extent::new(offset, data.len() as u64)));
        op.indata_len = data.len() as u32;

        let reply = self
            .exec(
                name,
                vec![op],
                Some(data),
                FLAG_WRITE | FLAG_ONDISK,
                Timestamp::now(),
            )
            .await?;
        if reply.result != 0 {
            return Err(rval_error(reply.result));
        }
        Ok(())
    }

    /// Read up to `length` bytes from `name` at `offset`
    pub async fn read(&mut self, name: &[u8], offset: u64, length: u64) -> Result<Vec<u8>> {
        let op = Op::new(OpPayload::Read(Extent::new(offset, length)));
        let mut reply = self
            .exec(name, vec![op], None, FLAG_READ, Timestamp::ZERO)
            .await?;
        if reply.result != 0 {
            return Err(rval_error(reply.result));
        }
        Ok(reply.outdata.remove(0))
    }

    /// Fetch object size and mtime
    pub async fn stat(&mut self, name: &[u8]) -> Result<(u64, Timestamp)> {
        let op = Op::new(OpPayload::Stat);
        let reply = self
            .exec(name, vec![op], None, FLAG_READ, Timestamp::ZERO)
            .await?;
        if reply.result != 0 {
            return Err(rval_error(reply.result));
        }
        let out = &reply.outdata[0];
        if out.len() != 16 {
            return Err(Error::corrupted(format!(
                "stat payload has {} bytes, expected 16",
                out.len()
            )));
        }
        let size = u64::from_le_bytes(out[0..8].try_into().unwrap());
        let secs = u32::from_le_bytes(out[8..12].try_into().unwrap());
        let nsecs = u32::from_le_bytes(out[12..16].try_into().unwrap());
        Ok((size, Timestamp::new(secs, nsecs)))
    }
}

/// Build one raw `OSD_OP` message outside the client, for peers that
/// drive the protocol directly
#[must_use]
pub fn build_request(req: &OpRequest, data: Option<PageVec>) -> Message {
    let mut msg = req.encode();
    if let Some(pages) = data {
        msg.add_data(BufferRef::Pages(pages));
    }
    msg
}
