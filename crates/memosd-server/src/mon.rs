//! Monitor client
//!
//! The capability the server lifecycle consumes, and its concrete
//! implementation speaking the framed protocol to a monitor. Tests
//! substitute scripted implementations of the trait.

use async_trait::async_trait;
use bytes::Bytes;
use memosd_common::{Error, Result};
use memosd_wire::mon::{MonAck, MonBoot, MonCrushAdd, MonGetMap, MonMarkDown};
use memosd_wire::{ClusterMap, Message, msg_type, read_message, write_message};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};
use uuid::Uuid;

/// Monitor operations the server lifecycle needs
#[async_trait(?Send)]
pub trait MonitorClient {
    /// Register this OSD in the placement hierarchy
    async fn add_to_crush(&mut self, osd: i32, weight: &str) -> Result<()>;
    /// Announce this OSD as up and serving at `addr`
    async fn boot(&mut self, osd: i32, fsid: Uuid, addr: &str) -> Result<()>;
    /// Ask the monitors to mark this OSD down
    async fn mark_me_down(&mut self, osd: i32) -> Result<()>;
    /// Fetch the latest cluster map, waiting at most `timeout`
    async fn wait_for_latest_map(&mut self, have_epoch: u32, timeout: Duration)
    -> Result<ClusterMap>;
}

/// Monitor client over one TCP session
pub struct MonClient {
    stream: TcpStream,
    next_tid: u64,
}

impl MonClient {
    /// Open a session to the first reachable monitor
    pub async fn connect(addrs: &[SocketAddr]) -> Result<Self> {
        let mut last_err: Option<std::io::Error> = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!(%addr, "monitor session opened");
                    return Ok(Self {
                        stream,
                        next_tid: 1,
                    });
                }
                Err(e) => {
                    warn!(%addr, error = %e, "monitor unreachable");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e.into()),
            None => Err(Error::invalid_argument("no monitor addresses")),
        }
    }

    async fn request(&mut self, msg_type: u16, front: Bytes) -> Result<Message> {
        let tid = self.next_tid;
        self.next_tid += 1;
        let mut msg = Message::new(msg_type, 1, tid, front);
        write_message(&mut self.stream, &mut msg).await?;
        match read_message(&mut self.stream).await? {
            Some(reply) => Ok(reply),
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "monitor closed the session",
            ))),
        }
    }

    async fn request_ack(&mut self, kind: u16, front: Bytes) -> Result<()> {
        let reply = self.request(kind, front).await?;
        if reply.header.msg_type != msg_type::MON_ACK {
            return Err(Error::corrupted(format!(
                "expected mon ack, got {}",
                msg_type::name(reply.header.msg_type)
            )));
        }
        let mut buf = reply.front.clone();
        let ack = MonAck::decode(&mut buf)?;
        if ack.result != 0 {
            return Err(Error::Remote(ack.result));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl MonitorClient for MonClient {
    async fn add_to_crush(&mut self, osd: i32, weight: &str) -> Result<()> {
        let payload = MonCrushAdd {
            osd,
            weight: weight.to_string(),
        };
        self.request_ack(msg_type::MON_CRUSH_ADD, payload.encode())
            .await
    }

    async fn boot(&mut self, osd: i32, fsid: Uuid, addr: &str) -> Result<()> {
        let payload = MonBoot {
            osd,
            fsid,
            addr: addr.to_string(),
        };
        self.request_ack(msg_type::MON_BOOT, payload.encode()).await
    }

    async fn mark_me_down(&mut self, osd: i32) -> Result<()> {
        self.request_ack(msg_type::MON_MARK_DOWN, MonMarkDown { osd }.encode())
            .await
    }

    async fn wait_for_latest_map(
        &mut self,
        have_epoch: u32,
        timeout: Duration,
    ) -> Result<ClusterMap> {
        let fut = self.request(msg_type::MON_GET_MAP, MonGetMap { have_epoch }.encode());
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(reply)) => {
                if reply.header.msg_type != msg_type::OSD_MAP {
                    return Err(Error::corrupted(format!(
                        "expected map, got {}",
                        msg_type::name(reply.header.msg_type)
                    )));
                }
                let mut buf = reply.front.clone();
                ClusterMap::decode(&mut buf)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout),
        }
    }
}
