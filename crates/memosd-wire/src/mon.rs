//! Monitor message payloads
//!
//! The monitor conversation is small: an OSD announces itself into the
//! placement hierarchy, boots, asks for maps, and finally asks to be
//! marked down. Each payload is a versioned struct so monitors can grow
//! fields without breaking older OSDs.

use crate::decode::{
    encode_struct, get_bytes, get_i32, get_lpbytes, get_u32, put_lpbytes, start_decoding,
};
use bytes::{BufMut, Bytes, BytesMut};
use memosd_common::{Error, Result};
use uuid::Uuid;

/// Boot announcement: this OSD is up and serving at `addr`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonBoot {
    pub osd: i32,
    pub fsid: Uuid,
    pub addr: String,
}

impl MonBoot {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_struct(&mut buf, 1, 1, |b| {
            b.put_i32_le(self.osd);
            b.put_slice(self.fsid.as_bytes());
            put_lpbytes(b, self.addr.as_bytes());
        });
        buf.freeze()
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let bounds = start_decoding(buf, 1, "mon_boot")?;
        let osd = get_i32(buf)?;
        let fsid_bytes = get_bytes(buf, 16)?;
        let addr = get_lpbytes(buf)?;
        bounds.finish(buf)?;
        let fsid = Uuid::from_slice(&fsid_bytes)
            .map_err(|_| Error::corrupted("bad fsid in boot message"))?;
        let addr = String::from_utf8(addr)
            .map_err(|_| Error::corrupted("non-utf8 address in boot message"))?;
        Ok(Self { osd, fsid, addr })
    }
}

/// Placement registration: weight for this OSD in the hierarchy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonCrushAdd {
    pub osd: i32,
    pub weight: String,
}

impl MonCrushAdd {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_struct(&mut buf, 1, 1, |b| {
            b.put_i32_le(self.osd);
            put_lpbytes(b, self.weight.as_bytes());
        });
        buf.freeze()
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let bounds = start_decoding(buf, 1, "mon_crush_add")?;
        let osd = get_i32(buf)?;
        let weight = get_lpbytes(buf)?;
        bounds.finish(buf)?;
        let weight = String::from_utf8(weight)
            .map_err(|_| Error::corrupted("non-utf8 weight in crush-add message"))?;
        Ok(Self { osd, weight })
    }
}

/// Request to mark this OSD down in the next map
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonMarkDown {
    pub osd: i32,
}

impl MonMarkDown {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_struct(&mut buf, 1, 1, |b| b.put_i32_le(self.osd));
        buf.freeze()
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let bounds = start_decoding(buf, 1, "mon_mark_down")?;
        let osd = get_i32(buf)?;
        bounds.finish(buf)?;
        Ok(Self { osd })
    }
}

/// Request for the monitor's latest map, stating the epoch already held
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonGetMap {
    pub have_epoch: u32,
}

impl MonGetMap {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_struct(&mut buf, 1, 1, |b| b.put_u32_le(self.have_epoch));
        buf.freeze()
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let bounds = start_decoding(buf, 1, "mon_get_map")?;
        let have_epoch = get_u32(buf)?;
        bounds.finish(buf)?;
        Ok(Self { have_epoch })
    }
}

/// Generic acknowledgement; zero means success
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonAck {
    pub result: i32,
}

impl MonAck {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_struct(&mut buf, 1, 1, |b| b.put_i32_le(self.result));
        buf.freeze()
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let bounds = start_decoding(buf, 1, "mon_ack")?;
        let result = get_i32(buf)?;
        bounds.finish(buf)?;
        Ok(Self { result })
    }
}
