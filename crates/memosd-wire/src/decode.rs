//! Bounds-checked decode primitives and versioned struct wrappers
//!
//! Raw pointer walks are replaced by checked reads: every primitive
//! verifies the remaining length first and fails with `Truncated` on a
//! short buffer. Versioned structs (`start_decoding` / `encode_struct`)
//! carry `{version, compat, len}` front-matter; a decoder that reads past
//! the declared length reports `Corrupted`, one that reads less skips
//! forward to stay compatible with newer encoders.

use bytes::{Buf, BufMut, BytesMut};
use memosd_common::{Error, Result};

/// Require `n` readable bytes
pub fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(Error::Truncated {
            need: n,
            have: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

pub fn get_u8(buf: &mut impl Buf) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_i8(buf: &mut impl Buf) -> Result<i8> {
    need(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn get_u16(buf: &mut impl Buf) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16_le())
}

pub fn get_u32(buf: &mut impl Buf) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub fn get_i32(buf: &mut impl Buf) -> Result<i32> {
    need(buf, 4)?;
    Ok(buf.get_i32_le())
}

pub fn get_u64(buf: &mut impl Buf) -> Result<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

pub fn get_i64(buf: &mut impl Buf) -> Result<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64_le())
}

/// Read `n` raw bytes
pub fn get_bytes(buf: &mut impl Buf, n: usize) -> Result<Vec<u8>> {
    need(buf, n)?;
    let mut out = vec![0u8; n];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Skip `n` bytes
pub fn skip(buf: &mut impl Buf, n: usize) -> Result<()> {
    need(buf, n)?;
    buf.advance(n);
    Ok(())
}

/// Read a u32-length-prefixed byte string
pub fn get_lpbytes(buf: &mut impl Buf) -> Result<Vec<u8>> {
    let n = get_u32(buf)? as usize;
    get_bytes(buf, n)
}

/// Write a u32-length-prefixed byte string
pub fn put_lpbytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

/// Bounds of a versioned struct being decoded. Obtained from
/// [`start_decoding`]; the caller decodes the fields it knows, then calls
/// [`finish`](StructBounds::finish) to enforce the declared length.
#[derive(Debug)]
pub struct StructBounds {
    /// Version byte the encoder wrote
    pub version: u8,
    end_remaining: usize,
    label: &'static str,
}

/// Decode `{version u8, compat u8, len u32}` struct front-matter,
/// requiring `version >= min_version` and `len` bytes of payload.
pub fn start_decoding(
    buf: &mut impl Buf,
    min_version: u8,
    label: &'static str,
) -> Result<StructBounds> {
    let version = get_u8(buf)?;
    let _compat = get_u8(buf)?;
    let len = get_u32(buf)? as usize;
    if version < min_version {
        return Err(Error::UnsupportedVersion {
            need: min_version,
            got: version,
        });
    }
    need(buf, len)?;
    Ok(StructBounds {
        version,
        end_remaining: buf.remaining() - len,
        label,
    })
}

impl StructBounds {
    /// Enforce the declared struct length: reading past it is corruption,
    /// reading less skips the unknown tail.
    pub fn finish(self, buf: &mut impl Buf) -> Result<()> {
        let rem = buf.remaining();
        if rem < self.end_remaining {
            return Err(Error::corrupted(format!(
                "{}: decoded past declared struct length",
                self.label
            )));
        }
        buf.advance(rem - self.end_remaining);
        Ok(())
    }
}

/// Encode a versioned struct: front-matter, then the body written by `f`,
/// with the length patched in afterwards.
pub fn encode_struct(buf: &mut BytesMut, version: u8, compat: u8, f: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(version);
    buf.put_u8(compat);
    let len_at = buf.len();
    buf.put_u32_le(0);
    let body_at = buf.len();
    f(buf);
    let len = (buf.len() - body_at) as u32;
    buf[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_short_buffer_is_truncated() {
        let mut buf = Bytes::from_static(&[1, 2]);
        assert!(matches!(
            get_u32(&mut buf),
            Err(Error::Truncated { need: 4, have: 2 })
        ));
    }

    #[test]
    fn test_struct_roundtrip() {
        let mut out = BytesMut::new();
        encode_struct(&mut out, 3, 1, |b| {
            b.put_u64_le(0xdead_beef);
            b.put_u32_le(7);
        });

        let mut buf = out.freeze();
        let bounds = start_decoding(&mut buf, 1, "test").unwrap();
        assert_eq!(bounds.version, 3);
        assert_eq!(get_u64(&mut buf).unwrap(), 0xdead_beef);
        assert_eq!(get_u32(&mut buf).unwrap(), 7);
        bounds.finish(&mut buf).unwrap();
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_struct_skips_unknown_tail() {
        // Encoder wrote two fields; this decoder only knows the first.
        let mut out = BytesMut::new();
        encode_struct(&mut out, 2, 1, |b| {
            b.put_u32_le(11);
            b.put_u64_le(99); // newer field
        });
        out.put_u16_le(0x5a5a); // field after the struct

        let mut buf = out.freeze();
        let bounds = start_decoding(&mut buf, 1, "test").unwrap();
        assert_eq!(get_u32(&mut buf).unwrap(), 11);
        bounds.finish(&mut buf).unwrap();
        assert_eq!(get_u16(&mut buf).unwrap(), 0x5a5a);
    }

    #[test]
    fn test_struct_overread_is_corrupted() {
        let mut out = BytesMut::new();
        encode_struct(&mut out, 1, 1, |b| b.put_u32_le(1));
        out.put_u32_le(2); // belongs to the enclosing message

        let mut buf = out.freeze();
        let bounds = start_decoding(&mut buf, 1, "test").unwrap();
        // Read more than the struct declared.
        get_u32(&mut buf).unwrap();
        get_u32(&mut buf).unwrap();
        assert!(matches!(bounds.finish(&mut buf), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_version_gate() {
        let mut out = BytesMut::new();
        encode_struct(&mut out, 1, 1, |_| {});
        let mut buf = out.freeze();
        assert!(matches!(
            start_decoding(&mut buf, 2, "test"),
            Err(Error::UnsupportedVersion { need: 2, got: 1 })
        ));
    }

    #[test]
    fn test_declared_length_must_be_present() {
        let mut out = BytesMut::new();
        out.put_u8(1);
        out.put_u8(1);
        out.put_u32_le(100); // declares 100 payload bytes, none follow
        let mut buf = out.freeze();
        assert!(matches!(
            start_decoding(&mut buf, 1, "test"),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_lpbytes_roundtrip() {
        let mut out = BytesMut::new();
        put_lpbytes(&mut out, b"object-name");
        let mut buf = out.freeze();
        assert_eq!(get_lpbytes(&mut buf).unwrap(), b"object-name");
    }
}
