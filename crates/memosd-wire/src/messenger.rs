//! Framed message I/O
//!
//! Reads and writes [`Message`] frames on any async byte stream. The
//! receive path lands the data region in a single page-vector allocation
//! sized to the header's data length and fills it chunk by chunk through
//! a cursor; the send path walks out-data buffers the same way. Bulk
//! bytes never pass through an intermediate buffer.
//!
//! Both payload regions are protected by CRC32C; a mismatch or a
//! length-limit violation is `Corrupted` and tears the framing down (the
//! byte stream cannot be resynchronised).

use crate::message::{HEADER_SIZE, MAX_DATA_LEN, MAX_FRONT_LEN, Message, MessageHeader};
use memosd_buf::{BufferCursor, BufferRef, CursorBuf, Direction, PageVec};
use memosd_common::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one message. Returns `None` on a clean end-of-stream at a frame
/// boundary.
pub async fn read_message<S>(stream: &mut S) -> Result<Option<Message>>
where
    S: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_SIZE];
    match stream.read_exact(&mut raw).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = MessageHeader::decode(&raw)?;

    if header.front_len > MAX_FRONT_LEN {
        return Err(Error::corrupted(format!(
            "front length {} exceeds limit",
            header.front_len
        )));
    }
    if header.data_len > MAX_DATA_LEN {
        return Err(Error::corrupted(format!(
            "data length {} exceeds limit",
            header.data_len
        )));
    }

    let mut front = vec![0u8; header.front_len as usize];
    stream.read_exact(&mut front).await?;
    if crc32c::crc32c(&front) != header.front_crc {
        return Err(Error::corrupted("front crc mismatch"));
    }

    let mut data = Vec::new();
    if header.data_len > 0 {
        let mut pages = PageVec::alloc_contiguous(u64::from(header.data_len))?;
        let mut crc = 0u32;
        {
            let mut cursor = BufferCursor::new(
                CursorBuf::Pages(&mut pages),
                u64::from(header.data_len),
                Direction::Write,
            );
            while cursor.remaining() > 0 {
                let n = {
                    let Some(chunk) = cursor.chunk_mut() else {
                        break;
                    };
                    stream.read_exact(chunk).await?;
                    crc = crc32c::crc32c_append(crc, chunk);
                    chunk.len()
                };
                cursor.advance(n as u64);
            }
        }
        if crc != header.data_crc {
            return Err(Error::corrupted("data crc mismatch"));
        }
        data.push(BufferRef::Pages(pages));
    }

    Ok(Some(Message {
        header,
        front: front.into(),
        data,
    }))
}

/// CRC32C over every data buffer of a message
fn data_crc(data: &mut [BufferRef]) -> Result<u32> {
    let mut crc = 0u32;
    for buf in data.iter_mut() {
        if let BufferRef::Pages(pages) = buf {
            let len = pages.len();
            let mut cursor = BufferCursor::new(CursorBuf::Pages(pages), len, Direction::Read);
            cursor.for_each_chunk(len, |chunk| {
                crc = crc32c::crc32c_append(crc, chunk);
                Ok(())
            })?;
        }
    }
    Ok(crc)
}

/// Write one message, filling in lengths and CRCs
pub async fn write_message<S>(stream: &mut S, msg: &mut Message) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    msg.header.front_len = msg.front.len() as u32;
    msg.header.data_len = msg.data_len() as u32;
    msg.header.front_crc = crc32c::crc32c(&msg.front);
    msg.header.data_crc = data_crc(&mut msg.data)?;

    stream.write_all(&msg.header.encode()).await?;
    stream.write_all(&msg.front).await?;

    for buf in &mut msg.data {
        if let BufferRef::Pages(pages) = buf {
            let len = pages.len();
            let mut cursor = BufferCursor::new(CursorBuf::Pages(pages), len, Direction::Read);
            loop {
                let n = {
                    let Some(chunk) = cursor.chunk() else {
                        break;
                    };
                    stream.write_all(chunk).await?;
                    chunk.len()
                };
                cursor.advance(n as u64);
            }
        }
    }

    stream.flush().await?;
    Ok(())
}
