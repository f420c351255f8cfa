//! VST chunk framing.
//!
//! A logical message is carved into chunks bounded by a maximum chunk size.
//! Each chunk is a little-endian header followed by a data slice. The packed
//! `chunk_x` field carries both an index and a first-chunk flag: bit 0 set
//! means "first chunk" and the remaining bits hold the total number of
//! chunks in the message; bit 0 clear means the remaining bits hold the
//! zero-based index. A single-chunk message therefore has `chunk_x == 3`.
//!
//! Header sizes: VST 1.0 uses 16 bytes except on the first chunk of a
//! multi-chunk message, where 8 extra bytes carry the total message length.
//! VST 1.1 always uses the 24-byte form.

use bytes::{BufMut, Bytes, BytesMut};
use drover_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Short header: length, chunk_x, message id.
pub const HEADER_SHORT: u32 = 16;
/// Long header: short header plus the total message length.
pub const HEADER_LONG: u32 = 24;

/// Protocol version, fixed per connection by the banner sent at dial time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    V1_0,
    #[default]
    V1_1,
}

impl Version {
    pub fn banner(self) -> &'static [u8] {
        match self {
            Version::V1_0 => b"VST/1.0\r\n\r\n",
            Version::V1_1 => b"VST/1.1\r\n\r\n",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_x: u32,
    pub message_id: u64,
    /// Total length of the message this chunk belongs to. Zero on VST 1.0
    /// chunks that omit the field.
    pub message_length: u64,
    pub data: Bytes,
}

impl Chunk {
    pub fn is_first(&self) -> bool {
        self.chunk_x & 1 == 1
    }

    /// Zero-based position of this chunk within its message.
    pub fn index(&self) -> u32 {
        if self.is_first() {
            0
        } else {
            self.chunk_x >> 1
        }
    }

    /// Total chunk count, known only on the first chunk (0 otherwise).
    pub fn number_of_chunks(&self) -> u32 {
        if self.is_first() {
            self.chunk_x >> 1
        } else {
            0
        }
    }

    /// Whether this chunk's wire header carries the message length.
    fn long_header(&self, version: Version) -> bool {
        match version {
            Version::V1_1 => true,
            Version::V1_0 => self.is_first() && self.number_of_chunks() > 1,
        }
    }

    fn header_size(&self, version: Version) -> u32 {
        if self.long_header(version) {
            HEADER_LONG
        } else {
            HEADER_SHORT
        }
    }

    /// Serialize header + data.
    pub fn to_bytes(&self, version: Version) -> Bytes {
        let header = self.header_size(version);
        let mut buf = BytesMut::with_capacity(header as usize + self.data.len());
        buf.put_u32_le(header + self.data.len() as u32);
        buf.put_u32_le(self.chunk_x);
        buf.put_u64_le(self.message_id);
        if self.long_header(version) {
            buf.put_u64_le(self.message_length);
        }
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }
}

/// Split message parts into chunks of at most `max_chunk_size` bytes on the
/// wire. Chunks never span part boundaries: a new chunk starts at each part.
pub fn build_chunks(message_id: u64, max_chunk_size: u32, parts: &[Bytes]) -> Result<Vec<Chunk>> {
    if max_chunk_size <= HEADER_LONG {
        return Err(Error::invalid_argument(format!(
            "max chunk size {max_chunk_size} leaves no room for data (header is {HEADER_LONG})"
        )));
    }
    let max_data = (max_chunk_size - HEADER_LONG) as usize;
    let message_length: u64 = parts.iter().map(|p| p.len() as u64).sum();

    let mut chunks = Vec::new();
    for part in parts {
        let mut offset = 0;
        while offset < part.len() {
            let end = (offset + max_data).min(part.len());
            chunks.push(Chunk {
                chunk_x: (chunks.len() as u32) << 1,
                message_id,
                message_length,
                data: part.slice(offset..end),
            });
            offset = end;
        }
    }
    if chunks.is_empty() {
        return Err(Error::invalid_argument("message has no data to send"));
    }

    // Patch the first chunk: single-chunk messages are marked 3, multi-chunk
    // first chunks carry the total count.
    let n = chunks.len() as u32;
    chunks[0].chunk_x = if n == 1 { 3 } else { (n << 1) | 1 };
    Ok(chunks)
}

/// Read one chunk off the wire. Short reads surface as I/O errors.
pub async fn read_chunk<R>(reader: &mut R, version: Version) -> Result<Chunk>
where
    R: AsyncRead + Unpin,
{
    let mut short = [0u8; HEADER_SHORT as usize];
    reader.read_exact(&mut short).await?;
    let length = u32::from_le_bytes(short[0..4].try_into().unwrap());
    let chunk_x = u32::from_le_bytes(short[4..8].try_into().unwrap());
    let message_id = u64::from_le_bytes(short[8..16].try_into().unwrap());

    let is_first = chunk_x & 1 == 1;
    let long = match version {
        Version::V1_1 => true,
        Version::V1_0 => is_first && (chunk_x >> 1) > 1,
    };

    let mut header = HEADER_SHORT;
    let mut message_length = 0;
    if long {
        let mut rest = [0u8; 8];
        reader.read_exact(&mut rest).await?;
        message_length = u64::from_le_bytes(rest);
        header = HEADER_LONG;
    }

    if length < header {
        return Err(Error::codec(format!(
            "chunk length {length} smaller than its {header}-byte header"
        )));
    }
    let mut data = vec![0u8; (length - header) as usize];
    reader.read_exact(&mut data).await?;

    Ok(Chunk {
        chunk_x,
        message_id,
        message_length,
        data: Bytes::from(data),
    })
}
