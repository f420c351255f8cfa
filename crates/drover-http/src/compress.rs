//! Request body compression.
//!
//! Response decompression is the HTTP client's job (negotiated through
//! Accept-Encoding); only the request side lives here.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};

use drover_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Deflate,
}

impl Compression {
    /// `Content-Encoding` token.
    pub fn token(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Deflate => "deflate",
        }
    }
}

/// Compress an encoded request body at the given flate2 level (0-9).
pub fn encode(compression: Compression, level: u32, data: &Bytes) -> Result<Bytes> {
    let level = flate2::Compression::new(level.min(9));
    let out = match compression {
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(data).map_err(Error::Io)?;
            encoder.finish().map_err(Error::Io)?
        }
        Compression::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data).map_err(Error::Io)?;
            encoder.finish().map_err(Error::Io)?
        }
    };
    Ok(Bytes::from(out))
}
