//! Body codecs and content-type driven selection.
//!
//! A connection is configured with a default [`ContentType`]; responses pick
//! their codec from the `Content-Type` header first (first token before `;`)
//! and fall back to the connection default. Unknown types decode as JSON.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::request::Body;
use crate::vpack;

/// Wire encodings a connection can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Json,
    VelocyPack,
}

impl ContentType {
    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::VelocyPack => "application/x-velocypack",
        }
    }

    pub fn codec(self) -> Codec {
        match self {
            ContentType::Json => Codec::Json,
            ContentType::VelocyPack => Codec::VelocyPack,
        }
    }
}

/// Codec for one concrete body encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Json,
    VelocyPack,
    /// text/plain, application/octet-stream, application/zip. Bodies are
    /// surfaced as raw bytes only.
    Raw,
}

/// Pick a codec from a `Content-Type` header value.
pub fn for_content_type(header: &str, fallback: ContentType) -> Codec {
    let token = header.split(';').next().unwrap_or("").trim();
    match token {
        "" => fallback.codec(),
        "application/json" => Codec::Json,
        "application/x-velocypack" => Codec::VelocyPack,
        "text/plain" | "application/octet-stream" | "application/zip" => Codec::Raw,
        _ => Codec::Json,
    }
}

impl Codec {
    /// Encode a request body. `None` means nothing goes on the wire.
    pub fn encode(self, body: &Body) -> Result<Option<Bytes>> {
        match body {
            Body::Empty => Ok(None),
            Body::Raw(bytes) => Ok(Some(bytes.clone())),
            Body::Value(value) => match self {
                Codec::Json => {
                    let encoded =
                        serde_json::to_vec(value).map_err(|e| Error::codec(e.to_string()))?;
                    Ok(Some(Bytes::from(encoded)))
                }
                Codec::VelocyPack => Ok(Some(Bytes::from(vpack::to_bytes(value)?))),
                Codec::Raw => Err(Error::invalid_argument(
                    "structured body cannot be encoded by the raw codec",
                )),
            },
        }
    }

    /// Decode a response body into a typed value. The raw codec refuses;
    /// callers wanting bytes read them off the response directly.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Json => serde_json::from_slice(bytes).map_err(|e| Error::codec(e.to_string())),
            Codec::VelocyPack => {
                let value = vpack::from_slice(bytes)?;
                serde_json::from_value(value).map_err(|e| Error::codec(e.to_string()))
            }
            Codec::Raw => Err(Error::invalid_argument(
                "raw body: read bytes from the response instead of decoding",
            )),
        }
    }
}
