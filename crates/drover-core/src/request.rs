//! Protocol-agnostic request model.
//!
//! A [`Request`] carries everything a transport needs to put an operation on
//! the wire; the body stays structured until send time, when the connection's
//! codec picks the encoding. Cloning a request never shares mutable state.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

use crate::error::{Error, Result};

/// Request verbs, with the wire codes the binary transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    Delete,
    #[default]
    Get,
    Post,
    Put,
    Head,
    Patch,
    Options,
}

impl Method {
    /// Request-type code in the VST meta array.
    pub fn vst_code(self) -> u8 {
        match self {
            Method::Delete => 0,
            Method::Get => 1,
            Method::Post => 2,
            Method::Put => 3,
            Method::Head => 4,
            Method::Patch => 5,
            Method::Options => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Delete => "DELETE",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }

    /// Verbs that carry a request body.
    pub fn has_body(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body. Structured bodies are encoded by the sending connection's
/// codec; raw bodies pass through untouched.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Value(Value),
    Raw(Bytes),
}

impl Body {
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Body> {
        let value = serde_json::to_value(value).map_err(|e| Error::codec(e.to_string()))?;
        Ok(Body::Value(value))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// Per-request options consulted by wrappers and transports.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overall deadline for this call.
    pub deadline: Option<Instant>,
    /// Submit as a server-side async job instead of waiting for the result.
    pub async_submit: bool,
    /// Poll the result of a previously submitted async job.
    pub async_id: Option<String>,
    /// Status codes accepted without decoding a server error body.
    pub allowed_status: Option<Vec<u16>>,
    /// Explicit queue-time bound in seconds; falls back to the remaining
    /// deadline when unset and queue-time limiting is enabled.
    pub queue_time_limit: Option<f64>,
    /// Agent-health relaxation: a leaderless agency is acceptable.
    pub allow_no_leader: bool,
    /// Agent-health relaxation: followers may disagree on the leader URL.
    pub allow_different_leader_endpoints: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Method,
    pub path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    pub body: Body,
    pub fragment: Option<String>,
    /// Pin this request to one specific endpoint, bypassing selection.
    pub endpoint: Option<String>,
    pub options: RequestOptions,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            ..Request::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Request::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Request::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Request::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Request::new(Method::Delete, path)
    }

    /// Transports call this before touching the wire.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::invalid_argument("request path must not be empty"));
        }
        Ok(())
    }

    /// Append a query value. Keys may repeat.
    pub fn set_query(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Set a header. Names are case-insensitive; the last write wins.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        if let Some(slot) = self.headers.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.headers.push((name, value));
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn set_body(&mut self, body: Body) -> &mut Self {
        self.body = body;
        self
    }

    pub fn set_body_serialize<T: Serialize>(&mut self, value: &T) -> Result<&mut Self> {
        self.body = Body::from_serialize(value)?;
        Ok(self)
    }
}

/// Split a path of the form `/_db/<name>/<rest>` into the URL-decoded
/// database name and the remainder (`/<rest>`). Returns `None` for paths
/// that do not address a database.
pub fn split_db_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let rest = trimmed.strip_prefix("_db/")?;
    let (name, tail) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if name.is_empty() {
        return None;
    }
    Some((percent_decode(name), tail.to_string()))
}

/// Decode %XX escapes; malformed escapes pass through verbatim.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hi = (bytes[i + 1] as char).to_digit(16).unwrap() as u8;
            let lo = (bytes[i + 2] as char).to_digit(16).unwrap() as u8;
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
