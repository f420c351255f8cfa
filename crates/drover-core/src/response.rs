//! Protocol-agnostic response model.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::codec::{self, ContentType};
use crate::error::{Error, Result, ServerError};

/// One completed exchange. The body has already been decompressed by the
/// transport; decoding into typed values happens on demand via the codec the
/// `Content-Type` header selects.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    /// Endpoint that served the request.
    pub endpoint: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    /// Fallback codec when the response carries no content type.
    fallback: ContentType,
}

impl Response {
    pub fn new(status: u16, content_type: impl Into<String>, body: Bytes) -> Self {
        Response {
            status,
            content_type: content_type.into(),
            body,
            ..Response::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_fallback(mut self, fallback: ContentType) -> Self {
        self.fallback = fallback;
        self
    }

    /// Header names are stored lowercased; lookups are case-insensitive.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        if let Some(slot) = self.headers.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.headers.push((name, value));
        }
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

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body with the codec the content type selects.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        codec::for_content_type(&self.content_type, self.fallback).decode(&self.body)
    }

    /// Enforce an allowed-status whitelist: outside it, decode the body as a
    /// structured server error. An undecodable body still yields a server
    /// error carrying the status code.
    pub fn check_status(&self, allowed: &[u16]) -> Result<()> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        let mut server: ServerError = self.deserialize().unwrap_or_default();
        if server.code == 0 {
            server.code = self.status;
        }
        server.error = true;
        Err(Error::Server(server))
    }
}
