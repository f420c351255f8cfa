//! drover-http — HTTP/1.1 and HTTP/2 implementations of the connection
//! contract, built on reqwest.
//!
//! Both versions share one implementation; they differ only in client
//! construction (`http1_only` vs `http2_prior_knowledge`). Request bodies
//! are encoded by the configured codec and, when compression is configured,
//! compressed at the configured level; the same setting negotiates
//! Accept-Encoding so responses come back compressed and are transparently
//! decompressed by the client. Decoding into typed values happens lazily
//! via the content-type-selected codec. Proxy configuration comes from the
//! standard `http_proxy`/`https_proxy`/`no_proxy` environment variables.

mod compress;

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::RwLock;

use drover_core::auth::{basic_header, bearer_header};
use drover_core::codec::ContentType;
use drover_core::{Authentication, Connection, Error, Request, Response, Result};

pub use compress::Compression;

/// Identifies this driver to the server on every request.
const DRIVER_HEADER: &str = "x-arango-driver";
const DRIVER_NAME: &str = concat!("drover/", env!("CARGO_PKG_VERSION"));

const QUEUE_TIME_HEADER: &str = "x-arango-queue-time-seconds";

/// Bound on server-side queue time attached to outgoing requests.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum QueueTimeLimit {
    /// No queue-time header.
    #[default]
    Off,
    /// Derive the bound from the remaining request deadline.
    FromDeadline,
    /// A fixed bound in seconds.
    Fixed(f64),
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Default body encoding, also the decode fallback.
    pub content_type: ContentType,
    /// Prefer HTTP/2 with prior knowledge over HTTP/1.1.
    pub http2: bool,
    /// Compression for request bodies and, via Accept-Encoding, responses.
    /// Unset means neither side is compressed.
    pub compression: Option<Compression>,
    /// flate2 level for request bodies, 0-9.
    pub compression_level: u32,
    pub queue_time_limit: QueueTimeLimit,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            content_type: ContentType::default(),
            http2: false,
            compression: None,
            compression_level: 6,
            queue_time_limit: QueueTimeLimit::Off,
        }
    }
}

pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
    config: HttpTransportConfig,
    auth: RwLock<Option<Authentication>>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, config: HttpTransportConfig) -> Result<Self> {
        // Redirects are semantic here (agency followers answer 307); never
        // follow them automatically. Accept-Encoding follows the configured
        // compression: without it, responses arrive uncompressed.
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .gzip(config.compression == Some(Compression::Gzip))
            .deflate(config.compression == Some(Compression::Deflate));
        builder = if config.http2 {
            builder.http2_prior_knowledge()
        } else {
            builder.http1_only()
        };
        let client = builder
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Ok(HttpTransport {
            endpoint,
            client,
            config,
            auth: RwLock::new(None),
        })
    }

    /// Endpoint + path + query. The path was escaped at construction time
    /// and must not be escaped again here.
    fn build_url(&self, req: &Request) -> String {
        let mut url = format!("{}{}", self.endpoint, req.path);
        let mut sep = '?';
        for (key, value) in req.query() {
            url.push(sep);
            url.push_str(key);
            url.push('=');
            url.push_str(value);
            sep = '&';
        }
        if let Some(fragment) = &req.fragment {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }

    fn apply_auth(&self, req: &mut Request) -> Result<()> {
        if req.header("authorization").is_some() {
            return Ok(());
        }
        match &*self.auth.read().unwrap() {
            None => Ok(()),
            Some(Authentication::Basic { username, password }) => {
                req.set_header("authorization", basic_header(username, password));
                Ok(())
            }
            Some(Authentication::Bearer { token }) => {
                req.set_header("authorization", bearer_header(token));
                Ok(())
            }
            Some(Authentication::Jwt { .. }) => Err(Error::invalid_argument(
                "jwt credentials must be installed through the jwt wrapper",
            )),
        }
    }

    fn queue_time_header(&self, deadline: Option<Instant>) -> Option<String> {
        match self.config.queue_time_limit {
            QueueTimeLimit::Off => None,
            QueueTimeLimit::Fixed(secs) => Some(format!("{secs:.3}")),
            QueueTimeLimit::FromDeadline => deadline.map(|at| {
                let remaining = at.saturating_duration_since(Instant::now());
                format!("{:.3}", remaining.as_secs_f64())
            }),
        }
    }
}

/// Classify a client error: connect failures may fail over, anything after
/// the request hit the wire is wrapped as a response error.
fn map_send_error(endpoint: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        return Error::DeadlineExceeded;
    }
    if err.is_connect() {
        tracing::debug!(endpoint, error = %err, "connect failed");
        return Error::Io(std::io::Error::other(err));
    }
    tracing::debug!(endpoint, error = %err, "exchange failed after write");
    Error::response(endpoint, Error::Io(std::io::Error::other(err)))
}

#[async_trait]
impl Connection for HttpTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        req.validate()?;
        let mut req = req;
        let deadline = req.options.deadline;

        // Default headers from the configured content type, caller wins.
        let mime = self.config.content_type.mime();
        if req.header("content-type").is_none() {
            req.set_header("content-type", mime);
        }
        if req.header("accept").is_none() {
            req.set_header("accept", mime);
        }
        req.set_header(DRIVER_HEADER, DRIVER_NAME);
        if let Some(value) = req
            .options
            .queue_time_limit
            .map(|secs| format!("{secs:.3}"))
            .or_else(|| self.queue_time_header(deadline))
        {
            req.set_header(QUEUE_TIME_HEADER, value);
        }
        self.apply_auth(&mut req)?;

        // Body encoding happens here, once, with the connection's codec.
        let mut body: Option<Bytes> = None;
        if req.method.has_body() {
            body = self.config.content_type.codec().encode(&req.body)?;
            if let (Some(data), Some(compression)) = (&body, self.config.compression) {
                body = Some(compress::encode(
                    compression,
                    self.config.compression_level,
                    data,
                )?);
                req.set_header("content-encoding", compression.token());
            }
        }

        let url = self.build_url(&req);
        let method = reqwest::Method::from_bytes(req.method.as_str().as_bytes())
            .map_err(|_| Error::invalid_argument("unrepresentable method"))?;
        let mut builder = self.client.request(method, &url);
        for (name, value) in req.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(data) = body {
            builder = builder.body(data);
        }
        if let Some(at) = deadline {
            let remaining = at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::DeadlineExceeded);
            }
            builder = builder.timeout(remaining);
        }

        let raw = builder
            .send()
            .await
            .map_err(|e| map_send_error(&self.endpoint, e))?;

        let status = raw.status().as_u16();
        let content_type = raw
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let headers: Vec<(String, String)> = raw
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        // reqwest has already stripped gzip/deflate content encodings.
        let body = raw
            .bytes()
            .await
            .map_err(|e| map_send_error(&self.endpoint, e))?;

        let mut response = Response::new(status, content_type, body)
            .with_endpoint(&self.endpoint)
            .with_fallback(self.config.content_type);
        for (name, value) in headers {
            response.set_header(&name, value);
        }

        if let Some(allowed) = &req.options.allowed_status {
            response.check_status(allowed)?;
        }
        Ok(response)
    }

    fn endpoints(&self) -> Vec<String> {
        vec![self.endpoint.clone()]
    }

    async fn set_authentication(&self, auth: Authentication) -> Result<()> {
        *self.auth.write().unwrap() = Some(auth);
        Ok(())
    }
}
