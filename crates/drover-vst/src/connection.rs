//! One VST connection: a single TCP/TLS socket carrying interleaved
//! request/response messages.
//!
//! Writes are serialized per chunk under a mutex, so chunks of different
//! messages may interleave at chunk boundaries but never mid-chunk. A
//! dedicated read loop pulls chunks off the socket and routes them through
//! the message store; waiters hold the store's reply channels.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{json, Map, Value};
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;

use drover_core::codec::ContentType;
use drover_core::request::split_db_path;
use drover_core::{vpack, Error, Request, Response, Result};

use crate::chunk::{self, Version};
use crate::message::MessageStore;

type WireWrite = Box<dyn AsyncWrite + Send + Unpin>;
type WireRead = Box<dyn AsyncRead + Send + Unpin>;

/// Consecutive read failures tolerated before the connection closes.
const MAX_READ_ERRORS: u32 = 64;

/// Database addressed when the request path carries no `_db/<name>` prefix.
const DEFAULT_DATABASE: &str = "_system";

pub struct VstConnection {
    endpoint: String,
    version: Version,
    max_chunk_size: u32,
    store: MessageStore,
    writer: Mutex<WireWrite>,
    last_message_id: AtomicU64,
    last_activity: StdMutex<Instant>,
    configured: AtomicBool,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl VstConnection {
    /// Dial `endpoint` (`vst://host:port`, TLS when a client config is
    /// given), send the protocol banner, and start the read loop.
    pub async fn dial(
        endpoint: &str,
        version: Version,
        max_chunk_size: u32,
        tls: Option<Arc<ClientConfig>>,
    ) -> Result<Arc<VstConnection>> {
        let (addr, host) = host_port(endpoint)?;
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_keepalive(true)?;

        let (reader, writer): (WireRead, WireWrite) = match tls {
            Some(config) => {
                let name = ServerName::try_from(host)
                    .map_err(|e| Error::invalid_argument(format!("invalid TLS host: {e}")))?;
                let mut stream = TlsConnector::from(config).connect(name, stream).await?;
                stream.write_all(version.banner()).await?;
                let (r, w) = tokio::io::split(stream);
                (Box::new(r), Box::new(w))
            }
            None => {
                let mut stream = stream;
                stream.write_all(version.banner()).await?;
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
        };

        let (shutdown, _) = watch::channel(false);
        let conn = Arc::new(VstConnection {
            endpoint: endpoint.to_string(),
            version,
            max_chunk_size,
            store: MessageStore::new(),
            writer: Mutex::new(writer),
            last_message_id: AtomicU64::new(0),
            last_activity: StdMutex::new(Instant::now()),
            configured: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown,
        });
        tokio::spawn(read_loop(conn.clone(), reader));
        tracing::debug!(endpoint = %conn.endpoint, ?version, "vst connection open");
        Ok(conn)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// In-flight messages. The pool picks the least-loaded connection.
    pub fn load(&self) -> usize {
        self.store.len()
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.lock().unwrap().elapsed() > timeout
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    /// Mark the post-connect handshake as done; only then is the connection
    /// eligible for dispatch.
    pub fn set_configured(&self) {
        self.configured.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Terminal. Cancels every waiter; late reply chunks are dropped.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        self.store.close_all();
        tracing::debug!(endpoint = %self.endpoint, "vst connection closed");
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Send raw message parts. The returned channel yields the assembled
    /// reply; a channel closed without a value means the connection died and
    /// is surfaced by callers as a deadline error.
    pub fn send_parts(
        self: &Arc<Self>,
        parts: Vec<Bytes>,
        deadline: Option<Instant>,
    ) -> Result<tokio::sync::oneshot::Receiver<Result<Bytes>>> {
        if self.is_closed() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "vst connection is closed",
            )));
        }
        let id = self.last_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        let chunks = chunk::build_chunks(id, self.max_chunk_size, &parts)?;
        let rx = self.store.add(id);
        self.touch();

        let conn = self.clone();
        tokio::spawn(async move {
            for piece in chunks {
                let buf = piece.to_bytes(conn.version);
                // Lock per chunk: messages interleave at chunk boundaries.
                let write = async {
                    let mut writer = conn.writer.lock().await;
                    writer.write_all(&buf).await?;
                    writer.flush().await
                };
                let result = match deadline {
                    Some(at) => match tokio::time::timeout_at(at.into(), write).await {
                        Ok(done) => done.map_err(Error::from),
                        Err(_) => Err(Error::DeadlineExceeded),
                    },
                    None => write.await.map_err(Error::from),
                };
                if let Err(err) = result {
                    tracing::debug!(message_id = id, error = %err, "chunk write failed");
                    conn.store.fail(id, err);
                    conn.close();
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Perform one request/response exchange over this connection.
    pub async fn request(self: &Arc<Self>, req: Request) -> Result<Response> {
        req.validate()?;
        let deadline = req.options.deadline;

        let (database, path) = match split_db_path(&req.path) {
            Some((db, rest)) => (db, rest),
            None => (DEFAULT_DATABASE.to_string(), req.path.clone()),
        };
        let mut query = Map::new();
        for (k, v) in req.query() {
            query.insert(k.clone(), Value::String(v.clone()));
        }
        let mut headers = Map::new();
        for (k, v) in req.headers() {
            headers.insert(k.clone(), Value::String(v.clone()));
        }
        let meta = json!([
            1,
            1,
            database,
            req.method.vst_code(),
            path,
            Value::Object(query),
            Value::Object(headers),
        ]);

        let mut parts = vec![Bytes::from(vpack::to_bytes(&meta)?)];
        if let Some(body) = ContentType::VelocyPack.codec().encode(&req.body)? {
            parts.push(body);
        }

        let rx = self.send_parts(parts, deadline)?;
        let received = match deadline {
            Some(at) => match tokio::time::timeout_at(at.into(), rx).await {
                Ok(received) => received,
                Err(_) => return Err(Error::DeadlineExceeded),
            },
            None => rx.await,
        };
        // A closed channel without a value is connection loss.
        let data = received.map_err(|_| Error::DeadlineExceeded)??;
        self.touch();
        parse_reply(data, &self.endpoint)
    }
}

/// Decode a reply message: VelocyPack meta array
/// `[version, type, responseCode, headers?]` followed by the body slice.
pub(crate) fn parse_reply(data: Bytes, endpoint: &str) -> Result<Response> {
    let (meta, used) = vpack::from_slice_prefix(&data)?;
    let fields = meta
        .as_array()
        .ok_or_else(|| Error::codec("response meta is not an array"))?;
    let status = fields
        .get(2)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::codec("response meta has no status code"))? as u16;

    let mut response = Response::new(status, "", data.slice(used..))
        .with_endpoint(endpoint)
        .with_fallback(ContentType::VelocyPack);
    if let Some(Value::Object(meta_headers)) = fields.get(3) {
        for (name, value) in meta_headers {
            if let Some(value) = value.as_str() {
                // Stored lowercased for case-insensitive lookup.
                response.set_header(name, value);
            }
        }
    }
    let content_type = response
        .header("content-type")
        .unwrap_or(ContentType::VelocyPack.mime())
        .to_string();
    response.content_type = content_type;
    Ok(response)
}

fn host_port(endpoint: &str) -> Result<(String, String)> {
    let rest = endpoint
        .split_once("://")
        .map(|(_, r)| r)
        .unwrap_or(endpoint);
    let rest = rest.trim_end_matches('/');
    let (host, _port) = rest
        .rsplit_once(':')
        .ok_or_else(|| Error::invalid_argument(format!("endpoint {endpoint} has no port")))?;
    Ok((rest.to_string(), host.to_string()))
}

async fn read_loop(conn: Arc<VstConnection>, mut reader: WireRead) {
    let mut shutdown = conn.shutdown.subscribe();
    let mut errors: u32 = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = chunk::read_chunk(&mut reader, conn.version) => match result {
                Ok(piece) => {
                    errors = 0;
                    conn.touch();
                    conn.store.handle_chunk(piece);
                }
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::debug!(endpoint = %conn.endpoint, "vst peer closed");
                    break;
                }
                Err(err) => {
                    errors += 1;
                    if errors >= MAX_READ_ERRORS {
                        tracing::warn!(endpoint = %conn.endpoint, error = %err, "read loop giving up");
                        break;
                    }
                    // Proportional backoff before the next attempt.
                    tokio::time::sleep(Duration::from_millis(5 * errors as u64)).await;
                }
            }
        }
    }
    conn.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_strips_scheme() {
        let (addr, host) = host_port("vst://db1.internal:8529").unwrap();
        assert_eq!(addr, "db1.internal:8529");
        assert_eq!(host, "db1.internal");

        let (addr, _) = host_port("localhost:8529").unwrap();
        assert_eq!(addr, "localhost:8529");

        assert!(host_port("vst://db1.internal").is_err());
    }

    #[test]
    fn parse_reply_extracts_status_headers_and_body() {
        let meta = vpack::to_bytes(&json!([1, 1, 200, {"Content-Type": "application/x-velocypack", "X-Extra": "1"}])).unwrap();
        let body = vpack::to_bytes(&json!({"server": "arango"})).unwrap();
        let mut wire = meta;
        wire.extend_from_slice(&body);

        let resp = parse_reply(Bytes::from(wire), "vst://db1:8529").unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.endpoint, "vst://db1:8529");
        assert_eq!(resp.header("x-extra"), Some("1"));
        let value: Value = resp.deserialize().unwrap();
        assert_eq!(value, json!({"server": "arango"}));
    }

    #[test]
    fn parse_reply_without_headers_defaults_to_velocypack() {
        let wire = vpack::to_bytes(&json!([1, 1, 204])).unwrap();
        let resp = parse_reply(Bytes::from(wire), "e").unwrap();
        assert_eq!(resp.status, 204);
        assert_eq!(resp.content_type, "application/x-velocypack");
        assert!(resp.body().is_empty());
    }

    #[test]
    fn parse_reply_rejects_malformed_meta() {
        let wire = vpack::to_bytes(&json!({"not": "an array"})).unwrap();
        assert!(parse_reply(Bytes::from(wire), "e").is_err());
    }
}
