//! In-process mock servers for the integration tests.
//!
//! `MockVst` speaks enough VST 1.1 to exercise the real transport: banner,
//! chunk reassembly, the authentication sub-protocol, and a couple of
//! scripted routes. `MockHttp` is a minimal HTTP/1.1 server with a
//! per-request handler closure. Both bind to an ephemeral loopback port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use drover_core::vpack;
use drover_vst::chunk::{build_chunks, read_chunk, Version};

// ── VST mock ──────────────────────────────────────────────────────────────────

pub struct MockVst {
    pub endpoint: String,
    /// Set once a connection completed the auth sub-protocol.
    pub authenticated: Arc<AtomicBool>,
    pub requests: Arc<AtomicUsize>,
    /// Sockets accepted so far.
    pub connections: Arc<AtomicUsize>,
}

/// Start a mock VST server. With `credentials` set, every connection must
/// authenticate first; other requests are answered 401 until then.
pub async fn spawn_vst(credentials: Option<(&str, &str)>) -> MockVst {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("vst://{}", listener.local_addr().unwrap());
    let credentials = credentials.map(|(u, p)| (u.to_string(), p.to_string()));
    let authenticated = Arc::new(AtomicBool::new(false));
    let requests = Arc::new(AtomicUsize::new(0));
    let connections = Arc::new(AtomicUsize::new(0));

    let auth_flag = authenticated.clone();
    let request_counter = requests.clone();
    let connection_counter = connections.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            connection_counter.fetch_add(1, Ordering::SeqCst);
            let credentials = credentials.clone();
            let auth_flag = auth_flag.clone();
            let request_counter = request_counter.clone();
            tokio::spawn(async move {
                let _ = serve_vst(stream, credentials, auth_flag, request_counter).await;
            });
        }
    });

    MockVst {
        endpoint,
        authenticated,
        requests,
        connections,
    }
}

async fn serve_vst(
    mut stream: TcpStream,
    credentials: Option<(String, String)>,
    auth_flag: Arc<AtomicBool>,
    request_counter: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    let mut banner = [0u8; 11];
    stream.read_exact(&mut banner).await?;
    anyhow::ensure!(banner.starts_with(b"VST/1."), "bad banner");

    let mut conn_authed = credentials.is_none();
    let mut partial: HashMap<u64, (u32, Vec<drover_vst::Chunk>)> = HashMap::new();

    loop {
        let chunk = match read_chunk(&mut stream, Version::V1_1).await {
            Ok(chunk) => chunk,
            Err(_) => return Ok(()),
        };
        let id = chunk.message_id;
        let entry = partial.entry(id).or_insert((0, Vec::new()));
        if chunk.is_first() {
            entry.0 = chunk.number_of_chunks();
        }
        entry.1.push(chunk);
        if entry.0 == 0 || entry.1.len() != entry.0 as usize {
            continue;
        }

        let (_, mut chunks) = partial.remove(&id).unwrap();
        chunks.sort_by_key(|c| c.index());
        let message: Vec<u8> = chunks.iter().flat_map(|c| c.data.to_vec()).collect();
        let (meta, used) = vpack::from_slice_prefix(&message)?;
        let body = &message[used..];

        let fields = meta.as_array().cloned().unwrap_or_default();
        let is_auth = fields.get(1).and_then(Value::as_u64) == Some(1000);

        let (status, reply_body) = if is_auth {
            let ok = match &credentials {
                None => true,
                Some((user, pass)) => match fields.get(2).and_then(Value::as_str) {
                    Some("plain") => {
                        fields.get(3).and_then(Value::as_str) == Some(user)
                            && fields.get(4).and_then(Value::as_str) == Some(pass)
                    }
                    Some("jwt") => fields.get(3).and_then(Value::as_str).is_some(),
                    _ => false,
                },
            };
            if ok {
                conn_authed = true;
                auth_flag.store(true, Ordering::SeqCst);
                (200, json!({}))
            } else {
                (401, json!({"error": true, "code": 401}))
            }
        } else {
            request_counter.fetch_add(1, Ordering::SeqCst);
            let path = fields
                .get(4)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if !conn_authed {
                (401, json!({"error": true, "code": 401, "errorNum": 11}))
            } else {
                match path.as_str() {
                    "/_api/version" => (200, json!({"server": "arango", "version": "3.11.0"})),
                    "/echo" => (200, vpack::from_slice(body).unwrap_or(Value::Null)),
                    "/hang" => continue,
                    "/close" => return Ok(()),
                    _ => (
                        404,
                        json!({"error": true, "code": 404, "errorNum": 1202,
                               "errorMessage": "not found"}),
                    ),
                }
            }
        };

        let meta = vpack::to_bytes(&json!([1, 1, status, {}]))?;
        let payload = vpack::to_bytes(&reply_body)?;
        let parts = vec![Bytes::from(meta), Bytes::from(payload)];
        for out in build_chunks(id, 30_000, &parts)? {
            stream.write_all(&out.to_bytes(Version::V1_1)).await?;
        }
    }
}

// ── HTTP mock ─────────────────────────────────────────────────────────────────

pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn json(status: u16, value: Value) -> Self {
        HttpReply {
            status,
            headers: vec![("content-type".into(), "application/json".into())],
            body: value.to_string().into_bytes(),
        }
    }

    pub fn empty(status: u16) -> Self {
        HttpReply {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

pub type HttpHandler = Arc<dyn Fn(HttpRequest) -> HttpReply + Send + Sync>;

pub struct MockHttp {
    pub endpoint: String,
    pub hits: Arc<AtomicUsize>,
}

/// Start a minimal HTTP/1.1 server driven by `handler`.
pub async fn spawn_http(handler: HttpHandler) -> MockHttp {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let _ = serve_http(stream, handler, counter).await;
            });
        }
    });

    MockHttp { endpoint, hits }
}

/// Handler that pops scripted replies in order, repeating the last one.
pub fn scripted(replies: Vec<HttpReply>) -> HttpHandler {
    let replies = Mutex::new(replies);
    Arc::new(move |_req| {
        let mut replies = replies.lock().unwrap();
        if replies.len() > 1 {
            replies.remove(0)
        } else if let Some(last) = replies.first() {
            HttpReply {
                status: last.status,
                headers: last.headers.clone(),
                body: last.body.clone(),
            }
        } else {
            HttpReply::empty(500)
        }
    })
}

async fn serve_http(
    mut stream: TcpStream,
    handler: HttpHandler,
    counter: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    let mut buffer = Vec::new();
    loop {
        // Read the request head.
        let head_end = loop {
            if let Some(pos) = find_subslice(&buffer, b"\r\n\r\n") {
                break pos + 4;
            }
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buffer.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ');
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let mut headers = Vec::new();
        let mut content_length = 0usize;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim().to_string();
                let value = value.trim().to_string();
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.parse().unwrap_or(0);
                }
                headers.push((name, value));
            }
        }

        // Read the body.
        while buffer.len() < head_end + content_length {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
        let body = buffer[head_end..head_end + content_length].to_vec();
        buffer.drain(..head_end + content_length);

        counter.fetch_add(1, Ordering::SeqCst);
        let reply = handler(HttpRequest {
            method,
            path,
            headers,
            body,
        });

        let mut out = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
        for (name, value) in &reply.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!("content-length: {}\r\n\r\n", reply.body.len()));
        stream.write_all(out.as_bytes()).await?;
        stream.write_all(&reply.body).await?;
        stream.flush().await?;
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        204 => "No Content",
        307 => "Temporary Redirect",
        401 => "Unauthorized",
        404 => "Not Found",
        412 => "Precondition Failed",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
