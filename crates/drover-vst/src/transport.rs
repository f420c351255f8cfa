//! VST transport: a pool of connections to one host.
//!
//! Requests go to the least-loaded live connection; a busy pool below its
//! connection limit grows instead. An idle sweeper reaps closed and stale
//! connections and exits when the pool drains, restarting on regrowth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_rustls::rustls::ClientConfig;

use drover_core::{Authentication, Connection, Request, Response, Result};

use crate::chunk::Version;
use crate::connection::VstConnection;
use crate::handshake::{auth_callback, ConnectCallback};

#[derive(Clone)]
pub struct VstTransportConfig {
    pub version: Version,
    /// Connections kept per host.
    pub connection_limit: usize,
    /// Inactivity threshold for the sweeper.
    pub idle_timeout: Duration,
    /// Upper bound for one chunk on the wire, header included.
    pub max_chunk_size: u32,
    /// TLS when set; plain TCP otherwise.
    pub tls: Option<Arc<ClientConfig>>,
}

impl Default for VstTransportConfig {
    fn default() -> Self {
        Self {
            version: Version::V1_1,
            connection_limit: 3,
            idle_timeout: Duration::from_secs(60),
            max_chunk_size: 30_000,
            tls: None,
        }
    }
}

pub struct VstTransport {
    endpoint: String,
    config: VstTransportConfig,
    connections: Arc<StdMutex<Vec<Arc<VstConnection>>>>,
    on_created: StdMutex<Option<ConnectCallback>>,
    sweeper_running: Arc<AtomicBool>,
}

impl VstTransport {
    pub fn new(endpoint: impl Into<String>, config: VstTransportConfig) -> Self {
        VstTransport {
            endpoint: endpoint.into(),
            config,
            connections: Arc::new(StdMutex::new(Vec::new())),
            on_created: StdMutex::new(None),
            sweeper_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the post-connect callback run on every fresh connection
    /// before it becomes eligible for dispatch.
    pub fn set_connect_callback(&self, callback: ConnectCallback) {
        *self.on_created.lock().unwrap() = Some(callback);
    }

    /// Pick a connection per the selection policy: least-loaded live
    /// connection, growing the pool while it is busy and below the limit.
    async fn connection(&self) -> Result<Arc<VstConnection>> {
        let (best, live) = {
            let pool = self.connections.lock().unwrap();
            let live = pool.iter().filter(|c| !c.is_closed()).count();
            let best = pool
                .iter()
                .filter(|c| !c.is_closed() && c.is_configured())
                .min_by_key(|c| c.load())
                .cloned();
            (best, live)
        };
        match best {
            Some(conn) if conn.load() == 0 => Ok(conn),
            Some(conn) if live >= self.config.connection_limit => Ok(conn),
            _ => self.dial_new().await,
        }
    }

    async fn dial_new(&self) -> Result<Arc<VstConnection>> {
        let conn = VstConnection::dial(
            &self.endpoint,
            self.config.version,
            self.config.max_chunk_size,
            self.config.tls.clone(),
        )
        .await?;

        let callback = self.on_created.lock().unwrap().clone();
        if let Some(callback) = callback {
            if let Err(err) = callback(conn.clone()).await {
                tracing::warn!(endpoint = %self.endpoint, error = %err, "post-connect callback failed");
                conn.close();
                return Err(err);
            }
        }
        conn.set_configured();

        self.connections.lock().unwrap().push(conn.clone());
        self.ensure_sweeper();
        Ok(conn)
    }

    /// One sweeper runs while the pool is non-empty.
    fn ensure_sweeper(&self) {
        if self.sweeper_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let connections = self.connections.clone();
        let running = self.sweeper_running.clone();
        let idle_timeout = self.config.idle_timeout;
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(idle_timeout / 10);
            loop {
                interval.tick().await;
                let (drained, empty) = {
                    let mut pool = connections.lock().unwrap();
                    let mut drained = Vec::new();
                    pool.retain(|conn| {
                        if conn.is_closed() || conn.is_idle(idle_timeout) {
                            drained.push(conn.clone());
                            false
                        } else {
                            true
                        }
                    });
                    (drained, pool.is_empty())
                };
                for conn in &drained {
                    conn.close();
                }
                if !drained.is_empty() {
                    tracing::debug!(endpoint = %endpoint, reaped = drained.len(), "idle sweep");
                }
                if empty {
                    running.store(false, Ordering::Release);
                    return;
                }
            }
        });
    }

    /// Close every pooled connection. Used when authentication changes and
    /// existing sessions are no longer valid.
    pub fn close_all_connections(&self) {
        let drained: Vec<_> = self.connections.lock().unwrap().drain(..).collect();
        for conn in drained {
            conn.close();
        }
    }
}

#[async_trait]
impl Connection for VstTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        req.validate()?;
        let allowed = req.options.allowed_status.clone();
        let conn = self.connection().await?;
        let resp = conn.request(req).await?;
        if let Some(allowed) = allowed {
            resp.check_status(&allowed)?;
        }
        Ok(resp)
    }

    fn endpoints(&self) -> Vec<String> {
        vec![self.endpoint.clone()]
    }

    async fn set_authentication(&self, auth: Authentication) -> Result<()> {
        self.set_connect_callback(auth_callback(auth));
        self.close_all_connections();
        Ok(())
    }
}
