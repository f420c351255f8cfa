//! Client assembly: endpoints + transport + policy + wrappers in one place.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use drover_cluster::{ClusterConnection, MaglevHash};
use drover_core::codec::ContentType;
use drover_core::config::DroverConfig;
use drover_core::{Authentication, Connection, Error, Request, RequestOptions, Response, Result};
use drover_http::{Compression, HttpTransport, HttpTransportConfig, QueueTimeLimit};
use drover_vst::{VstTransport, VstTransportConfig};

use crate::jobs::AsyncJobConnection;
use crate::jwt::JwtConnection;
use crate::retry::retry_on_503;

/// How requests spread over the endpoint set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancing {
    #[default]
    RoundRobin,
    /// Maglev consistent hashing keyed on the addressed database.
    ConsistentHash,
}

pub struct ClientBuilder {
    endpoints: Vec<String>,
    balancing: LoadBalancing,
    http: HttpTransportConfig,
    vst: Option<VstTransportConfig>,
    auth: Option<Authentication>,
    async_jobs: bool,
    retry_503: Option<usize>,
    default_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new(endpoints: Vec<String>) -> Self {
        ClientBuilder {
            endpoints,
            balancing: LoadBalancing::default(),
            http: HttpTransportConfig::default(),
            vst: None,
            auth: None,
            async_jobs: false,
            retry_503: None,
            default_timeout: None,
        }
    }

    /// Map a loaded configuration onto a builder.
    pub fn from_config(config: &DroverConfig) -> Self {
        let mut builder = Self::new(config.endpoints.clone());
        builder.http.content_type = match config.http.content_type.as_str() {
            "velocypack" => ContentType::VelocyPack,
            _ => ContentType::Json,
        };
        builder.http.http2 = config.http.http2;
        builder.http.compression = match config.http.compression.as_str() {
            "gzip" => Some(Compression::Gzip),
            "deflate" => Some(Compression::Deflate),
            _ => None,
        };
        builder.http.compression_level = config.http.compression_level;
        builder.http.queue_time_limit = if config.http.queue_time_limit {
            QueueTimeLimit::FromDeadline
        } else {
            QueueTimeLimit::Off
        };
        builder.auth = match config.auth.method.as_str() {
            "basic" => Some(Authentication::basic(
                &config.auth.username,
                &config.auth.password,
            )),
            "jwt" => Some(Authentication::jwt(
                &config.auth.username,
                &config.auth.password,
            )),
            "bearer" => Some(Authentication::bearer(&config.auth.token)),
            _ => None,
        };
        builder
    }

    pub fn load_balancing(mut self, balancing: LoadBalancing) -> Self {
        self.balancing = balancing;
        self
    }

    pub fn http(mut self, config: HttpTransportConfig) -> Self {
        self.http = config;
        self
    }

    /// Use the VST transport instead of HTTP.
    pub fn vst(mut self, config: VstTransportConfig) -> Self {
        self.vst = Some(config);
        self
    }

    pub fn authentication(mut self, auth: Authentication) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Wrap the connection for async-job submission and polling.
    pub fn async_jobs(mut self) -> Self {
        self.async_jobs = true;
        self
    }

    /// Retry overloaded (503) responses up to `attempts` times.
    pub fn retry_on_503(mut self, attempts: usize) -> Self {
        self.retry_503 = Some(attempts);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub async fn build(self) -> Result<Client> {
        if self.endpoints.is_empty() {
            return Err(Error::invalid_argument("no endpoints configured"));
        }

        let mut servers: Vec<Arc<dyn Connection>> = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let server: Arc<dyn Connection> = match &self.vst {
                Some(config) => Arc::new(VstTransport::new(endpoint, config.clone())),
                None => Arc::new(HttpTransport::new(endpoint, self.http.clone())?),
            };
            servers.push(server);
        }

        // Per-server credentials; jwt is a wrapper over the whole cluster.
        if let Some(auth) = &self.auth {
            if !matches!(auth, Authentication::Jwt { .. }) {
                for server in &servers {
                    server.set_authentication(auth.clone()).await?;
                }
            }
        }

        let mut cluster = ClusterConnection::new(servers)?;
        if self.balancing == LoadBalancing::ConsistentHash {
            cluster = cluster.with_policy(Arc::new(MaglevHash::new(self.endpoints.clone())?));
        }
        if let Some(timeout) = self.default_timeout {
            cluster = cluster.with_default_timeout(timeout);
        }

        let mut conn: Arc<dyn Connection> = Arc::new(cluster);
        if let Some(Authentication::Jwt { username, password }) = &self.auth {
            conn = Arc::new(JwtConnection::new(conn, username, password));
        }
        if self.async_jobs {
            conn = Arc::new(AsyncJobConnection::new(conn));
        }
        if let Some(attempts) = self.retry_503 {
            conn = Arc::new(retry_on_503(conn, attempts));
        }
        Ok(Client { conn })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub server: String,
    pub version: String,
    #[serde(default)]
    pub license: String,
}

#[derive(Clone)]
pub struct Client {
    conn: Arc<dyn Connection>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Wrap an already assembled connection stack.
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Client { conn }
    }

    pub fn connection(&self) -> Arc<dyn Connection> {
        self.conn.clone()
    }

    pub async fn send(&self, req: Request) -> Result<Response> {
        self.conn.send(req).await
    }

    /// Server version information.
    pub async fn version(&self) -> Result<VersionInfo> {
        self.version_with_options(RequestOptions::default()).await
    }

    /// Server version, with caller-controlled options (deadline, async id).
    pub async fn version_with_options(&self, options: RequestOptions) -> Result<VersionInfo> {
        let mut req = Request::get("/_api/version");
        req.options = options;
        if req.options.allowed_status.is_none() {
            req.options.allowed_status = Some(vec![200]);
        }
        let resp = self.conn.send(req).await?;
        resp.deserialize()
    }
}
