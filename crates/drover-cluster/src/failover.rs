//! Cluster dispatcher: one logical request over several servers.
//!
//! Wraps an ordered list of per-server connections. Each call subdivides the
//! overall deadline across up to three attempts, fails over on network
//! errors, and never fails over once the request reached the wire (server
//! rejections and post-write transport errors come back unchanged — the
//! latter wrapped as a response error, so callers can tell the two apart).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use drover_core::{error, Authentication, Connection, Error, Request, Response, Result};

use crate::endpoints::EndpointList;

/// Applied when neither the request nor the caller set a deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// At most this many attempts share the overall deadline.
const MAX_TIMEOUT_SLICES: u64 = 3;

pub struct ClusterConnection {
    servers: Vec<Arc<dyn Connection>>,
    /// Round-robin starting point, advanced on failover.
    current: Mutex<usize>,
    /// Optional policy overriding the starting server per request.
    policy: Option<Arc<dyn EndpointList>>,
    default_timeout: Duration,
}

impl ClusterConnection {
    pub fn new(servers: Vec<Arc<dyn Connection>>) -> Result<Self> {
        if servers.is_empty() {
            return Err(Error::invalid_argument("no servers to dispatch to"));
        }
        Ok(ClusterConnection {
            servers,
            current: Mutex::new(0),
            policy: None,
            default_timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn EndpointList>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn server_index_for_endpoint(&self, endpoint: &str) -> Option<usize> {
        self.servers.iter().position(|server| {
            server
                .endpoints()
                .iter()
                .any(|e| endpoints_match(e, endpoint))
        })
    }

    /// Starting index: request pin beats policy beats the cursor.
    fn start_index(&self, req: &Request) -> Result<(usize, bool)> {
        if let Some(pin) = req.endpoint.as_deref().filter(|p| !p.is_empty()) {
            let index = self.server_index_for_endpoint(pin).ok_or_else(|| {
                Error::invalid_argument(format!("pinned endpoint {pin} is not a known server"))
            })?;
            return Ok((index, false));
        }
        if let Some(policy) = &self.policy {
            let endpoint = policy.get("", req.method, &req.path)?;
            if let Some(index) = self.server_index_for_endpoint(&endpoint) {
                return Ok((index, true));
            }
        }
        Ok((*self.current.lock().unwrap(), true))
    }
}

/// Endpoint equality modulo trailing slash.
fn endpoints_match(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

#[async_trait]
impl Connection for ClusterConnection {
    async fn send(&self, req: Request) -> Result<Response> {
        req.validate()?;
        let overall_deadline = req
            .options
            .deadline
            .unwrap_or_else(|| Instant::now() + self.default_timeout);

        let (start, failover) = self.start_index(&req)?;
        let count = self.servers.len();
        let attempts = if failover { count } else { 1 };
        let slices = MAX_TIMEOUT_SLICES.min(count as u64).max(1);
        let per_attempt = overall_deadline
            .saturating_duration_since(Instant::now())
            .checked_div(slices as u32)
            .unwrap_or_default();

        let mut last_err = Error::DeadlineExceeded;
        for attempt in 0..attempts {
            let index = (start + attempt) % count;
            let server = &self.servers[index];

            let mut attempt_req = req.clone();
            let attempt_deadline = if failover {
                (Instant::now() + per_attempt).min(overall_deadline)
            } else {
                overall_deadline
            };
            attempt_req.options.deadline = Some(attempt_deadline);

            match server.send(attempt_req).await {
                Ok(resp) => return Ok(resp),
                Err(err) if error::is_canceled(&err) => return Err(err),
                // Written to the wire: the server's answer (or the wrapped
                // transport failure) is final, no failover.
                Err(err @ Error::Server(_)) | Err(err @ Error::Response { .. }) => {
                    return Err(err);
                }
                Err(err) => {
                    if Instant::now() >= overall_deadline {
                        return Err(if error::is_deadline_exceeded(&err) {
                            err
                        } else {
                            Error::DeadlineExceeded
                        });
                    }
                    tracing::debug!(
                        server = index,
                        attempt,
                        error = %err,
                        "attempt failed, trying next server"
                    );
                    *self.current.lock().unwrap() = (index + 1) % count;
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    fn endpoints(&self) -> Vec<String> {
        self.servers
            .iter()
            .flat_map(|server| server.endpoints())
            .collect()
    }

    async fn set_authentication(&self, auth: Authentication) -> Result<()> {
        for server in &self.servers {
            server.set_authentication(auth.clone()).await?;
        }
        Ok(())
    }
}
