//! The connection contract every transport and wrapper implements.

use async_trait::async_trait;

use crate::auth::Authentication;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// One logical way of performing request/response exchanges. Transports
/// (HTTP, VST) implement it at the bottom; wrappers (failover, re-auth,
/// async jobs, retry) implement it by delegating to an inner connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Perform one exchange. Deadline and per-request options travel on the
    /// request itself.
    async fn send(&self, req: Request) -> Result<Response>;

    /// Physical endpoints this connection can reach.
    fn endpoints(&self) -> Vec<String>;

    /// Replace the credentials used for subsequent requests. Transports with
    /// per-connection sessions drop those sessions.
    async fn set_authentication(&self, auth: Authentication) -> Result<()>;
}
