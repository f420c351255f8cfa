//! Post-connect authentication handshake.
//!
//! Runs once per freshly dialed connection, through the transport's
//! post-connect callback, before the connection is advertised as configured.
//! The auth message is a VelocyPack array: `[1, 1000, "plain", user, pass]`
//! or `[1, 1000, "jwt", token]`. JWT credentials first exchange
//! username/password for a token at `/_open/auth` over the same connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::BoxFuture;
use serde_json::{json, Value};

use drover_core::auth::OPEN_AUTH_PATH;
use drover_core::{vpack, Authentication, Body, Error, Request, Result, ServerError};

use crate::connection::{self, VstConnection};

/// Invoked by the transport after a dial succeeds; the connection only
/// becomes eligible for dispatch when the callback returns Ok.
pub type ConnectCallback =
    Arc<dyn Fn(Arc<VstConnection>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a post-connect callback that authenticates with `auth`.
pub fn auth_callback(auth: Authentication) -> ConnectCallback {
    Arc::new(move |conn| {
        let auth = auth.clone();
        Box::pin(async move {
            match auth {
                Authentication::Basic { username, password } => {
                    authenticate(&conn, json!([1, 1000, "plain", username, password])).await
                }
                Authentication::Bearer { token } => {
                    authenticate(&conn, json!([1, 1000, "jwt", token])).await
                }
                Authentication::Jwt { username, password } => {
                    let token = fetch_token(&conn, &username, &password).await?;
                    authenticate(&conn, json!([1, 1000, "jwt", token])).await
                }
            }
        })
    })
}

/// Obtain a token from `/_open/auth` over the not-yet-configured connection.
async fn fetch_token(conn: &Arc<VstConnection>, username: &str, password: &str) -> Result<String> {
    let mut req = Request::post(OPEN_AUTH_PATH);
    req.options.deadline = Some(Instant::now() + HANDSHAKE_TIMEOUT);
    req.set_body(Body::Value(json!({
        "username": username,
        "password": password,
    })));
    let resp = conn.request(req).await?;
    resp.check_status(&[200])?;
    let value: Value = resp.deserialize()?;
    value
        .get("jwt")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::codec("auth response carries no jwt field"))
}

async fn authenticate(conn: &Arc<VstConnection>, message: Value) -> Result<()> {
    let parts = vec![Bytes::from(vpack::to_bytes(&message)?)];
    let rx = conn.send_parts(parts, Some(Instant::now() + HANDSHAKE_TIMEOUT))?;
    let received = tokio::time::timeout(HANDSHAKE_TIMEOUT, rx)
        .await
        .map_err(|_| Error::DeadlineExceeded)?;
    let data = received.map_err(|_| Error::DeadlineExceeded)??;
    let resp = connection::parse_reply(data, conn.endpoint())?;
    if resp.status != 200 {
        conn.close();
        return Err(Error::Server(ServerError {
            error: true,
            code: resp.status,
            error_num: 0,
            error_message: "authentication handshake rejected".into(),
        }));
    }
    tracing::debug!(endpoint = %conn.endpoint(), "vst handshake complete");
    Ok(())
}
