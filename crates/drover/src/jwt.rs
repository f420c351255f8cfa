//! JWT authentication wrapper.
//!
//! Exchanges username/password for a bearer token at `/_open/auth`, caches
//! it together with its expiry (from the token's `exp` claim), and attaches
//! it to every outgoing request. An unparseable expiry falls back to a
//! one-minute lifetime so a bad token is re-acquired quickly.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use drover_core::auth::{bearer_header, jwt_expiry, JWT_FALLBACK_LIFETIME, OPEN_AUTH_PATH};
use drover_core::{Authentication, Body, Connection, Error, Request, Response, Result};

struct Credentials {
    username: String,
    password: String,
}

struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

pub struct JwtConnection {
    inner: Arc<dyn Connection>,
    credentials: Mutex<Credentials>,
    cached: Mutex<Option<CachedToken>>,
}

impl JwtConnection {
    pub fn new(
        inner: Arc<dyn Connection>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        JwtConnection {
            inner,
            credentials: Mutex::new(Credentials {
                username: username.into(),
                password: password.into(),
            }),
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached token; the next request re-acquires.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Current token, refreshed when absent or past expiry. The cache mutex
    /// is held across the refresh so concurrent callers trigger one fetch.
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = &*cached {
            if SystemTime::now() < entry.expires_at {
                return Ok(entry.token.clone());
            }
        }

        let (username, password) = {
            let creds = self.credentials.lock().await;
            (creds.username.clone(), creds.password.clone())
        };
        let mut req = Request::post(OPEN_AUTH_PATH);
        req.set_body(Body::Value(json!({
            "username": username,
            "password": password,
        })));
        req.options.allowed_status = Some(vec![200]);
        let resp = self.inner.send(req).await?;
        let value: Value = resp.deserialize()?;
        let token = value
            .get("jwt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::codec("auth response carries no jwt field"))?
            .to_string();

        let expires_at =
            jwt_expiry(&token).unwrap_or_else(|| SystemTime::now() + JWT_FALLBACK_LIFETIME);
        tracing::debug!(?expires_at, "jwt token acquired");
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

#[async_trait]
impl Connection for JwtConnection {
    async fn send(&self, req: Request) -> Result<Response> {
        let mut req = req;
        if req.header("authorization").is_none() && req.path != OPEN_AUTH_PATH {
            let token = self.token().await?;
            req.set_header("authorization", bearer_header(&token));
        }
        self.inner.send(req).await
    }

    fn endpoints(&self) -> Vec<String> {
        self.inner.endpoints()
    }

    async fn set_authentication(&self, auth: Authentication) -> Result<()> {
        match auth {
            Authentication::Jwt { username, password } => {
                *self.credentials.lock().await = Credentials { username, password };
                self.invalidate().await;
                Ok(())
            }
            other => self.inner.set_authentication(other).await,
        }
    }
}
