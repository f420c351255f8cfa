//! Re-authenticate-on-401 decorator.
//!
//! On any 401 the wrapper mints fresh credentials through a caller-supplied
//! getter, installs them on the inner connection, and retries the original
//! request exactly once. Concurrent 401s are serialized: only the first
//! caller refreshes, the rest retry with the credentials it installed.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;

use drover_core::error::is_unauthorized;
use drover_core::{Authentication, Connection, Error, Request, Response, Result};

/// Mints fresh credentials after the current ones were rejected.
pub type AuthenticationGetter =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Authentication>> + Send + Sync>;

pub struct ReauthConnection {
    inner: Arc<dyn Connection>,
    getter: AuthenticationGetter,
    /// Refresh generation; guarded by the mutex that serializes refreshes.
    generation: Mutex<u64>,
}

impl ReauthConnection {
    pub fn new(inner: Arc<dyn Connection>, getter: AuthenticationGetter) -> Self {
        ReauthConnection {
            inner,
            getter,
            generation: Mutex::new(0),
        }
    }
}

fn is_401(result: &Result<Response>) -> bool {
    match result {
        Ok(resp) => resp.status == 401,
        Err(err) => is_unauthorized(err),
    }
}

#[async_trait]
impl Connection for ReauthConnection {
    async fn send(&self, req: Request) -> Result<Response> {
        let seen_generation = *self.generation.lock().await;
        let first = self.inner.send(req.clone()).await;
        if !is_401(&first) {
            return first;
        }

        {
            let mut generation = self.generation.lock().await;
            // Someone else refreshed while we waited; just retry.
            if *generation == seen_generation {
                tracing::debug!("401 received, refreshing credentials");
                let auth = (self.getter)().await?;
                self.inner.set_authentication(auth).await?;
                *generation += 1;
            }
        }

        // Exactly one silent retry.
        self.inner.send(req).await
    }

    fn endpoints(&self) -> Vec<String> {
        self.inner.endpoints()
    }

    async fn set_authentication(&self, _auth: Authentication) -> Result<()> {
        Err(Error::invalid_argument(
            "set the authentication getter instead of credentials on the re-auth wrapper",
        ))
    }
}
