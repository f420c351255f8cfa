//! Bounded retry wrapper.

use std::sync::Arc;

use async_trait::async_trait;

use drover_core::{Authentication, Connection, Error, Request, Response, Result};

/// Decides after each attempt whether to try again.
pub type RetryPredicate = Arc<dyn Fn(Option<&Response>, Option<&Error>) -> bool + Send + Sync>;

pub struct RetryConnection {
    inner: Arc<dyn Connection>,
    predicate: RetryPredicate,
    attempts: usize,
}

impl RetryConnection {
    pub fn new(inner: Arc<dyn Connection>, predicate: RetryPredicate, attempts: usize) -> Self {
        RetryConnection {
            inner,
            predicate,
            attempts: attempts.max(1),
        }
    }
}

/// Retry up to `attempts` times while the server answers 503.
pub fn retry_on_503(inner: Arc<dyn Connection>, attempts: usize) -> RetryConnection {
    RetryConnection::new(
        inner,
        Arc::new(|resp, err| {
            if let Some(resp) = resp {
                return resp.status == 503;
            }
            match err.map(Error::root) {
                Some(Error::Server(e)) => e.code == 503,
                _ => false,
            }
        }),
        attempts,
    )
}

#[async_trait]
impl Connection for RetryConnection {
    async fn send(&self, req: Request) -> Result<Response> {
        let mut last = None;
        for attempt in 0..self.attempts {
            let result = self.inner.send(req.clone()).await;
            let retry = match &result {
                Ok(resp) => (self.predicate)(Some(resp), None),
                Err(err) => (self.predicate)(None, Some(err)),
            };
            if !retry {
                return result;
            }
            tracing::debug!(attempt, "retry predicate matched");
            // The previous response body is discarded with `result`.
            last = Some(result);
        }
        last.expect("at least one attempt was made")
    }

    fn endpoints(&self) -> Vec<String> {
        self.inner.endpoints()
    }

    async fn set_authentication(&self, auth: Authentication) -> Result<()> {
        self.inner.set_authentication(auth).await
    }
}
