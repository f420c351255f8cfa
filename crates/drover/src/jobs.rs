//! Async-job wrapper: submit-and-poll for long-running server operations.
//!
//! Submission marks the request with `x-arango-async: store`; the server
//! answers 202 and a job id, surfaced as the tagged `JobInProgress` error.
//! Polling replaces the request with `PUT /_api/job/<id>`; the final result
//! is forwarded verbatim once the job completes.

use std::sync::Arc;

use async_trait::async_trait;

use drover_core::request::split_db_path;
use drover_core::{Authentication, Connection, Error, Method, Request, Response, Result};

pub const ASYNC_HEADER: &str = "x-arango-async";
pub const ASYNC_ID_HEADER: &str = "x-arango-async-id";

pub struct AsyncJobConnection {
    inner: Arc<dyn Connection>,
}

impl AsyncJobConnection {
    pub fn new(inner: Arc<dyn Connection>) -> Self {
        AsyncJobConnection { inner }
    }

    async fn poll(&self, req: Request, id: &str) -> Result<Response> {
        // The job API lives in the database the original request addressed.
        let path = match split_db_path(&req.path) {
            Some((db, _)) => format!("/_db/{db}/_api/job/{id}"),
            None => format!("/_api/job/{id}"),
        };
        let mut poll = Request::new(Method::Put, path);
        poll.options = req.options.clone();
        poll.options.async_id = None;
        poll.endpoint = req.endpoint.clone();

        let resp = self.inner.send(poll).await?;
        if resp.status == 204 {
            return match resp.header(ASYNC_ID_HEADER) {
                // The job finished and its own result is this 204.
                Some(done) if done == id => Ok(resp),
                // Still queued or running.
                _ => Err(Error::JobInProgress(id.to_string())),
            };
        }
        // Any other response carries the final result.
        Ok(resp)
    }

    async fn submit(&self, mut req: Request) -> Result<Response> {
        req.set_header(ASYNC_HEADER, "store");
        req.options.async_submit = false;
        let resp = self.inner.send(req).await?;
        if resp.status != 202 {
            return Ok(resp);
        }
        match resp.header(ASYNC_ID_HEADER) {
            Some(id) => Err(Error::JobInProgress(id.to_string())),
            None => Err(Error::codec(
                "async submission accepted without a job id header",
            )),
        }
    }
}

#[async_trait]
impl Connection for AsyncJobConnection {
    async fn send(&self, req: Request) -> Result<Response> {
        if let Some(id) = req.options.async_id.clone() {
            self.poll(req, &id).await
        } else if req.options.async_submit {
            self.submit(req).await
        } else {
            self.inner.send(req).await
        }
    }

    fn endpoints(&self) -> Vec<String> {
        self.inner.endpoints()
    }

    async fn set_authentication(&self, auth: Authentication) -> Result<()> {
        self.inner.set_authentication(auth).await
    }
}
