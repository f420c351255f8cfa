//! TTL-leased mutual exclusion over the agency.
//!
//! The lock key holds the holder id while locked. Acquisition is a
//! conditional write guarded by "key is empty"; a background task renews the
//! lease every ttl/2 and marks the lock lost when its precondition fails.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use drover_core::error::is_precondition_failed;
use drover_core::{Error, Result};

use super::{Agency, Transaction};

/// Leases shorter than this are silently raised.
const MIN_TTL: Duration = Duration::from_secs(5);
/// Internal bound on each agency round-trip.
const OP_TIMEOUT: Duration = Duration::from_secs(10);
/// Backoff between renewal retries after a transport error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

struct LockState {
    locked: bool,
    renewal: Option<JoinHandle<()>>,
}

pub struct AgencyLock {
    agency: Agency,
    key: Vec<String>,
    holder_id: String,
    ttl: Duration,
    state: Arc<Mutex<LockState>>,
}

impl AgencyLock {
    /// `holder_id` defaults to 16 random bytes, hex encoded.
    pub fn new(
        agency: Agency,
        key: Vec<String>,
        ttl: Duration,
        holder_id: Option<String>,
    ) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::invalid_argument("lock key must not be empty"));
        }
        let holder_id = holder_id.unwrap_or_else(|| hex::encode(rand::random::<[u8; 16]>()));
        Ok(AgencyLock {
            agency,
            key,
            holder_id,
            ttl: ttl.max(MIN_TTL),
            state: Arc::new(Mutex::new(LockState {
                locked: false,
                renewal: None,
            })),
        })
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub async fn is_locked(&self) -> bool {
        self.state.lock().await.locked
    }

    fn key_segments(&self) -> Vec<&str> {
        self.key.iter().map(String::as_str).collect()
    }

    /// Acquire. Fails with `AlreadyLocked` when this handle already holds
    /// the lock or another holder occupies the key.
    pub async fn lock(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.locked {
            return Err(Error::AlreadyLocked);
        }

        let key = self.key_segments();
        let txn = Transaction::new(&self.holder_id)
            .set_with_ttl(&key, json!(self.holder_id.clone()), self.ttl.as_secs())
            .if_empty(&key, true);
        match tokio::time::timeout(OP_TIMEOUT, self.agency.write(&txn)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if is_precondition_failed(&err) => return Err(Error::AlreadyLocked),
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(Error::DeadlineExceeded),
        }

        state.locked = true;
        state.renewal = Some(tokio::spawn(renew_loop(
            self.agency.clone(),
            self.key.clone(),
            self.holder_id.clone(),
            self.ttl,
            self.state.clone(),
        )));
        tracing::debug!(key = %super::full_key(&key), holder = %self.holder_id, "lock acquired");
        Ok(())
    }

    /// Release. Fails with `NotLocked` when not held. A failed "still ours"
    /// precondition means the lease already expired; the local state is
    /// cleared either way.
    pub async fn unlock(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.locked {
            return Err(Error::NotLocked);
        }

        let key = self.key_segments();
        let txn = Transaction::new(&self.holder_id)
            .delete(&key)
            .if_equal(&key, json!(self.holder_id.clone()));
        let result = match tokio::time::timeout(OP_TIMEOUT, self.agency.write(&txn)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if is_precondition_failed(&err) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::DeadlineExceeded),
        };

        if let Some(task) = state.renewal.take() {
            task.abort();
        }
        state.locked = false;
        tracing::debug!(key = %super::full_key(&key), "lock released");
        result
    }
}

/// Refresh the lease every ttl/2 while locked. A failed precondition means
/// another holder took over: the lock is marked lost and the task exits.
async fn renew_loop(
    agency: Agency,
    key: Vec<String>,
    holder_id: String,
    ttl: Duration,
    state: Arc<Mutex<LockState>>,
) {
    let mut delay = ttl / 2;
    loop {
        tokio::time::sleep(delay).await;

        let mut guard = state.lock().await;
        if !guard.locked {
            return;
        }
        let segments: Vec<&str> = key.iter().map(String::as_str).collect();
        let txn = Transaction::new(&holder_id)
            .set_with_ttl(&segments, Value::String(holder_id.clone()), ttl.as_secs())
            .if_equal(&segments, Value::String(holder_id.clone()));
        match tokio::time::timeout(OP_TIMEOUT, agency.write(&txn)).await {
            Ok(Ok(())) => {
                delay = ttl / 2;
            }
            Ok(Err(err)) if is_precondition_failed(&err) => {
                tracing::warn!(key = %super::full_key(&segments), "lock lost, stopping renewal");
                guard.locked = false;
                guard.renewal = None;
                return;
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "lease renewal failed, retrying");
                delay = RETRY_DELAY;
            }
            Err(_) => {
                delay = RETRY_DELAY;
            }
        }
    }
}
