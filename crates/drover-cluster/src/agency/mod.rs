//! Agency client: reads and conditional writes against the cluster's
//! coordination key-value store.
//!
//! A write transaction is `[updates, conditions, clientId]`. The server
//! answers `{"results":[n]}`; `n == 0` means a precondition failed and is
//! mapped to a precondition-failed server error (412 semantics). There is
//! exactly one representation of that outcome — the error-kind predicate
//! `is_precondition_failed` — and one definition of key-not-found.

mod health;
mod lock;

pub use health::are_agents_healthy;
pub use lock::AgencyLock;

use std::sync::Arc;

use serde_json::{json, Map, Value};

use drover_core::{Body, Connection, Error, Request, Response, Result, ServerError};

pub const READ_PATH: &str = "/_api/agency/read";
pub const WRITE_PATH: &str = "/_api/agency/write";
pub const TRANSIENT_PATH: &str = "/_api/agency/transient";

/// Join key segments into the full slash-separated agency path.
fn full_key(key: &[&str]) -> String {
    format!("/{}", key.join("/"))
}

/// One write transaction: updates plus the preconditions guarding them.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    updates: Map<String, Value>,
    conditions: Map<String, Value>,
    client_id: String,
}

impl Transaction {
    pub fn new(client_id: impl Into<String>) -> Self {
        Transaction {
            client_id: client_id.into(),
            ..Transaction::default()
        }
    }

    fn update(mut self, key: &[&str], op: Value) -> Self {
        self.updates.insert(full_key(key), op);
        self
    }

    fn condition(mut self, key: &[&str], name: &str, value: Value) -> Self {
        let slot = self
            .conditions
            .entry(full_key(key))
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = slot {
            map.insert(name.to_string(), value);
        }
        self
    }

    pub fn set(self, key: &[&str], value: Value) -> Self {
        self.update(key, json!({"op": "set", "new": value}))
    }

    /// Set with a lease: the key evaporates after `ttl` seconds.
    pub fn set_with_ttl(self, key: &[&str], value: Value, ttl_secs: u64) -> Self {
        self.update(key, json!({"op": "set", "new": value, "ttl": ttl_secs}))
    }

    pub fn delete(self, key: &[&str]) -> Self {
        self.update(key, json!({"op": "delete"}))
    }

    pub fn push(self, key: &[&str], value: Value) -> Self {
        self.update(key, json!({"op": "push", "new": value}))
    }

    pub fn erase(self, key: &[&str], value: Value) -> Self {
        self.update(key, json!({"op": "erase", "val": value}))
    }

    pub fn replace(self, key: &[&str], old: Value, new: Value) -> Self {
        self.update(key, json!({"op": "replace", "val": old, "new": new}))
    }

    pub fn observe(self, key: &[&str], url: &str) -> Self {
        self.update(key, json!({"op": "observe", "url": url}))
    }

    pub fn unobserve(self, key: &[&str], url: &str) -> Self {
        self.update(key, json!({"op": "unobserve", "url": url}))
    }

    /// Precondition: current value equals `value`.
    pub fn if_equal(self, key: &[&str], value: Value) -> Self {
        self.condition(key, "old", value)
    }

    /// Precondition: current value differs from `value`.
    pub fn if_not_equal(self, key: &[&str], value: Value) -> Self {
        self.condition(key, "oldNot", value)
    }

    /// Precondition: the key is empty (or, with `false`, non-empty).
    pub fn if_empty(self, key: &[&str], empty: bool) -> Self {
        self.condition(key, "oldEmpty", Value::Bool(empty))
    }

    /// Precondition: the current value is (or is not) an array.
    pub fn if_is_array(self, key: &[&str], is_array: bool) -> Self {
        self.condition(key, "isArray", Value::Bool(is_array))
    }

    fn to_body(&self) -> Value {
        json!([[
            Value::Object(self.updates.clone()),
            Value::Object(self.conditions.clone()),
            self.client_id,
        ]])
    }
}

/// Client over any connection (typically the agency cluster dispatcher).
#[derive(Clone)]
pub struct Agency {
    conn: Arc<dyn Connection>,
}

impl Agency {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Agency { conn }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Read the value at `key`. Missing keys yield [`Error::KeyNotFound`].
    pub async fn read_key(&self, key: &[&str]) -> Result<Value> {
        let mut req = Request::post(READ_PATH);
        req.set_body(Body::Value(json!([[full_key(key)]])));
        req.options.allowed_status = Some(vec![200]);
        let resp = self.conn.send(req).await?;
        let result: Value = resp.deserialize()?;

        // Response shape: [ { "seg": { "seg": value } } ] — descend the
        // requested path.
        let mut node = result
            .as_array()
            .and_then(|items| items.first())
            .cloned()
            .ok_or_else(|| Error::codec("agency read returned no result envelope"))?;
        for segment in key {
            node = match node.get(*segment) {
                Some(next) => next.clone(),
                None => return Err(Error::KeyNotFound(full_key(key))),
            };
        }
        Ok(node)
    }

    /// Apply one conditional write transaction against the persistent store.
    pub async fn write(&self, txn: &Transaction) -> Result<()> {
        self.apply(WRITE_PATH, txn).await
    }

    /// Apply one transaction against the transient store.
    pub async fn write_transient(&self, txn: &Transaction) -> Result<()> {
        self.apply(TRANSIENT_PATH, txn).await
    }

    async fn apply(&self, path: &str, txn: &Transaction) -> Result<()> {
        let mut req = Request::post(path);
        req.set_body(Body::Value(txn.to_body()));
        req.options.allowed_status = Some(vec![200]);
        let resp = self.conn.send(req).await?;
        check_write_result(&resp)
    }
}

/// `{"results":[n]}`: zero signals a failed precondition.
fn check_write_result(resp: &Response) -> Result<()> {
    let value: Value = resp.deserialize()?;
    let first = value
        .get("results")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .and_then(|n| n.as_u64())
        .ok_or_else(|| Error::codec("agency write returned no results field"))?;
    if first == 0 {
        return Err(Error::Server(ServerError {
            error: true,
            code: 412,
            error_num: 1200,
            error_message: "precondition failed".into(),
        }));
    }
    Ok(())
}
