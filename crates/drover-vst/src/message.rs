//! In-flight message store.
//!
//! Maps message ids to partially assembled messages. Chunks may arrive in
//! any order; once the count announced by the first chunk is reached the
//! payloads are joined in index order and published over the message's
//! single-shot reply channel. Chunks for unknown ids are dropped silently
//! (spurious, or the waiter already gave up).

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use drover_core::{Error, Result};
use tokio::sync::oneshot;

use crate::chunk::Chunk;

struct Inflight {
    chunks: Vec<Chunk>,
    /// Announced by the first chunk; 0 until it arrives.
    expected: u32,
    message_length: u64,
    sender: Option<oneshot::Sender<Result<Bytes>>>,
}

/// Per-connection store of messages awaiting replies.
#[derive(Default)]
pub struct MessageStore {
    inner: DashMap<u64, Inflight>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight message and hand back its reply channel.
    ///
    /// Panics on duplicate ids: the id counter is monotonic, so a collision
    /// is a programmer error.
    pub fn add(&self, id: u64) -> oneshot::Receiver<Result<Bytes>> {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.insert(
            id,
            Inflight {
                chunks: Vec::new(),
                expected: 0,
                message_length: 0,
                sender: Some(tx),
            },
        );
        assert!(previous.is_none(), "duplicate message id {id}");
        rx
    }

    /// Drop an in-flight message; its waiter observes a closed channel.
    pub fn remove(&self, id: u64) {
        self.inner.remove(&id);
    }

    /// Fail an in-flight message with an explicit error (write failures).
    pub fn fail(&self, id: u64, err: Error) {
        if let Some((_, mut inflight)) = self.inner.remove(&id) {
            if let Some(tx) = inflight.sender.take() {
                let _ = tx.send(Err(err));
            }
        }
    }

    /// Number of in-flight messages. Doubles as the connection's load metric.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Route one incoming chunk. Returns the message id when the chunk
    /// completed a message.
    pub fn handle_chunk(&self, chunk: Chunk) -> Option<u64> {
        let id = chunk.message_id;
        let complete = {
            let mut entry = self.inner.get_mut(&id)?;
            if chunk.is_first() {
                entry.expected = chunk.number_of_chunks();
                entry.message_length = chunk.message_length;
            }
            entry.chunks.push(chunk);
            entry.expected > 0 && entry.chunks.len() == entry.expected as usize
        };
        if !complete {
            return None;
        }

        // Assemble outside the map entry lock.
        let (_, mut inflight) = self.inner.remove(&id)?;
        let data = if inflight.chunks.len() == 1 {
            inflight.chunks.pop().unwrap().data
        } else {
            inflight.chunks.sort_by_key(|c| c.index());
            let capacity = if inflight.message_length > 0 {
                inflight.message_length as usize
            } else {
                inflight.chunks.iter().map(|c| c.data.len()).sum()
            };
            let mut buf = BytesMut::with_capacity(capacity);
            for chunk in &inflight.chunks {
                buf.extend_from_slice(&chunk.data);
            }
            buf.freeze()
        };
        if let Some(tx) = inflight.sender.take() {
            let _ = tx.send(Ok(data));
        }
        Some(id)
    }

    /// Cancel every waiter. Used when the owning connection closes; waiters
    /// observe end-of-stream and translate it to a deadline error.
    pub fn close_all(&self) {
        self.inner.clear();
    }
}
