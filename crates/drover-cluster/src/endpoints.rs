//! Endpoint selection policies.
//!
//! A policy owns an immutable, ordered set of endpoints and decides which
//! one handles a given request. A non-empty pinned endpoint short-circuits
//! selection in every policy.

use std::sync::{Arc, Mutex};

use drover_core::request::split_db_path;
use drover_core::{Error, Method, Result};

/// Selection over a fixed endpoint set.
pub trait EndpointList: Send + Sync {
    /// Endpoint for one request. `pinned` is empty unless the caller pinned
    /// the request explicitly.
    fn get(&self, pinned: &str, method: Method, path: &str) -> Result<String>;

    fn list(&self) -> Vec<String>;
}

// ── Round-robin ───────────────────────────────────────────────────────────────

pub struct RoundRobin {
    endpoints: Vec<String>,
    index: Mutex<usize>,
}

impl RoundRobin {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::invalid_argument("endpoint list must not be empty"));
        }
        Ok(RoundRobin {
            endpoints,
            index: Mutex::new(0),
        })
    }
}

impl EndpointList for RoundRobin {
    fn get(&self, pinned: &str, _method: Method, _path: &str) -> Result<String> {
        if !pinned.is_empty() {
            return Ok(pinned.to_string());
        }
        let mut index = self.index.lock().unwrap();
        let endpoint = self.endpoints[*index % self.endpoints.len()].clone();
        *index = (*index + 1) % self.endpoints.len();
        Ok(endpoint)
    }

    fn list(&self) -> Vec<String> {
        self.endpoints.clone()
    }
}

// ── Consistent hash (Maglev) ──────────────────────────────────────────────────

/// Derives the routing key from a request.
pub type KeyExtractor = Arc<dyn Fn(Method, &str) -> String + Send + Sync>;

/// Default routing key: the database name for `/_db/<name>/...` paths,
/// otherwise `"<METHOD>_<path>"`.
pub fn request_db_name_value_extractor(method: Method, path: &str) -> String {
    match split_db_path(path) {
        Some((db, _)) => db,
        None => format!("{}_{}", method.as_str(), path),
    }
}

/// Maglev consistent-hash selection: a lookup table of prime size built from
/// per-endpoint preference permutations. The same key maps to the same
/// endpoint on every run, and table construction is independent of query
/// order.
pub struct MaglevHash {
    endpoints: Vec<String>,
    table: Vec<usize>,
    extractor: KeyExtractor,
}

impl MaglevHash {
    /// Build the policy with the default key extractor.
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        Self::with_extractor(endpoints, Arc::new(request_db_name_value_extractor))
    }

    pub fn with_extractor(mut endpoints: Vec<String>, extractor: KeyExtractor) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::invalid_argument("endpoint list must not be empty"));
        }
        // Sorted set: table construction must not depend on caller order.
        endpoints.sort();
        endpoints.dedup();
        let table = build_table(&endpoints);
        Ok(MaglevHash {
            endpoints,
            table,
            extractor,
        })
    }
}

impl EndpointList for MaglevHash {
    fn get(&self, pinned: &str, method: Method, path: &str) -> Result<String> {
        if !pinned.is_empty() && self.endpoints.iter().any(|e| e == pinned) {
            return Ok(pinned.to_string());
        }
        let key = (self.extractor)(method, path);
        let slot = (fnv1a(key.as_bytes()) % self.table.len() as u64) as usize;
        Ok(self.endpoints[self.table[slot]].clone())
    }

    fn list(&self) -> Vec<String> {
        self.endpoints.clone()
    }
}

/// Maglev table fill: each endpoint walks its preference permutation and
/// claims the next free slot in turn until the table is full.
fn build_table(endpoints: &[String]) -> Vec<usize> {
    let size = smallest_prime_at_least(endpoints.len());
    let permutations: Vec<(u64, u64)> = endpoints
        .iter()
        .map(|e| {
            let offset = fnv1a(e.as_bytes()) % size as u64;
            let skip = fnv1a_seeded(e.as_bytes(), 0x9e3779b97f4a7c15) % (size as u64 - 1).max(1) + 1;
            (offset, skip)
        })
        .collect();

    let mut table = vec![usize::MAX; size];
    let mut next = vec![0u64; endpoints.len()];
    let mut filled = 0;
    while filled < size {
        for (backend, (offset, skip)) in permutations.iter().enumerate() {
            loop {
                let slot = ((offset + next[backend] * skip) % size as u64) as usize;
                next[backend] += 1;
                if table[slot] == usize::MAX {
                    table[slot] = backend;
                    filled += 1;
                    break;
                }
            }
            if filled == size {
                break;
            }
        }
    }
    table
}

fn smallest_prime_at_least(n: usize) -> usize {
    let mut candidate = n.max(2);
    loop {
        if is_prime(candidate) {
            return candidate;
        }
        candidate += 1;
    }
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

fn fnv1a(data: &[u8]) -> u64 {
    fnv1a_seeded(data, 0xcbf29ce484222325)
}

fn fnv1a_seeded(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed;
    for &b in data {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
