//! drover-cluster — endpoint selection, cluster failover dispatch, and the
//! agency (conditional-write KV store, TTL lock, agent health).

pub mod agency;
pub mod endpoints;
pub mod failover;

pub use agency::{are_agents_healthy, Agency, AgencyLock, Transaction};
pub use endpoints::{
    request_db_name_value_extractor, EndpointList, KeyExtractor, MaglevHash, RoundRobin,
};
pub use failover::ClusterConnection;
