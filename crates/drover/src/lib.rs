//! drover — a Rust client core for ArangoDB.
//!
//! Transports (HTTP/1.1, HTTP/2, VelocyStream) implement one connection
//! contract; cross-cutting behavior composes as a decorator chain on top:
//!
//! ```text
//! retry -> async jobs -> re-auth / jwt -> cluster failover -> transport
//! ```
//!
//! [`ClientBuilder`] assembles the usual stack; each layer is also usable on
//! its own.

pub mod client;
pub mod jobs;
pub mod jwt;
pub mod reauth;
pub mod retry;

pub use client::{Client, ClientBuilder, LoadBalancing, VersionInfo};
pub use jobs::AsyncJobConnection;
pub use jwt::JwtConnection;
pub use reauth::{AuthenticationGetter, ReauthConnection};
pub use retry::{retry_on_503, RetryConnection, RetryPredicate};

pub use drover_cluster::{
    are_agents_healthy, Agency, AgencyLock, ClusterConnection, EndpointList, MaglevHash,
    RoundRobin, Transaction,
};
pub use drover_core::{
    error, Authentication, Body, Connection, ContentType, Error, Method, Request, RequestOptions,
    Response, Result, ServerError,
};
pub use drover_http::{Compression, HttpTransport, HttpTransportConfig, QueueTimeLimit};
pub use drover_vst::{VstTransport, VstTransportConfig};
