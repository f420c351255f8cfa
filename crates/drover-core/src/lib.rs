//! drover-core — shared types for the Drover client: request/response model,
//! the connection contract, body codecs, errors, and configuration.
//! All other Drover crates depend on this one.

pub mod auth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod request;
pub mod response;
pub mod vpack;

pub use auth::Authentication;
pub use codec::ContentType;
pub use connection::Connection;
pub use error::{Error, Result, ServerError};
pub use request::{Body, Method, Request, RequestOptions};
pub use response::Response;
