//! Error model shared by every Drover transport and wrapper.
//!
//! One enum carries every failure kind the client can surface. Wrappers may
//! nest errors (`Response` wraps a transport failure that happened after the
//! request hit the wire); the `is_*` predicates walk that nesting so callers
//! can test a deep error without knowing which layer produced it.

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

/// Structured error body returned by the server:
/// `{error, code, errorNum, errorMessage}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub error: bool,
    /// HTTP status code the server attached to the error.
    #[serde(default)]
    pub code: u16,
    /// Server-internal error number, stable across releases.
    #[serde(default, rename = "errorNum")]
    pub error_num: i64,
    #[serde(default, rename = "errorMessage")]
    pub error_message: String,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "server error {} (errorNum {}): {}",
            self.code, self.error_num, self.error_message
        )
    }
}

// errorNum values with a fixed kind mapping.
const NUM_NOT_FOUND: [i64; 2] = [1202, 1203];
const NUM_CONFLICT: [i64; 2] = [1210, 1702];
const NUM_PRECONDITION: [i64; 2] = [1200, 1210];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller abandoned the operation.
    #[error("operation canceled")]
    Canceled,

    /// A per-attempt or overall deadline elapsed, or a reply channel closed
    /// before delivering a value.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Programmer error: bad method, unknown endpoint, empty endpoint list.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Encode/decode failure in a codec.
    #[error("codec error: {0}")]
    Codec(String),

    /// The server rejected the request with a structured error body.
    #[error("{0}")]
    Server(ServerError),

    /// The request was fully written but the exchange still failed at the
    /// transport level. Distinct from [`Error::Server`] so dispatchers can
    /// tell a server rejection from a network event.
    #[error("response error on {endpoint}: {source}")]
    Response {
        endpoint: String,
        #[source]
        source: Box<Error>,
    },

    #[error("no leader")]
    NoLeader,

    #[error("leadership challenge ongoing")]
    LeadershipChallengeOngoing,

    /// Terminal signal for iterator-style readers.
    #[error("no more documents")]
    NoMoreDocuments,

    #[error("already locked")]
    AlreadyLocked,

    #[error("not locked")]
    NotLocked,

    /// An asynchronously submitted request was accepted; poll with the id.
    #[error("async job {0} in progress")]
    JobInProgress(String),

    /// An agency key read found nothing at the requested path.
    #[error("key not found: {0}")]
    KeyNotFound(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Error::Codec(msg.into())
    }

    /// Wrap a transport failure that happened after the request was written.
    pub fn response(endpoint: impl Into<String>, source: Error) -> Self {
        Error::Response {
            endpoint: endpoint.into(),
            source: Box::new(source),
        }
    }

    /// Innermost error, unwrapping any [`Error::Response`] nesting.
    pub fn root(&self) -> &Error {
        match self {
            Error::Response { source, .. } => source.root(),
            other => other,
        }
    }

    fn server(&self) -> Option<&ServerError> {
        match self.root() {
            Error::Server(e) => Some(e),
            _ => None,
        }
    }
}

pub fn is_canceled(err: &Error) -> bool {
    matches!(err.root(), Error::Canceled)
}

pub fn is_deadline_exceeded(err: &Error) -> bool {
    matches!(err.root(), Error::DeadlineExceeded)
}

pub fn is_invalid_argument(err: &Error) -> bool {
    matches!(err.root(), Error::InvalidArgument(_))
}

pub fn is_response_error(err: &Error) -> bool {
    matches!(err, Error::Response { .. })
}

pub fn is_not_found(err: &Error) -> bool {
    matches!(err.root(), Error::KeyNotFound(_))
        || err
            .server()
            .is_some_and(|e| e.code == 404 || NUM_NOT_FOUND.contains(&e.error_num))
}

pub fn is_conflict(err: &Error) -> bool {
    err.server()
        .is_some_and(|e| e.code == 409 || NUM_CONFLICT.contains(&e.error_num))
}

pub fn is_precondition_failed(err: &Error) -> bool {
    err.server()
        .is_some_and(|e| e.code == 412 || NUM_PRECONDITION.contains(&e.error_num))
}

pub fn is_unauthorized(err: &Error) -> bool {
    err.server().is_some_and(|e| e.code == 401)
}

pub fn is_forbidden(err: &Error) -> bool {
    err.server().is_some_and(|e| e.code == 403)
}

pub fn is_already_locked(err: &Error) -> bool {
    matches!(err.root(), Error::AlreadyLocked)
}

pub fn is_not_locked(err: &Error) -> bool {
    matches!(err.root(), Error::NotLocked)
}

pub fn is_key_not_found(err: &Error) -> bool {
    matches!(err.root(), Error::KeyNotFound(_))
}

pub fn is_no_more_documents(err: &Error) -> bool {
    matches!(err.root(), Error::NoMoreDocuments)
}

/// Extract the job id if `err` signals an async job still in progress.
pub fn job_in_progress_id(err: &Error) -> Option<&str> {
    match err.root() {
        Error::JobInProgress(id) => Some(id),
        _ => None,
    }
}
