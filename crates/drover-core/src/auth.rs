//! Authentication credential model.
//!
//! Credentials are data; attaching them to requests is the transports' and
//! wrappers' job. The JWT variant exchanges username/password for a token at
//! `/_open/auth` and tracks the token's expiry from its `exp` claim.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Path of the token-issuing endpoint.
pub const OPEN_AUTH_PATH: &str = "/_open/auth";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// `Authorization: Basic <base64(user:pass)>`.
    Basic { username: String, password: String },
    /// `Authorization: Bearer <token>` with a caller-supplied token.
    Bearer { token: String },
    /// Username/password exchanged for a short-lived bearer token.
    Jwt { username: String, password: String },
}

impl Authentication {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Authentication::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Authentication::Bearer {
            token: token.into(),
        }
    }

    pub fn jwt(username: impl Into<String>, password: impl Into<String>) -> Self {
        Authentication::Jwt {
            username: username.into(),
            password: password.into(),
        }
    }
}

pub fn basic_header(username: &str, password: &str) -> String {
    let raw = format!("{username}:{password}");
    format!("Basic {}", STANDARD.encode(raw))
}

pub fn bearer_header(token: &str) -> String {
    format!("Bearer {token}")
}

/// Fallback token lifetime when the `exp` claim cannot be parsed. Short on
/// purpose so a bad token is re-acquired quickly.
pub const JWT_FALLBACK_LIFETIME: Duration = Duration::from_secs(60);

/// Expiry instant from a JWT's `exp` claim, if the payload parses.
pub fn jwt_expiry(token: &str) -> Option<SystemTime> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_u64()?;
    Some(UNIX_EPOCH + Duration::from_secs(exp))
}
