//! HTTP Basic auth (§4.8).
//!
//! When credentials are configured every request is checked before its
//! handler runs; on mismatch the request never touches the filesystem or
//! the change bus.

use axum::http::HeaderMap;
use base64::Engine;

use crate::config::Config;
use crate::error::DavError;

/// Returns `Ok(())` when the request may proceed. When no credentials are
/// configured, auth is skipped entirely.
pub fn check(config: &Config, headers: &HeaderMap) -> Result<(), DavError> {
    let (Some(expected_user), Some(expected_pass)) =
        (config.username.as_deref(), config.password.as_deref())
    else {
        return Ok(());
    };

    let Some((user, pass)) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic)
    else {
        return Err(DavError::Unauthorized);
    };

    if constant_time_eq(user.as_bytes(), expected_user.as_bytes())
        && constant_time_eq(pass.as_bytes(), expected_pass.as_bytes())
    {
        Ok(())
    } else {
        Err(DavError::Unauthorized)
    }
}

fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
