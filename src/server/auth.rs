//! API key extraction.
//!
//! OpenAI clients send `Authorization: Bearer <key>`, Anthropic clients send
//! `x-api-key: <key>`. Either is accepted on every route.

use axum::http::header::{HeaderMap, AUTHORIZATION};

use crate::config::AuthConfig;
use crate::error::EndpointError;

pub const X_API_KEY: &str = "x-api-key";

/// Pull the caller's key out of the request headers.
///
/// A missing header and a header with an empty value are reported
/// differently so misconfigured clients are easy to spot.
pub fn extract_api_key(headers: &HeaderMap) -> Result<&str, EndpointError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let raw = value.to_str().map_err(|_| {
            EndpointError::Unauthorized("Authorization header is not valid ASCII".to_string())
        })?;
        let key = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        if key.is_empty() {
            return Err(EndpointError::Unauthorized(
                "Authorization header exists but no API key associated with it".to_string(),
            ));
        }
        return Ok(key);
    }

    if let Some(value) = headers.get(X_API_KEY) {
        let key = value
            .to_str()
            .map_err(|_| {
                EndpointError::Unauthorized("x-api-key header is not valid ASCII".to_string())
            })?
            .trim();
        if key.is_empty() {
            return Err(EndpointError::Unauthorized(
                "x-api-key exists but no value associated with it".to_string(),
            ));
        }
        return Ok(key);
    }

    Err(EndpointError::Unauthorized(
        "No API key provided. Send it as `Authorization: Bearer <key>` or `x-api-key: <key>`."
            .to_string(),
    ))
}

/// Apply the configured key policy to a request.
pub fn authorize(config: &AuthConfig, headers: &HeaderMap) -> Result<(), EndpointError> {
    if !config.required {
        return Ok(());
    }
    let key = extract_api_key(headers)?;
    if config.api_keys.is_empty() || config.api_keys.iter().any(|k| k == key) {
        Ok(())
    } else {
        Err(EndpointError::Unauthorized("Incorrect API key provided".to_string()))
    }
}
