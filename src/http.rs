//! Shared plumbing for the HTTP-backed provider adapters.
//!
//! Every adapter classifies failures the same way:
//! - client-side deadline → `Timeout`
//! - connection errors, HTTP 429 and 5xx → `Transient` (retried)
//! - any other 4xx → `Rejected` (not retried)
//! - an unparseable success body → `Malformed`

use std::time::Duration;

use ragvault_core::error::{ProviderErrorKind, Result, VaultError};

const MAX_ERROR_BODY_CHARS: usize = 500;

pub fn build_client(provider: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| {
            VaultError::configuration(format!("failed to build {} HTTP client: {}", provider, e))
        })
}

/// Read an API key from the named environment variable.
pub fn api_key_from_env(provider: &str, var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(VaultError::configuration(format!(
            "{} environment variable not set (required by {})",
            var, provider
        ))),
    }
}

pub fn transport_error(provider: &str, err: &reqwest::Error) -> VaultError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Transient
    };
    VaultError::provider(provider, kind, err.to_string())
}

pub fn status_kind(status: reqwest::StatusCode) -> ProviderErrorKind {
    match status.as_u16() {
        408 | 504 => ProviderErrorKind::Timeout,
        429 => ProviderErrorKind::Transient,
        s if s >= 500 => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Rejected,
    }
}

/// Turn a non-success response into a typed provider error.
pub async fn status_error(provider: &str, response: reqwest::Response) -> VaultError {
    let status = response.status();
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect();
    VaultError::provider(
        provider,
        status_kind(status),
        format!("API error {}: {}", status, body),
    )
}

pub fn malformed(provider: &str, message: impl Into<String>) -> VaultError {
    VaultError::provider(provider, ProviderErrorKind::Malformed, message)
}

/// Send a JSON request and decode a JSON response, classifying failures.
pub async fn send_json(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, &e))?;
    if !response.status().is_success() {
        return Err(status_error(provider, response).await);
    }
    response.json::<serde_json::Value>().await.map_err(|e| {
        if e.is_timeout() {
            transport_error(provider, &e)
        } else {
            malformed(provider, format!("invalid JSON response: {}", e))
        }
    })
}

/// Parse a JSON array of numbers into an f32 vector.
pub fn parse_vector(provider: &str, value: &serde_json::Value) -> Result<Vec<f32>> {
    let arr = value
        .as_array()
        .ok_or_else(|| malformed(provider, "embedding is not an array"))?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| malformed(provider, "embedding contains a non-number"))
        })
        .collect()
}
