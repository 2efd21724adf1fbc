//! Temporary Flow token acquisition
//!
//! Exchanges the long-lived Speechmatics API key for a short-lived token
//! that can be placed in the Flow connection URL.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Temporary key endpoint
pub const TOKEN_API_URL: &str = "https://mp.speechmatics.com/v1/api_keys?type=flow";

/// Environment variable holding the long-lived API key
pub const API_KEY_ENV: &str = "SPEECHMATICS_API_KEY";

/// Global HTTP client for reuse across requests
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            })
    })
}

/// Errors that can occur while fetching a token
#[derive(Debug)]
pub enum TokenError {
    /// API key not configured
    MissingApiKey,
    /// Network/HTTP error
    NetworkError(String),
    /// The API returned an error
    ApiError { status: u16, message: String },
    /// Failed to parse API response
    ParseError(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::MissingApiKey => write!(
                f,
                "Speechmatics API key not configured. Set {} environment variable.",
                API_KEY_ENV
            ),
            TokenError::NetworkError(e) => write!(f, "Network error: {}", e),
            TokenError::ApiError { status, message } => {
                write!(f, "Token API error ({}): {}", status, message)
            }
            TokenError::ParseError(e) => write!(f, "Failed to parse token response: {}", e),
        }
    }
}

impl std::error::Error for TokenError {}

#[derive(Debug, Serialize)]
struct TokenRequest {
    ttl: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    key_value: String,
}

/// Get the API key from the environment
pub fn get_api_key() -> Option<String> {
    std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
}

/// Check if an API key is configured (for status display)
pub fn is_api_key_configured() -> bool {
    get_api_key().is_some()
}

/// Mint a temporary Flow token valid for `ttl_secs`
pub async fn fetch_token(api_key: &str, ttl_secs: u64) -> Result<String, TokenError> {
    fetch_token_from(TOKEN_API_URL, api_key, ttl_secs).await
}

/// Mint a temporary token from an explicit endpoint
pub async fn fetch_token_from(url: &str, api_key: &str, ttl_secs: u64) -> Result<String, TokenError> {
    if api_key.trim().is_empty() {
        return Err(TokenError::MissingApiKey);
    }

    log::info!("Requesting temporary Flow token (ttl {}s)", ttl_secs);

    let response = get_http_client()
        .post(url)
        .bearer_auth(api_key)
        .json(&TokenRequest { ttl: ttl_secs })
        .send()
        .await
        .map_err(|e| TokenError::NetworkError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        log::error!("Token API error ({}): {}", status.as_u16(), message);
        return Err(TokenError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| TokenError::ParseError(e.to_string()))?;

    if body.key_value.is_empty() {
        return Err(TokenError::ParseError("empty key_value".to_string()));
    }

    log::info!("Temporary Flow token acquired");
    Ok(body.key_value)
}
