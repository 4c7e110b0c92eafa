//! HTTP utilities for Cloud Controller and UAA REST calls

use crate::error::{CfError, CfResult};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Default per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for Cloud Controller API calls
#[derive(Clone)]
pub struct CfHttpClient {
    client: Client,
}

impl CfHttpClient {
    /// Create a new HTTP client
    pub fn new() -> CfResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("cfkit/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// Access the underlying reqwest client (used by the token manager)
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GET a resource with query parameters
    pub async fn get(&self, url: &str, token: &str, query: &[(String, String)]) -> CfResult<Value> {
        tracing::debug!("GET {}", url);
        let request = self.client.get(url).bearer_auth(token).query(query);
        Self::send(request).await
    }

    /// GET without authentication (info endpoints)
    pub async fn get_anonymous(&self, url: &str) -> CfResult<Value> {
        tracing::debug!("GET {} (anonymous)", url);
        Self::send(self.client.get(url)).await
    }

    /// POST a JSON body
    pub async fn post(&self, url: &str, token: &str, body: &Value) -> CfResult<Value> {
        tracing::debug!("POST {}", url);
        let request = self.client.post(url).bearer_auth(token).json(body);
        Self::send(request).await
    }

    /// PATCH a JSON body
    pub async fn patch(&self, url: &str, token: &str, body: &Value) -> CfResult<Value> {
        tracing::debug!("PATCH {}", url);
        let request = self.client.patch(url).bearer_auth(token).json(body);
        Self::send(request).await
    }

    /// PUT a JSON body (V2 updates)
    pub async fn put(&self, url: &str, token: &str, body: &Value) -> CfResult<Value> {
        tracing::debug!("PUT {}", url);
        let request = self.client.put(url).bearer_auth(token).json(body);
        Self::send(request).await
    }

    /// DELETE a resource
    pub async fn delete(&self, url: &str, token: &str) -> CfResult<Value> {
        tracing::debug!("DELETE {}", url);
        Self::send(self.client.delete(url).bearer_auth(token)).await
    }

    async fn send(request: RequestBuilder) -> CfResult<Value> {
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(CfError::from_status(status, &body));
        }

        // Handle empty response (204, async 202 without body)
        if body.is_empty() || status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Format a client error for display
/// Security: Keeps messages short and free of raw API payloads
pub fn format_cf_error(error: &CfError) -> String {
    match error {
        CfError::Unauthorized(_) => {
            "Permission denied. Check your space roles and login.".to_string()
        },
        CfError::AuthenticationFailed(_) => {
            "Authentication failed. Check your username, password and origin.".to_string()
        },
        CfError::Transient { status, .. } => {
            format!("Cloud Controller temporarily unavailable ({}). Please try again.", status)
        },
        CfError::Http(e) if e.is_timeout() => "Request timed out. Please try again.".to_string(),
        CfError::Http(_) => {
            "Request failed. Check your network connection and try again.".to_string()
        },
        other => {
            let message = other.to_string();
            let sanitized = message
                .chars()
                .filter(|c| c.is_ascii_graphic() || *c == ' ')
                .take(120)
                .collect::<String>();

            if sanitized.len() < message.len() {
                format!("{}...", sanitized)
            } else {
                sanitized
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.starts_with(&"x".repeat(200)));
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }

    #[test]
    fn test_format_not_found() {
        let message = format_cf_error(&CfError::not_found("app", "web"));
        assert_eq!(message, "Not found: app 'web' not found");
    }
}
