//! Outbound calls to the identity provider's token endpoint.
//!
//! One client serves both exchanges: authorization code (+PKCE verifier) in
//! the callback handler, and refresh token in the refresh handler. Transient
//! failures are retried with exponential backoff and jitter; the caller only
//! sees the final outcome.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::Rng as _;
use serde::Deserialize;
use std::time::Duration;

use crate::error::AuthError;

/// Total attempts before the last error is raised to the caller.
const MAX_ATTEMPTS: u32 = 5;

/// Base unit for the backoff schedule.
const BACKOFF_UNIT_MS: f64 = 25.0;

/// Tokens returned by the token endpoint. A refresh exchange returns no new
/// refresh token; the provider does not rotate it in this flow.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub id_token: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `Basic` authorization header value for confidential clients.
pub fn basic_authorization(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", client_id, client_secret))
    )
}

/// URL-encode a form body from key/value pairs.
pub fn form_body(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Backoff before the given attempt number re-runs. The first two attempts go
/// back-to-back; later ones wait `25ms * (2^attempt + random * attempt)`.
fn backoff_delay(attempt: u32) -> Option<Duration> {
    if attempt < 2 {
        return None;
    }
    let jitter: f64 = rand::rng().random();
    let millis = BACKOFF_UNIT_MS * (2f64.powi(attempt as i32) + jitter * attempt as f64);
    Some(Duration::from_millis(millis as u64))
}

/// POST a URL-encoded form body, retrying up to [`MAX_ATTEMPTS`] times.
///
/// Non-final failures are logged at debug level with the response body when
/// one exists; the final failure is logged at error level and returned.
pub async fn http_post_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: &str,
    authorization: Option<&str>,
) -> Result<TokenResponse, AuthError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match post_once(client, url, body, authorization).await {
            Ok(tokens) => return Ok(tokens),
            Err(detail) => {
                tracing::debug!(url, attempts, %detail, "HTTP POST failed");
                if attempts >= MAX_ATTEMPTS {
                    tracing::error!(
                        url,
                        attempts,
                        "no success after {} attempts, ceasing further attempts",
                        attempts
                    );
                    return Err(AuthError::technical(detail));
                }
                if let Some(delay) = backoff_delay(attempts) {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn post_once(
    client: &reqwest::Client,
    url: &str,
    body: &str,
    authorization: Option<&str>,
) -> Result<TokenResponse, String> {
    let mut request = client
        .post(url)
        .header(
            http::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .body(body.to_string());
    if let Some(authorization) = authorization {
        request = request.header(http::header::AUTHORIZATION, authorization);
    }

    let response = request
        .send()
        .await
        .map_err(|err| format!("request to {} failed: {}", url, err))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("{} returned {}: {}", url, status, body));
    }

    response
        .json()
        .await
        .map_err(|err| format!("invalid token response from {}: {}", url, err))
}
