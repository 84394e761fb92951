//! The request handlers making up the authentication state machine.
//!
//! State lives entirely in cookie presence and validity; each handler is a
//! pure function of (configuration, request) to a response. Within one
//! request, cookie validation strictly precedes any network call, and any
//! network call strictly precedes response generation. Handlers convert every
//! foreseeable failure into a typed response (redirect or error page) and
//! never propagate one to the platform.
//!
//! - `check_auth` gates every protected-resource request.
//! - `parse_auth` completes the OAuth2 Authorization-Code+PKCE callback.
//! - `refresh_auth` exchanges a refresh token without user interaction.
//! - `sign_out` clears the session and hands off to the IdP's logout.
//! - `http_headers` post-processes responses with the configured headers.

pub mod check_auth;
pub mod http_headers;
pub mod parse_auth;
pub mod refresh_auth;
pub mod sign_out;

use serde::{Deserialize, Serialize};

/// URL-encode key/value pairs into a query string, preserving pair order.
pub fn query_string(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// The OAuth2 `state` parameter: URL-safe base64 of this JSON document.
/// Field names are part of the wire format.
#[derive(Debug, Serialize, Deserialize)]
pub struct StateParam {
    pub nonce: String,
    #[serde(rename = "requestedUri")]
    pub requested_uri: String,
}
