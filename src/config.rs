//! Configuration loading and derivation.
//!
//! The configuration blob is produced by an external provisioning step and
//! delivered as a JSON document at a fixed, trusted location. It is read once
//! at startup, never mutated, and threaded into every handler via `AppState`.
//!
//! On top of the stored fields we derive the token issuer and JWKS URL from
//! the user pool id (its region prefix determines the Cognito IdP host), the
//! token endpoint from the auth domain, and the nonce max-age from the nonce
//! cookie's own Max-Age attribute.

use serde::Deserialize;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/gatehouse.json";

/// Default directory with the protected static content
pub const DEFAULT_STATIC_ROOT: &str = "public";

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Default log filter when neither the config nor RUST_LOG says otherwise
pub const DEFAULT_LOG_FILTER: &str = "gatehouse=info,tower_http=warn";

/// Fallback nonce max-age when the nonce cookie attributes carry no Max-Age
pub const DEFAULT_NONCE_MAX_AGE: u64 = 86400;

/// Cookie attribute strings per token kind, e.g.
/// `"Path=/; Secure; HttpOnly; SameSite=Lax"`. These are appended verbatim to
/// the generated Set-Cookie values.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSettings {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub nonce: String,
}

/// The provisioned configuration document, exactly as stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConfig {
    pub user_pool_id: String,
    pub client_id: String,
    /// Empty string means the client has no secret (no Basic auth header on
    /// token endpoint calls).
    #[serde(default)]
    pub client_secret: String,
    pub oauth_scopes: Vec<String>,
    /// Hostname of the Cognito hosted UI, e.g. `auth.example.com` or
    /// `<domain>.auth.<region>.amazoncognito.com`.
    pub cognito_auth_domain: String,
    pub callback_path: String,
    pub sign_out_redirect_to: String,
    pub sign_out_path: String,
    pub refresh_auth_path: String,
    pub cookie_settings: CookieSettings,
    /// Extra headers injected onto every outgoing response.
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    pub nonce_signing_secret: String,
    /// One of none, error, warn, info, debug.
    #[serde(default = "StoredConfig::default_log_level")]
    pub log_level: String,
    /// Restrict access to users in any of these groups. Absent = no
    /// group restriction.
    #[serde(default)]
    pub require_group_any_of: Option<Vec<String>>,
}

impl StoredConfig {
    fn default_log_level() -> String {
        "warn".to_string()
    }
}

/// Stored configuration plus derived fields. Immutable after load.
#[derive(Debug, Clone)]
pub struct Config {
    pub stored: StoredConfig,
    /// Issuer all tokens must be signed by, derived from the user pool id.
    pub token_issuer: String,
    /// JWKS document location, derived from the issuer.
    pub token_jwks_uri: String,
    /// Token endpoint on the hosted UI domain.
    pub token_endpoint: String,
    /// Maximum accepted nonce age in seconds, taken from the nonce cookie's
    /// own Max-Age attribute.
    pub nonce_max_age: u64,
}

impl Deref for Config {
    type Target = StoredConfig;

    fn deref(&self) -> &StoredConfig {
        &self.stored
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let stored: StoredConfig = serde_json::from_str(&contents)?;
        Self::from_stored(stored)
    }

    pub fn from_stored(stored: StoredConfig) -> Result<Self, ConfigError> {
        // The region is the pool id prefix before the underscore,
        // e.g. "eu-west-1_abc123" -> "eu-west-1".
        let region = stored
            .user_pool_id
            .split_once('_')
            .map(|(region, _)| region)
            .filter(|region| !region.is_empty())
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "userPoolId '{}' does not match '<region>_<id>'",
                    stored.user_pool_id
                ))
            })?;

        let token_issuer = format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            region, stored.user_pool_id
        );
        let token_jwks_uri = format!("{}/.well-known/jwks.json", token_issuer);

        // An auth domain that already carries a scheme is used verbatim
        // (hosted UIs are plain hostnames; explicit schemes appear in tests).
        let auth_base = if stored.cognito_auth_domain.contains("://") {
            stored.cognito_auth_domain.clone()
        } else {
            format!("https://{}", stored.cognito_auth_domain)
        };
        let token_endpoint = format!("{}/oauth2/token", auth_base);

        let nonce_max_age = max_age_from_attributes(&stored.cookie_settings.nonce)
            .unwrap_or(DEFAULT_NONCE_MAX_AGE);

        Ok(Self {
            stored,
            token_issuer,
            token_jwks_uri,
            token_endpoint,
            nonce_max_age,
        })
    }

    /// Region the user pool lives in, for diagnostics only.
    pub fn region(&self) -> &str {
        self.user_pool_id
            .split_once('_')
            .map(|(region, _)| region)
            .unwrap_or("")
    }

    /// Base URL of the hosted UI, scheme included.
    pub fn auth_base_url(&self) -> String {
        if self.cognito_auth_domain.contains("://") {
            self.cognito_auth_domain.clone()
        } else {
            format!("https://{}", self.cognito_auth_domain)
        }
    }

    /// Tracing filter directive derived from the configured log level.
    pub fn log_filter(&self) -> String {
        let level = match self.log_level.as_str() {
            "none" => "off",
            "error" => "error",
            "warn" => "warn",
            "info" => "info",
            "debug" => "debug",
            other => {
                tracing::warn!(level = %other, "unknown logLevel, falling back to warn");
                "warn"
            }
        };
        format!("gatehouse={},tower_http=warn", level)
    }
}

/// Pull a Max-Age value out of a cookie attribute string.
fn max_age_from_attributes(attributes: &str) -> Option<u64> {
    attributes.split(';').find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
