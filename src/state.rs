//! Shared application state for request handlers.

use std::sync::Arc;

use crate::config::Config;
use crate::jwt::JwksCache;

/// Shared state, cloneable across handlers. The configuration is immutable
/// after startup; the JWKS cache and the HTTP client are the only pieces
/// shared across invocations, and both are internally synchronized.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwks: JwksCache,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let jwks = JwksCache::new(http.clone(), config.token_jwks_uri.clone());
        Ok(Self {
            config: Arc::new(config),
            jwks,
            http,
        })
    }
}
