//! ID token decoding and verification.
//!
//! Two trust levels exist and must not be confused:
//! - [`decode_claims`] reads the payload without any signature check. Only
//!   safe for expiry pre-screening and for deriving cookie names after a
//!   token has been verified elsewhere.
//! - [`JwksCache::validate`] verifies signature, issuer, audience and expiry
//!   against the identity provider's published key set.
//!
//! The JWKS cache is created once per process and lives in `AppState`. The
//! key-set document is cached whole with a short TTL and kids are resolved
//! from it, so neither a burst of cold traffic nor a stream of tokens with
//! unknown kids can hammer the JWKS origin; concurrent misses are coalesced
//! into a single fetch. Resolved keys get a longer TTL of their own.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use moka::future::Cache;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AuthError;

/// How long a resolved signing key stays cached. Cognito rotates keys rarely.
const KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

/// How long the fetched JWKS document stays cached. Unknown kids fail from
/// the cached document instead of refetching, so a flood of bogus tokens
/// cannot drive one IdP round-trip per request; a freshly rotated key shows
/// up after at most this long.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(60);

const KEY_CACHE_CAPACITY: u64 = 16;

/// Decoded ID token payload.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub aud: String,
    pub token_use: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "cognito:username")]
    pub username: Option<String>,
    #[serde(rename = "cognito:groups")]
    pub groups: Option<Vec<String>>,
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub name: Option<String>,
}

/// Decode the claims of a compact JWT without verifying the signature.
pub fn decode_claims(token: &str) -> Result<IdentityClaims, AuthError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::technical("Cannot parse JWT token"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|err| AuthError::technical(format!("Cannot parse JWT token: {}", err)))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| AuthError::technical(format!("Cannot parse JWT claims: {}", err)))
}

/// Process-wide cache of the identity provider's signing keys.
///
/// Cheap to clone; the cache and HTTP client are shared behind the clone.
#[derive(Clone)]
pub struct JwksCache {
    http: reqwest::Client,
    jwks_uri: String,
    documents: Cache<String, Arc<JwkSet>>,
    keys: Cache<String, Arc<DecodingKey>>,
}

impl JwksCache {
    pub fn new(http: reqwest::Client, jwks_uri: String) -> Self {
        let documents = Cache::builder()
            .max_capacity(1)
            .time_to_live(JWKS_CACHE_TTL)
            .build();
        let keys = Cache::builder()
            .max_capacity(KEY_CACHE_CAPACITY)
            .time_to_live(KEY_CACHE_TTL)
            .build();
        Self {
            http,
            jwks_uri,
            documents,
            keys,
        }
    }

    /// Resolve the signing key for a kid from the cached JWKS document. A kid
    /// absent from the document is an error until the document's TTL expires;
    /// it does not trigger another fetch.
    async fn signing_key(&self, kid: &str) -> Result<Arc<DecodingKey>, AuthError> {
        if let Some(key) = self.keys.get(kid).await {
            return Ok(key);
        }

        let jwks = self.document().await?;
        let jwk = jwks
            .find(kid)
            .ok_or_else(|| AuthError::technical(format!("No key with kid '{}' in JWKS", kid)))?;

        let key = match &jwk.algorithm {
            AlgorithmParameters::RSA(params) => DecodingKey::from_rsa_components(
                &params.n, &params.e,
            )
            .map(Arc::new)
            .map_err(|err| AuthError::technical(format!("Malformed RSA key '{}': {}", kid, err)))?,
            _ => {
                return Err(AuthError::technical(format!(
                    "Key '{}' is not an RSA key with an exposed public key",
                    kid
                )))
            }
        };

        self.keys.insert(kid.to_string(), key.clone()).await;
        Ok(key)
    }

    /// The JWKS document, fetched at most once per TTL window. Concurrent
    /// misses share one fetch.
    async fn document(&self) -> Result<Arc<JwkSet>, AuthError> {
        self.documents
            .try_get_with(self.jwks_uri.clone(), self.fetch_document())
            .await
            .map_err(|err: Arc<AuthError>| AuthError::technical(err.to_string()))
    }

    async fn fetch_document(&self) -> Result<Arc<JwkSet>, AuthError> {
        tracing::debug!(uri = %self.jwks_uri, "fetching JWKS document");
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|err| AuthError::technical(format!("JWKS fetch failed: {}", err)))?;
        if !response.status().is_success() {
            return Err(AuthError::technical(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map(Arc::new)
            .map_err(|err| AuthError::technical(format!("Invalid JWKS document: {}", err)))
    }

    /// Verify signature, issuer, audience and expiry in one step.
    pub async fn validate(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
    ) -> Result<(), AuthError> {
        let header = decode_header(token)
            .map_err(|err| AuthError::technical(format!("Cannot parse JWT token: {}", err)))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::technical("JWT header carries no kid"))?;

        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.validate_exp = true;

        decode::<serde_json::Value>(token, &key, &validation)
            .map(|_| ())
            .map_err(|err| AuthError::technical(format!("Token validation failed: {}", err)))
    }
}
