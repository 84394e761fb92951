//! CSRF nonce and PKCE utilities for the sign-in round trip.
//!
//! The nonce is a single-use, timestamped value (`<epochSeconds>T<32 hex>`)
//! accompanied by an HMAC-SHA256 over it keyed with the pre-distributed
//! signing secret. Both travel as cookies across the redirect to the hosted
//! UI and are re-validated when the callback comes in. The PKCE verifier and
//! challenge bind the authorization code to this browser.
//!
//! Also home to the URL-safe base64 helpers used for the OAuth `state` blob:
//! the hosted UI URL-decodes the state parameter, so a plain base64 `+` would
//! be mangled in transit. The replacement alphabet (`-` and `_`, padding
//! stripped) survives both URL decoding and cookie storage.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::Rng as _;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

fn timestamp_in_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate a fresh nonce: unix seconds, a `T` separator, 16 random bytes hex.
pub fn generate_nonce() -> String {
    let random: [u8; 16] = rand::rng().random();
    format!("{}T{}", timestamp_in_seconds(), hex::encode(random))
}

/// Hex HMAC-SHA256 over the nonce, keyed with the configured signing secret.
pub fn create_nonce_hmac(nonce: &str, config: &Config) -> String {
    let mut mac = HmacSha256::new_from_slice(config.nonce_signing_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(nonce.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Reject nonces whose leading timestamp is unparsable or older than
/// `max_age` seconds.
pub fn check_nonce_age(nonce: &str, max_age: u64) -> Result<(), AuthError> {
    let timestamp: u64 = nonce
        .split_once('T')
        .and_then(|(ts, _)| ts.parse().ok())
        .ok_or_else(|| AuthError::client("Invalid nonce"))?;

    if timestamp_in_seconds().saturating_sub(timestamp) > max_age {
        return Err(AuthError::client(format!(
            "Nonce is too old (nonce is from epoch second {})",
            timestamp
        )));
    }
    Ok(())
}

/// Full nonce validation: age first, then HMAC equality. The age check bounds
/// the replay window, so a plain string compare of the hex HMACs suffices.
pub fn validate_nonce(nonce: &str, provided_hmac: &str, config: &Config) -> Result<(), AuthError> {
    check_nonce_age(nonce, config.nonce_max_age)?;

    let calculated_hmac = create_nonce_hmac(nonce, config);
    if calculated_hmac != provided_hmac {
        return Err(AuthError::client(format!(
            "Nonce signature mismatch! Expected {} but got {}",
            calculated_hmac, provided_hmac
        )));
    }
    Ok(())
}

/// A PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// 26 random bytes hex-encoded: 52 chars, inside the 43..=128 requirement.
    pub verifier: String,
    /// Unpadded base64url of SHA256(verifier).
    pub challenge: String,
}

pub fn generate_pkce_pair() -> PkcePair {
    let random: [u8; 26] = rand::rng().random();
    let verifier = hex::encode(random);
    let challenge = pkce_challenge(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Encode bytes with the URL- and cookie-safe base64 alphabet
/// (`=` stripped, `+` -> `-`, `/` -> `_`).
pub fn safe_base64_encode(value: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(value)
}

/// Decode a value produced by [`safe_base64_encode`].
pub fn safe_base64_decode(value: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|err| AuthError::client(format!("Invalid base64 value: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StoredConfig};

    fn test_config(secret: &str, nonce_attrs: &str) -> Config {
        let stored: StoredConfig = serde_json::from_value(serde_json::json!({
            "userPoolId": "eu-west-1_abc123",
            "clientId": "client123",
            "oauthScopes": ["openid"],
            "cognitoAuthDomain": "auth.example.com",
            "callbackPath": "/auth/callback",
            "signOutRedirectTo": "/",
            "signOutPath": "/auth/sign-out",
            "refreshAuthPath": "/auth/refresh",
            "cookieSettings": {
                "idToken": "Path=/",
                "accessToken": "Path=/",
                "refreshToken": "Path=/",
                "nonce": nonce_attrs
            },
            "nonceSigningSecret": secret
        }))
        .unwrap();
        Config::from_stored(stored).unwrap()
    }

    #[test]
    fn nonce_shape() {
        let nonce = generate_nonce();
        let (ts, random) = nonce.split_once('T').unwrap();
        assert!(ts.parse::<u64>().is_ok());
        assert_eq!(random.len(), 32);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nonce_round_trip_validates() {
        let config = test_config("secret", "Path=/; Max-Age=3600");
        let nonce = generate_nonce();
        let hmac = create_nonce_hmac(&nonce, &config);
        assert!(validate_nonce(&nonce, &hmac, &config).is_ok());
    }

    #[test]
    fn hmac_from_other_secret_is_rejected() {
        let config = test_config("secret", "Path=/; Max-Age=3600");
        let other = test_config("other-secret", "Path=/; Max-Age=3600");
        let nonce = generate_nonce();
        let hmac = create_nonce_hmac(&nonce, &other);
        let err = validate_nonce(&nonce, &hmac, &config).unwrap_err();
        assert!(err.is_client());
        assert!(err.to_string().contains("signature mismatch"));
    }

    #[test]
    fn stale_nonce_is_rejected() {
        let config = test_config("secret", "Path=/; Max-Age=60");
        let old = timestamp_in_seconds() - 120;
        let nonce = format!("{}Taabbccddeeff00112233445566778899", old);
        let hmac = create_nonce_hmac(&nonce, &config);
        let err = validate_nonce(&nonce, &hmac, &config).unwrap_err();
        assert!(err.to_string().contains("too old"));
    }

    #[test]
    fn unparsable_nonce_is_rejected() {
        assert!(check_nonce_age("garbage", 3600).is_err());
        assert!(check_nonce_age("notanumberTdeadbeef", 3600).is_err());
    }

    #[test]
    fn pkce_verifier_length_within_rfc_bounds() {
        let pair = generate_pkce_pair();
        assert_eq!(pair.verifier.len(), 52);
        assert!((43..=128).contains(&pair.verifier.len()));
        assert!(!pair.challenge.contains('='));
        assert!(!pair.challenge.contains('+'));
        assert!(!pair.challenge.contains('/'));
    }

    #[test]
    fn pkce_challenge_matches_rfc7636_vector() {
        // Appendix B of RFC 7636.
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn safe_base64_round_trip() {
        let payload = br#"{"nonce":"1T00","requestedUri":"/a?b=c&d=e"}"#;
        let encoded = safe_base64_encode(payload);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        assert_eq!(safe_base64_decode(&encoded).unwrap(), payload);
    }
}
