//! Session cookie parsing and generation.
//!
//! Cookie names and semantics stay byte-compatible with the Amplify JS SDK so
//! that client-side code sharing the same user pool can read the session
//! without modification:
//!
//! `CognitoIdentityServiceProvider.<clientId>.<username>.<idToken|accessToken|refreshToken|tokenScopesString|userData>`
//! plus `CognitoIdentityServiceProvider.<clientId>.LastAuthUser` and the
//! `amplify-signin-with-hostedUI` flag.
//!
//! The nonce, nonce-HMAC and PKCE cookies carry fixed names of our own; they
//! are single-use and get expired on every cookie-generation call.

use cookie::Cookie;
use http::header::COOKIE;
use http::HeaderMap;
use std::collections::HashMap;

use crate::config::Config;
use crate::error::AuthError;
use crate::jwt::decode_claims;

pub const COOKIE_PREFIX: &str = "CognitoIdentityServiceProvider";
pub const NONCE_COOKIE: &str = "spa-auth-edge-nonce";
pub const NONCE_HMAC_COOKIE: &str = "spa-auth-edge-nonce-hmac";
pub const PKCE_COOKIE: &str = "spa-auth-edge-pkce";

const AMPLIFY_HOSTED_UI_FLAG: &str = "amplify-signin-with-hostedUI";
const EXPIRE_IMMEDIATELY: &str = "Expires=Thu, 01 Jan 1970 00:00:00 GMT";

/// Everything we may find in a request's cookies. Absent cookies are `None`;
/// without a LastAuthUser cookie every token lookup yields nothing.
#[derive(Debug, Default, Clone)]
pub struct SessionCookies {
    pub token_user_name: Option<String>,
    pub id_token: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub scopes: Option<String>,
    pub nonce: Option<String>,
    pub nonce_hmac: Option<String>,
    pub pkce: Option<String>,
}

/// Merge every `cookie` header occurrence into one name -> value map.
/// On a duplicate name the later occurrence wins, matching header order.
fn cookies_from_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut merged = HashMap::new();
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for cookie in Cookie::split_parse_encoded(raw.to_string()).flatten() {
            merged.insert(cookie.name().to_string(), cookie.value().to_string());
        }
    }
    merged
}

pub fn extract_and_parse_cookies(headers: &HeaderMap, client_id: &str) -> SessionCookies {
    let mut cookies = cookies_from_headers(headers);

    let key_prefix = format!("{}.{}", COOKIE_PREFIX, client_id);
    let token_user_name = cookies.remove(&format!("{}.LastAuthUser", key_prefix));
    let user = token_user_name.as_deref().unwrap_or("");

    SessionCookies {
        id_token: cookies.remove(&format!("{}.{}.idToken", key_prefix, user)),
        access_token: cookies.remove(&format!("{}.{}.accessToken", key_prefix, user)),
        refresh_token: cookies.remove(&format!("{}.{}.refreshToken", key_prefix, user)),
        scopes: cookies.remove(&format!("{}.{}.tokenScopesString", key_prefix, user)),
        nonce: cookies.remove(NONCE_COOKIE),
        nonce_hmac: cookies.remove(NONCE_HMAC_COOKIE),
        pkce: cookies.remove(PKCE_COOKIE),
        token_user_name,
    }
}

/// What triggered cookie generation. Controls which cookies get expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieEvent {
    /// Fresh tokens from a code or refresh exchange: set everything.
    NewTokens,
    /// Expire every session cookie.
    SignOut,
    /// The refresh token is dead; expire only it so the browser stops
    /// sending it in vain.
    RefreshFailed,
}

/// The token triple carried in cookies.
#[derive(Debug, Clone, Default)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// Append a leading-dot Domain attribute unless the configured attribute
/// string already pins one. The leading dot keeps js-cookie (and therefore
/// Amplify) able to read the cookies on subdomains.
fn with_cookie_domain(domain: &str, attributes: &str) -> String {
    if attributes.to_lowercase().contains("domain") {
        attributes.to_string()
    } else {
        format!("{}; Domain=.{}", attributes, domain)
    }
}

/// Rewrite a `value; attrs...` string so the cookie is deleted: value
/// cleared, any Max-Age/Expires stripped, an immediate-past Expires appended.
fn expire_cookie(cookie: &str) -> String {
    let kept: Vec<&str> = cookie
        .split(';')
        .map(str::trim)
        .skip(1) // first part is the value, which we clear
        .filter(|part| {
            let lower = part.to_lowercase();
            !lower.starts_with("max-age") && !lower.starts_with("expires")
        })
        .collect();

    let mut parts = vec![""];
    parts.extend(kept);
    parts.push(EXPIRE_IMMEDIATELY);
    parts.join("; ")
}

/// Build the full Set-Cookie value list for a cookie event.
///
/// Fails only when the id token cannot be decoded (the username claim names
/// the cookies).
pub fn generate_cookies(
    event: CookieEvent,
    tokens: &TokenSet,
    domain: &str,
    config: &Config,
) -> Result<Vec<String>, AuthError> {
    let claims = decode_claims(&tokens.id_token)?;
    let username = claims
        .username
        .as_deref()
        .ok_or_else(|| AuthError::technical("ID token carries no cognito:username claim"))?;

    let key_prefix = format!("{}.{}", COOKIE_PREFIX, config.client_id);
    let refresh_token_key = format!("{}.{}.refreshToken", key_prefix, username);
    let scopes_string = config.oauth_scopes.join(" ");

    // The userData blob mirrors what Amplify stores for a cached user.
    let user_data = serde_json::json!({
        "UserAttributes": [
            { "Name": "sub", "Value": claims.sub },
            { "Name": "email", "Value": claims.email },
        ],
        "Username": username,
    })
    .to_string();

    let settings = &config.cookie_settings;
    // Order matters for the round-trip tests and mirrors Amplify's own order.
    let mut cookies: Vec<(String, String)> = vec![
        (
            format!("{}.{}.idToken", key_prefix, username),
            format!(
                "{}; {}",
                tokens.id_token,
                with_cookie_domain(domain, &settings.id_token)
            ),
        ),
        (
            format!("{}.{}.accessToken", key_prefix, username),
            format!(
                "{}; {}",
                tokens.access_token,
                with_cookie_domain(domain, &settings.access_token)
            ),
        ),
        (
            refresh_token_key.clone(),
            format!(
                "{}; {}",
                tokens.refresh_token,
                with_cookie_domain(domain, &settings.refresh_token)
            ),
        ),
        (
            format!("{}.LastAuthUser", key_prefix),
            format!(
                "{}; {}",
                username,
                with_cookie_domain(domain, &settings.id_token)
            ),
        ),
        (
            format!("{}.{}.tokenScopesString", key_prefix, username),
            format!(
                "{}; {}",
                scopes_string,
                with_cookie_domain(domain, &settings.access_token)
            ),
        ),
        (
            format!("{}.{}.userData", key_prefix, username),
            format!(
                "{}; {}",
                urlencoding::encode(&user_data),
                with_cookie_domain(domain, &settings.id_token)
            ),
        ),
        (
            AMPLIFY_HOSTED_UI_FLAG.to_string(),
            format!(
                "true; {}",
                with_cookie_domain(domain, &settings.access_token)
            ),
        ),
    ];

    match event {
        CookieEvent::NewTokens => {}
        CookieEvent::SignOut => {
            for (_, value) in cookies.iter_mut() {
                *value = expire_cookie(value);
            }
        }
        CookieEvent::RefreshFailed => {
            for (name, value) in cookies.iter_mut() {
                if *name == refresh_token_key {
                    *value = expire_cookie(value);
                }
            }
        }
    }

    // CSRF-phase cookies are single-use: always expired here.
    for name in [NONCE_COOKIE, NONCE_HMAC_COOKIE, PKCE_COOKIE] {
        cookies.push((name.to_string(), expire_cookie("")));
    }

    Ok(cookies
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StoredConfig};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use http::HeaderValue;

    fn test_config() -> Config {
        let stored: StoredConfig = serde_json::from_value(serde_json::json!({
            "userPoolId": "eu-west-1_abc123",
            "clientId": "client123",
            "oauthScopes": ["openid", "email"],
            "cognitoAuthDomain": "auth.example.com",
            "callbackPath": "/auth/callback",
            "signOutRedirectTo": "/",
            "signOutPath": "/auth/sign-out",
            "refreshAuthPath": "/auth/refresh",
            "cookieSettings": {
                "idToken": "Path=/; Secure; HttpOnly; SameSite=Lax; Max-Age=3600",
                "accessToken": "Path=/; Secure; HttpOnly; SameSite=Lax",
                "refreshToken": "Path=/; Secure; HttpOnly; SameSite=Lax",
                "nonce": "Path=/; Secure; HttpOnly; SameSite=Lax"
            },
            "nonceSigningSecret": "secret"
        }))
        .unwrap();
        Config::from_stored(stored).unwrap()
    }

    fn unsigned_id_token(username: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "sub": "user-sub",
                "aud": "client123",
                "token_use": "id",
                "iat": 1,
                "exp": 2,
                "cognito:username": username,
                "email": "jane@example.com"
            })
            .to_string()
            .as_bytes(),
        );
        format!("{}.{}.sig", header, payload)
    }

    fn headers_with_cookies(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(COOKIE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn merges_repeated_cookie_headers() {
        let headers = headers_with_cookies(&[
            "CognitoIdentityServiceProvider.client123.LastAuthUser=jane; spa-auth-edge-nonce=n1",
            "CognitoIdentityServiceProvider.client123.jane.idToken=tok",
        ]);
        let cookies = extract_and_parse_cookies(&headers, "client123");
        assert_eq!(cookies.token_user_name.as_deref(), Some("jane"));
        assert_eq!(cookies.id_token.as_deref(), Some("tok"));
        assert_eq!(cookies.nonce.as_deref(), Some("n1"));
    }

    #[test]
    fn later_duplicate_wins() {
        let headers = headers_with_cookies(&["spa-auth-edge-nonce=first", "spa-auth-edge-nonce=second"]);
        let cookies = extract_and_parse_cookies(&headers, "client123");
        assert_eq!(cookies.nonce.as_deref(), Some("second"));
    }

    #[test]
    fn no_last_auth_user_means_no_tokens() {
        let headers = headers_with_cookies(&[
            "CognitoIdentityServiceProvider.client123.jane.idToken=tok",
        ]);
        let cookies = extract_and_parse_cookies(&headers, "client123");
        assert!(cookies.token_user_name.is_none());
        assert!(cookies.id_token.is_none());
    }

    #[test]
    fn new_tokens_round_trip_through_codec() {
        let config = test_config();
        let tokens = TokenSet {
            id_token: unsigned_id_token("jane"),
            access_token: "access-tok".to_string(),
            refresh_token: "refresh-tok".to_string(),
        };
        let set_cookies =
            generate_cookies(CookieEvent::NewTokens, &tokens, "example.com", &config).unwrap();

        // Replay the generated cookies as a request would send them back:
        // name plus the first (value) segment of each Set-Cookie string.
        let request_cookies: Vec<String> = set_cookies
            .iter()
            .map(|c| c.split(';').next().unwrap().to_string())
            .collect();
        let joined = request_cookies.join("; ");
        let headers = headers_with_cookies(&[&joined]);

        let parsed = extract_and_parse_cookies(&headers, "client123");
        assert_eq!(parsed.token_user_name.as_deref(), Some("jane"));
        assert_eq!(parsed.id_token.as_deref(), Some(tokens.id_token.as_str()));
        assert_eq!(parsed.access_token.as_deref(), Some("access-tok"));
        assert_eq!(parsed.refresh_token.as_deref(), Some("refresh-tok"));
        assert_eq!(parsed.scopes.as_deref(), Some("openid email"));
        // CSRF-phase cookies come back cleared.
        assert_eq!(parsed.nonce.as_deref(), Some(""));
    }

    #[test]
    fn domain_attribute_added_with_leading_dot() {
        let config = test_config();
        let tokens = TokenSet {
            id_token: unsigned_id_token("jane"),
            ..Default::default()
        };
        let cookies =
            generate_cookies(CookieEvent::NewTokens, &tokens, "example.com", &config).unwrap();
        assert!(cookies.iter().any(|c| c.contains("Domain=.example.com")));
    }

    #[test]
    fn domain_attribute_not_duplicated() {
        let mut config = test_config();
        config.stored.cookie_settings.id_token =
            "Path=/; Secure; Domain=cdn.example.com".to_string();
        let tokens = TokenSet {
            id_token: unsigned_id_token("jane"),
            ..Default::default()
        };
        let cookies =
            generate_cookies(CookieEvent::NewTokens, &tokens, "example.com", &config).unwrap();
        let id_cookie = cookies
            .iter()
            .find(|c| c.contains(".idToken="))
            .unwrap();
        assert!(id_cookie.contains("Domain=cdn.example.com"));
        assert!(!id_cookie.contains("Domain=.example.com"));
    }

    #[test]
    fn sign_out_expires_every_session_cookie() {
        let config = test_config();
        let tokens = TokenSet {
            id_token: unsigned_id_token("jane"),
            access_token: "access-tok".to_string(),
            refresh_token: "refresh-tok".to_string(),
        };
        let cookies =
            generate_cookies(CookieEvent::SignOut, &tokens, "example.com", &config).unwrap();

        for cookie in &cookies {
            assert!(
                cookie.contains(EXPIRE_IMMEDIATELY),
                "cookie not expired: {}",
                cookie
            );
            let value = cookie.split('=').nth(1).unwrap().split(';').next().unwrap();
            assert!(value.is_empty(), "cookie value not cleared: {}", cookie);
            assert!(!cookie.to_lowercase().contains("max-age"));
        }
    }

    #[test]
    fn refresh_failed_expires_only_the_refresh_token() {
        let config = test_config();
        let tokens = TokenSet {
            id_token: unsigned_id_token("jane"),
            access_token: "access-tok".to_string(),
            refresh_token: "refresh-tok".to_string(),
        };
        let cookies =
            generate_cookies(CookieEvent::RefreshFailed, &tokens, "example.com", &config).unwrap();

        let refresh = cookies
            .iter()
            .find(|c| c.contains(".refreshToken="))
            .unwrap();
        assert!(refresh.contains(EXPIRE_IMMEDIATELY));
        assert!(refresh.starts_with(&format!(
            "{}.client123.jane.refreshToken=; ",
            COOKIE_PREFIX
        )));

        let id = cookies.iter().find(|c| c.contains(".idToken=")).unwrap();
        assert!(!id.contains(EXPIRE_IMMEDIATELY));
        let access = cookies.iter().find(|c| c.contains(".accessToken=")).unwrap();
        assert!(!access.contains(EXPIRE_IMMEDIATELY));
    }

    #[test]
    fn csrf_cookies_always_expired() {
        let config = test_config();
        let tokens = TokenSet {
            id_token: unsigned_id_token("jane"),
            ..Default::default()
        };
        for event in [
            CookieEvent::NewTokens,
            CookieEvent::SignOut,
            CookieEvent::RefreshFailed,
        ] {
            let cookies = generate_cookies(event, &tokens, "example.com", &config).unwrap();
            for name in [NONCE_COOKIE, NONCE_HMAC_COOKIE, PKCE_COOKIE] {
                let cookie = cookies
                    .iter()
                    .find(|c| c.starts_with(&format!("{}=", name)))
                    .unwrap();
                assert!(cookie.contains(EXPIRE_IMMEDIATELY));
            }
        }
    }
}
