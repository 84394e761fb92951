//! Gate for every protected-resource request.
//!
//! Runs as a middleware layer in front of the static content service. The
//! configured auth paths bypass it; they have handlers of their own.
//!
//! Decision order per request: no id token means sign-in; an id token
//! expiring within ten minutes next to a refresh token means a refresh
//! redirect; otherwise full verification, then the group check. Only a fully
//! verified, authorized request passes through to the origin untouched.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::HOST;
use http::{HeaderMap, StatusCode};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::cookies::{
    extract_and_parse_cookies, NONCE_COOKIE, NONCE_HMAC_COOKIE, PKCE_COOKIE,
};
use crate::jwt::{decode_claims, IdentityClaims};
use crate::nonce::{create_nonce_hmac, generate_nonce, generate_pkce_pair, safe_base64_encode};
use crate::response::{redirect_to, StaticPage};
use crate::state::AppState;

use super::{query_string, StateParam};

/// Refresh rather than verify when the id token expires within this window.
const REFRESH_WINDOW_SECS: i64 = 600;

pub async fn layer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let config = &state.config;

    // The auth pages have dedicated handlers; everything else is gated.
    if path == config.callback_path
        || path == config.refresh_auth_path
        || path == config.sign_out_path
    {
        return next.run(request).await;
    }

    let Some(domain) = host_of(request.headers()) else {
        tracing::warn!("request without a host header");
        return StaticPage {
            title: "Bad request",
            message: "Your request did not carry a Host header.",
            details: "",
            link_href: "/",
            link_text: "Retry",
            status: StatusCode::BAD_REQUEST,
        }
        .into_response();
    };

    let requested_uri = match request.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    match gate(&state, request.headers(), &domain, &requested_uri).await {
        Some(response) => response,
        None => next.run(request).await,
    }
}

/// `None` means the request is authorized and passes through unmodified.
async fn gate(
    state: &AppState,
    headers: &HeaderMap,
    domain: &str,
    requested_uri: &str,
) -> Option<Response> {
    let config = &state.config;
    let cookies = extract_and_parse_cookies(headers, &config.client_id);

    let Some(id_token) = cookies.id_token else {
        tracing::debug!("no id token cookie, redirecting to sign-in");
        return Some(redirect_to_sign_in(config, domain, requested_uri));
    };

    // Expiry pre-screening on the decoded-only claims. A token expiring soon
    // is refreshed via a double redirect the user will hardly notice.
    let claims = match decode_claims(&id_token) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(%err, "undecodable id token cookie, redirecting to sign-in");
            return Some(redirect_to_sign_in(config, domain, requested_uri));
        }
    };
    if now() > claims.exp - REFRESH_WINDOW_SECS && cookies.refresh_token.is_some() {
        return Some(redirect_to_refresh(config, domain, requested_uri));
    }

    tracing::debug!("validating id token");
    if let Err(err) = state
        .jwks
        .validate(&id_token, &config.token_issuer, &config.client_id)
        .await
    {
        tracing::debug!(%err, "id token not valid, redirecting to sign-in");
        return Some(redirect_to_sign_in(config, domain, requested_uri));
    }

    if !is_authorized(config, &claims) {
        tracing::info!(user = ?claims.username, "authorization denied by group check");
        return Some(
            StaticPage {
                title: "Not authorized",
                message: "You are not authorized for this resource.",
                details: "Your sign in was successful, but your user is not \
                          allowed to access this resource.",
                link_href: &format!("https://{}{}", domain, config.sign_out_path),
                link_text: "Sign out",
                status: StatusCode::FORBIDDEN,
            }
            .into_response(),
        );
    }

    None
}

/// Authorization is a pure function of the verified claims and the configured
/// required groups: no restriction means everyone; otherwise the claim's
/// group list must intersect the required list.
pub fn is_authorized(config: &Config, claims: &IdentityClaims) -> bool {
    match &config.require_group_any_of {
        None => true,
        Some(required) => {
            let groups = claims.groups.as_deref().unwrap_or_default();
            required.iter().any(|group| groups.contains(group))
        }
    }
}

fn redirect_to_sign_in(config: &Config, domain: &str, requested_uri: &str) -> Response {
    let nonce = generate_nonce();
    let nonce_hmac = create_nonce_hmac(&nonce, config);
    let pkce = generate_pkce_pair();

    let state_param = StateParam {
        nonce: nonce.clone(),
        requested_uri: requested_uri.to_string(),
    };
    // The hosted UI URL-decodes the state parameter; plain JSON would be
    // mangled, hence the URL-safe base64 wrapping.
    let state_blob = safe_base64_encode(
        &serde_json::to_vec(&state_param).expect("StateParam serializes to JSON"),
    );

    let scopes = config.oauth_scopes.join(" ");
    let redirect_uri = format!("https://{}{}", domain, config.callback_path);
    let login_query = query_string(&[
        ("redirect_uri", redirect_uri.as_str()),
        ("response_type", "code"),
        ("client_id", config.client_id.as_str()),
        ("state", state_blob.as_str()),
        ("scope", scopes.as_str()),
        ("code_challenge_method", "S256"),
        ("code_challenge", pkce.challenge.as_str()),
    ]);

    let nonce_attrs = &config.cookie_settings.nonce;
    let cookies = vec![
        format!(
            "{}={}; {}",
            NONCE_COOKIE,
            urlencoding::encode(&nonce),
            nonce_attrs
        ),
        format!(
            "{}={}; {}",
            NONCE_HMAC_COOKIE,
            urlencoding::encode(&nonce_hmac),
            nonce_attrs
        ),
        format!(
            "{}={}; {}",
            PKCE_COOKIE,
            urlencoding::encode(&pkce.verifier),
            nonce_attrs
        ),
    ];

    redirect_to(
        &format!("{}/oauth2/authorize?{}", config.auth_base_url(), login_query),
        &cookies,
    )
}

fn redirect_to_refresh(config: &Config, domain: &str, requested_uri: &str) -> Response {
    tracing::info!("redirecting to refresh endpoint");
    let nonce = generate_nonce();
    let nonce_hmac = create_nonce_hmac(&nonce, config);

    let query = query_string(&[("requestedUri", requested_uri), ("nonce", nonce.as_str())]);
    let nonce_attrs = &config.cookie_settings.nonce;
    let cookies = vec![
        format!(
            "{}={}; {}",
            NONCE_COOKIE,
            urlencoding::encode(&nonce),
            nonce_attrs
        ),
        format!(
            "{}={}; {}",
            NONCE_HMAC_COOKIE,
            urlencoding::encode(&nonce_hmac),
            nonce_attrs
        ),
    ];

    redirect_to(
        &format!("https://{}{}?{}", domain, config.refresh_auth_path, query),
        &cookies,
    )
}

fn host_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
