//! OAuth2 callback: completes the Authorization-Code+PKCE exchange.
//!
//! The querystring and the CSRF cookies must corroborate each other before
//! any network call happens. A failed validation is not always an error: with
//! several tabs racing through sign-in, a second callback arrives with
//! already-consumed nonce cookies. When a still-valid id token proves the
//! user is signed in, we silently send them back where they came from.

use axum::extract::{Query, State};
use axum::response::Response;
use axum_extra::extract::Host;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;

use crate::config::Config;
use crate::cookies::{
    extract_and_parse_cookies, generate_cookies, CookieEvent, SessionCookies, TokenSet,
};
use crate::error::AuthError;
use crate::nonce::{safe_base64_decode, validate_nonce};
use crate::response::{redirect_to, StaticPage};
use crate::state::AppState;
use crate::token::{basic_authorization, form_body, http_post_with_retry};

use super::StateParam;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub async fn handler(
    State(app): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let config = &app.config;
    let cookies = extract_and_parse_cookies(&headers, &config.client_id);
    let id_token = cookies.id_token.clone();
    let mut redirected_from_uri = format!("https://{}", host);

    let (code, pkce_verifier, requested_uri) =
        match validate_query_and_cookies(config, &query, &cookies) {
            Ok(valid) => valid,
            Err(err) => {
                // Best effort: when the state blob itself is readable, the
                // failure redirect can still land on the page the user wanted.
                if let Some(uri) = requested_uri_from_state(query.state.as_deref()) {
                    redirected_from_uri.push_str(&uri);
                }
                return handle_failure(&app, err, id_token.as_deref(), &redirected_from_uri).await;
            }
        };

    tracing::debug!("query string and cookies are valid");
    redirected_from_uri.push_str(&requested_uri);

    let tokens = match exchange_code_for_tokens(&app, &host, &code, &pkce_verifier).await {
        Ok(tokens) => tokens,
        Err(err) => {
            return handle_failure(&app, err, id_token.as_deref(), &redirected_from_uri).await;
        }
    };

    match generate_cookies(CookieEvent::NewTokens, &tokens, &host, config) {
        Ok(set_cookies) => redirect_to(&redirected_from_uri, &set_cookies),
        Err(err) => handle_failure(&app, err, id_token.as_deref(), &redirected_from_uri).await,
    }
}

fn validate_query_and_cookies(
    config: &Config,
    query: &CallbackQuery,
    cookies: &SessionCookies,
) -> Result<(String, String, String), AuthError> {
    // The IdP reports its own failures in the querystring.
    if let Some(error) = &query.error {
        return Err(AuthError::client(format!(
            "[Cognito] {}: {}",
            error,
            query.error_description.as_deref().unwrap_or("")
        )));
    }

    let (Some(code), Some(state)) = (&query.code, &query.state) else {
        return Err(AuthError::client(
            "Invalid query string. Your query string does not include parameters \
             \"state\" and \"code\". This can happen if your authentication attempt \
             did not originate from this site.",
        ));
    };

    let parsed: StateParam = safe_base64_decode(state)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(|| {
            AuthError::client(
                "Invalid query string. Your query string does not include a valid \
                 \"state\" parameter",
            )
        })?;
    if parsed.nonce.is_empty() || parsed.requested_uri.is_empty() {
        return Err(AuthError::client(
            "Invalid query string. Your query string does not include a valid \
             \"state\" parameter",
        ));
    }

    // The state must correlate with the CSRF cookies.
    let Some(original_nonce) = &cookies.nonce else {
        return Err(AuthError::client(
            "Your browser didn't send the nonce cookie along, but it is required \
             for security (prevent CSRF).",
        ));
    };
    let Some(pkce_verifier) = &cookies.pkce else {
        return Err(AuthError::client(
            "Your browser didn't send the pkce cookie along, but it is required \
             for security (prevent CSRF).",
        ));
    };
    if &parsed.nonce != original_nonce {
        return Err(AuthError::client(
            "Nonce mismatch. This can happen if you start multiple authentication \
             attempts in parallel (e.g. in separate tabs)",
        ));
    }

    validate_nonce(
        &parsed.nonce,
        cookies.nonce_hmac.as_deref().unwrap_or("UNKNOWN"),
        config,
    )?;

    Ok((code.clone(), pkce_verifier.clone(), parsed.requested_uri))
}

fn requested_uri_from_state(state: Option<&str>) -> Option<String> {
    let bytes = safe_base64_decode(state?).ok()?;
    let parsed: StateParam = serde_json::from_slice(&bytes).ok()?;
    (!parsed.requested_uri.is_empty()).then_some(parsed.requested_uri)
}

async fn exchange_code_for_tokens(
    app: &AppState,
    domain: &str,
    code: &str,
    pkce_verifier: &str,
) -> Result<TokenSet, AuthError> {
    let config = &app.config;
    let redirect_uri = format!("https://{}{}", domain, config.callback_path);
    let body = form_body(&[
        ("grant_type", "authorization_code"),
        ("client_id", &config.client_id),
        ("redirect_uri", &redirect_uri),
        ("code", code),
        ("code_verifier", pkce_verifier),
    ]);

    let authorization = (!config.client_secret.is_empty())
        .then(|| basic_authorization(&config.client_id, &config.client_secret));

    tracing::debug!(endpoint = %config.token_endpoint, "exchanging authorization code");
    let tokens = http_post_with_retry(
        &app.http,
        &config.token_endpoint,
        &body,
        authorization.as_deref(),
    )
    .await
    .map_err(|err| {
        AuthError::technical(format!(
            "Failed to exchange authorization code for tokens: {}",
            err
        ))
    })?;

    tracing::info!("successfully exchanged authorization code for tokens");
    Ok(TokenSet {
        id_token: tokens.id_token,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.unwrap_or_default(),
    })
}

/// A validation or exchange failure ends in one of two places: a silent
/// redirect back when an existing session is still valid, or the branded
/// error page.
async fn handle_failure(
    app: &AppState,
    err: AuthError,
    id_token: Option<&str>,
    redirected_from_uri: &str,
) -> Response {
    err.log();

    if let Some(id_token) = id_token {
        tracing::debug!("id token present, checking for an existing session");
        match app
            .jwks
            .validate(id_token, &app.config.token_issuer, &app.config.client_id)
            .await
        {
            Ok(()) => {
                // Signed in already, e.g. in another tab. Not a real error.
                tracing::info!("existing session is valid, redirecting back");
                return redirect_to(redirected_from_uri, &[]);
            }
            Err(validation_err) => {
                tracing::debug!(%validation_err, "existing id token not valid");
            }
        }
    }

    let details = if err.is_client() {
        err.to_string()
    } else {
        "Contact administrator".to_string()
    };
    StaticPage {
        title: "Sign-in issue",
        message: "We can't sign you in because of a technical problem",
        details: &details,
        link_href: redirected_from_uri,
        link_text: "Retry",
        status: StatusCode::SERVICE_UNAVAILABLE,
    }
    .into_response()
}
