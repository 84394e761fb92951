//! Silent session refresh via the refresh-token grant.
//!
//! The gate redirects here when an id token is close to expiry. The nonce in
//! the querystring must match the nonce cookie set by that redirect, so a
//! third party cannot trigger refreshes cross-site. A dead refresh token is
//! not fatal: the user is sent back with the refresh cookie expired, and the
//! next gate pass starts a full sign-in instead.

use axum::extract::{Query, State};
use axum::response::Response;
use axum_extra::extract::Host;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;

use crate::cookies::{
    extract_and_parse_cookies, generate_cookies, CookieEvent, SessionCookies, TokenSet,
};
use crate::error::AuthError;
use crate::response::{redirect_to, StaticPage};
use crate::state::AppState;
use crate::token::{basic_authorization, form_body, http_post_with_retry};

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    #[serde(rename = "requestedUri")]
    pub requested_uri: Option<String>,
    pub nonce: Option<String>,
}

pub async fn handler(
    State(app): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    Query(query): Query<RefreshQuery>,
) -> Response {
    let config = &app.config;
    let cookies = extract_and_parse_cookies(&headers, &config.client_id);
    let redirected_from_uri = format!(
        "https://{}{}",
        host,
        query.requested_uri.as_deref().unwrap_or("/")
    );

    let tokens = match validate_refresh_request(&query, &cookies) {
        Ok(tokens) => tokens,
        Err(err) => {
            err.log();
            let details = if err.is_client() {
                err.to_string()
            } else {
                "Contact administrator".to_string()
            };
            return StaticPage {
                title: "Refresh issue",
                message: "We can't refresh your sign-in because of a technical problem.",
                details: &details,
                link_href: &redirected_from_uri,
                link_text: "Try again",
                status: StatusCode::BAD_REQUEST,
            }
            .into_response();
        }
    };

    let (event, tokens) = match exchange_refresh_token(&app, &tokens).await {
        Ok(refreshed) => (CookieEvent::NewTokens, refreshed),
        Err(err) => {
            // The refresh token is no longer good. Expire it so the next
            // gate pass goes through a full sign-in instead of looping here.
            err.log();
            (CookieEvent::RefreshFailed, tokens)
        }
    };

    match generate_cookies(event, &tokens, &host, config) {
        Ok(set_cookies) => redirect_to(&redirected_from_uri, &set_cookies),
        Err(err) => {
            err.log();
            StaticPage {
                title: "Refresh issue",
                message: "We can't refresh your sign-in because of a technical problem.",
                details: "Contact administrator",
                link_href: &redirected_from_uri,
                link_text: "Try again",
                status: StatusCode::BAD_REQUEST,
            }
            .into_response()
        }
    }
}

fn validate_refresh_request(
    query: &RefreshQuery,
    cookies: &SessionCookies,
) -> Result<TokenSet, AuthError> {
    let Some(original_nonce) = cookies.nonce.as_deref().filter(|n| !n.is_empty()) else {
        return Err(AuthError::client(
            "Your browser didn't send the nonce cookie along, but it is required \
             for security (prevent CSRF).",
        ));
    };
    let current_nonce = query.nonce.as_deref().unwrap_or("");
    if current_nonce != original_nonce {
        return Err(AuthError::client(
            "Nonce mismatch. This can happen if you start multiple authentication \
             attempts in parallel (e.g. in separate tabs)",
        ));
    }

    let (Some(id_token), Some(access_token), Some(refresh_token)) = (
        &cookies.id_token,
        &cookies.access_token,
        &cookies.refresh_token,
    ) else {
        return Err(AuthError::client(
            "Your browser didn't send the token cookies along (id, access and \
             refresh token), but they are required for refreshing your sign-in.",
        ));
    };

    Ok(TokenSet {
        id_token: id_token.clone(),
        access_token: access_token.clone(),
        refresh_token: refresh_token.clone(),
    })
}

/// Trade the refresh token for fresh id and access tokens. The provider does
/// not rotate refresh tokens in this grant, so the old one is carried over.
async fn exchange_refresh_token(app: &AppState, tokens: &TokenSet) -> Result<TokenSet, AuthError> {
    let config = &app.config;
    let body = form_body(&[
        ("grant_type", "refresh_token"),
        ("client_id", &config.client_id),
        ("refresh_token", &tokens.refresh_token),
    ]);

    let authorization = (!config.client_secret.is_empty())
        .then(|| basic_authorization(&config.client_id, &config.client_secret));

    tracing::debug!(endpoint = %config.token_endpoint, "exchanging refresh token");
    let refreshed = http_post_with_retry(
        &app.http,
        &config.token_endpoint,
        &body,
        authorization.as_deref(),
    )
    .await
    .map_err(|err| AuthError::technical(format!("Failed to refresh tokens: {}", err)))?;

    tracing::info!("successfully refreshed tokens");
    Ok(TokenSet {
        id_token: refreshed.id_token,
        access_token: refreshed.access_token,
        refresh_token: tokens.refresh_token.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::SessionCookies;

    fn full_cookies() -> SessionCookies {
        SessionCookies {
            token_user_name: Some("jane".to_string()),
            id_token: Some("id-tok".to_string()),
            access_token: Some("access-tok".to_string()),
            refresh_token: Some("refresh-tok".to_string()),
            nonce: Some("nonce-1".to_string()),
            ..Default::default()
        }
    }

    fn query(nonce: Option<&str>) -> RefreshQuery {
        RefreshQuery {
            requested_uri: Some("/deep/page".to_string()),
            nonce: nonce.map(str::to_string),
        }
    }

    #[test]
    fn accepts_matching_nonce_and_full_cookie_set() {
        let tokens = validate_refresh_request(&query(Some("nonce-1")), &full_cookies()).unwrap();
        assert_eq!(tokens.refresh_token, "refresh-tok");
        assert_eq!(tokens.id_token, "id-tok");
    }

    #[test]
    fn rejects_missing_nonce_cookie() {
        let mut cookies = full_cookies();
        cookies.nonce = None;
        let err = validate_refresh_request(&query(Some("nonce-1")), &cookies).unwrap_err();
        assert!(err.is_client());
        assert!(err.to_string().contains("nonce cookie"));
    }

    #[test]
    fn rejects_nonce_mismatch() {
        let err = validate_refresh_request(&query(Some("other")), &full_cookies()).unwrap_err();
        assert!(err.is_client());
        assert!(err.to_string().contains("Nonce mismatch"));
    }

    #[test]
    fn rejects_missing_refresh_token() {
        let mut cookies = full_cookies();
        cookies.refresh_token = None;
        let err = validate_refresh_request(&query(Some("nonce-1")), &cookies).unwrap_err();
        assert!(err.is_client());
    }
}
