//! Sign-out: expire the session cookies and hand off to the IdP's logout
//! endpoint, which in turn redirects back to the configured landing page.

use axum::extract::State;
use axum::response::Response;
use axum_extra::extract::Host;
use http::{HeaderMap, StatusCode};

use crate::cookies::{extract_and_parse_cookies, generate_cookies, CookieEvent, TokenSet};
use crate::response::{redirect_to, StaticPage};
use crate::state::AppState;

use super::query_string;

pub async fn handler(
    State(app): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
) -> Response {
    let config = &app.config;
    let cookies = extract_and_parse_cookies(&headers, &config.client_id);

    let Some(id_token) = cookies.id_token else {
        // Nothing to sign out of; skip the IdP round trip.
        tracing::debug!("no session cookies present, skipping IdP logout");
        return redirect_to(
            &format!("https://{}{}", host, config.sign_out_redirect_to),
            &[],
        );
    };

    let tokens = TokenSet {
        id_token,
        access_token: cookies.access_token.unwrap_or_default(),
        refresh_token: cookies.refresh_token.unwrap_or_default(),
    };

    let logout_uri = format!("https://{}{}", host, config.sign_out_redirect_to);
    let query = query_string(&[
        ("logout_uri", logout_uri.as_str()),
        ("client_id", config.client_id.as_str()),
    ]);

    match generate_cookies(CookieEvent::SignOut, &tokens, &host, config) {
        Ok(set_cookies) => redirect_to(
            &format!("{}/logout?{}", config.auth_base_url(), query),
            &set_cookies,
        ),
        Err(err) => {
            err.log();
            StaticPage {
                title: "Sign-out issue",
                message: "We can't sign you out because of a technical problem.",
                details: "Contact administrator",
                link_href: &logout_uri,
                link_text: "Try again",
                status: StatusCode::BAD_REQUEST,
            }
            .into_response()
        }
    }
}
