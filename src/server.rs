//! Router assembly.
//!
//! The three auth paths get dedicated GET handlers; everything else falls
//! through to the static content service, gated by the auth layer. Layer
//! order, outermost first: request span, header injection, auth gate.

use std::path::Path;

use axum::{middleware, routing::get, Router};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::handlers::{check_auth, http_headers, parse_auth, refresh_auth, sign_out};
use crate::state::AppState;

/// Everything behind the gate is per-user; shared caches must not hold it.
const CACHE_CONTROL_PROTECTED: &str = "private, no-store";

pub fn create_router(state: AppState, static_root: &Path) -> Router {
    let config = &state.config;

    let auth_routes = Router::new()
        .route(&config.callback_path, get(parse_auth::handler))
        .route(&config.refresh_auth_path, get(refresh_auth::handler))
        .route(&config.sign_out_path, get(sign_out::handler));

    Router::new()
        .merge(auth_routes)
        .fallback_service(ServeDir::new(static_root))
        .with_state(state.clone())
        // Auth gate - lets the three auth paths through to their handlers
        .layer(middleware::from_fn_with_state(
            state.clone(),
            check_auth::layer,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_PROTECTED),
        ))
        // Configured headers go onto every response, the gate's included
        .layer(middleware::from_fn_with_state(state, http_headers::layer))
        // Root span with request_id for log correlation
        .layer(middleware::from_fn(request_span_layer))
}

/// Wrap the whole request in a span carrying a fresh request id, so every log
/// line within can be correlated.
async fn request_span_layer(
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let span = tracing::info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let response = next.run(request).await;
        tracing::info!(status = response.status().as_u16(), "request completed");
        response
    }
    .instrument(span)
    .await
}
