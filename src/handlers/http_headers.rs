//! Response post-processing: inject the configured security headers into
//! every outgoing response, whatever handler produced it.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::response::apply_headers;
use crate::state::AppState;

pub async fn layer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &state.config.http_headers);
    response
}
