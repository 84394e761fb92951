//! Error taxonomy for the authentication flow.
//!
//! Two kinds of failures exist:
//! - [`AuthError::Client`]: caused by the user or an intermediate redirect
//!   (malformed querystring, CSRF nonce mismatch, stale nonce, an error the
//!   identity provider reported back). Logged at warn level; the detail is
//!   shown to the user because they can act on it.
//! - [`AuthError::Technical`]: our side or the identity provider's side broke
//!   (token endpoint failing after retries, JWKS resolution, malformed keys).
//!   Logged at error level; the user only ever sees a generic message.
//!
//! A failed group check is deliberately *not* an error; it is a regular 403
//! response built by the check-auth handler.

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Client(String),

    #[error("{0}")]
    Technical(String),
}

impl AuthError {
    pub fn client(message: impl Into<String>) -> Self {
        AuthError::Client(message.into())
    }

    pub fn technical(message: impl Into<String>) -> Self {
        AuthError::Technical(message.into())
    }

    pub fn is_client(&self) -> bool {
        matches!(self, AuthError::Client(_))
    }

    /// Log this error at the level its kind demands.
    pub fn log(&self) {
        match self {
            AuthError::Client(message) => tracing::warn!(%message, "client error"),
            AuthError::Technical(message) => tracing::error!(%message, "technical error"),
        }
    }
}
