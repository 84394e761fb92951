//! Gatehouse: an authenticating front door for static content.
//!
//! Serves a directory of static files, but only to visitors carrying a valid
//! session with the configured Cognito user pool. Visitors without one are
//! walked through the OAuth2 Authorization Code grant with PKCE against the
//! Cognito hosted UI; the resulting tokens live in cookies that stay
//! compatible with the Amplify JS SDK.

pub mod config;
pub mod cookies;
pub mod error;
pub mod handlers;
pub mod jwt;
pub mod nonce;
pub mod response;
pub mod server;
pub mod state;
pub mod token;
