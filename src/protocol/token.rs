//! Token endpoint responses.
//!
//! A successful code exchange answers with:
//!
//! ```json
//! {
//!     "access_token": "secret_token",
//!     "token_type": "Bearer",
//!     "scope": "user-read-playback-state user-read-currently-playing",
//!     "expires_in": 3600,
//!     "refresh_token": "secret_refresh_token"
//! }
//! ```
//!
//! A refused exchange answers with an OAuth error object instead:
//!
//! ```json
//! {
//!     "error": "invalid_grant",
//!     "error_description": "Invalid authorization code"
//! }
//! ```
//!
//! Both shapes deserialize into [`Response`]. Only the access token is
//! used; the refresh token and lifetime are kept for logging.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

#[serde_as]
#[derive(Clone, Default, Eq, PartialEq, Deserialize, Redact)]
pub struct Response {
    #[redact]
    pub access_token: Option<String>,

    pub token_type: Option<String>,

    /// Space-separated scopes that were actually granted.
    pub scope: Option<String>,

    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    pub expires_in: Option<Duration>,

    /// Not used: expired tokens are only detected when the Web API
    /// rejects them.
    #[redact]
    pub refresh_token: Option<String>,

    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl Response {
    /// The access token, unless it is missing or blank.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    /// A human readable reason for a refused exchange.
    #[must_use]
    pub fn reason(&self) -> String {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => format!("{error}: {description}"),
            (Some(error), None) => error.clone(),
            (None, Some(description)) => description.clone(),
            (None, None) => String::from("response did not contain an access token"),
        }
    }
}
