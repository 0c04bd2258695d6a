//! Authentication response types.
//!
//! Covers both credential flows:
//! * The OAuth token endpoint, serving the authorization-code and
//!   refresh-token grants.
//! * The web player's client-token exchange, which trades a TOTP and the
//!   `sp_dc` cookie for the short-lived dealer credential.
//!
//! # Example Response
//!
//! ```json
//! {
//!     "access_token": "secret_token",
//!     "token_type": "Bearer",
//!     "expires_in": 3600,
//!     "refresh_token": "other_secret"
//! }
//! ```
//!
//! # Note
//!
//! `refresh_token` is omitted on most refresh grants; the previous one then
//! stays valid. `access_token` is typed optional so a missing field surfaces
//! as a credential error instead of a parse error.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

/// Token data from the OAuth endpoint.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
pub struct TokenResponse {
    /// OAuth access token for API authentication.
    #[redact]
    pub access_token: Option<String>,

    /// Replacement refresh token, only when the provider rotates it.
    #[redact]
    pub refresh_token: Option<String>,

    /// How long the access token remains valid.
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    pub expires_in: Option<Duration>,
}

/// Authoritative server time, in seconds since the Unix epoch.
#[derive(Copy, Clone, Eq, PartialEq, Deserialize, Debug)]
pub struct ServerTime {
    #[serde(rename = "serverTime")]
    pub server_time: u64,
}

/// Short-lived credential from the web player token exchange.
///
/// Authenticates only the dealer socket, never REST calls.
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
pub struct ClientToken {
    /// The dealer credential itself.
    #[serde(rename = "accessToken")]
    #[redact]
    pub access_token: Option<String>,
}
