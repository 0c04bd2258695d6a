//! Error handling for chorus.
//!
//! One crate-wide error type covers the full failure taxonomy of the session
//! manager. The variants fall into three classes:
//!
//! * Bad caller-supplied secrets ([`InvalidCredentials`](Error::InvalidCredentials),
//!   [`InvalidCookie`](Error::InvalidCookie)) - surfaced immediately, never retried.
//! * Token-lifecycle failures ([`NoRefreshToken`](Error::NoRefreshToken),
//!   [`RefreshFailed`](Error::RefreshFailed),
//!   [`AuthenticationFailed`](Error::AuthenticationFailed),
//!   [`AuthenticationTimedOut`](Error::AuthenticationTimedOut)) - the caller
//!   must re-authenticate from scratch.
//! * Transient transport failures ([`UpstreamUnavailable`](Error::UpstreamUnavailable),
//!   [`NetworkError`](Error::NetworkError), [`WebSocket`](Error::WebSocket)) -
//!   the caller decides whether to retry the whole operation.
//!
//! The command client recovers exactly one class of failure locally: a stale
//! bearer token, which triggers a single refresh-and-retry. Everything else
//! propagates.

use thiserror::Error;

/// Standard result type for chorus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed failures of the session manager.
#[derive(Error, Debug)]
pub enum Error {
    /// The OAuth client id/secret or authorization code was rejected.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The `sp_dc` session cookie was rejected by the credential endpoint.
    #[error("invalid session cookie: {0}")]
    InvalidCookie(String),

    /// A refresh was requested while no refresh token is held.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The refresh-token grant failed or returned no access token.
    #[error("could not refresh token: {0}")]
    RefreshFailed(String),

    /// A request was rejected even after a successful token refresh.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The local authorization-code capture exceeded its window.
    #[error("authentication timed out")]
    AuthenticationTimedOut,

    /// The server-time endpoint could not be reached or made no sense.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The remote channel was used in a state that does not allow it.
    #[error("invalid connection: {0}")]
    Connection(String),

    /// Transient HTTP transport failure.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Websocket transport failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A payload could not be parsed as JSON.
    #[error("parsing JSON failed: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A URL could not be constructed.
    #[error("parsing URL failed: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Maps timer expiry onto the authorization-code capture window.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::AuthenticationTimedOut
    }
}
