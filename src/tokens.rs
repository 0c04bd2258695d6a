//! OAuth token lifecycle.
//!
//! [`TokenManager`] owns the account's access/refresh token pair and is the
//! only component that talks to the OAuth endpoints. It is shared behind an
//! `Arc` between the command client and the realtime channel; all refreshes
//! go through one `tokio::sync::Mutex` so concurrent stale-token recoveries
//! collapse into a single refresh call.
//!
//! The authorization code itself is captured out of band (a local redirect
//! listener, a paste into a UI). Whatever captures it drops it into the
//! [`SecretStore`] under [`keys::AUTH_CODE`]; the manager just polls for it.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    protocol::TokenResponse,
    store::{keys, SecretStore},
};

/// The account token pair, guarded by the manager's mutex.
#[derive(Default)]
struct TokenPair {
    access: Option<String>,
    refresh: Option<String>,
}

/// Serialized owner of the OAuth access and refresh tokens.
pub struct TokenManager {
    /// HTTP client for the OAuth endpoints.
    http: http::Client,

    /// Base of the OAuth endpoints.
    accounts_url: Url,

    client_id: String,
    client_secret: String,

    redirect_uri: String,

    /// Durable storage for tokens and the captured authorization code.
    store: Arc<dyn SecretStore>,

    /// Mutex serializes refreshes; see [`Self::refresh_if_stale`].
    pair: Mutex<TokenPair>,
}

impl TokenManager {
    /// Scopes requested on the consent page.
    const SCOPES: &'static str = "user-read-playback-state user-modify-playback-state playlist-read-private playlist-read-collaborative";

    /// How long to wait for the externally captured authorization code.
    const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(120);

    /// Poll interval for the captured authorization code.
    const CODE_POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Creates a manager, seeded with any tokens already in the store.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config, store: Arc<dyn SecretStore>) -> Result<Self> {
        let pair = TokenPair {
            access: store.get(keys::ACCESS_TOKEN, true),
            refresh: store.get(keys::REFRESH_TOKEN, true),
        };
        if pair.access.is_some() {
            debug!("seeded access token from store");
        }

        Ok(Self {
            http: http::Client::without_cookies(config)?,
            accounts_url: config.accounts_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            store,
            pair: Mutex::new(pair),
        })
    }

    /// The current access token, if any.
    pub async fn access_token(&self) -> Option<String> {
        self.pair.lock().await.access.clone()
    }

    /// Whether a login is required before the API can be used.
    pub async fn needs_authorization(&self) -> bool {
        let pair = self.pair.lock().await;
        pair.access.is_none() && pair.refresh.is_none()
    }

    /// The consent URL the account holder must visit.
    ///
    /// # Errors
    ///
    /// Returns error if the URL cannot be constructed.
    pub fn authorize_url(&self) -> Result<Url> {
        let mut url = self.accounts_url.join("authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", Self::SCOPES);
        Ok(url)
    }

    /// Waits for the externally captured authorization code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthenticationTimedOut`] when no code shows up
    /// within two minutes.
    pub async fn await_authorization_code(&self) -> Result<String> {
        self.wait_for_code(Self::AUTHORIZATION_TIMEOUT).await
    }

    async fn wait_for_code(&self, window: Duration) -> Result<String> {
        let code = tokio::time::timeout(window, async {
            loop {
                if let Some(code) = self.store.get(keys::AUTH_CODE, true) {
                    break code;
                }
                tokio::time::sleep(Self::CODE_POLL_INTERVAL).await;
            }
        })
        .await?;
        Ok(code)
    }

    /// Trades an authorization code for the initial token pair.
    ///
    /// Both tokens are persisted to the store on success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCredentials`] when the grant is rejected or
    /// the response carries no access token.
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let url = self.accounts_url.join("api/token")?;
        let request = self
            .http
            .unlimited
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.redirect_uri),
            ]);

        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            return Err(Error::InvalidCredentials(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let tokens: TokenResponse = response.json().await?;
        let access = tokens
            .access_token
            .ok_or_else(|| Error::InvalidCredentials("response carries no access token".to_owned()))?;
        info!(
            "authorized (token expires in {})",
            tokens
                .expires_in
                .map_or_else(|| "?".to_owned(), |ttl| format!("{}s", ttl.as_secs()))
        );

        let mut pair = self.pair.lock().await;
        self.store.set(keys::ACCESS_TOKEN, &access, true);
        pair.access = Some(access);
        if let Some(refresh) = tokens.refresh_token {
            self.store.set(keys::REFRESH_TOKEN, &refresh, true);
            pair.refresh = Some(refresh);
        }

        Ok(())
    }

    /// Refreshes the access token unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRefreshToken`] when no refresh token is held and
    /// [`Error::RefreshFailed`] when the grant fails; the held access token
    /// is left untouched in both cases.
    pub async fn refresh(&self) -> Result<String> {
        let mut pair = self.pair.lock().await;
        self.refresh_locked(&mut pair).await
    }

    /// Refreshes only if the held token still equals `observed`.
    ///
    /// This is the single-flight guard for stale-token recovery: when
    /// several requests fail on the same expired bearer, the first caller
    /// through the mutex refreshes, and the rest find a token that no
    /// longer matches what they observed and take it without another
    /// network call.
    ///
    /// # Errors
    ///
    /// Same as [`Self::refresh`].
    pub async fn refresh_if_stale(&self, observed: &str) -> Result<String> {
        let mut pair = self.pair.lock().await;
        if let Some(current) = &pair.access {
            if current != observed {
                return Ok(current.clone());
            }
        }
        self.refresh_locked(&mut pair).await
    }

    async fn refresh_locked(&self, pair: &mut TokenPair) -> Result<String> {
        let refresh = pair.refresh.clone().ok_or(Error::NoRefreshToken)?;

        let url = self.accounts_url.join("api/token")?;
        let request = self
            .http
            .unlimited
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh.as_str()),
            ]);

        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            return Err(Error::RefreshFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let tokens: TokenResponse = response.json().await?;
        let access = tokens
            .access_token
            .ok_or_else(|| Error::RefreshFailed("response carries no access token".to_owned()))?;
        debug!(
            "access token refreshed (expires in {})",
            tokens
                .expires_in
                .map_or_else(|| "?".to_owned(), |ttl| format!("{}s", ttl.as_secs()))
        );

        self.store.set(keys::ACCESS_TOKEN, &access, true);
        pair.access = Some(access.clone());

        // The provider rotates refresh tokens only sometimes; keep the old
        // one unless a replacement came back.
        if let Some(refresh) = tokens.refresh_token {
            self.store.set(keys::REFRESH_TOKEN, &refresh, true);
            pair.refresh = Some(refresh);
        }

        Ok(access)
    }
}
