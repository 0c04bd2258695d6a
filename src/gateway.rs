//! Authenticated command client for the REST API.
//!
//! Every request goes out stamped with the current OAuth bearer. A `401`
//! is recovered exactly once: the gateway asks the [`TokenManager`] for a
//! refresh (single-flight, so a burst of rejected commands costs one grant),
//! re-stamps, and re-issues. A second `401` means the account is genuinely
//! unauthorized and surfaces as [`Error::AuthenticationFailed`]. All other
//! failures propagate without retry.
//!
//! Playback mutations return whether the provider accepted the command;
//! their response bodies are never parsed. Library reads (`playlists`,
//! `saved_tracks`) pass the provider payload through verbatim.

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    protocol::{normalize, CurrentlyPlaying, PlaybackState},
    tokens::TokenManager,
};

/// Repeat mode accepted by [`Gateway::set_repeat`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Repeat {
    /// Repeat the current item.
    Track,
    /// Repeat the current context.
    Context,
    /// No repeat.
    Off,
}

impl Repeat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Context => "context",
            Self::Off => "off",
        }
    }
}

/// Playback context accepted by [`Gateway::play_context`].
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Context {
    /// A playlist by id.
    Playlist(String),
    /// The account's saved tracks collection.
    SavedTracks,
}

#[derive(serde::Deserialize)]
struct Me {
    id: String,
}

/// Bearer-authenticated client for the player and library endpoints.
pub struct Gateway {
    /// HTTP client, shared rate limit across all commands.
    http: http::Client,

    /// Base of the REST API.
    api_url: Url,

    /// Token source, shared with the realtime channel.
    tokens: Arc<TokenManager>,
}

impl Gateway {
    /// Creates a gateway around a shared token manager.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config, tokens: Arc<TokenManager>) -> Result<Self> {
        Ok(Self {
            http: http::Client::without_cookies(config)?,
            api_url: config.api_url.clone(),
            tokens,
        })
    }

    /// Sends a request with the current bearer, recovering one stale token.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let token = match self.tokens.access_token().await {
            Some(token) => token,
            None => self.tokens.refresh().await?,
        };

        let response = self.http.send(build().bearer_auth(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("bearer token rejected, refreshing");
        let fresh = self.tokens.refresh_if_stale(&token).await?;
        let response = self.http.send(build().bearer_auth(&fresh)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthenticationFailed(
                "request rejected after token refresh".to_owned(),
            ));
        }

        Ok(response)
    }

    /// Sends a playback mutation; `true` when the provider accepted it.
    async fn command<F>(&self, build: F) -> Result<bool>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let response = self.send_authorized(build).await?;
        Ok(response.status().is_success())
    }

    /// The current playback state, normalized.
    ///
    /// An empty body or `204 No Content` means nothing is playing.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a non-success status.
    pub async fn playback(&self) -> Result<PlaybackState> {
        let mut url = self.api_url.join("me/player")?;
        url.query_pairs_mut()
            .append_pair("additional_types", "episode");

        let response = self
            .send_authorized(|| self.http.unlimited.get(url.clone()))
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(PlaybackState::NoSession);
        }

        let body = response.error_for_status()?.text().await?;
        if body.is_empty() {
            return Ok(PlaybackState::NoSession);
        }

        let raw: CurrentlyPlaying = serde_json::from_str(&body)?;
        Ok(normalize(raw))
    }

    /// Resumes or pauses playback.
    pub async fn set_playing(&self, playing: bool) -> Result<bool> {
        let path = if playing { "me/player/play" } else { "me/player/pause" };
        let url = self.api_url.join(path)?;
        self.command(|| self.http.unlimited.put(url.clone())).await
    }

    /// Skips to the next item.
    pub async fn next(&self) -> Result<bool> {
        let url = self.api_url.join("me/player/next")?;
        self.command(|| self.http.unlimited.post(url.clone())).await
    }

    /// Skips to the previous item.
    pub async fn previous(&self) -> Result<bool> {
        let url = self.api_url.join("me/player/previous")?;
        self.command(|| self.http.unlimited.post(url.clone())).await
    }

    /// Sets shuffle mode.
    pub async fn set_shuffle(&self, shuffle: bool) -> Result<bool> {
        let mut url = self.api_url.join("me/player/shuffle")?;
        url.query_pairs_mut()
            .append_pair("state", if shuffle { "true" } else { "false" });
        self.command(|| self.http.unlimited.put(url.clone())).await
    }

    /// Sets repeat mode.
    pub async fn set_repeat(&self, repeat: Repeat) -> Result<bool> {
        let mut url = self.api_url.join("me/player/repeat")?;
        url.query_pairs_mut().append_pair("state", repeat.as_str());
        self.command(|| self.http.unlimited.put(url.clone())).await
    }

    /// Sets the active device volume, in percent.
    pub async fn set_volume(&self, percent: u8) -> Result<bool> {
        let mut url = self.api_url.join("me/player/volume")?;
        url.query_pairs_mut()
            .append_pair("volume_percent", &percent.min(100).to_string());
        self.command(|| self.http.unlimited.put(url.clone())).await
    }

    /// Starts playback of a context.
    ///
    /// Saved tracks have no public context URI of their own; the provider
    /// addresses them as the user's collection, which needs the user id.
    pub async fn play_context(&self, context: Context) -> Result<bool> {
        let context_uri = match context {
            Context::Playlist(id) => format!("spotify:playlist:{id}"),
            Context::SavedTracks => {
                let user_id = self.user_id().await?;
                format!("spotify:user:{user_id}:collection")
            }
        };

        let url = self.api_url.join("me/player/play")?;
        let body = serde_json::json!({ "context_uri": context_uri });
        self.command(|| self.http.unlimited.put(url.clone()).json(&body))
            .await
    }

    /// The account's playlists, verbatim.
    pub async fn playlists(&self) -> Result<Value> {
        self.fetch_json("me/playlists").await
    }

    /// The account's saved tracks, verbatim.
    pub async fn saved_tracks(&self) -> Result<Value> {
        self.fetch_json("me/tracks").await
    }

    /// The account's user id.
    pub async fn user_id(&self) -> Result<String> {
        let url = self.api_url.join("me")?;
        let response = self
            .send_authorized(|| self.http.unlimited.get(url.clone()))
            .await?;
        let me: Me = response.error_for_status()?.json().await?;
        Ok(me.id)
    }

    async fn fetch_json(&self, path: &str) -> Result<Value> {
        let url = self.api_url.join(path)?;
        let response = self
            .send_authorized(|| self.http.unlimited.get(url.clone()))
            .await?;
        let value = response.error_for_status()?.json().await?;
        Ok(value)
    }
}
