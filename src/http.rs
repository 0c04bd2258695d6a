//! HTTP client with rate limiting and cookie management for the Spotify APIs.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request throttling so bursts of commands stay inside the provider's
//!   rolling rate window
//! * Optional cookie storage for the web session endpoints
//! * Consistent timeouts and headers
//!
//! # Example
//!
//! ```rust
//! use chorus::http::Client;
//!
//! // Create client with cookies for the web session endpoints
//! let client = Client::with_cookies(&config, cookie_jar)?;
//!
//! // Or without cookies for bearer-authenticated endpoints
//! let client = Client::without_cookies(&config)?;
//!
//! let response = client.send(client.unlimited.get(url)).await?;
//! ```

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{self, cookie::CookieStore};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting and cookie support.
pub struct Client {
    /// Unlimited request client for building requests and special cases.
    ///
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    /// Rate limiter for API quota compliance.
    rate_limiter: DefaultDirectRateLimiter,

    /// Cookie storage for the web session endpoints.
    ///
    /// Optional to support both cookie-authenticated and bearer-only use.
    pub cookie_jar: Option<Arc<dyn CookieStore>>,
}

impl Client {
    /// Rolling window over which calls are counted.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);

    /// Maximum calls allowed per window.
    ///
    /// Spotify does not publish hard numbers; this stays comfortably under
    /// the observed throttling threshold. Requests beyond the limit are
    /// delayed, not dropped.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 100;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new client with optional cookie storage.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client creation fails.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new<C>(config: &Config, cookie_jar: Option<C>) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        // Wrap `cookie_jar` in an `Arc` for asynchronous use.
        let cookie_jar = cookie_jar.map(|jar| Arc::new(jar));

        let mut http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(&config.user_agent);

        if let Some(ref jar) = cookie_jar {
            http_client = http_client.cookie_provider(Arc::clone(jar));
        }

        // Rate limit own requests as to not hammer the Spotify infrastructure.
        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
            cookie_jar: cookie_jar.map(|jar| jar as _), // coerce compiler to infer type
        })
    }

    /// Creates a new client with cookie storage.
    ///
    /// Used by the web session, which authenticates through the `sp_dc`
    /// cookie rather than a bearer token.
    ///
    /// # Errors
    ///
    /// Returns error if client creation fails.
    pub fn with_cookies<C>(config: &Config, cookie_jar: C) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        Self::new(config, Some(cookie_jar))
    }

    /// Creates a new client without cookie storage.
    ///
    /// Used by the OAuth and REST layers, which authenticate per request.
    ///
    /// # Errors
    ///
    /// Returns error if client creation fails.
    pub fn without_cookies(config: &Config) -> Result<Self> {
        // Need to specify a type that satisfies the trait bounds.
        Self::new(config, None::<reqwest::cookie::Jar>)
    }

    /// Executes a request with rate limiting.
    ///
    /// Applies throttling before the request goes out. Build the request on
    /// [`unlimited`](Self::unlimited) and hand it over here.
    ///
    /// # Errors
    ///
    /// Returns error if request construction or execution fails.
    pub async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        // No need to await with jitter because the level of concurrency is low.
        self.rate_limiter.until_ready().await;
        request.send().await.map_err(Into::into)
    }
}
