//! Web session that mints time-boxed client credentials.
//!
//! The dealer channel does not accept the OAuth bearer. It wants the token
//! the web player itself uses, which the provider hands out only to holders
//! of a valid `sp_dc` browser session cookie and a one-time password proving
//! knowledge of the web player's build secret. [`WebSession`] reproduces
//! that exchange: it reads the provider's clock, computes the password with
//! [`crate::totp`], and trades both plus the cookie for a short-lived token.
//!
//! Credentials are minted fresh for every connection attempt and never
//! cached; the caller holds them only for the lifetime of one socket.

use std::time::SystemTime;

use reqwest::{cookie::Jar, header::USER_AGENT};
use url::Url;
use veil::Redact;

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    protocol::{ClientToken, ServerTime},
    totp,
};

/// A short-lived web player token, valid for one dealer connection.
#[derive(Clone, Redact)]
pub struct ClientCredential {
    /// The token itself, passed as the dealer socket query credential.
    #[redact]
    pub token: String,

    /// When the credential was minted.
    pub minted_at: SystemTime,
}

/// Cookie-authenticated client for the web player endpoints.
pub struct WebSession {
    /// HTTP client carrying the `sp_dc` cookie jar.
    http: http::Client,

    /// Base of the web player endpoints.
    web_url: Url,
}

impl WebSession {
    /// `User-Agent` sent on web player endpoints.
    ///
    /// The credential endpoint serves anonymous tokens to clients it does
    /// not recognize as a browser, so the library user agent stays off
    /// these requests.
    const BROWSER_USER_AGENT: &'static str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

    /// Creates a web session around the configured `sp_dc` cookie.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let jar = Jar::default();
        jar.add_cookie_str(&format!("sp_dc={}", config.sp_dc), &config.web_url);

        Ok(Self {
            http: http::Client::with_cookies(config, jar)?,
            web_url: config.web_url.clone(),
        })
    }

    /// Reads the provider's clock in milliseconds since the epoch.
    ///
    /// The one-time password must be computed against the provider's clock,
    /// not ours. Any failure on this endpoint, transport or content, maps to
    /// [`Error::UpstreamUnavailable`].
    async fn server_time_millis(&self) -> Result<u64> {
        let url = self.web_url.join("server-time")?;
        let request = self
            .http
            .unlimited
            .get(url)
            .header(USER_AGENT, Self::BROWSER_USER_AGENT);

        let response = self
            .http
            .send(request)
            .await
            .and_then(|response| response.error_for_status().map_err(Into::into))
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        let server_time: ServerTime = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;

        Ok(server_time.server_time.saturating_mul(1_000))
    }

    /// Mints a fresh client credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamUnavailable`] when the server time cannot be
    /// read, and [`Error::InvalidCookie`] when the credential endpoint
    /// rejects the exchange or withholds the token, which means the `sp_dc`
    /// cookie is stale or wrong.
    pub async fn client_credential(&self) -> Result<ClientCredential> {
        let timestamp_ms = self.server_time_millis().await?;

        let secret = totp::derive_secret();
        let otp = totp::generate(&secret, timestamp_ms);
        debug!("minting client credential (ts {timestamp_ms})");

        let mut url = self.web_url.join("get_access_token")?;
        url.query_pairs_mut()
            .append_pair("reason", "init")
            .append_pair("productType", "web-player")
            .append_pair("totp", &otp)
            .append_pair("totpVer", totp::VERSION)
            .append_pair("ts", &timestamp_ms.to_string());

        let request = self
            .http
            .unlimited
            .get(url)
            .header(USER_AGENT, Self::BROWSER_USER_AGENT);
        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            return Err(Error::InvalidCookie(format!(
                "credential endpoint returned {}",
                response.status()
            )));
        }

        let token: ClientToken = response.json().await?;
        let token = token
            .access_token
            .ok_or_else(|| Error::InvalidCookie("response carries no access token".to_owned()))?;

        Ok(ClientCredential {
            token,
            minted_at: SystemTime::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::config::Secrets;

    fn config(web_url: &str) -> Config {
        let mut config = Config::with_secrets(Secrets {
            client_id: "id".to_owned(),
            client_secret: "secret".to_owned(),
            sp_dc: "cookie".to_owned(),
            redirect_uri: None,
            access_token: None,
            refresh_token: None,
        });
        config.web_url = Url::parse(web_url).unwrap();
        config
    }

    #[tokio::test]
    async fn mints_credential_against_provider_clock() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/server-time"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "serverTime": 90u64,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let expected_otp = totp::generate(&totp::derive_secret(), 90_000);
        Mock::given(method("GET"))
            .and(path("/get_access_token"))
            .and(query_param("reason", "init"))
            .and(query_param("productType", "web-player"))
            .and(query_param("totp", expected_otp.as_str()))
            .and(query_param("totpVer", "5"))
            .and(query_param("ts", "90000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "web-token",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = WebSession::new(&config(&format!("{}/", server.uri()))).unwrap();
        let credential = session.client_credential().await.unwrap();
        assert_eq!(credential.token, "web-token");
    }

    #[tokio::test]
    async fn unreachable_clock_is_upstream_unavailable() {
        let session = WebSession::new(&config("http://127.0.0.1:9/")).unwrap();
        let error = session.client_credential().await.unwrap_err();
        assert!(matches!(error, Error::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn rejected_exchange_is_invalid_cookie() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/server-time"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "serverTime": 1u64,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get_access_token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let session = WebSession::new(&config(&format!("{}/", server.uri()))).unwrap();
        let error = session.client_credential().await.unwrap_err();
        assert!(matches!(error, Error::InvalidCookie(_)));
    }

    #[tokio::test]
    async fn withheld_token_is_invalid_cookie() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/server-time"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "serverTime": 1u64,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get_access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let session = WebSession::new(&config(&format!("{}/", server.uri()))).unwrap();
        let error = session.client_credential().await.unwrap_err();
        assert!(matches!(error, Error::InvalidCookie(_)));
    }

    #[test]
    fn credential_token_is_redacted_in_debug_output() {
        let credential = ClientCredential {
            token: "very-secret".to_owned(),
            minted_at: SystemTime::now(),
        };
        assert!(!format!("{credential:?}").contains("very-secret"));
    }
}
