use sysinfo;
use url::Url;
use veil::Redact;

/// Caller-supplied secrets, usually parsed from `secrets.toml`.
///
/// `access_token` and `refresh_token` are optional: when present they seed
/// the [`crate::store::SecretStore`] so a previous login survives a restart.
#[derive(Clone, PartialEq, Eq, serde::Deserialize, Redact)]
pub struct Secrets {
    /// OAuth client id of the registered application.
    pub client_id: String,

    /// OAuth client secret of the registered application.
    #[redact]
    pub client_secret: String,

    /// The `sp_dc` web session cookie, required only for the dealer channel.
    #[redact]
    pub sp_dc: String,

    /// Redirect URI registered with the application.
    pub redirect_uri: Option<String>,

    /// Previously stored OAuth access token.
    #[redact]
    pub access_token: Option<String>,

    /// Previously stored OAuth refresh token.
    #[redact]
    pub refresh_token: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Redact)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    pub user_agent: String,

    pub client_id: String,
    #[redact]
    pub client_secret: String,
    #[redact]
    pub sp_dc: String,

    pub redirect_uri: String,

    /// Base of the OAuth endpoints, must end in a slash.
    pub accounts_url: Url,
    /// Base of the REST API, must end in a slash.
    pub api_url: Url,
    /// Base of the web player endpoints (server time, client token).
    pub web_url: Url,
    /// The real-time event stream endpoint.
    pub dealer_url: Url,
}

impl Config {
    /// Default OAuth endpoint base.
    const ACCOUNTS_URL: &'static str = "https://accounts.spotify.com/";

    /// Default REST API base.
    const API_URL: &'static str = "https://api.spotify.com/v1/";

    /// Default web player endpoint base.
    const WEB_URL: &'static str = "https://open.spotify.com/";

    /// Default dealer websocket endpoint.
    const DEALER_URL: &'static str = "wss://dealer.spotify.com/";

    /// Default redirect URI for the local authorization-code capture.
    const REDIRECT_URI: &'static str = "http://127.0.0.1:8888/callback/spotify";

    /// Builds a configuration around caller-supplied secrets.
    ///
    /// # Panics
    ///
    /// Panics if the compiled-in package name, version or language would
    /// produce an invalid `User-Agent`, or if a default endpoint URL is
    /// invalid. Both are build defects, not runtime conditions.
    #[must_use]
    pub fn with_secrets(secrets: Secrets) -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            panic!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            );
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            panic!("os name and/or version invalid (\"{os_name}\"; \"{os_version}\")");
        }

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})");
        trace!("user agent: {user_agent}");

        let redirect_uri = secrets
            .redirect_uri
            .unwrap_or_else(|| Self::REDIRECT_URI.to_owned());

        Self {
            app_name,
            app_version,
            app_lang,

            user_agent,

            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            sp_dc: secrets.sp_dc,

            redirect_uri,

            accounts_url: Url::parse(Self::ACCOUNTS_URL).expect("invalid accounts url"),
            api_url: Url::parse(Self::API_URL).expect("invalid api url"),
            web_url: Url::parse(Self::WEB_URL).expect("invalid web url"),
            dealer_url: Url::parse(Self::DEALER_URL).expect("invalid dealer url"),
        }
    }
}
