//! Endpoints, timings and client identity.
//!
//! A [`Config`] is built once at startup and handed by reference to the
//! HTTP client, the login flow and the sync engine.

use std::time::Duration;

use url::Url;

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub user_agent: String,

    /// Where the browser is sent to grant access.
    pub authorize_url: Url,
    /// Where authorization codes are exchanged for access tokens.
    pub token_url: Url,
    /// Base of the Web API, ending in a slash.
    pub api_url: Url,

    /// The pre-registered URI the platform redirects back to.
    pub redirect_uri: Url,
    pub scopes: Vec<String>,

    pub verifier_length: usize,
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    pub confirm_delay: Duration,
}

impl Config {
    pub const DEFAULT_REDIRECT_URI: &'static str = "http://127.0.0.1:8888/callback";

    const ACCOUNTS_URL: &'static str = "https://accounts.spotify.com/";
    const API_URL: &'static str = "https://api.spotify.com/v1/";

    const SCOPES: [&'static str; 3] = [
        "user-read-playback-state",
        "user-read-currently-playing",
        "user-modify-playback-state",
    ];

    /// Configuration against the production endpoints.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `redirect_uri` is not an absolute URL.
    pub fn new(redirect_uri: &str) -> Result<Self> {
        let accounts = Url::parse(Self::ACCOUNTS_URL)?;
        let api = Url::parse(Self::API_URL)?;
        let mut config = Self::with_endpoints(&accounts, &api)?;
        config.redirect_uri = Url::parse(redirect_uri)?;
        Ok(config)
    }

    /// Configuration against an alternative accounts service and Web API,
    /// such as a mock server.
    pub fn with_endpoints(accounts: &Url, api: &Url) -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.contains(['/', ';']))
            .unwrap_or_else(|| String::from("0"));

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        // Joining onto a base without a trailing slash would drop its last
        // path segment.
        let mut api_url = api.clone();
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        Ok(Self {
            app_name,
            app_version,
            user_agent,

            authorize_url: accounts.join("authorize")?,
            token_url: accounts.join("api/token")?,
            api_url,

            redirect_uri: Url::parse(Self::DEFAULT_REDIRECT_URI)?,
            scopes: Self::SCOPES.iter().map(ToString::to_string).collect(),

            verifier_length: 64,
            poll_interval: Duration::from_millis(1000),
            tick_interval: Duration::from_millis(100),
            confirm_delay: Duration::from_millis(300),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_endpoints() {
        let config = Config::new("https://example.com/callback").unwrap();
        assert_eq!(
            config.authorize_url.as_str(),
            "https://accounts.spotify.com/authorize"
        );
        assert_eq!(
            config.token_url.as_str(),
            "https://accounts.spotify.com/api/token"
        );
        assert_eq!(
            config.api_url.join("me/player/play").unwrap().as_str(),
            "https://api.spotify.com/v1/me/player/play"
        );
        assert_eq!(config.redirect_uri.as_str(), "https://example.com/callback");
        assert_eq!(config.scopes.len(), 3);
    }

    #[test]
    fn api_base_gets_trailing_slash() {
        let accounts = Url::parse("http://127.0.0.1:9000/").unwrap();
        let api = Url::parse("http://127.0.0.1:9000/v1").unwrap();
        let config = Config::with_endpoints(&accounts, &api).unwrap();
        assert_eq!(config.api_url.as_str(), "http://127.0.0.1:9000/v1/");
    }

    #[test]
    fn rejects_relative_redirect_uri() {
        assert!(Config::new("/callback").is_err());
    }
}
