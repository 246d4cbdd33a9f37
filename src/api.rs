//! Bearer-authenticated calls to the Web API.
//!
//! Covers exactly what mirroring a playback session needs: reading the
//! currently playing item, and the play, pause, skip and seek controls.
//!
//! Responses are mapped onto [`ErrorKind`](crate::error::ErrorKind)s by
//! status code. A `401` always becomes `Unauthenticated`, which callers
//! treat as the end of the session.

use std::{fmt, sync::Arc, time::Duration};

use reqwest::{Method, StatusCode};
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{self, player::CurrentlyPlaying},
};

/// Outcome of a now-playing poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NowPlaying {
    /// No active playback session.
    Nothing,
    Playing(CurrentlyPlaying),
}

/// Remote playback controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Control {
    Play,
    Pause,
    Next,
    Previous,
    Seek(Duration),
}

impl Control {
    #[must_use]
    pub fn method(self) -> Method {
        match self {
            Self::Play | Self::Pause | Self::Seek(_) => Method::PUT,
            Self::Next | Self::Previous => Method::POST,
        }
    }

    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Play => "me/player/play",
            Self::Pause => "me/player/pause",
            Self::Next => "me/player/next",
            Self::Previous => "me/player/previous",
            Self::Seek(_) => "me/player/seek",
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Play => write!(f, "play"),
            Self::Pause => write!(f, "pause"),
            Self::Next => write!(f, "next"),
            Self::Previous => write!(f, "previous"),
            Self::Seek(position) => write!(f, "seek to {}ms", position.as_millis()),
        }
    }
}

pub struct WebApi {
    http_client: Arc<HttpClient>,
    base_url: Url,
}

impl WebApi {
    const NOW_PLAYING_PATH: &'static str = "me/player/currently-playing";

    #[must_use]
    pub fn new(config: &Config, http_client: Arc<HttpClient>) -> Self {
        Self {
            http_client,
            base_url: config.api_url.clone(),
        }
    }

    /// Reads the currently playing item.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the token is rejected (`Unauthenticated`)
    /// - the request fails or times out
    /// - the response cannot be parsed
    pub async fn now_playing(&self, token: &str) -> Result<NowPlaying> {
        let url = self.base_url.join(Self::NOW_PLAYING_PATH)?;
        let request = self.http_client.get(url, token)?;
        let response = self.http_client.execute(request).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(NowPlaying::Nothing);
        }

        let response = Self::check(response)?;
        let body = response.text().await?;
        protocol::json(&body, Self::NOW_PLAYING_PATH).map(NowPlaying::Playing)
    }

    /// Sends a playback control. The response body is not consumed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the token is rejected, the request fails, or the
    /// remote refuses the command (for example without an active device).
    pub async fn control(&self, token: &str, control: Control) -> Result<()> {
        let mut url = self.base_url.join(control.path())?;
        if let Control::Seek(position) = control {
            url.query_pairs_mut()
                .append_pair("position_ms", &position.as_millis().to_string());
        }

        let mut request = self.http_client.authorized(control.method(), url, token)?;
        // Send an explicit `Content-Length: 0`.
        *request.body_mut() = Some(reqwest::Body::from(""));

        let response = self.http_client.execute(request).await?;
        Self::check(response)?;

        debug!("sent {control}");
        Ok(())
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let reason = format!("{} returned {status}", response.url().path());
        Err(match status {
            StatusCode::UNAUTHORIZED => Error::unauthenticated(reason),
            StatusCode::FORBIDDEN => Error::permission_denied(reason),
            StatusCode::NOT_FOUND => Error::not_found(reason),
            StatusCode::TOO_MANY_REQUESTS => Error::resource_exhausted(reason),
            status if status.is_server_error() => Error::unavailable(reason),
            _ => Error::unknown(reason),
        })
    }
}
