//! HTTP client with rate limiting for the accounts service and Web API.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to stay inside the platform's quota
//! * Bearer authentication
//! * Consistent timeouts and headers
//!
//! # Rate Limiting
//!
//! The Web API counts calls in a rolling 30-second window. Own requests
//! are throttled to 120 calls per window, with bursts up to that maximum.
//! One poll per second plus the occasional command stays well below it.
//!
//! # Example
//!
//! ```rust
//! use nowplay::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get(url, token)?;
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Body, Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window over which the platform counts calls.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);

    /// Maximum own calls per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 120;

    /// Duration to keep idle connections alive.
    ///
    /// Polling every second keeps the connection busy anyway.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    ///
    /// A poll that does not answer well inside its one-second interval is
    /// abandoned so it cannot pile up behind the next one.
    const READ_TIMEOUT: Duration = Duration::from_secs(2);

    /// Duration to wait for a connection to be established.
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

    const FORM_CONTENT: HeaderValue = HeaderValue::from_static("application/x-www-form-urlencoded");

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .user_agent(&config.user_agent);

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
        })
    }

    /// Builds a request with specified method, URL and body.
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    /// Builds a bearer-authenticated request without a body.
    ///
    /// # Errors
    ///
    /// Returns error if the token contains characters that are not allowed
    /// in a header.
    pub fn authorized<U>(&self, method: Method, url: U, token: &str) -> Result<reqwest::Request>
    where
        U: Into<Url>,
    {
        let mut request = reqwest::Request::new(method, url.into());

        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);

        Ok(request)
    }

    /// Builds a bearer-authenticated GET request.
    pub fn get<U>(&self, url: U, token: &str) -> Result<reqwest::Request>
    where
        U: Into<Url>,
    {
        self.authorized(Method::GET, url, token)
    }

    /// Builds a POST request with a form-encoded body.
    ///
    /// # Arguments
    ///
    /// * `url` - Request URL
    /// * `fields` - Form fields, in order
    pub fn post_form<U>(&self, url: U, fields: &[(&str, &str)]) -> reqwest::Request
    where
        U: Into<Url>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();

        let mut request = self.request(Method::POST, url, body);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, Self::FORM_CONTENT);

        request
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * Request execution fails
    /// * Network error occurs
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}
