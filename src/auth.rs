//! Authorization Code flow with PKCE.
//!
//! Logging in is a round-trip through the browser:
//!
//! 1. [`AuthFlow::begin_login`] stores the client ID and a fresh verifier,
//!    and returns the URL to send the browser to. Nothing more happens in
//!    this process; the flow picks up again from the redirect.
//! 2. The platform redirects to the registered URI with `?code=...`.
//! 3. [`AuthFlow::resume_from_redirect`] finds the code and exchanges it,
//!    together with the stored verifier, for an access token.
//!
//! ```text
//! LoggedOut --begin_login--> Authorizing --redirect--> ExchangingCode --token--> LoggedIn
//!     ^                                                      |                      |
//!     +----------------------- no token / failure -----------+                      |
//!     +------------------------------ invalidate -----------------------------------+
//! ```
//!
//! The access token is never refreshed. It is used until the Web API
//! rejects it, at which point [`AuthFlow::invalidate`] drops it and a new
//! login is required.

use std::{borrow::Cow, fmt, sync::Arc};

use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    pkce,
    protocol::{self, token},
    store::{SessionStore, Slot},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AuthState {
    #[default]
    LoggedOut,
    /// The browser was sent to the authorization endpoint.
    Authorizing,
    ExchangingCode,
    LoggedIn,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::Authorizing => write!(f, "authorizing"),
            Self::ExchangingCode => write!(f, "exchanging code"),
            Self::LoggedIn => write!(f, "logged in"),
        }
    }
}

pub struct AuthFlow {
    http_client: Arc<HttpClient>,
    store: SessionStore,
    state: AuthState,

    authorize_url: Url,
    token_url: Url,
    redirect_uri: Url,
    scopes: String,
    verifier_length: usize,
}

impl AuthFlow {
    /// Query parameters that only make sense for a single redirect.
    const REDIRECT_PARAMS: [&'static str; 2] = ["code", "state"];

    /// Resumes whatever session `store` holds. A persisted access token
    /// means logged in.
    #[must_use]
    pub fn new(config: &Config, http_client: Arc<HttpClient>, store: SessionStore) -> Self {
        let state = if store.get(Slot::AccessToken).is_some() {
            AuthState::LoggedIn
        } else {
            AuthState::LoggedOut
        };
        debug!("session restored: {state}");

        Self {
            http_client,
            store,
            state,

            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.scopes.join(" "),
            verifier_length: config.verifier_length,
        }
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.access_token().is_some()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.store.get(Slot::AccessToken)
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.store.get(Slot::ClientId)
    }

    /// Starts a login and returns the authorization URL to navigate to.
    ///
    /// Drops the access token of any current session.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - `client_id` is empty or whitespace (`InvalidArgument`); nothing is
    ///   stored in that case, and any current session is kept
    /// - the session cannot be written
    pub fn begin_login(&mut self, client_id: &str) -> Result<Url> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(Error::invalid_argument("client id is empty"));
        }

        // A new login replaces the current session.
        self.store.clear(Slot::AccessToken)?;
        self.store.set(Slot::ClientId, client_id)?;

        let verifier = pkce::generate_verifier(self.verifier_length);
        let challenge = pkce::derive_challenge(&verifier);
        self.store.set(Slot::CodeVerifier, &verifier)?;

        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("scope", &self.scopes)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", &challenge);

        self.state = AuthState::Authorizing;
        info!("authorizing client {client_id}");

        Ok(url)
    }

    /// Completes a login from the query parameters of the redirect.
    ///
    /// Returns `Ok(false)` when there is no authorization code, which is
    /// the normal case when not returning from a login.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the platform redirected with an error, such as the user denying
    ///   access (`PermissionDenied`)
    /// - there is a code, but no stored client ID or verifier to go with it
    ///   (`FailedPrecondition`)
    /// - the code exchange fails, see [`AuthFlow::exchange_code`]
    pub async fn resume_from_redirect<I, K, V>(&mut self, query: I) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut code = None;
        let mut error = None;
        for (key, value) in query {
            match key.as_ref() {
                "code" => code = Some(value.as_ref().to_owned()),
                "error" => error = Some(value.as_ref().to_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            self.state = AuthState::LoggedOut;
            self.store.clear(Slot::CodeVerifier)?;
            return Err(Error::permission_denied(format!(
                "authorization failed: {error}"
            )));
        }

        let Some(code) = code.filter(|code| !code.is_empty()) else {
            return Ok(false);
        };

        let client_id = self.store.get(Slot::ClientId).map(ToOwned::to_owned);
        let verifier = self.store.get(Slot::CodeVerifier).map(ToOwned::to_owned);
        match (client_id, verifier) {
            (Some(client_id), Some(verifier)) => {
                self.exchange_code(&code, &client_id, &verifier).await?;
                Ok(true)
            }
            (client_id, _) => {
                self.state = AuthState::LoggedOut;
                let missing = if client_id.is_none() {
                    Slot::ClientId
                } else {
                    Slot::CodeVerifier
                };
                warn!("ignoring authorization code: no {missing} stored");
                // A verifier without its client id cannot be used anymore.
                self.store.clear(Slot::CodeVerifier)?;
                Err(Error::failed_precondition(format!(
                    "cannot exchange authorization code without {missing}"
                )))
            }
        }
    }

    /// Completes a login from the full URL the browser was redirected to.
    ///
    /// Returns that URL with the authorization code stripped, so that it
    /// can be shown or bookmarked without being exchanged twice.
    pub async fn resume_from_url(&mut self, url: &Url) -> Result<Url> {
        self.resume_from_redirect(url.query_pairs()).await?;
        Ok(strip_authorization_code(url))
    }

    /// Exchanges an authorization code for an access token.
    ///
    /// The verifier is discarded afterwards, whether the exchange worked or
    /// not; a failed code is not retried.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the token endpoint cannot be reached
    /// - the token endpoint answers without an access token
    ///   (`PermissionDenied`)
    /// - the session cannot be written
    pub async fn exchange_code(
        &mut self,
        code: &str,
        client_id: &str,
        code_verifier: &str,
    ) -> Result<()> {
        self.state = AuthState::ExchangingCode;
        let result = self
            .request_token(code, client_id, code_verifier)
            .await
            .and_then(|token| {
                self.store.clear(Slot::CodeVerifier)?;
                self.store.set(Slot::AccessToken, &token)
            });

        match result {
            Ok(()) => {
                self.state = AuthState::LoggedIn;
                info!("logged in");
                Ok(())
            }
            Err(e) => {
                self.state = AuthState::LoggedOut;
                error!("token exchange failed: {e}");
                self.store.clear(Slot::CodeVerifier)?;
                Err(e)
            }
        }
    }

    async fn request_token(
        &self,
        code: &str,
        client_id: &str,
        code_verifier: &str,
    ) -> Result<String> {
        let request = self.http_client.post_form(
            self.token_url.clone(),
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", client_id),
                ("code_verifier", code_verifier),
            ],
        );

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        let response = match protocol::json::<token::Response>(&body, "token") {
            Ok(response) => response,
            Err(_) if status.is_server_error() => {
                return Err(Error::unavailable(format!("token endpoint returned {status}")));
            }
            Err(e) => return Err(e),
        };

        if let Some(expires_in) = response.expires_in {
            debug!("access token expires in {}s", expires_in.as_secs());
        }

        match response.access_token() {
            Some(token) if status.is_success() => Ok(token.to_owned()),
            _ => Err(Error::permission_denied(response.reason())),
        }
    }

    /// Drops the access token, for example because the Web API rejected it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the session cannot be written. The token is
    /// dropped from memory regardless.
    pub fn invalidate(&mut self) -> Result<()> {
        self.state = AuthState::LoggedOut;
        self.store.clear(Slot::AccessToken)
    }

    /// Logs out on request of the user.
    pub fn logout(&mut self) -> Result<()> {
        info!("logging out");
        self.invalidate()
    }
}

/// Removes the single-use redirect parameters from `url`.
#[must_use]
pub fn strip_authorization_code(url: &Url) -> Url {
    let retained: Vec<(Cow<'_, str>, Cow<'_, str>)> = url
        .query_pairs()
        .filter(|(key, _)| !AuthFlow::REDIRECT_PARAMS.iter().any(|param| key == param))
        .collect();

    let mut stripped = url.clone();
    if retained.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(retained);
    }

    stripped
}
