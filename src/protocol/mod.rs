//! Wire types for the accounts service and the Web API.
//!
//! # Submodules
//!
//! * [`token`] - Token endpoint responses from the code exchange
//! * [`player`] - The currently playing item and playback state
//!
//! Both are parsed through [`json`], which logs what came over the wire
//! at TRACE level.

pub mod player;
pub mod token;

use std::fmt::Debug;

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Largest part of an unparseable body that is logged.
const MAX_LOGGED_BODY: usize = 1024;

/// Parses `body` as `T`. `origin` names the endpoint in log output.
///
/// Bodies that do not parse are logged at TRACE, cut to
/// [`MAX_LOGGED_BODY`] bytes.
///
/// # Errors
///
/// Will return `Err` (`DataLoss`) if `body` is not JSON or does not have
/// the shape of `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: DeserializeOwned + Debug,
{
    let result = serde_json::from_str::<T>(body);
    match &result {
        Ok(parsed) => trace!("{origin}: {parsed:#?}"),
        Err(e) => {
            warn!("{origin}: unexpected response ({e})");
            trace!("{origin}: {}", excerpt(body));
        }
    }

    result.map_err(Into::into)
}

fn excerpt(body: &str) -> &str {
    let mut end = body.len().min(MAX_LOGGED_BODY);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn malformed_body_is_data_loss() {
        let err = json::<token::Response>("<html>", "test").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let body = "é".repeat(MAX_LOGGED_BODY);
        let cut = excerpt(&body);
        assert!(cut.len() <= MAX_LOGGED_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(excerpt("short"), "short");
    }
}
