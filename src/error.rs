//! Error handling for nowplay.
//!
//! Provides a unified error handling system based on gRPC status codes,
//! with mapping from various underlying errors to appropriate categories.
//!
//! # Error Categories
//!
//! The login and sync engine recognize four failure families, each backed
//! by one or more [`ErrorKind`]s:
//! * Validation failures, such as an empty client ID (`InvalidArgument`)
//! * Authorization failures during the code exchange (`FailedPrecondition`,
//!   `PermissionDenied`)
//! * Rejected bearer tokens (`Unauthenticated`)
//! * Transient network trouble (`Unavailable`, `DeadlineExceeded`,
//!   `DataLoss`, `Unknown`)
//!
//! # Example
//!
//! ```rust
//! use nowplay::error::{Error, ErrorKind, Result};
//!
//! fn check(client_id: &str) -> Result<()> {
//!     if client_id.trim().is_empty() {
//!         return Err(Error::invalid_argument("client id is empty"));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether this error is recovered by simply trying again later.
    ///
    /// The sync engine logs transient errors and leaves its state untouched;
    /// the next scheduled poll acts as the retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Unavailable
                | ErrorKind::DeadlineExceeded
                | ErrorKind::DataLoss
                | ErrorKind::ResourceExhausted
                | ErrorKind::Unknown
        )
    }
}

/// Standard result type for nowplay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown = 2,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound = 5,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied = 7,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal = 13,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable = 14,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,
}

macro_rules! constructor {
    ($(#[$doc:meta])* $name:ident => $kind:ident) => {
        $(#[$doc])*
        pub fn $name<E>(error: E) -> Self
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            Self {
                kind: ErrorKind::$kind,
                error: error.into(),
            }
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "no active device");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructor!(
        /// Creates an error for data that arrived truncated or corrupted.
        data_loss => DataLoss
    );

    constructor!(
        /// Creates an error for operations that exceeded their deadline.
        deadline_exceeded => DeadlineExceeded
    );

    constructor!(
        /// Creates an error for operations that cannot proceed in the
        /// current state, such as a code exchange without a stored verifier.
        failed_precondition => FailedPrecondition
    );

    constructor!(
        /// Creates an error for unexpected internal errors.
        internal => Internal
    );

    constructor!(
        /// Creates an error for arguments that fail validation.
        ///
        /// # Examples
        ///
        /// ```rust
        /// let err = Error::invalid_argument("client id is empty");
        /// assert_eq!(err.kind, ErrorKind::InvalidArgument);
        /// ```
        invalid_argument => InvalidArgument
    );

    constructor!(
        /// Creates an error for missing resources.
        not_found => NotFound
    );

    constructor!(
        /// Creates an error for requests the remote refused, such as a
        /// token endpoint that did not hand out a token.
        permission_denied => PermissionDenied
    );

    constructor!(
        /// Creates an error for rate limiting by the remote.
        resource_exhausted => ResourceExhausted
    );

    constructor!(
        /// Creates an error for authentication failures.
        ///
        /// Maps to HTTP 401 Unauthorized. Raised when the bearer token is
        /// rejected, which invalidates the session.
        unauthenticated => Unauthenticated
    );

    constructor!(
        /// Creates an error for services that are temporarily unavailable.
        unavailable => Unavailable
    );

    constructor!(
        /// Creates an error that doesn't fit any other category.
        unknown => Unknown
    );
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::NotFound => Self::not_found(err),
            Io::PermissionDenied => Self::permission_denied(err),
            Io::AddrNotAvailable | Io::ConnectionRefused | Io::NotConnected => {
                Self::unavailable(err)
            }
            Io::BrokenPipe | Io::ConnectionReset | Io::ConnectionAborted => Self::unavailable(err),
            Io::UnexpectedEof => Self::data_loss(err),
            Io::TimedOut => Self::deadline_exceeded(err),
            Io::InvalidInput | Io::InvalidData => Self::invalid_argument(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Every transport failure lands in a transient category, except for
/// requests that could not be built in the first place.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_body() || err.is_decode() {
            return Self::data_loss(err);
        }

        if err.is_connect() || err.is_redirect() || err.is_request() {
            return Self::unavailable(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors.
///
/// Malformed payloads from the remote are treated as data loss so that they
/// count as transient; the next poll replaces them.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::data_loss(err)
    }
}

/// Converts session file parse errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts session file serialization errors to `Internal`.
impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::internal(e)
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `Internal`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_details() {
        let err = Error::unauthenticated("token rejected");
        assert_eq!(
            err.to_string(),
            "no valid authentication credentials: token rejected"
        );
    }

    #[test]
    fn transient_kinds() {
        assert!(Error::unavailable("down").is_transient());
        assert!(Error::data_loss("truncated").is_transient());
        assert!(!Error::unauthenticated("401").is_transient());
        assert!(!Error::invalid_argument("empty").is_transient());
        assert!(!Error::failed_precondition("no verifier").is_transient());
    }

    #[test]
    fn io_errors_are_mapped() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "closed"));
        assert!(err.is_transient());
    }

    #[test]
    fn json_errors_are_transient() {
        let err = Error::from(serde_json::from_str::<u32>("{").unwrap_err());
        assert_eq!(err.kind, ErrorKind::DataLoss);
        assert!(err.is_transient());
    }
}
