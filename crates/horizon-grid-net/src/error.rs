//! Error types for the transport layer.

use std::fmt;

use horizon_grid::TransportFailure;

/// Transport-specific errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Request timed out.
    Timeout,
    /// Connection refused, reset or otherwise failed below HTTP.
    Network(String),
    /// HTTP error status (4xx or 5xx).
    Http {
        /// The HTTP status code.
        status: u16,
        /// Canonical reason phrase of the status.
        message: String,
        /// Raw response body, for diagnostics.
        body: String,
    },
    /// Request was cancelled.
    Aborted,
    /// JSON serialization/deserialization error.
    Json(String),
    /// Invalid URL provided.
    InvalidUrl(String),
    /// Invalid header name or value.
    InvalidHeader(String),
}

impl TransportError {
    /// Map onto the failure taxonomy the engine understands.
    ///
    /// Malformed payloads and bad URLs count as network failures: the
    /// request did not yield a usable response.
    pub fn to_failure(&self) -> TransportFailure {
        match self {
            Self::Timeout => TransportFailure::Timeout,
            Self::Aborted => TransportFailure::Abort,
            Self::Http { status, message, .. } => TransportFailure::Http {
                status: *status,
                message: message.clone(),
            },
            Self::Network(_) | Self::Json(_) | Self::InvalidUrl(_) | Self::InvalidHeader(_) => {
                TransportFailure::Network
            }
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Request timed out"),
            Self::Network(msg) => write!(f, "Network error: {msg}"),
            Self::Http { status, message, .. } => write!(f, "HTTP {status}: {message}"),
            Self::Aborted => write!(f, "Request was cancelled"),
            Self::Json(msg) => write!(f, "JSON error: {msg}"),
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {msg}"),
            Self::InvalidHeader(msg) => write!(f, "Invalid header: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Json(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for TransportError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for TransportError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<TransportError> for TransportFailure {
    fn from(err: TransportError) -> Self {
        err.to_failure()
    }
}

/// A specialized Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mapping() {
        assert_eq!(TransportError::Timeout.to_failure(), TransportFailure::Timeout);
        assert_eq!(TransportError::Aborted.to_failure(), TransportFailure::Abort);
        assert_eq!(
            TransportError::Json("eof".into()).to_failure(),
            TransportFailure::Network
        );
        let http = TransportError::Http {
            status: 503,
            message: "Service Unavailable".into(),
            body: "down".into(),
        };
        assert_eq!(
            http.to_failure(),
            TransportFailure::Http {
                status: 503,
                message: "Service Unavailable".into()
            }
        );
        assert_eq!(http.to_string(), "HTTP 503: Service Unavailable");
    }
}
