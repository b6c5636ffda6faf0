//! Network-level failure taxonomy.

use thiserror::Error;

/// Why a request failed before or while producing a usable response.
///
/// HTTP error statuses are folded into the same taxonomy via
/// [`TransportErrorKind::from_status`], so callers deal with one kind of
/// failure regardless of whether the socket or the server gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportErrorKind {
    // ── Connection ────────────────────────────────────────────────────────
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Remote host closed")]
    RemoteHostClosed,
    #[error("Host not found")]
    HostNotFound,
    #[error("Timeout")]
    Timeout,
    #[error("Operation canceled")]
    OperationCanceled,
    #[error("TLS handshake failed")]
    TlsHandshakeFailed,
    #[error("Temporary network failure")]
    TemporaryNetworkFailure,
    #[error("Too many redirects")]
    TooManyRedirects,

    // ── Content (4xx) ─────────────────────────────────────────────────────
    #[error("Content access denied")]
    ContentAccessDenied,
    #[error("Content not found")]
    ContentNotFound,
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Content conflict error")]
    ContentConflict,
    #[error("Content gone error")]
    ContentGone,
    #[error("Unknown content error")]
    UnknownContentError,

    // ── Protocol ──────────────────────────────────────────────────────────
    #[error("Protocol failure")]
    ProtocolFailure,

    // ── Server (5xx) ──────────────────────────────────────────────────────
    #[error("Internal server error")]
    InternalServerError,
    #[error("Operation not implemented")]
    OperationNotImplemented,
    #[error("Service unavailable")]
    ServiceUnavailable,
    #[error("Unknown server error")]
    UnknownServerError,

    #[error("Unknown")]
    Unknown,
}

impl TransportErrorKind {
    /// Map an HTTP status to a failure kind; `None` for non-error statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        let kind = match status {
            0..=399 => return None,
            401 => Self::AuthenticationRequired,
            403 => Self::ContentAccessDenied,
            404 => Self::ContentNotFound,
            409 => Self::ContentConflict,
            410 => Self::ContentGone,
            400..=499 => Self::UnknownContentError,
            500 => Self::InternalServerError,
            501 => Self::OperationNotImplemented,
            503 => Self::ServiceUnavailable,
            _ => Self::UnknownServerError,
        };
        Some(kind)
    }

    /// Classify a reqwest error that did not produce a response.
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_redirect() {
            return Self::TooManyRedirects;
        }
        if err.is_connect() {
            let chain = error_chain(err).to_ascii_lowercase();
            if chain.contains("dns") || chain.contains("resolve") || chain.contains("lookup") {
                return Self::HostNotFound;
            }
            if chain.contains("refused") {
                return Self::ConnectionRefused;
            }
            return Self::TemporaryNetworkFailure;
        }
        if err.is_body() || err.is_decode() {
            return Self::RemoteHostClosed;
        }
        if err.is_builder() || err.is_request() {
            return Self::ProtocolFailure;
        }
        Self::Unknown
    }
}

/// Flatten an error and all of its sources into one string.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

/// True when the failure came from the TLS layer (handshake, certificate).
pub(crate) fn is_tls_failure(err: &reqwest::Error) -> bool {
    let chain = error_chain(err).to_ascii_lowercase();
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|needle| chain.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses_are_not_errors() {
        assert_eq!(TransportErrorKind::from_status(200), None);
        assert_eq!(TransportErrorKind::from_status(204), None);
        assert_eq!(TransportErrorKind::from_status(302), None);
    }

    #[test]
    fn client_errors_map_to_content_kinds() {
        assert_eq!(
            TransportErrorKind::from_status(401),
            Some(TransportErrorKind::AuthenticationRequired)
        );
        assert_eq!(
            TransportErrorKind::from_status(404),
            Some(TransportErrorKind::ContentNotFound)
        );
        assert_eq!(
            TransportErrorKind::from_status(418),
            Some(TransportErrorKind::UnknownContentError)
        );
    }

    #[test]
    fn server_errors_map_to_server_kinds() {
        assert_eq!(
            TransportErrorKind::from_status(500),
            Some(TransportErrorKind::InternalServerError)
        );
        assert_eq!(
            TransportErrorKind::from_status(503),
            Some(TransportErrorKind::ServiceUnavailable)
        );
        assert_eq!(
            TransportErrorKind::from_status(599),
            Some(TransportErrorKind::UnknownServerError)
        );
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(TransportErrorKind::HostNotFound.to_string(), "Host not found");
    }
}
