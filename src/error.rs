//! Error types for portal operations.
//!
//! Every variant carries the URL or path it relates to so log lines and
//! user-facing messages are actionable without a backtrace.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::CookieError;

/// Errors returned by the portal session, the catalogue, and file saving.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The request never got an HTTP answer.
    #[error("network error requesting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout requesting {url}")]
    Timeout { url: String },

    /// The portal answered with a non-success status.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus { url: String, status: u16 },

    /// The identity provider rejected the credentials.
    #[error("login failed: {message}")]
    Login {
        /// Message shown by the identity provider.
        message: String,
    },

    /// The portal asked for credentials but `signin` was never called.
    #[error("the portal requested a login but no credentials are set; call signin first")]
    NotSignedIn,

    /// The login handshake did not converge.
    #[error("login handshake for {url} did not finish after {steps} steps")]
    HandshakeLoop {
        /// The originally requested URL.
        url: String,
        /// Number of steps performed.
        steps: usize,
    },

    /// The catalogue page refused access for the requested year.
    #[error("access denied by the portal for {url}")]
    AccessDenied {
        /// The catalogue URL.
        url: String,
    },

    /// The portal answered 403 for a file download.
    #[error("file not found: {url}")]
    FileNotFound {
        /// The download link.
        url: String,
    },

    /// A page did not have the expected structure.
    #[error("unexpected page structure at {url}: {what}")]
    Parse {
        /// The page URL.
        url: String,
        /// What was missing or malformed.
        what: String,
    },

    /// A JSON body could not be decoded.
    #[error("invalid JSON from {url}: {source}")]
    Json {
        /// The URL that returned the body.
        url: String,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A link could not be turned into an absolute URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending link.
        url: String,
    },

    /// Writing, renaming or stamping a local file failed.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session cookie file could not be read or written.
    #[error(transparent)]
    Cookie(#[from] CookieError),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl PortalError {
    /// Creates a network or timeout error from a reqwest error.
    pub fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a page-structure error.
    pub fn parse(url: impl Into<String>, what: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            what: what.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the HTTP status code carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::FileNotFound { .. } => Some(403),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display_contains_status_and_url() {
        let error = PortalError::http_status("https://didattica.polito.it/x", 500);
        let msg = error.to_string();
        assert!(msg.contains("500"), "Expected '500' in: {msg}");
        assert!(msg.contains("https://didattica.polito.it/x"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_login_display_carries_portal_message() {
        let error = PortalError::Login {
            message: "Username o password errati".to_string(),
        };
        assert_eq!(error.to_string(), "login failed: Username o password errati");
    }

    #[test]
    fn test_io_display_contains_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = PortalError::io("/tmp/lesson.mp4", io_error);
        assert!(error.to_string().contains("/tmp/lesson.mp4"));
    }

    #[test]
    fn test_status_of_file_not_found_is_403() {
        let error = PortalError::FileNotFound {
            url: "https://didattica.polito.it/d?nod=1".to_string(),
        };
        assert_eq!(error.status(), Some(403));
        assert_eq!(PortalError::NotSignedIn.status(), None);
    }
}
