//! Error types for bundle-dl
//!
//! This module provides the error taxonomy for a transfer run:
//! - Per-resource failures (fetch, validation, size, encoding) that degrade a run
//!   to partial success
//! - Structural failures (assembler state, empty selection, archive persistence)
//!   that end a run
//! - The distinguished [`Error::Aborted`] outcome of a user-requested cancellation
//! - Machine-readable error codes for callers that surface errors to a UI

use thiserror::Error;

/// Result type alias for bundle-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bundle-dl
#[derive(Debug, Error)]
pub enum Error {
    /// The boundary answered with a status outside the success range
    #[error("HTTP {status} fetching {url}")]
    Fetch {
        /// HTTP status code returned by the remote server
        status: u16,
        /// The URL that was requested
        url: String,
    },

    /// The boundary answered successfully but with an empty body
    #[error("empty response received")]
    EmptyResponse,

    /// The body is an HTML page standing in for the requested resource
    #[error("server returned HTML error page instead of file")]
    DisguisedErrorPage,

    /// Payload is larger than the ceiling for its media class
    #[error("file too large: {actual} bytes (limit: {limit} bytes)")]
    SizeExceeded {
        /// The ceiling that applies to the resource
        limit: u64,
        /// The observed (or implied) size
        actual: u64,
    },

    /// Binary-to-text transcoding failed
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// An operation was attempted in a state that does not allow it
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        /// The attempted operation (e.g. "add entry", "finalize")
        operation: String,
        /// The state that rejected it (e.g. "finalized")
        state: String,
    },

    /// Writing to disk through the persistence primitive failed
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Nothing was selected for transfer and no text payload was requested
    #[error("nothing selected: no resources and no text payload")]
    NothingSelected,

    /// The run was cancelled by the user
    #[error("download cancelled by user")]
    Aborted,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "limits.video_ceiling")
        key: Option<String>,
    },

    /// The boundary worker is gone or dropped a reply
    #[error("boundary unavailable: {0}")]
    Boundary(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// ZIP writer error
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a failure propagates through a transfer run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Recorded against one resource; the run continues
    PerResource,
    /// Ends the run with the `error` phase
    Structural,
    /// Ends the run with the `cancelled` phase
    Cancelled,
}

impl Error {
    /// Shorthand for [`Error::InvalidState`]
    pub fn invalid_state(operation: impl Into<String>, state: impl Into<String>) -> Self {
        Error::InvalidState {
            operation: operation.into(),
            state: state.into(),
        }
    }

    /// Shorthand for [`Error::Config`]
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Classify this error according to the run's propagation policy
    pub fn severity(&self) -> Severity {
        match self {
            Error::Aborted => Severity::Cancelled,
            Error::InvalidState { .. }
            | Error::NothingSelected
            | Error::Persistence(_)
            | Error::Config { .. }
            | Error::Boundary(_) => Severity::Structural,
            Error::Fetch { .. }
            | Error::EmptyResponse
            | Error::DisguisedErrorPage
            | Error::SizeExceeded { .. }
            | Error::Encoding(_)
            | Error::Io(_)
            | Error::Network(_)
            | Error::Archive(_)
            | Error::Serialization(_) => Severity::PerResource,
        }
    }

    /// Whether a failure of this kind only affects the resource it occurred on
    pub fn is_per_resource(&self) -> bool {
        self.severity() == Severity::PerResource
    }

    /// Get the machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Fetch { .. } => "fetch_error",
            Error::EmptyResponse => "empty_response",
            Error::DisguisedErrorPage => "disguised_error_page",
            Error::SizeExceeded { .. } => "size_exceeded",
            Error::Encoding(_) => "encoding_error",
            Error::InvalidState { .. } => "invalid_state",
            Error::Persistence(_) => "persistence_error",
            Error::NothingSelected => "nothing_selected",
            Error::Aborted => "aborted",
            Error::Config { .. } => "config_error",
            Error::Boundary(_) => "boundary_unavailable",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Archive(_) => "archive_error",
            Error::Serialization(_) => "serialization_error",
        }
    }

    /// HTTP status carried by a [`Error::Fetch`], if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Fetch { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn all_error_variants() -> Vec<(Error, Severity, &'static str)> {
        vec![
            (
                Error::Fetch {
                    status: 404,
                    url: "https://example.com/a.png".into(),
                },
                Severity::PerResource,
                "fetch_error",
            ),
            (Error::EmptyResponse, Severity::PerResource, "empty_response"),
            (
                Error::DisguisedErrorPage,
                Severity::PerResource,
                "disguised_error_page",
            ),
            (
                Error::SizeExceeded {
                    limit: 10,
                    actual: 11,
                },
                Severity::PerResource,
                "size_exceeded",
            ),
            (
                Error::Encoding("invalid byte".into()),
                Severity::PerResource,
                "encoding_error",
            ),
            (
                Error::invalid_state("add entry", "finalized"),
                Severity::Structural,
                "invalid_state",
            ),
            (
                Error::Persistence("disk full".into()),
                Severity::Structural,
                "persistence_error",
            ),
            (
                Error::NothingSelected,
                Severity::Structural,
                "nothing_selected",
            ),
            (Error::Aborted, Severity::Cancelled, "aborted"),
            (
                Error::config("must be positive", "chunking.byte_chunk_size"),
                Severity::Structural,
                "config_error",
            ),
            (
                Error::Boundary("worker stopped".into()),
                Severity::Structural,
                "boundary_unavailable",
            ),
            (
                Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                Severity::PerResource,
                "io_error",
            ),
        ]
    }

    #[test]
    fn every_variant_has_expected_severity_and_code() {
        for (error, severity, code) in all_error_variants() {
            assert_eq!(error.severity(), severity, "severity of {error}");
            assert_eq!(error.error_code(), code, "code of {error}");
        }
    }

    #[test]
    fn size_exceeded_message_names_both_sizes() {
        let err = Error::SizeExceeded {
            limit: 2048,
            actual: 4096,
        };
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("4096"));
    }

    #[test]
    fn fetch_error_exposes_status() {
        let err = Error::Fetch {
            status: 503,
            url: "https://example.com".into(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(Error::EmptyResponse.status(), None);
    }

    #[test]
    fn aborted_is_not_a_per_resource_failure() {
        assert!(!Error::Aborted.is_per_resource());
        assert!(Error::DisguisedErrorPage.is_per_resource());
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn open() -> Result<()> {
            Err(std::io::Error::other("boom"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(Error::Io(_))));
    }
}
