use thiserror::Error;

use crate::upstream::{BuildRef, UpstreamError};

pub const CONNECTION_FAILED_MESSAGE: &str = "Jenkins server connection failed";
pub const UNEXPECTED_MESSAGE: &str = "An unexpected error occurred";

/// Ways a streaming session can end other than a finished build.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("upstream connection was never established")]
    ConnectionUnavailable,
    #[error("build '{job}' #{number} not found")]
    BuildNotFound { job: String, number: u64 },
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl RelayError {
    /// Classifies an upstream failure observed while serving `build`.
    pub fn from_upstream(build: &BuildRef, err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound => RelayError::BuildNotFound {
                job: build.job_name.clone(),
                number: build.build_number,
            },
            UpstreamError::Api(message) => RelayError::Upstream(message),
            UpstreamError::Malformed(detail) => RelayError::Unexpected(detail),
        }
    }

    /// Text placed in the terminal `{"error": ...}` frame. A client that went
    /// away gets nothing.
    pub fn client_message(&self) -> Option<String> {
        match self {
            RelayError::ConnectionUnavailable => Some(CONNECTION_FAILED_MESSAGE.to_string()),
            RelayError::BuildNotFound { job, number } => {
                Some(format!("Build '{job}' #{number} not found."))
            }
            RelayError::Upstream(message) => Some(format!("Jenkins API error: {message}")),
            RelayError::Unexpected(_) => Some(UNEXPECTED_MESSAGE.to_string()),
            RelayError::ClientDisconnected => None,
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            RelayError::ConnectionUnavailable => "connection_unavailable",
            RelayError::BuildNotFound { .. } => "not_found",
            RelayError::Upstream(_) => "upstream_error",
            RelayError::ClientDisconnected => "client_disconnected",
            RelayError::Unexpected(_) => "unexpected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn not_found_message_names_the_build() {
        let err = RelayError::from_upstream(&BuildRef::new("x", 3), UpstreamError::NotFound);
        assert_eq!(err.client_message().as_deref(), Some("Build 'x' #3 not found."));
    }

    #[test_timeout::timeout]
    fn upstream_message_is_passed_through() {
        let err = RelayError::from_upstream(
            &BuildRef::new("x", 3),
            UpstreamError::Api("status 500".into()),
        );
        assert_eq!(
            err.client_message().as_deref(),
            Some("Jenkins API error: status 500")
        );
    }

    #[test_timeout::timeout]
    fn unexpected_failures_hide_detail() {
        let err = RelayError::from_upstream(
            &BuildRef::new("x", 3),
            UpstreamError::Malformed("expected value at line 1".into()),
        );
        assert_eq!(err.client_message().as_deref(), Some(UNEXPECTED_MESSAGE));
    }

    #[test_timeout::timeout]
    fn disconnect_is_silent() {
        assert_eq!(RelayError::ClientDisconnected.client_message(), None);
        assert_eq!(
            RelayError::ConnectionUnavailable.client_message().as_deref(),
            Some(CONNECTION_FAILED_MESSAGE)
        );
    }
}
