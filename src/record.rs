//! Per-attempt outcome records.

use std::time::Duration;
use thiserror::Error;

/// Why a single request attempt failed.
///
/// Messages are captured as strings so that records stay cheap to clone and
/// comparable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// The request template could not be cloned (e.g. a streaming body)
    #[error("Request template is not cloneable")]
    Clone,

    /// Connection, DNS, TLS or protocol failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request's own timeout fired (not the run deadline)
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Headers arrived but the body could not be read
    #[error("Failed to read response body: {0}")]
    Body(String),
}

impl AttemptError {
    /// Classify a reqwest error raised while sending the request
    pub fn from_send(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AttemptError::Timeout(err.to_string())
        } else {
            AttemptError::Transport(err.to_string())
        }
    }

    /// Classify a reqwest error raised while reading the body
    pub fn from_body(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AttemptError::Timeout(err.to_string())
        } else {
            AttemptError::Body(err.to_string())
        }
    }
}

/// Outcome of one request attempt.
///
/// Failure records carry no timing data: `duration`, `status_code` and
/// `body_length` are zero whenever `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub error: Option<AttemptError>,
    pub duration: Duration,
    pub status_code: u16,
    pub body_length: u64,
}

impl Record {
    /// Record a completed round trip
    pub fn success(duration: Duration, status_code: u16, body_length: u64) -> Self {
        Self {
            error: None,
            duration,
            status_code,
            body_length,
        }
    }

    /// Record a failed attempt
    pub fn failure(error: AttemptError) -> Self {
        Self {
            error: Some(error),
            duration: Duration::ZERO,
            status_code: 0,
            body_length: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_record() {
        let record = Record::success(Duration::from_millis(12), 204, 0);
        assert!(record.is_success());
        assert_eq!(record.status_code, 204);
        assert_eq!(record.duration, Duration::from_millis(12));
    }

    #[test]
    fn test_failure_record_has_no_timing() {
        let record = Record::failure(AttemptError::Transport("connection refused".to_string()));
        assert!(!record.is_success());
        assert_eq!(record.duration, Duration::ZERO);
        assert_eq!(record.status_code, 0);
        assert_eq!(record.body_length, 0);
    }

    #[test]
    fn test_attempt_error_messages() {
        assert_eq!(
            AttemptError::Clone.to_string(),
            "Request template is not cloneable"
        );
        assert_eq!(
            AttemptError::Body("reset".to_string()).to_string(),
            "Failed to read response body: reset"
        );
        assert_eq!(
            AttemptError::Timeout("deadline".to_string()).to_string(),
            "Request timed out: deadline"
        );
    }
}
