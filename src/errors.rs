//! Error types for the verifier.
//!
//! Every failure a test case can hit maps to one [`Error`] variant.  The
//! variant decides which phase of a test case is blamed (see
//! [`crate::runner::Phase`]) and whether the run can continue.

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// Kind of transport failure reported by the HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The connection could not be established (refused, DNS, TLS handshake).
    Connect,
    /// The request or response did not complete within the configured timeout.
    Timeout,
    /// The response body could not be read to the end.
    Body,
    /// Any other client-side failure.
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Connect => "connect",
            TransportKind::Timeout => "timeout",
            TransportKind::Body => "body",
            TransportKind::Other => "request",
        };
        f.write_str(s)
    }
}

/// A divergence between an actual response and the expected one.
#[derive(Debug, Error)]
pub enum Mismatch {
    /// A header every S3 response carries is missing or malformed.
    #[error("Invalid Standard Header {name}: got {}", display_header(.actual))]
    StandardHeader {
        name: String,
        actual: Option<String>,
    },

    /// The status code differs.
    #[error("Unexpected Response Status Code: wanted {expected}, got {actual}")]
    Status {
        expected: StatusCode,
        actual: StatusCode,
    },

    /// An expected header is absent or carries a different value.
    #[error("Unexpected Header Value Received for {name}: wanted {expected:?}, got {}", display_header(.actual))]
    Header {
        name: String,
        expected: String,
        actual: Option<String>,
    },

    /// The body differs from the expected payload.
    #[error("Unexpected Body Received: wanted {expected_len} bytes, got {actual_len} bytes (first difference at byte {first_difference})")]
    Body {
        expected_len: usize,
        actual_len: usize,
        first_difference: usize,
    },

    /// An XML body lacks an expected element value.
    #[error("Unexpected Body Received: no <{element}> element with value {value:?}")]
    XmlValue { element: String, value: String },

    /// An XML body could not be parsed at all.
    #[error("Unexpected Body Received: malformed XML: {0}")]
    MalformedXml(String),
}

fn display_header(actual: &Option<String>) -> String {
    match actual {
        Some(value) => format!("{value:?}"),
        None => "no header".to_string(),
    }
}

/// One failed item of a fixture batch, tagged with its input position.
#[derive(Debug)]
pub struct IndexedError {
    /// Position of the failed unit in the batch input.
    pub index: usize,
    /// What went wrong.
    pub error: Box<Error>,
}

/// Aggregate of the failed items of one fixture batch.
#[derive(Debug)]
pub struct BatchFailure {
    /// Number of units in the batch.
    pub total: usize,
    /// Failed units, ordered by index.
    pub failures: Vec<IndexedError>,
}

impl BatchFailure {
    /// The representative error of the batch: the failure with the lowest index.
    pub fn first(&self) -> Option<&IndexedError> {
        self.failures.first()
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} item(s) failed", self.failures.len(), self.total)?;
        if let Some(first) = self.first() {
            write!(f, "; item {}: {}", first.index, first.error)?;
        }
        Ok(())
    }
}

/// Verifier error kinds.
#[derive(Debug, Error)]
pub enum Error {
    /// The request descriptor could not be signed (malformed header, bad path, ...).
    #[error("signing failed: {0}")]
    Signing(String),

    /// The request never produced a response.
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportKind,
        message: String,
    },

    /// The response diverges from the expectation.
    #[error(transparent)]
    Verification(#[from] Mismatch),

    /// A fixture batch failed to create one or more items.
    #[error("fixture setup failed: {batch}{}", display_rollback(.rollback))]
    FixtureSetup {
        batch: BatchFailure,
        rollback: Option<Box<Error>>,
    },

    /// A best-effort teardown left one or more items behind.
    #[error("fixture cleanup failed: {0}")]
    FixtureCleanup(BatchFailure),

    /// The server answered, but not in a form the verifier understands.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// Catch-all for unexpected internal errors.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn display_rollback(rollback: &Option<Box<Error>>) -> String {
    match rollback {
        Some(err) => format!(" (rollback also failed: {err})"),
        None => String::new(),
    }
}

impl Error {
    /// Map a `reqwest` failure to a transport error, keeping its kind.
    pub fn transport(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportKind::Body
        } else {
            TransportKind::Other
        };
        Error::Transport {
            kind,
            message: err.to_string(),
        }
    }
}
