//! Document store error types.
//!
//! Errors are categorized for retry decisions:
//!
//! - **Transient** errors are retriable (network failures, 5xx, rate limits,
//!   the store's "data not ready" answers while a fresh copy propagates)
//! - **Permanent** errors will not resolve by themselves (bad tokens, missing
//!   tables, malformed requests)
//!
//! The dispatcher relies on the same split: a transient failure is answered
//! with an apology and left uncached so the platform's retry reprocesses.

use std::fmt;
use thiserror::Error;

/// The kind of store error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Requires operator intervention or different input.
    Permanent,
}

impl StoreErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreErrorKind::Transient)
    }
}

/// Bitable API codes that indicate a condition that clears up on its own.
const TRANSIENT_API_CODES: &[i64] = &[
    99991400, // request frequency limit
    1254290,  // too many requests
    1254291,  // write conflict
    1254607,  // data not ready
];

/// A document store error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct StoreError {
    pub kind: StoreErrorKind,

    /// The HTTP status code, if the request reached the server.
    pub status_code: Option<u16>,

    /// The API-level error code from the response body, if any.
    pub api_code: Option<i64>,

    pub message: String,

    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status_code, self.api_code) {
            (_, Some(code)) => write!(f, "document store error (code {}): {}", code, self.message),
            (Some(status), None) => {
                write!(f, "document store error (HTTP {}): {}", status, self.message)
            }
            (None, None) => write!(f, "document store error: {}", self.message),
        }
    }
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            status_code: None,
            api_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Permanent,
            status_code: None,
            api_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_retriable()
    }

    /// Categorizes a transport-level error from the HTTP client.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let kind = match status_code {
            Some(code) => kind_for_status(code),
            // Timeouts, connection resets, DNS failures
            None if err.is_timeout() || err.is_connect() || err.is_request() => {
                StoreErrorKind::Transient
            }
            None => StoreErrorKind::Permanent,
        };
        Self {
            kind,
            status_code,
            api_code: None,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Categorizes an HTTP failure whose body carried no API envelope.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: kind_for_status(status),
            status_code: Some(status),
            api_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an API-level failure reported in a response body.
    pub fn from_api(status: u16, code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if TRANSIENT_API_CODES.contains(&code) || is_transient_message(&message) {
            StoreErrorKind::Transient
        } else {
            kind_for_status(status)
        };
        Self {
            kind,
            status_code: Some(status),
            api_code: Some(code),
            message,
            source: None,
        }
    }
}

fn kind_for_status(status: u16) -> StoreErrorKind {
    match status {
        429 => StoreErrorKind::Transient,
        code if (500..600).contains(&code) => StoreErrorKind::Transient,
        _ => StoreErrorKind::Permanent,
    }
}

fn is_transient_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("try again")
        || message_lower.contains("not ready")
        || message_lower.contains("too many request")
}
