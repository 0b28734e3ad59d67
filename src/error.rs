//! Error types for warden
//!
//! The taxonomy separates transport failures from backend API errors and
//! from backend-contract violations (a response shaped differently than the
//! backend's published API promises). Contract violations get their own
//! named variants because they indicate a backend-version mismatch, not a
//! transient fault.

use thiserror::Error;

/// Main error type for warden operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or ambiguous static configuration; fatal at construction
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure reaching the backend
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend rejected a request with an error status
    #[error("backend error (status {status}): {message}")]
    Api {
        /// HTTP status reported by the backend
        status: u16,
        /// Error messages from the backend's error body
        message: String,
    },

    /// Login against the backend failed
    #[error("login failed: {0}")]
    Login(String),

    /// The backend returned no response body where one was required
    #[error("backend returned an empty response")]
    EmptyResponse,

    /// The backend response carried no data payload
    #[error("backend response has no data")]
    MissingData,

    /// The backend response carried no authentication payload
    #[error("backend response has no auth payload")]
    MissingAuth,

    /// A required field was absent from the backend response data
    #[error("backend response missing field {0:?}")]
    MissingField(String),

    /// A response field was present but not of the expected type
    #[error("backend response field {0:?} is not a string")]
    FieldType(String),

    /// No reconcile handler is registered for a state
    #[error("no handler registered for state {0:?}")]
    NoHandler(String),

    /// The reconcile cycle exceeded its handler-invocation bound
    #[error("reconciliation exceeded {0} state changes in one cycle")]
    CycleLimit(usize),

    /// Certificate or PEM material could not be parsed
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Filesystem error on the local secret store
    #[error("secret store error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a backend API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a login error with the given message
    pub fn login(msg: impl Into<String>) -> Self {
        Self::Login(msg.into())
    }

    /// Create a missing-field contract violation for the named field
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create a wrong-type contract violation for the named field
    pub fn field_type(field: impl Into<String>) -> Self {
        Self::FieldType(field.into())
    }

    /// Create a certificate error with the given message
    pub fn certificate(msg: impl Into<String>) -> Self {
        Self::Certificate(msg.into())
    }

    /// True when this error is a backend API error whose message contains
    /// the given fragment. Used to recognize idempotent-success responses.
    pub fn api_message_contains(&self, fragment: &str) -> bool {
        matches!(self, Self::Api { message, .. } if message.contains(fragment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_carry_message() {
        let err = Error::config("exactly one auth method must be set");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn api_errors_carry_status_and_message() {
        let err = Error::api(503, "Vault is sealed");
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("sealed"));
    }

    #[test]
    fn contract_violations_are_distinct_from_transport() {
        // A missing field is a contract violation, never an Api or
        // Transport error, so callers can tell a backend-version mismatch
        // from a flaky network.
        let err = Error::missing_field("certificate");
        assert!(matches!(err, Error::MissingField(_)));
        assert!(err.to_string().contains("certificate"));

        let err = Error::field_type("private_key");
        assert!(matches!(err, Error::FieldType(_)));
    }

    #[test]
    fn idempotent_success_detection_matches_on_message() {
        let err = Error::api(400, "secret id is already registered");
        assert!(err.api_message_contains("already registered"));
        assert!(!err.api_message_contains("sealed"));

        // Non-API variants never match, whatever their message
        let err = Error::login("already registered");
        assert!(!err.api_message_contains("already registered"));
    }

    #[test]
    fn state_machine_errors_name_their_cause() {
        let err = Error::NoHandler("Done".to_string());
        assert!(err.to_string().contains("Done"));

        let err = Error::CycleLimit(15);
        assert!(err.to_string().contains("15"));
    }
}
