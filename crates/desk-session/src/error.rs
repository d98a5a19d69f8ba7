//! Credential lifecycle error types.

use desk_storage::StoreError;
use thiserror::Error;

/// Error type for the session credential lifecycle.
///
/// Every variant is cheap to clone so a single renewal outcome can be handed
/// to every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    /// Secure store failure (missing entry, duplicate write, platform error)
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Persisted value is not base64 or not UTF-8 text
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Snapshot could not be serialized
    #[error("Failed to encode snapshot: {0}")]
    EncodeFailure(String),

    /// Snapshot or server response did not match the expected schema
    #[error("Failed to decode: {0}")]
    DecodeFailure(String),

    /// Capture attempted before the target holds the required fields
    #[error("Nothing to capture: {0}")]
    UnloadedEntry(String),

    /// Target refused the values in a decoded snapshot
    #[error("Snapshot rejected: {0}")]
    RejectedSnapshot(String),

    /// Refresh token is past its expiry; only a new login can recover
    #[error("Refresh token expired")]
    ExpiredRefreshToken,

    /// Transport-level failure (connectivity, timeout, DNS)
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    /// Server answered outside the documented contract
    #[error("Unexpected response (status {status:?}): {body}")]
    UnexpectedResponse { status: Option<u16>, body: String },

    /// Server explicitly rejected the credential or operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Caller or stored data has the wrong type
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Caller passed a value that violates a precondition
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Session credentials have not been published yet
    #[error("Session credentials are not bound")]
    Unbound,

    /// Session credentials were already published
    #[error("Session credentials are already bound")]
    AlreadyBound,

    /// The session was terminated or replaced while a renewal was in flight
    #[error("Session ended or was replaced while renewal was in flight")]
    SessionEnded,

    /// Invalid state transition in the renewal FSM
    #[error("Invalid renewal state transition: {0}")]
    InvalidStateTransition(String),

    /// Failure with no finer classification
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl CredentialError {
    /// Returns true if the failure is transient and the caller may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            CredentialError::Unreachable(_) => true,
            CredentialError::UnexpectedResponse {
                status: Some(status),
                ..
            } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the user has to go through login again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            CredentialError::ExpiredRefreshToken | CredentialError::Forbidden(_)
        )
    }

    /// Returns true for any failure caused by unreadable persisted or wire data.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            CredentialError::InvalidEntry(_) | CredentialError::DecodeFailure(_)
        )
    }
}

impl From<reqwest::Error> for CredentialError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            CredentialError::Unreachable(error.to_string())
        } else if error.is_decode() || error.is_body() {
            CredentialError::DecodeFailure(error.to_string())
        } else if let Some(status) = error.status() {
            CredentialError::UnexpectedResponse {
                status: Some(status.as_u16()),
                body: error.to_string(),
            }
        } else {
            CredentialError::Unknown(error.to_string())
        }
    }
}

/// Result type alias using CredentialError.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Why a persisted session could not be resumed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BootstrapError {
    /// Nothing stored under the subject
    #[error("No persisted snapshot under {subject}")]
    Missing { subject: String },

    /// Stored value is not base64 text
    #[error("Snapshot under {subject} is not valid base64 text: {reason}")]
    InvalidEncoding { subject: String, reason: String },

    /// Stored value decodes but does not match the snapshot schema
    #[error("Snapshot under {subject} does not match its schema: {reason}")]
    SchemaMismatch { subject: String, reason: String },

    /// Store failed for another reason
    #[error("Store failure reading {subject}: {error}")]
    Store { subject: String, error: StoreError },
}

impl BootstrapError {
    /// The store subject that failed verification.
    pub fn subject(&self) -> &str {
        match self {
            BootstrapError::Missing { subject }
            | BootstrapError::InvalidEncoding { subject, .. }
            | BootstrapError::SchemaMismatch { subject, .. }
            | BootstrapError::Store { subject, .. } => subject,
        }
    }

    /// Classify a read-or-decode failure for `subject`.
    pub(crate) fn classify(subject: &str, error: CredentialError) -> Self {
        let subject = subject.to_string();
        match error {
            CredentialError::Store(StoreError::MissingEntry(_)) => BootstrapError::Missing { subject },
            CredentialError::Store(error) => BootstrapError::Store { subject, error },
            CredentialError::InvalidEntry(reason) => {
                BootstrapError::InvalidEncoding { subject, reason }
            }
            other => BootstrapError::SchemaMismatch {
                subject,
                reason: other.to_string(),
            },
        }
    }
}
