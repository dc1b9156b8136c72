use sessionguard_types::{ErrorCode, TokenError};
use thiserror::Error;

use crate::storage::StorageError;

/// A single claim that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimValidationFailure {
    pub claim_key: String,
    pub validator_id: String,
    pub reason: String,
}

/// SDK-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Token failed structural or signature checks
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// Token expiry has passed; the client should refresh
    #[error("Token has expired")]
    TokenExpired,

    /// Token carries a schema version this engine does not understand
    #[error("Unsupported token version: {0}")]
    TokenVersionUnsupported(u32),

    /// The session handle is unknown or the container was revoked
    #[error("Session does not exist")]
    SessionDoesNotExist,

    /// The backing session was removed while the token was still valid
    #[error("Session has been revoked")]
    SessionRevoked,

    /// One or more claims failed validation after any refresh they were owed
    #[error("Claim validation failed for: {}", failed_claim_keys(.failed_claims))]
    ClaimValidation {
        failed_claims: Vec<ClaimValidationFailure>,
    },

    /// A refresh token was presented twice; the session has been revoked
    #[error("Token theft detected for session {session_handle}")]
    TokenTheftDetected {
        session_handle: String,
        user_id: String,
    },

    /// Storage backend failed or exceeded its deadline
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A claim's value could not be built
    #[error("Failed to build claim {claim_key}: {reason}")]
    ClaimBuild { claim_key: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

fn failed_claim_keys(failures: &[ClaimValidationFailure]) -> String {
    failures
        .iter()
        .map(|f| f.claim_key.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TokenInvalid(_) => ErrorCode::TokenInvalid,
            Self::TokenExpired => ErrorCode::TokenExpired,
            Self::TokenVersionUnsupported(_) => ErrorCode::TokenVersionUnsupported,
            Self::SessionDoesNotExist => ErrorCode::SessionDoesNotExist,
            Self::SessionRevoked => ErrorCode::SessionRevoked,
            Self::ClaimValidation { .. } => ErrorCode::ClaimValidationError,
            Self::TokenTheftDetected { .. } => ErrorCode::TokenTheftDetected,
            Self::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            Self::ClaimBuild { .. } => ErrorCode::ClaimBuildFailed,
            Self::Config(_) => ErrorCode::InvalidConfig,
        }
    }
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::TokenExpired,
            TokenError::UnsupportedVersion(v) => Self::TokenVersionUnsupported(v),
            other => Self::TokenInvalid(other.to_string()),
        }
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
