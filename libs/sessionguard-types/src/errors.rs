use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes surfaced to embedding frameworks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TokenInvalid,
    TokenExpired,
    TokenVersionUnsupported,
    SessionDoesNotExist,
    SessionRevoked,
    ClaimValidationError,
    TokenTheftDetected,
    StorageUnavailable,
    ClaimBuildFailed,
    InvalidConfig,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenVersionUnsupported => "TOKEN_VERSION_UNSUPPORTED",
            Self::SessionDoesNotExist => "SESSION_DOES_NOT_EXIST",
            Self::SessionRevoked => "SESSION_REVOKED",
            Self::ClaimValidationError => "CLAIM_VALIDATION_ERROR",
            Self::TokenTheftDetected => "TOKEN_THEFT_DETECTED",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::ClaimBuildFailed => "CLAIM_BUILD_FAILED",
            Self::InvalidConfig => "INVALID_CONFIG",
        };
        write!(f, "{}", s)
    }
}

/// Access token decoding and verification errors.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token format: {0}")]
    InvalidFormat(String),

    #[error("Token has expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unsupported token version: {0}")]
    UnsupportedVersion(u32),

    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    #[error("No signing key available")]
    NoSigningKey,

    #[error("JWT library error: {0}")]
    Library(#[from] jsonwebtoken::errors::Error),
}
