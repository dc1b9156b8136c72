//! Shared types and crypto primitives for Sessionguard sessions.
//!
//! This crate provides:
//! - Access token claim structures for both schema versions (`AccessTokenClaims`, `LegacyAccessTokenClaims`)
//! - The materialized claim value shape (`ClaimValue`)
//! - Schema and backend API version tags (`TokenVersion`, `ApiVersion`, `NullHandling`)
//! - Deterministic payload merging (`PayloadMerger`)
//! - HKDF key derivation, opaque token generation and hashing primitives

mod claims;
mod crypto;
mod errors;
mod payload;
mod version;

pub use claims::{AccessTokenClaims, ClaimValue, LegacyAccessTokenClaims};
pub use crypto::{
    derive_signing_secret, generate_opaque_token, hash_refresh_token, peek_token_version,
};
pub use errors::{ErrorCode, TokenError};
pub use payload::{PayloadMerger, merge_payload, strip_nulls};
pub use version::{ApiVersion, NullHandling, TokenVersion};
