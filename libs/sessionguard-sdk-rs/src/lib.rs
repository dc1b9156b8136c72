//! Session and claims engine for Rust backends.
//!
//! This SDK issues, verifies, rotates and revokes sessions expressed as signed
//! access tokens plus single-use opaque refresh tokens, and keeps claims
//! embedded in the access token fresh.
//!
//! # Features
//!
//! - **Token verification** - Verify access tokens locally against HKDF-derived secrets, with key rotation
//! - **Legacy tokens** - Tokens whose payload lives server-side are still accepted
//! - **Claims** - Build, refresh and validate claims with a staleness budget
//! - **Overrides** - Replace any recipe or claim function while keeping access to the original
//! - **Token extraction** - Extract tokens from Authorization headers or cookies
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sessionguard_sdk::{BooleanClaim, MemorySessionStorage, SessionConfig, SessionRecipe, UserContext};
//!
//! let email_verified = BooleanClaim::new("st-ev", |_user_id, _ctx| async { Ok(Some(true)) });
//!
//! let recipe = SessionRecipe::builder(SessionConfig::from_env()?, Arc::new(MemorySessionStorage::new()))
//!     .claim(email_verified.claim().clone(), vec![email_verified.is_true(None)])
//!     .build()
//!     .await?;
//!
//! let ctx = UserContext::new();
//! let session = recipe.create_new_session("u1", Default::default(), Default::default(), &ctx).await?;
//!
//! // Later, in a route handler
//! let session = recipe.verify_session(&headers, &ctx).await?;
//! println!("User ID: {}", session.user_id());
//! ```

mod clock;
mod codec;
mod config;
mod context;
mod error;
mod extract;
mod keys;
mod session;

pub mod claims;
pub mod overrides;
pub mod recipe;
pub mod storage;

pub use claims::{
    BooleanClaim, ClaimRefresh, ClaimRegistry, ClaimValidator, PrimitiveArrayClaim,
    PrimitiveClaim, SessionClaim, ValidationOutcome,
};
pub use codec::{TokenCodec, VerifiedToken};
pub use config::SessionConfig;
pub use context::UserContext;
pub use error::{ClaimValidationFailure, SessionError, SessionResult};
pub use extract::{
    SessionRequest, access_token_from_request, extract_from_cookie, extract_from_header,
    refresh_token_from_request,
};
pub use keys::{KeyStore, SigningKey, TrustedKeySet};
pub use overrides::{Override, compose};
pub use recipe::{RecipeFunctions, SessionRecipe, SessionRecipeBuilder, SessionTokens, VerifySessionOptions};
pub use session::{SessionContainer, SessionState};
pub use storage::{MemorySessionStorage, SessionRecord, SessionStorageBackend, StorageError};

// Re-export shared types for convenience
pub use sessionguard_types::{ApiVersion, ClaimValue, ErrorCode, NullHandling, PayloadMerger, TokenVersion};
