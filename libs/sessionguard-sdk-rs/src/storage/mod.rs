//! Contract between the engine and durable session state.

mod memory;

pub use memory::MemorySessionStorage;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sessionguard_types::ApiVersion;
use thiserror::Error;

use crate::keys::SigningKey;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Session as persisted by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_handle: String,
    pub user_id: String,
    pub access_token_payload: Map<String, Value>,
    pub session_data: Map<String, Value>,
    pub time_created_ms: i64,
    /// Expiry of the session's current refresh token
    pub expiry_ms: i64,
}

#[derive(Debug, Clone)]
pub struct NewSessionRecord {
    pub user_id: String,
    pub access_token_payload: Map<String, Value>,
    pub session_data: Map<String, Value>,
    pub refresh_token_hash: String,
    pub expiry_ms: i64,
}

/// Result of presenting a refresh token.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshTokenConsumption {
    /// The token was live; it is now invalid and `next_hash` replaced it.
    Consumed { session: SessionRecord },
    /// The token was already rotated away. Its session may still be live.
    AlreadyUsed { session_handle: String, user_id: String },
    NotFound,
}

/// Durable state the engine delegates to.
///
/// Implementations own retry policy; the engine never retries a failed call.
#[async_trait]
pub trait SessionStorageBackend: Send + Sync {
    async fn create_session(&self, record: NewSessionRecord) -> StorageResult<SessionRecord>;

    /// `None` when the handle is unknown or revoked.
    async fn get_session(&self, session_handle: &str) -> StorageResult<Option<SessionRecord>>;

    /// Returns `false` when the handle no longer exists.
    async fn update_session_data(
        &self,
        session_handle: &str,
        data: Map<String, Value>,
    ) -> StorageResult<bool>;

    /// Returns `false` when the handle no longer exists.
    async fn update_access_token_payload(
        &self,
        session_handle: &str,
        payload: Map<String, Value>,
    ) -> StorageResult<bool>;

    /// Returns `false` when there was nothing to revoke.
    async fn revoke_session(&self, session_handle: &str) -> StorageResult<bool>;

    /// Returns the handles that were revoked.
    async fn revoke_all_for_user(&self, user_id: &str) -> StorageResult<Vec<String>>;

    /// Atomically checks and invalidates `presented_hash`, installing
    /// `next_hash` as the session's live refresh token on success.
    ///
    /// Two concurrent calls with the same hash must never both observe
    /// `Consumed`.
    async fn consume_refresh_token(
        &self,
        presented_hash: &str,
        next_hash: &str,
        next_expiry_ms: i64,
    ) -> StorageResult<RefreshTokenConsumption>;

    async fn get_trusted_signing_keys(&self) -> StorageResult<Vec<SigningKey>>;

    async fn api_version(&self) -> StorageResult<ApiVersion>;
}
