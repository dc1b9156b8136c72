#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sessionguard_sdk::storage::{
    NewSessionRecord, RefreshTokenConsumption, StorageResult,
};
use sessionguard_sdk::{
    ApiVersion, MemorySessionStorage, SessionConfig, SessionRecipe, SessionRecord,
    SessionRequest, SessionStorageBackend, SigningKey,
};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub async fn recipe_with(storage: Arc<MemorySessionStorage>) -> SessionRecipe {
    init_tracing();
    SessionRecipe::builder(SessionConfig::default(), storage)
        .build()
        .await
        .unwrap()
}

/// Header map with lowercase names.
#[derive(Default)]
pub struct TestRequest {
    headers: HashMap<String, String>,
}

impl TestRequest {
    pub fn bearer(token: &str) -> Self {
        Self::default().with_header("authorization", &format!("Bearer {token}"))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }
}

impl SessionRequest for TestRequest {
    fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Delegates to an in-memory backend, delaying writes while `slow` is set.
pub struct SlowStorage {
    pub inner: MemorySessionStorage,
    pub slow: AtomicBool,
    pub delay: Duration,
}

impl SlowStorage {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemorySessionStorage::new(),
            slow: AtomicBool::new(false),
            delay,
        }
    }

    pub fn set_slow(&self, slow: bool) {
        self.slow.store(slow, Ordering::SeqCst);
    }

    async fn maybe_stall(&self) {
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl SessionStorageBackend for SlowStorage {
    async fn create_session(&self, record: NewSessionRecord) -> StorageResult<SessionRecord> {
        self.maybe_stall().await;
        self.inner.create_session(record).await
    }

    async fn get_session(&self, session_handle: &str) -> StorageResult<Option<SessionRecord>> {
        self.maybe_stall().await;
        self.inner.get_session(session_handle).await
    }

    async fn update_session_data(&self, session_handle: &str, data: Map<String, Value>) -> StorageResult<bool> {
        self.maybe_stall().await;
        self.inner.update_session_data(session_handle, data).await
    }

    async fn update_access_token_payload(
        &self,
        session_handle: &str,
        payload: Map<String, Value>,
    ) -> StorageResult<bool> {
        self.maybe_stall().await;
        self.inner
            .update_access_token_payload(session_handle, payload)
            .await
    }

    async fn revoke_session(&self, session_handle: &str) -> StorageResult<bool> {
        self.maybe_stall().await;
        self.inner.revoke_session(session_handle).await
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> StorageResult<Vec<String>> {
        self.maybe_stall().await;
        self.inner.revoke_all_for_user(user_id).await
    }

    async fn consume_refresh_token(
        &self,
        presented_hash: &str,
        next_hash: &str,
        next_expiry_ms: i64,
    ) -> StorageResult<RefreshTokenConsumption> {
        self.maybe_stall().await;
        self.inner
            .consume_refresh_token(presented_hash, next_hash, next_expiry_ms)
            .await
    }

    async fn get_trusted_signing_keys(&self) -> StorageResult<Vec<SigningKey>> {
        self.inner.get_trusted_signing_keys().await
    }

    async fn api_version(&self) -> StorageResult<ApiVersion> {
        self.inner.api_version().await
    }
}
