use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use sessionguard_types::{ApiVersion, generate_opaque_token};
use uuid::Uuid;

use super::{
    NewSessionRecord, RefreshTokenConsumption, SessionRecord, SessionStorageBackend,
    StorageResult,
};
use crate::clock::now_ms;
use crate::keys::SigningKey;

#[derive(Debug)]
struct RefreshTokenEntry {
    session_handle: String,
    consumed: bool,
    expires_at_ms: i64,
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<String, SessionRecord>,
    refresh_tokens: HashMap<String, RefreshTokenEntry>,
}

impl State {
    /// Drops expired sessions together with their refresh tokens.
    fn purge_expired(&mut self, now: i64) {
        self.sessions.retain(|_, s| s.expiry_ms > now);
        let sessions = &self.sessions;
        self.refresh_tokens
            .retain(|_, entry| sessions.contains_key(&entry.session_handle));
    }

    fn live_session_mut(&mut self, session_handle: &str, now: i64) -> Option<&mut SessionRecord> {
        self.sessions
            .get_mut(session_handle)
            .filter(|s| s.expiry_ms > now)
    }
}

#[derive(Debug)]
struct StoredKey {
    id: String,
    material: SecretString,
    created_at_ms: i64,
}

/// In-process backend for tests and single-node embedding.
///
/// Every operation runs under one lock, which makes refresh-token
/// consumption a single check-and-invalidate step. Writes purge expired
/// sessions, and each session keeps only its live refresh token plus the one
/// consumed last, which is enough to detect a replay of the previous token.
#[derive(Debug)]
pub struct MemorySessionStorage {
    state: Mutex<State>,
    keys: Mutex<Vec<StoredKey>>,
    api_version: ApiVersion,
    key_fetches: AtomicUsize,
}

impl Default for MemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStorage {
    /// Starts with one freshly generated signing key.
    pub fn new() -> Self {
        let storage = Self {
            state: Mutex::new(State::default()),
            keys: Mutex::new(Vec::new()),
            api_version: ApiVersion::CURRENT,
            key_fetches: AtomicUsize::new(0),
        };
        storage.rotate_signing_key();
        storage
    }

    pub fn with_api_version(mut self, api_version: ApiVersion) -> Self {
        self.api_version = api_version;
        self
    }

    /// Adds a key newer than every existing one and returns its id.
    pub fn rotate_signing_key(&self) -> String {
        let mut keys = self.keys.lock();
        let newest = keys.iter().map(|k| k.created_at_ms).max().unwrap_or(0);
        let id = format!("k-{}", Uuid::new_v4());
        let material: String = generate_opaque_token();

        keys.push(StoredKey {
            id: id.clone(),
            material: SecretString::new(material.into()),
            created_at_ms: now_ms().max(newest + 1),
        });
        id
    }

    pub fn retire_signing_key(&self, key_id: &str) -> bool {
        let mut keys = self.keys.lock();
        let before = keys.len();
        keys.retain(|k| k.id != key_id);
        keys.len() != before
    }

    /// Number of times the trusted key set was requested.
    pub fn key_fetches(&self) -> usize {
        self.key_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStorageBackend for MemorySessionStorage {
    async fn create_session(&self, record: NewSessionRecord) -> StorageResult<SessionRecord> {
        let session = SessionRecord {
            session_handle: Uuid::new_v4().to_string(),
            user_id: record.user_id,
            access_token_payload: record.access_token_payload,
            session_data: record.session_data,
            time_created_ms: now_ms(),
            expiry_ms: record.expiry_ms,
        };

        let mut state = self.state.lock();
        state.purge_expired(now_ms());
        state.refresh_tokens.insert(
            record.refresh_token_hash,
            RefreshTokenEntry {
                session_handle: session.session_handle.clone(),
                consumed: false,
                expires_at_ms: record.expiry_ms,
            },
        );
        state
            .sessions
            .insert(session.session_handle.clone(), session.clone());

        Ok(session)
    }

    async fn get_session(&self, session_handle: &str) -> StorageResult<Option<SessionRecord>> {
        let state = self.state.lock();
        Ok(state
            .sessions
            .get(session_handle)
            .filter(|s| s.expiry_ms > now_ms())
            .cloned())
    }

    async fn update_session_data(
        &self,
        session_handle: &str,
        data: Map<String, Value>,
    ) -> StorageResult<bool> {
        let mut state = self.state.lock();
        Ok(match state.live_session_mut(session_handle, now_ms()) {
            Some(session) => {
                session.session_data = data;
                true
            }
            None => false,
        })
    }

    async fn update_access_token_payload(
        &self,
        session_handle: &str,
        payload: Map<String, Value>,
    ) -> StorageResult<bool> {
        let mut state = self.state.lock();
        Ok(match state.live_session_mut(session_handle, now_ms()) {
            Some(session) => {
                session.access_token_payload = payload;
                true
            }
            None => false,
        })
    }

    async fn revoke_session(&self, session_handle: &str) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let removed = state.sessions.remove(session_handle).is_some();
        state
            .refresh_tokens
            .retain(|_, entry| entry.session_handle != session_handle);
        Ok(removed)
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> StorageResult<Vec<String>> {
        let mut state = self.state.lock();
        let handles: Vec<String> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.session_handle.clone())
            .collect();

        for handle in &handles {
            state.sessions.remove(handle);
        }
        state
            .refresh_tokens
            .retain(|_, entry| !handles.contains(&entry.session_handle));

        Ok(handles)
    }

    async fn consume_refresh_token(
        &self,
        presented_hash: &str,
        next_hash: &str,
        next_expiry_ms: i64,
    ) -> StorageResult<RefreshTokenConsumption> {
        let now = now_ms();
        let mut state = self.state.lock();
        state.purge_expired(now);
        let state = &mut *state;

        let Some(entry) = state.refresh_tokens.get_mut(presented_hash) else {
            return Ok(RefreshTokenConsumption::NotFound);
        };
        let Some(session) = state.sessions.get_mut(&entry.session_handle) else {
            return Ok(RefreshTokenConsumption::NotFound);
        };

        if entry.consumed {
            return Ok(RefreshTokenConsumption::AlreadyUsed {
                session_handle: session.session_handle.clone(),
                user_id: session.user_id.clone(),
            });
        }
        if entry.expires_at_ms <= now {
            return Ok(RefreshTokenConsumption::NotFound);
        }

        entry.consumed = true;
        session.expiry_ms = next_expiry_ms;
        let session = session.clone();

        state.refresh_tokens.retain(|hash, entry| {
            entry.session_handle != session.session_handle || hash == presented_hash
        });
        state.refresh_tokens.insert(
            next_hash.to_string(),
            RefreshTokenEntry {
                session_handle: session.session_handle.clone(),
                consumed: false,
                expires_at_ms: next_expiry_ms,
            },
        );

        Ok(RefreshTokenConsumption::Consumed { session })
    }

    async fn get_trusted_signing_keys(&self) -> StorageResult<Vec<SigningKey>> {
        self.key_fetches.fetch_add(1, Ordering::SeqCst);
        let keys = self.keys.lock();
        Ok(keys
            .iter()
            .map(|k| SigningKey::new(k.id.clone(), k.material.expose_secret(), k.created_at_ms))
            .collect())
    }

    async fn api_version(&self) -> StorageResult<ApiVersion> {
        Ok(self.api_version)
    }
}
