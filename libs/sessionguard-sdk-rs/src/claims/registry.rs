use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use super::claim::SessionClaim;
use super::validator::{ClaimValidator, ValidationOutcome};
use crate::context::UserContext;
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone)]
pub struct RegisteredClaim {
    pub claim: SessionClaim,
    pub validators: Vec<ClaimValidator>,
}

/// Claims registered at startup, keyed by claim key in registration order.
///
/// Registered claims are built into every new session and their validators
/// run on every verification unless the caller overrides them.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    entries: RwLock<Vec<RegisteredClaim>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `claim`; an existing claim with the same key is replaced in
    /// place, validators included. Returns `true` on replacement.
    pub fn register(&self, claim: SessionClaim, validators: Vec<ClaimValidator>) -> bool {
        let entry = RegisteredClaim { claim, validators };
        let mut entries = self.entries.write();

        match entries
            .iter_mut()
            .find(|e| e.claim.key() == entry.claim.key())
        {
            Some(existing) => {
                debug!(claim = entry.claim.key(), "Replacing registered claim");
                *existing = entry;
                true
            }
            None => {
                entries.push(entry);
                false
            }
        }
    }

    pub fn unregister(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.claim.key() != key);
        entries.len() != before
    }

    pub fn get(&self, key: &str) -> Option<RegisteredClaim> {
        self.entries
            .read()
            .iter()
            .find(|e| e.claim.key() == key)
            .cloned()
    }

    pub fn claims(&self) -> Vec<SessionClaim> {
        self.entries.read().iter().map(|e| e.claim.clone()).collect()
    }

    pub fn global_validators(&self) -> Vec<ClaimValidator> {
        self.entries
            .read()
            .iter()
            .flat_map(|e| e.validators.iter().cloned())
            .collect()
    }

    /// Builds one registered claim into a copy of `payload`.
    pub async fn build(
        &self,
        key: &str,
        user_id: &str,
        payload: &Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<Map<String, Value>> {
        let entry = self.get(key).ok_or_else(|| SessionError::ClaimBuild {
            claim_key: key.to_string(),
            reason: "claim is not registered".to_string(),
        })?;

        entry.claim.build(user_id, payload, ctx).await
    }

    /// Builds every registered claim, in registration order.
    pub async fn build_all(
        &self,
        user_id: &str,
        payload: &Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<Map<String, Value>> {
        let mut built = payload.clone();
        for claim in self.claims() {
            built = claim.build(user_id, &built, ctx).await?;
        }
        Ok(built)
    }

    /// Runs a registered claim's validators in order and returns the first
    /// outcome that is not `Satisfied`. `None` when the key is unknown.
    pub fn validate(&self, key: &str, payload: &Map<String, Value>, now_ms: i64) -> Option<ValidationOutcome> {
        let entry = self.get(key)?;

        Some(
            entry
                .validators
                .iter()
                .map(|v| v.evaluate(payload, now_ms))
                .find(|outcome| *outcome != ValidationOutcome::Satisfied)
                .unwrap_or(ValidationOutcome::Satisfied),
        )
    }
}
