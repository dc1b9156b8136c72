//! Per-request session handle.
//!
//! A container only exists once its token has been verified (or a session
//! was just minted), so there is no unverified state to check for. Mutations
//! take `&mut self` and update the container only after every storage call
//! and the re-sign have succeeded; a failed call leaves it untouched.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::instrument;

use crate::claims::{ClaimRefresh, ClaimValidator, SessionClaim, validate_claims};
use crate::clock::now_ms;
use crate::context::UserContext;
use crate::error::{SessionError, SessionResult};
use crate::keys::TrustedKeySet;
use crate::recipe::{
    IssuedSession, MergePayloadInput, RecipeShared, SessionTokens, UpdatePayloadInput,
    UpdateSessionDataInput,
};
use crate::storage::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Token verified; nothing new to send to the client
    Verified,
    /// New tokens were issued and must be sent to the client
    Refreshed,
    /// The session was revoked through this container
    Revoked,
    /// The access token has expired since it was verified
    Expired,
}

pub struct SessionContainer {
    recipe: Arc<RecipeShared>,
    session_handle: String,
    user_id: String,
    payload: Map<String, Value>,
    tokens: SessionTokens,
    access_token_expiry_ms: i64,
    time_created_ms: i64,
    state: SessionState,
}

impl std::fmt::Debug for SessionContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContainer")
            .field("session_handle", &self.session_handle)
            .field("user_id", &self.user_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SessionContainer {
    pub(crate) fn new(recipe: Arc<RecipeShared>, issued: IssuedSession, state: SessionState) -> Self {
        Self {
            recipe,
            session_handle: issued.session_handle,
            user_id: issued.user_id,
            payload: issued.access_token_payload,
            tokens: issued.tokens,
            access_token_expiry_ms: issued.access_token_expiry_ms,
            time_created_ms: issued.time_created_ms,
            state,
        }
    }

    pub fn session_handle(&self) -> &str {
        &self.session_handle
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current in-memory payload snapshot.
    pub fn access_token_payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    pub fn access_token(&self) -> &str {
        &self.tokens.access_token
    }

    pub fn access_token_expiry_ms(&self) -> i64 {
        self.access_token_expiry_ms
    }

    pub fn time_created_ms(&self) -> i64 {
        self.time_created_ms
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            SessionState::Verified | SessionState::Refreshed
                if now_ms() >= self.access_token_expiry_ms =>
            {
                SessionState::Expired
            }
            state => state,
        }
    }

    /// Value of `claim` in the current payload, without building it.
    pub fn get_claim_value(&self, claim: &SessionClaim) -> Option<Value> {
        claim.get_value_from_payload(&self.payload)
    }

    fn ensure_live(&self) -> SessionResult<()> {
        if self.state == SessionState::Revoked {
            return Err(SessionError::SessionDoesNotExist);
        }
        Ok(())
    }

    /// Merges `updates` into the payload, persists it and re-signs the
    /// access token. The signing key is resolved before the storage write.
    #[instrument(skip_all, fields(session_handle = %self.session_handle))]
    pub async fn merge_into_access_token_payload(
        &mut self,
        updates: Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        self.ensure_live()?;

        let keys = self.recipe.core.signing_keys(ctx).await?;
        let merged = (self.recipe.functions.merge_into_access_token_payload)(
            MergePayloadInput {
                session_handle: self.session_handle.clone(),
                current_payload: self.payload.clone(),
                updates,
            },
            ctx.clone(),
        )
        .await?;

        self.resign(&keys, merged)
    }

    pub async fn set_claim_value(
        &mut self,
        claim: &SessionClaim,
        value: Value,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        let built = claim.add_to_payload(&self.payload, value, now_ms());
        match claim_entry(claim, &built) {
            Some(updates) => self.merge_into_access_token_payload(updates, ctx).await,
            None => Ok(()),
        }
    }

    /// Builds `claim` and stores the result; a claim without a value leaves
    /// the payload as is.
    pub async fn fetch_and_set_claim(&mut self, claim: &SessionClaim, ctx: &UserContext) -> SessionResult<()> {
        self.ensure_live()?;

        let built = claim.build(&self.user_id, &self.payload, ctx).await?;
        match claim_entry(claim, &built) {
            Some(updates) if built != self.payload => {
                self.merge_into_access_token_payload(updates, ctx).await
            }
            _ => Ok(()),
        }
    }

    pub async fn remove_claim(&mut self, claim: &SessionClaim, ctx: &UserContext) -> SessionResult<()> {
        self.ensure_live()?;

        let keys = self.recipe.core.signing_keys(ctx).await?;
        let payload = claim.remove_from_payload(&self.payload);
        (self.recipe.functions.update_access_token_payload)(
            UpdatePayloadInput {
                session_handle: self.session_handle.clone(),
                payload: payload.clone(),
            },
            ctx.clone(),
        )
        .await?;

        self.resign(&keys, payload)
    }

    /// Runs `validators`, rebuilding claims whenever a validator asks for it.
    ///
    /// Rebuilt values are persisted even when validation still fails. Fails
    /// with `ClaimValidation` listing every failing claim.
    pub async fn assert_claims(&mut self, validators: &[ClaimValidator], ctx: &UserContext) -> SessionResult<()> {
        self.assert_claims_with(validators, ClaimRefresh::WhenRecommended, ctx)
            .await
    }

    #[instrument(skip_all, fields(session_handle = %self.session_handle, validators = validators.len()))]
    pub async fn assert_claims_with(
        &mut self,
        validators: &[ClaimValidator],
        refresh: ClaimRefresh,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        self.ensure_live()?;

        let check = validate_claims(&self.user_id, &self.payload, validators, refresh, ctx).await?;

        if check.payload_changed() {
            let updates: Map<String, Value> = check
                .rebuilt
                .iter()
                .filter_map(|key| check.payload.get(key).map(|v| (key.clone(), v.clone())))
                .collect();
            if !updates.is_empty() {
                self.merge_into_access_token_payload(updates, ctx).await?;
            }
        }

        if check.failures.is_empty() {
            Ok(())
        } else {
            Err(SessionError::ClaimValidation {
                failed_claims: check.failures,
            })
        }
    }

    pub async fn get_session_information(&self, ctx: &UserContext) -> SessionResult<SessionRecord> {
        self.ensure_live()?;

        (self.recipe.functions.get_session_information)(self.session_handle.clone(), ctx.clone())
            .await?
            .ok_or(SessionError::SessionRevoked)
    }

    pub async fn get_session_data_from_database(&self, ctx: &UserContext) -> SessionResult<Map<String, Value>> {
        Ok(self.get_session_information(ctx).await?.session_data)
    }

    pub async fn update_session_data_in_database(
        &mut self,
        data: Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        self.ensure_live()?;

        let updated = (self.recipe.functions.update_session_data)(
            UpdateSessionDataInput {
                session_handle: self.session_handle.clone(),
                data,
            },
            ctx.clone(),
        )
        .await?;

        if updated {
            Ok(())
        } else {
            Err(SessionError::SessionRevoked)
        }
    }

    /// Revokes the session; every later operation on this container fails
    /// with `SessionDoesNotExist`.
    #[instrument(skip_all, fields(session_handle = %self.session_handle))]
    pub async fn revoke_session(&mut self, ctx: &UserContext) -> SessionResult<()> {
        self.ensure_live()?;

        (self.recipe.functions.revoke_session)(self.session_handle.clone(), ctx.clone()).await?;
        self.state = SessionState::Revoked;
        Ok(())
    }

    fn resign(&mut self, keys: &TrustedKeySet, payload: Map<String, Value>) -> SessionResult<()> {
        let (access_token, expiry_ms) = self.recipe.core.sign_access_token(
            keys,
            &self.session_handle,
            &self.user_id,
            &payload,
            self.tokens.anti_csrf_token.clone(),
        )?;

        self.payload = payload;
        self.tokens.access_token = access_token;
        self.access_token_expiry_ms = expiry_ms;
        self.state = SessionState::Refreshed;
        Ok(())
    }
}

fn claim_entry(claim: &SessionClaim, payload: &Map<String, Value>) -> Option<Map<String, Value>> {
    let value = payload.get(claim.key())?.clone();
    let mut entry = Map::new();
    entry.insert(claim.key().to_string(), value);
    Some(entry)
}
