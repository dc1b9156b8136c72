use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use sessionguard_types::{
    AccessTokenClaims, PayloadMerger, TokenError, TokenVersion, generate_opaque_token,
    hash_refresh_token,
};
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

use super::functions::{
    CreateSessionInput, GetSessionInput, IssuedSession, MergePayloadInput, SessionTokens,
};
use crate::claims::ClaimRegistry;
use crate::clock::{now_ms, now_secs};
use crate::codec::{TokenCodec, VerifiedToken};
use crate::config::SessionConfig;
use crate::context::UserContext;
use crate::error::{SessionError, SessionResult};
use crate::keys::{KeyStore, TrustedKeySet};
use crate::storage::{
    NewSessionRecord, RefreshTokenConsumption, SessionRecord, SessionStorageBackend,
    StorageResult,
};

/// Awaits a storage call, surfacing `StorageUnavailable` once `deadline` passes.
pub(crate) async fn run_with_deadline<T>(
    operation: &'static str,
    deadline: Instant,
    call: impl Future<Output = StorageResult<T>>,
) -> SessionResult<T> {
    match tokio::time::timeout_at(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(operation, error = %e, "Storage call failed");
            Err(e.into())
        }
        Err(_) => {
            warn!(operation, "Storage call exceeded its deadline");
            Err(SessionError::StorageUnavailable(format!(
                "{operation} exceeded its deadline"
            )))
        }
    }
}

/// Engine state shared by the default recipe functions and every container.
pub(crate) struct SessionCore {
    pub(crate) config: SessionConfig,
    pub(crate) codec: TokenCodec,
    pub(crate) keys: KeyStore,
    pub(crate) storage: Arc<dyn SessionStorageBackend>,
    pub(crate) registry: Arc<ClaimRegistry>,
    pub(crate) merger: PayloadMerger,
}

impl SessionCore {
    /// Runs a storage call under the caller's deadline, or the configured
    /// timeout when the context carries none.
    pub(crate) async fn storage_call<T>(
        &self,
        operation: &'static str,
        ctx: &UserContext,
        call: impl Future<Output = StorageResult<T>>,
    ) -> SessionResult<T> {
        let deadline = ctx
            .deadline()
            .unwrap_or_else(|| Instant::now() + self.config.storage_timeout);

        run_with_deadline(operation, deadline, call).await
    }

    pub(crate) async fn refresh_keys(&self, ctx: &UserContext) -> SessionResult<Arc<TrustedKeySet>> {
        let keys = self
            .storage_call("get_trusted_signing_keys", ctx, self.storage.get_trusted_signing_keys())
            .await?;
        let set = self.keys.replace(TrustedKeySet::new(keys));
        debug!(keys = set.keys().len(), "Refreshed trusted signing keys");
        Ok(set)
    }

    /// Current key snapshot, re-fetched when it is stale or does not know
    /// `kid`. A failed re-fetch keeps serving the previous snapshot.
    async fn trusted_keys(&self, kid: Option<&str>, ctx: &UserContext) -> SessionResult<Arc<TrustedKeySet>> {
        let snapshot = self.keys.snapshot();
        let stale = snapshot.is_empty()
            || snapshot.fetched_at().elapsed() >= self.config.key_refresh_interval;
        let unknown_kid = kid.is_some_and(|kid| !snapshot.contains(kid));

        if !stale && !unknown_kid {
            return Ok(snapshot);
        }

        match self.refresh_keys(ctx).await {
            Ok(fresh) => Ok(fresh),
            Err(e) if !snapshot.is_empty() => {
                warn!(error = %e, "Keeping previous trusted key set");
                Ok(snapshot)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves the key set a new access token will be signed with. Callers
    /// resolve it before any storage write, so a missing signing key fails
    /// the operation before state changes.
    pub(crate) async fn signing_keys(&self, ctx: &UserContext) -> SessionResult<Arc<TrustedKeySet>> {
        let keys = self.trusted_keys(None, ctx).await?;
        if keys.signing_key().is_none() {
            return Err(SessionError::Config(
                "no trusted signing key available".to_string(),
            ));
        }
        Ok(keys)
    }

    /// Signs a current-format access token; returns it with its expiry in ms.
    pub(crate) fn sign_access_token(
        &self,
        keys: &TrustedKeySet,
        session_handle: &str,
        user_id: &str,
        payload: &Map<String, Value>,
        anti_csrf_token: Option<String>,
    ) -> SessionResult<(String, i64)> {
        let iat = now_secs();
        let exp = iat.saturating_add(self.config.access_token_ttl.whole_seconds());

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            session_handle: session_handle.to_string(),
            payload: payload.clone(),
            exp,
            iat,
            anti_csrf_token,
            version: TokenVersion::Current,
        };

        let token = self.codec.sign(&claims, keys).map_err(|e| match e {
            TokenError::NoSigningKey => {
                SessionError::Config("no trusted signing key available".to_string())
            }
            other => other.into(),
        })?;

        Ok((token, exp.saturating_mul(1000)))
    }

    fn refresh_expiry_ms(&self) -> i64 {
        let ttl_ms = i64::try_from(self.config.refresh_token_ttl.whole_milliseconds()).unwrap_or(i64::MAX);
        now_ms().saturating_add(ttl_ms)
    }

    #[instrument(skip_all, fields(user_id = %input.user_id))]
    pub(crate) async fn create_new_session(
        &self,
        input: CreateSessionInput,
        ctx: &UserContext,
    ) -> SessionResult<IssuedSession> {
        // caller values first, so registered claims overwrite colliding keys
        let payload = self.merger.merge(&Map::new(), &input.access_token_payload);
        let payload = self
            .registry
            .build_all(&input.user_id, &payload, ctx)
            .await?;

        let keys = self.signing_keys(ctx).await?;
        let refresh_token = generate_opaque_token();
        let anti_csrf_token = self.config.anti_csrf.then(generate_opaque_token);

        let record = self
            .storage_call(
                "create_session",
                ctx,
                self.storage.create_session(NewSessionRecord {
                    user_id: input.user_id,
                    access_token_payload: payload,
                    session_data: input.session_data,
                    refresh_token_hash: hash_refresh_token(&refresh_token),
                    expiry_ms: self.refresh_expiry_ms(),
                }),
            )
            .await?;

        let (access_token, access_token_expiry_ms) = self.sign_access_token(
            &keys,
            &record.session_handle,
            &record.user_id,
            &record.access_token_payload,
            anti_csrf_token.clone(),
        )?;

        debug!(session_handle = %record.session_handle, "Created session");

        Ok(IssuedSession {
            session_handle: record.session_handle,
            user_id: record.user_id,
            access_token_payload: record.access_token_payload,
            tokens: SessionTokens {
                access_token,
                refresh_token: Some(refresh_token),
                anti_csrf_token,
            },
            access_token_expiry_ms,
            time_created_ms: record.time_created_ms,
        })
    }

    #[instrument(skip_all)]
    pub(crate) async fn get_session(
        &self,
        input: GetSessionInput,
        ctx: &UserContext,
    ) -> SessionResult<Option<IssuedSession>> {
        let Some(access_token) = input.access_token else {
            if input.session_required {
                return Err(SessionError::TokenInvalid("no access token".to_string()));
            }
            return Ok(None);
        };

        let kid = jsonwebtoken::decode_header(&access_token)
            .ok()
            .and_then(|header| header.kid);
        let keys = self.trusted_keys(kid.as_deref(), ctx).await?;
        let verified = self.codec.verify(&access_token, &keys)?;

        if input.anti_csrf_check {
            if let Some(expected) = verified.anti_csrf_token() {
                if input.anti_csrf_token.as_deref() != Some(expected) {
                    return Err(SessionError::TokenInvalid("anti-csrf check failed".to_string()));
                }
            }
        }

        let payload = match &verified {
            VerifiedToken::Current(claims) => {
                if input.check_database {
                    self.require_session(&claims.session_handle, ctx).await?;
                }
                claims.payload.clone()
            }
            VerifiedToken::Legacy(claims) => {
                debug!(session_handle = %claims.session_handle, "Resolving legacy token payload");
                self.require_session(&claims.session_handle, ctx)
                    .await?
                    .access_token_payload
            }
        };

        Ok(Some(IssuedSession {
            session_handle: verified.session_handle().to_string(),
            user_id: verified.user_id().to_string(),
            access_token_payload: payload,
            tokens: SessionTokens {
                anti_csrf_token: verified.anti_csrf_token().map(str::to_string),
                access_token,
                refresh_token: None,
            },
            access_token_expiry_ms: verified.exp() * 1000,
            time_created_ms: verified.iat() * 1000,
        }))
    }

    /// Loads a session that a valid token refers to; a missing record means
    /// the session was revoked under the token.
    async fn require_session(&self, session_handle: &str, ctx: &UserContext) -> SessionResult<SessionRecord> {
        self.storage_call("get_session", ctx, self.storage.get_session(session_handle))
            .await?
            .ok_or(SessionError::SessionRevoked)
    }

    #[instrument(skip_all)]
    pub(crate) async fn refresh_session(
        &self,
        refresh_token: &str,
        ctx: &UserContext,
    ) -> SessionResult<IssuedSession> {
        // keys resolve before the presented token is consumed
        let keys = self.signing_keys(ctx).await?;
        let next_refresh_token = generate_opaque_token();

        let consumption = self
            .storage_call(
                "consume_refresh_token",
                ctx,
                self.storage.consume_refresh_token(
                    &hash_refresh_token(refresh_token),
                    &hash_refresh_token(&next_refresh_token),
                    self.refresh_expiry_ms(),
                ),
            )
            .await?;

        let session = match consumption {
            RefreshTokenConsumption::Consumed { session } => session,
            RefreshTokenConsumption::AlreadyUsed {
                session_handle,
                user_id,
            } => {
                warn!(
                    session_handle = %session_handle,
                    user_id = %user_id,
                    "Refresh token replayed, revoking session"
                );
                if let Err(e) = self
                    .storage_call("revoke_session", ctx, self.storage.revoke_session(&session_handle))
                    .await
                {
                    error!(session_handle = %session_handle, error = %e, "Failed to revoke session after token theft");
                }
                return Err(SessionError::TokenTheftDetected {
                    session_handle,
                    user_id,
                });
            }
            RefreshTokenConsumption::NotFound => {
                return Err(SessionError::TokenInvalid(
                    "refresh token is unknown or expired".to_string(),
                ));
            }
        };

        let anti_csrf_token = self.config.anti_csrf.then(generate_opaque_token);
        let (access_token, access_token_expiry_ms) = self.sign_access_token(
            &keys,
            &session.session_handle,
            &session.user_id,
            &session.access_token_payload,
            anti_csrf_token.clone(),
        )?;

        debug!(session_handle = %session.session_handle, "Rotated session tokens");

        Ok(IssuedSession {
            session_handle: session.session_handle,
            user_id: session.user_id,
            access_token_payload: session.access_token_payload,
            tokens: SessionTokens {
                access_token,
                refresh_token: Some(next_refresh_token),
                anti_csrf_token,
            },
            access_token_expiry_ms,
            time_created_ms: session.time_created_ms,
        })
    }

    #[instrument(skip(self, ctx))]
    pub(crate) async fn revoke_session(&self, session_handle: &str, ctx: &UserContext) -> SessionResult<bool> {
        self.storage_call("revoke_session", ctx, self.storage.revoke_session(session_handle))
            .await
    }

    #[instrument(skip(self, ctx))]
    pub(crate) async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        ctx: &UserContext,
    ) -> SessionResult<Vec<String>> {
        self.storage_call("revoke_all_for_user", ctx, self.storage.revoke_all_for_user(user_id))
            .await
    }

    #[instrument(skip_all, fields(session_handle = %input.session_handle))]
    pub(crate) async fn merge_into_access_token_payload(
        &self,
        input: MergePayloadInput,
        ctx: &UserContext,
    ) -> SessionResult<Map<String, Value>> {
        let merged = self.merger.merge(&input.current_payload, &input.updates);
        self.update_access_token_payload(&input.session_handle, merged.clone(), ctx)
            .await?;
        Ok(merged)
    }

    pub(crate) async fn update_access_token_payload(
        &self,
        session_handle: &str,
        payload: Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        let updated = self
            .storage_call(
                "update_access_token_payload",
                ctx,
                self.storage.update_access_token_payload(session_handle, payload),
            )
            .await?;

        if updated {
            Ok(())
        } else {
            Err(SessionError::SessionRevoked)
        }
    }

    pub(crate) async fn update_session_data(
        &self,
        session_handle: &str,
        data: Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<bool> {
        self.storage_call(
            "update_session_data",
            ctx,
            self.storage.update_session_data(session_handle, data),
        )
        .await
    }

    pub(crate) async fn get_session_information(
        &self,
        session_handle: &str,
        ctx: &UserContext,
    ) -> SessionResult<Option<SessionRecord>> {
        self.storage_call("get_session", ctx, self.storage.get_session(session_handle))
            .await
    }
}
