//! The recipe's overridable function table.
//!
//! Each slot takes an owned input and the caller's [`UserContext`] and
//! returns data rather than a [`crate::SessionContainer`], so overrides can
//! wrap, inspect or replace results freely.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::engine::SessionCore;
use crate::claims::ClaimValidator;
use crate::context::UserContext;
use crate::error::SessionResult;
use crate::storage::SessionRecord;

pub type RecipeFn<I, O> =
    Arc<dyn Fn(I, UserContext) -> BoxFuture<'static, SessionResult<O>> + Send + Sync>;

/// Selects the validators that run on every verification.
pub type GlobalValidatorsFn =
    Arc<dyn Fn(&str, Vec<ClaimValidator>, &UserContext) -> Vec<ClaimValidator> + Send + Sync>;

/// Tokens the route handler must hand back to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTokens {
    pub access_token: String,
    /// Only present when a new pair was minted (create or refresh)
    pub refresh_token: Option<String>,
    pub anti_csrf_token: Option<String>,
}

/// A verified or freshly minted session, before it is wrapped in a container.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedSession {
    pub session_handle: String,
    pub user_id: String,
    pub access_token_payload: Map<String, Value>,
    pub tokens: SessionTokens,
    pub access_token_expiry_ms: i64,
    pub time_created_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateSessionInput {
    pub user_id: String,
    pub access_token_payload: Map<String, Value>,
    pub session_data: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct GetSessionInput {
    pub access_token: Option<String>,
    pub anti_csrf_token: Option<String>,
    pub session_required: bool,
    pub anti_csrf_check: bool,
    pub check_database: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshSessionInput {
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct MergePayloadInput {
    pub session_handle: String,
    pub current_payload: Map<String, Value>,
    pub updates: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct UpdatePayloadInput {
    pub session_handle: String,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct UpdateSessionDataInput {
    pub session_handle: String,
    pub data: Map<String, Value>,
}

/// Default behaviour of every recipe operation, replaceable slot by slot
/// through [`crate::overrides::compose`].
#[derive(Clone)]
pub struct RecipeFunctions {
    pub create_new_session: RecipeFn<CreateSessionInput, IssuedSession>,
    /// `Ok(None)` only when no token was presented and the session is optional
    pub get_session: RecipeFn<GetSessionInput, Option<IssuedSession>>,
    pub refresh_session: RecipeFn<RefreshSessionInput, IssuedSession>,
    pub revoke_session: RecipeFn<String, bool>,
    pub revoke_all_sessions_for_user: RecipeFn<String, Vec<String>>,
    /// Merges and persists; returns the merged payload
    pub merge_into_access_token_payload: RecipeFn<MergePayloadInput, Map<String, Value>>,
    /// Persists a replacement payload
    pub update_access_token_payload: RecipeFn<UpdatePayloadInput, ()>,
    pub update_session_data: RecipeFn<UpdateSessionDataInput, bool>,
    pub get_session_information: RecipeFn<String, Option<SessionRecord>>,
    pub get_global_claim_validators: GlobalValidatorsFn,
}

impl RecipeFunctions {
    pub(crate) fn defaults(core: Arc<SessionCore>) -> Self {
        Self {
            create_new_session: slot(&core, |core, input: CreateSessionInput, ctx| async move {
                core.create_new_session(input, &ctx).await
            }),
            get_session: slot(&core, |core, input: GetSessionInput, ctx| async move {
                core.get_session(input, &ctx).await
            }),
            refresh_session: slot(&core, |core, input: RefreshSessionInput, ctx| async move {
                core.refresh_session(&input.refresh_token, &ctx).await
            }),
            revoke_session: slot(&core, |core, handle: String, ctx| async move {
                core.revoke_session(&handle, &ctx).await
            }),
            revoke_all_sessions_for_user: slot(&core, |core, user_id: String, ctx| async move {
                core.revoke_all_sessions_for_user(&user_id, &ctx).await
            }),
            merge_into_access_token_payload: slot(&core, |core, input: MergePayloadInput, ctx| async move {
                core.merge_into_access_token_payload(input, &ctx).await
            }),
            update_access_token_payload: slot(&core, |core, input: UpdatePayloadInput, ctx| async move {
                core.update_access_token_payload(&input.session_handle, input.payload, &ctx)
                    .await
            }),
            update_session_data: slot(&core, |core, input: UpdateSessionDataInput, ctx| async move {
                core.update_session_data(&input.session_handle, input.data, &ctx)
                    .await
            }),
            get_session_information: slot(&core, |core, handle: String, ctx| async move {
                core.get_session_information(&handle, &ctx).await
            }),
            get_global_claim_validators: Arc::new(
                |_user_id: &str, validators: Vec<ClaimValidator>, _ctx: &UserContext| validators,
            ),
        }
    }
}

fn slot<I, O, F, Fut>(core: &Arc<SessionCore>, f: F) -> RecipeFn<I, O>
where
    F: Fn(Arc<SessionCore>, I, UserContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SessionResult<O>> + Send + 'static,
{
    let core = core.clone();
    Arc::new(move |input, ctx| f(core.clone(), input, ctx).boxed())
}
