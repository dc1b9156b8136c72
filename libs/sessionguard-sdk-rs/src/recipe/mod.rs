//! The embedding surface: session creation, verification, refresh and
//! handle-based operations.

mod engine;
mod functions;

pub use functions::{
    CreateSessionInput, GetSessionInput, GlobalValidatorsFn, IssuedSession, MergePayloadInput,
    RecipeFn, RecipeFunctions, RefreshSessionInput, SessionTokens, UpdatePayloadInput,
    UpdateSessionDataInput,
};

use std::sync::Arc;

use serde_json::{Map, Value};
use sessionguard_types::{NullHandling, PayloadMerger};
use tokio::time::Instant;
use tracing::{info, instrument};

use self::engine::{SessionCore, run_with_deadline};
use crate::claims::{ClaimRefresh, ClaimRegistry, ClaimValidator, SessionClaim};
use crate::clock::now_ms;
use crate::codec::TokenCodec;
use crate::config::SessionConfig;
use crate::context::UserContext;
use crate::error::{SessionError, SessionResult};
use crate::extract::{SessionRequest, access_token_from_request, refresh_token_from_request};
use crate::keys::{KeyStore, TrustedKeySet};
use crate::overrides::{Override, compose};
use crate::session::{SessionContainer, SessionState};
use crate::storage::{SessionRecord, SessionStorageBackend};

pub(crate) struct RecipeShared {
    pub(crate) core: Arc<SessionCore>,
    pub(crate) functions: RecipeFunctions,
}

/// Per-call verification options.
#[derive(Clone)]
pub struct VerifySessionOptions {
    /// When false, a request without an access token yields `Ok(None)`
    pub session_required: bool,
    /// Overrides the configured anti-CSRF setting for this call
    pub anti_csrf_check: Option<bool>,
    /// Confirms the session still exists in storage
    pub check_database: bool,
    /// Adjusts the global validator list for this call
    pub override_global_claim_validators: Option<Override<Vec<ClaimValidator>>>,
    pub claim_refresh: ClaimRefresh,
}

impl Default for VerifySessionOptions {
    fn default() -> Self {
        Self {
            session_required: true,
            anti_csrf_check: None,
            check_database: false,
            override_global_claim_validators: None,
            claim_refresh: ClaimRefresh::default(),
        }
    }
}

pub struct SessionRecipeBuilder {
    config: SessionConfig,
    storage: Arc<dyn SessionStorageBackend>,
    claims: Vec<(SessionClaim, Vec<ClaimValidator>)>,
    overrides: Vec<Override<RecipeFunctions>>,
}

impl SessionRecipeBuilder {
    /// Registers a global claim and its validators.
    pub fn claim(mut self, claim: SessionClaim, validators: Vec<ClaimValidator>) -> Self {
        self.claims.push((claim, validators));
        self
    }

    /// Adds an override; overrides are applied in the order they were added.
    pub fn override_functions(mut self, override_fn: Override<RecipeFunctions>) -> Self {
        self.overrides.push(override_fn);
        self
    }

    /// Validates the config, negotiates null handling with the backend and
    /// loads the initial trusted key set.
    pub async fn build(self) -> SessionResult<SessionRecipe> {
        self.config.validate()?;

        let null_handling = match self.config.null_handling {
            Some(forced) => forced,
            None => {
                let deadline = Instant::now() + self.config.storage_timeout;
                let api_version =
                    run_with_deadline("api_version", deadline, self.storage.api_version()).await?;
                let negotiated = NullHandling::for_api_version(api_version);
                info!(%api_version, null_handling = ?negotiated, "Negotiated backend API version");
                negotiated
            }
        };

        let registry = ClaimRegistry::new();
        for (claim, validators) in self.claims {
            registry.register(claim, validators);
        }

        let core = Arc::new(SessionCore {
            codec: TokenCodec::new(self.config.clock_skew_seconds),
            keys: KeyStore::new(TrustedKeySet::empty()),
            storage: self.storage,
            registry: Arc::new(registry),
            merger: PayloadMerger::new(null_handling),
            config: self.config,
        });
        core.refresh_keys(&UserContext::new()).await?;

        let functions = compose(RecipeFunctions::defaults(core.clone()), &self.overrides);

        Ok(SessionRecipe {
            shared: Arc::new(RecipeShared { core, functions }),
        })
    }
}

/// Entry point for route handlers. Cheap to clone.
#[derive(Clone)]
pub struct SessionRecipe {
    shared: Arc<RecipeShared>,
}

impl SessionRecipe {
    pub fn builder(config: SessionConfig, storage: Arc<dyn SessionStorageBackend>) -> SessionRecipeBuilder {
        SessionRecipeBuilder {
            config,
            storage,
            claims: Vec::new(),
            overrides: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.core.config
    }

    pub fn null_handling(&self) -> NullHandling {
        self.shared.core.merger.null_handling()
    }

    /// Registry of global claims; claims may also be registered after build.
    pub fn claims(&self) -> &ClaimRegistry {
        &self.shared.core.registry
    }

    pub fn functions(&self) -> &RecipeFunctions {
        &self.shared.functions
    }

    fn container(&self, issued: IssuedSession, state: SessionState) -> SessionContainer {
        SessionContainer::new(self.shared.clone(), issued, state)
    }

    pub async fn create_new_session(
        &self,
        user_id: &str,
        access_token_payload: Map<String, Value>,
        session_data: Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<SessionContainer> {
        let issued = (self.shared.functions.create_new_session)(
            CreateSessionInput {
                user_id: user_id.to_string(),
                access_token_payload,
                session_data,
            },
            ctx.clone(),
        )
        .await?;

        Ok(self.container(issued, SessionState::Refreshed))
    }

    /// Verifies the request's session with default options.
    pub async fn verify_session<R: SessionRequest + ?Sized>(
        &self,
        req: &R,
        ctx: &UserContext,
    ) -> SessionResult<SessionContainer> {
        self.get_session(req, VerifySessionOptions::default(), ctx)
            .await?
            .ok_or_else(|| SessionError::TokenInvalid("no access token".to_string()))
    }

    pub async fn get_session<R: SessionRequest + ?Sized>(
        &self,
        req: &R,
        options: VerifySessionOptions,
        ctx: &UserContext,
    ) -> SessionResult<Option<SessionContainer>> {
        let config = self.config();
        let access_token = access_token_from_request(req, &config.access_token_cookie);
        let anti_csrf_token = req.get_header(&config.anti_csrf_header);

        self.get_session_with_tokens(access_token.as_deref(), anti_csrf_token, options, ctx)
            .await
    }

    /// Verifies an access token and runs the global claim validators on it.
    #[instrument(skip_all)]
    pub async fn get_session_with_tokens(
        &self,
        access_token: Option<&str>,
        anti_csrf_token: Option<&str>,
        options: VerifySessionOptions,
        ctx: &UserContext,
    ) -> SessionResult<Option<SessionContainer>> {
        let issued = (self.shared.functions.get_session)(
            GetSessionInput {
                access_token: access_token.map(str::to_string),
                anti_csrf_token: anti_csrf_token.map(str::to_string),
                session_required: options.session_required,
                anti_csrf_check: options.anti_csrf_check.unwrap_or(self.config().anti_csrf),
                check_database: options.check_database,
            },
            ctx.clone(),
        )
        .await?;

        let Some(issued) = issued else {
            return Ok(None);
        };
        let mut container = self.container(issued, SessionState::Verified);

        let validators = (self.shared.functions.get_global_claim_validators)(
            container.user_id(),
            self.claims().global_validators(),
            ctx,
        );
        let validators = match &options.override_global_claim_validators {
            Some(override_fn) => compose(validators, std::slice::from_ref(override_fn)),
            None => validators,
        };

        if !validators.is_empty() {
            container
                .assert_claims_with(&validators, options.claim_refresh, ctx)
                .await?;
        }

        Ok(Some(container))
    }

    /// Rotates the token pair. A refresh token works exactly once; replaying
    /// it revokes the session and fails with `TokenTheftDetected`.
    pub async fn refresh_session(&self, refresh_token: &str, ctx: &UserContext) -> SessionResult<SessionContainer> {
        let issued = (self.shared.functions.refresh_session)(
            RefreshSessionInput {
                refresh_token: refresh_token.to_string(),
            },
            ctx.clone(),
        )
        .await?;

        Ok(self.container(issued, SessionState::Refreshed))
    }

    pub async fn refresh_session_from_request<R: SessionRequest + ?Sized>(
        &self,
        req: &R,
        ctx: &UserContext,
    ) -> SessionResult<SessionContainer> {
        let refresh_token = refresh_token_from_request(req, &self.config().refresh_token_cookie)
            .ok_or_else(|| SessionError::TokenInvalid("no refresh token".to_string()))?;

        self.refresh_session(&refresh_token, ctx).await
    }

    pub async fn revoke_session(&self, session_handle: &str, ctx: &UserContext) -> SessionResult<bool> {
        (self.shared.functions.revoke_session)(session_handle.to_string(), ctx.clone()).await
    }

    pub async fn revoke_all_sessions_for_user(&self, user_id: &str, ctx: &UserContext) -> SessionResult<Vec<String>> {
        (self.shared.functions.revoke_all_sessions_for_user)(user_id.to_string(), ctx.clone()).await
    }

    pub async fn get_session_information(
        &self,
        session_handle: &str,
        ctx: &UserContext,
    ) -> SessionResult<Option<SessionRecord>> {
        (self.shared.functions.get_session_information)(session_handle.to_string(), ctx.clone()).await
    }

    pub async fn update_session_data(
        &self,
        session_handle: &str,
        data: Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<bool> {
        (self.shared.functions.update_session_data)(
            UpdateSessionDataInput {
                session_handle: session_handle.to_string(),
                data,
            },
            ctx.clone(),
        )
        .await
    }

    async fn require_session(&self, session_handle: &str, ctx: &UserContext) -> SessionResult<SessionRecord> {
        self.get_session_information(session_handle, ctx)
            .await?
            .ok_or(SessionError::SessionDoesNotExist)
    }

    /// Merges into a stored session's payload. Tokens already issued keep
    /// their old payload until the next refresh.
    pub async fn merge_into_access_token_payload(
        &self,
        session_handle: &str,
        updates: Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        let record = self.require_session(session_handle, ctx).await?;

        (self.shared.functions.merge_into_access_token_payload)(
            MergePayloadInput {
                session_handle: record.session_handle,
                current_payload: record.access_token_payload,
                updates,
            },
            ctx.clone(),
        )
        .await?;

        Ok(())
    }

    pub async fn get_claim_value(
        &self,
        session_handle: &str,
        claim: &SessionClaim,
        ctx: &UserContext,
    ) -> SessionResult<Option<Value>> {
        let record = self.require_session(session_handle, ctx).await?;
        Ok(claim.get_value_from_payload(&record.access_token_payload))
    }

    pub async fn set_claim_value(
        &self,
        session_handle: &str,
        claim: &SessionClaim,
        value: Value,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        let record = self.require_session(session_handle, ctx).await?;
        let built = claim.add_to_payload(&record.access_token_payload, value, now_ms());

        self.merge_claim(record, claim, built, ctx).await
    }

    pub async fn fetch_and_set_claim(
        &self,
        session_handle: &str,
        claim: &SessionClaim,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        let record = self.require_session(session_handle, ctx).await?;
        let built = claim
            .build(&record.user_id, &record.access_token_payload, ctx)
            .await?;

        self.merge_claim(record, claim, built, ctx).await
    }

    async fn merge_claim(
        &self,
        record: SessionRecord,
        claim: &SessionClaim,
        built: Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<()> {
        let Some(value) = built.get(claim.key()) else {
            return Ok(());
        };
        let mut updates = Map::new();
        updates.insert(claim.key().to_string(), value.clone());

        (self.shared.functions.merge_into_access_token_payload)(
            MergePayloadInput {
                session_handle: record.session_handle,
                current_payload: record.access_token_payload,
                updates,
            },
            ctx.clone(),
        )
        .await?;

        Ok(())
    }
}
