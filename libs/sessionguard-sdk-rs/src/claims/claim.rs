use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use sessionguard_types::ClaimValue;
use tracing::instrument;

use crate::clock::now_ms;
use crate::context::UserContext;
use crate::error::SessionResult;
use crate::overrides::{Override, compose};

/// Computes the current value of a claim for a user. `Ok(None)` means the
/// claim has no value and is left out of the payload.
pub type FetchValueFn =
    Arc<dyn Fn(String, UserContext) -> BoxFuture<'static, SessionResult<Option<Value>>> + Send + Sync>;

/// Overridable slots of a claim.
#[derive(Clone)]
pub struct ClaimFunctions {
    pub fetch_value: FetchValueFn,
}

/// A named, independently refreshable fact embedded in the access token payload.
///
/// The payload entry has the shape `{"v": value, "t": built_at_ms}`.
#[derive(Clone)]
pub struct SessionClaim {
    key: String,
    functions: ClaimFunctions,
}

impl std::fmt::Debug for SessionClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClaim").field("key", &self.key).finish()
    }
}

impl SessionClaim {
    pub fn new<F, Fut>(key: impl Into<String>, fetch_value: F) -> Self
    where
        F: Fn(String, UserContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SessionResult<Option<Value>>> + Send + 'static,
    {
        Self {
            key: key.into(),
            functions: ClaimFunctions {
                fetch_value: Arc::new(move |user_id, ctx| fetch_value(user_id, ctx).boxed()),
            },
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn functions(&self) -> &ClaimFunctions {
        &self.functions
    }

    pub fn with_overrides(self, overrides: &[Override<ClaimFunctions>]) -> Self {
        Self {
            functions: compose(self.functions, overrides),
            key: self.key,
        }
    }

    pub async fn fetch_value(&self, user_id: &str, ctx: &UserContext) -> SessionResult<Option<Value>> {
        (self.functions.fetch_value)(user_id.to_string(), ctx.clone()).await
    }

    /// Fetches the current value and writes it into a copy of `payload`.
    ///
    /// When the claim has no value the payload is returned unchanged.
    #[instrument(skip(self, payload, ctx), fields(claim = %self.key))]
    pub async fn build(
        &self,
        user_id: &str,
        payload: &Map<String, Value>,
        ctx: &UserContext,
    ) -> SessionResult<Map<String, Value>> {
        match self.fetch_value(user_id, ctx).await? {
            Some(value) => Ok(self.add_to_payload(payload, value, now_ms())),
            None => Ok(payload.clone()),
        }
    }

    /// Writes `value` with timestamp `max(now_ms, previous t)`, so timestamps
    /// never move backwards for the same session.
    pub fn add_to_payload(&self, payload: &Map<String, Value>, value: Value, now_ms: i64) -> Map<String, Value> {
        let t = self
            .get_last_refetch_time(payload)
            .map_or(now_ms, |previous| previous.max(now_ms));

        let mut updated = payload.clone();
        updated.insert(self.key.clone(), ClaimValue::new(value, t).into_entry());
        updated
    }

    pub fn remove_from_payload(&self, payload: &Map<String, Value>) -> Map<String, Value> {
        payload
            .iter()
            .filter(|(k, _)| k.as_str() != self.key)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn get_claim_value(&self, payload: &Map<String, Value>) -> Option<ClaimValue> {
        payload.get(&self.key).and_then(ClaimValue::from_entry)
    }

    pub fn get_value_from_payload(&self, payload: &Map<String, Value>) -> Option<Value> {
        self.get_claim_value(payload).map(|c| c.v)
    }

    pub fn get_last_refetch_time(&self, payload: &Map<String, Value>) -> Option<i64> {
        self.get_claim_value(payload).map(|c| c.t)
    }
}
