use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use super::claim::SessionClaim;

/// Decides whether a claim value is acceptable. `None` means the claim is
/// absent from the payload.
pub type ValuePredicate = Arc<dyn Fn(Option<&Value>) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Satisfied,
    NotSatisfied(String),
    /// The stored value cannot be judged as is. With `max_age_exceeded` the
    /// value is too old and must be rebuilt before re-evaluation; without it
    /// the value is absent and the caller may decline to rebuild.
    ShouldRefresh { max_age_exceeded: bool },
}

/// A predicate over one claim's value with an optional staleness budget.
#[derive(Clone)]
pub struct ClaimValidator {
    id: String,
    claim: SessionClaim,
    max_age: Option<Duration>,
    predicate: ValuePredicate,
}

impl std::fmt::Debug for ClaimValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimValidator")
            .field("id", &self.id)
            .field("claim", &self.claim.key())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl ClaimValidator {
    pub fn new<F>(id: impl Into<String>, claim: SessionClaim, max_age: Option<Duration>, predicate: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            claim,
            max_age,
            predicate: Arc::new(predicate),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn claim(&self) -> &SessionClaim {
        &self.claim
    }

    pub fn claim_key(&self) -> &str {
        self.claim.key()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Evaluates the value stored in `payload` as of `now_ms`.
    pub fn evaluate(&self, payload: &Map<String, Value>, now_ms: i64) -> ValidationOutcome {
        let Some(stored) = self.claim.get_claim_value(payload) else {
            return ValidationOutcome::ShouldRefresh {
                max_age_exceeded: false,
            };
        };

        if let Some(max_age) = self.max_age {
            let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
            if now_ms.saturating_sub(stored.t) > max_age_ms {
                return ValidationOutcome::ShouldRefresh {
                    max_age_exceeded: true,
                };
            }
        }

        self.check(Some(&stored.v))
    }

    /// Evaluates the stored value as is, without any staleness check.
    pub fn evaluate_existing(&self, payload: &Map<String, Value>) -> ValidationOutcome {
        self.check(self.claim.get_value_from_payload(payload).as_ref())
    }

    fn check(&self, value: Option<&Value>) -> ValidationOutcome {
        match (self.predicate)(value) {
            Ok(()) => ValidationOutcome::Satisfied,
            Err(reason) => ValidationOutcome::NotSatisfied(reason),
        }
    }
}
