//! Build, refresh and validate state machine.
//!
//! Validators are grouped by claim key and run in the order given. Within a
//! claim the first failure short-circuits; other claims are still checked so
//! the caller learns about every failing claim at once.

use serde_json::{Map, Value};
use tracing::debug;

use super::validator::{ClaimValidator, ValidationOutcome};
use crate::clock::now_ms;
use crate::context::UserContext;
use crate::error::{ClaimValidationFailure, SessionResult};

/// Whether a validator that finds its claim absent gets a rebuild.
///
/// Stale values (max age exceeded) are always rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimRefresh {
    #[default]
    WhenRecommended,
    OnlyWhenStale,
}

/// Result of running a set of validators against a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimsCheck {
    /// Payload after any rebuilds
    pub payload: Map<String, Value>,
    /// Claim keys that were rebuilt, in order
    pub rebuilt: Vec<String>,
    pub failures: Vec<ClaimValidationFailure>,
}

impl ClaimsCheck {
    pub fn payload_changed(&self) -> bool {
        !self.rebuilt.is_empty()
    }

    pub fn is_satisfied(&self) -> bool {
        self.failures.is_empty()
    }
}

pub async fn validate_claims(
    user_id: &str,
    payload: &Map<String, Value>,
    validators: &[ClaimValidator],
    refresh: ClaimRefresh,
    ctx: &UserContext,
) -> SessionResult<ClaimsCheck> {
    let mut check = ClaimsCheck {
        payload: payload.clone(),
        rebuilt: Vec::new(),
        failures: Vec::new(),
    };

    for group in group_by_claim(validators) {
        let mut rebuilt = false;

        for validator in group {
            let outcome = match validator.evaluate(&check.payload, now_ms()) {
                ValidationOutcome::ShouldRefresh { max_age_exceeded } => {
                    let wants_rebuild =
                        max_age_exceeded || refresh == ClaimRefresh::WhenRecommended;

                    if !wants_rebuild {
                        validator.evaluate_existing(&check.payload)
                    } else if rebuilt {
                        after_rebuild(validator, &check.payload)
                    } else {
                        debug!(
                            claim = validator.claim_key(),
                            validator = validator.id(),
                            max_age_exceeded,
                            "Rebuilding claim"
                        );
                        let built = validator
                            .claim()
                            .build(user_id, &check.payload, ctx)
                            .await?;
                        if built != check.payload {
                            check.payload = built;
                            check.rebuilt.push(validator.claim_key().to_string());
                        }
                        rebuilt = true;
                        after_rebuild(validator, &check.payload)
                    }
                }
                outcome => outcome,
            };

            if let ValidationOutcome::NotSatisfied(reason) = outcome {
                check.failures.push(ClaimValidationFailure {
                    claim_key: validator.claim_key().to_string(),
                    validator_id: validator.id().to_string(),
                    reason,
                });
                break;
            }
        }
    }

    Ok(check)
}

/// Re-evaluates a validator once its claim has been rebuilt in this pass.
///
/// Age is measured against the clock, not the stored timestamp: a fetch that
/// yields no value leaves the old entry in place, and that entry is still
/// stale. A value that is still absent is handed to the predicate as absent.
fn after_rebuild(validator: &ClaimValidator, payload: &Map<String, Value>) -> ValidationOutcome {
    match validator.evaluate(payload, now_ms()) {
        ValidationOutcome::ShouldRefresh {
            max_age_exceeded: true,
        } => ValidationOutcome::NotSatisfied("value is stale after refresh".to_string()),
        ValidationOutcome::ShouldRefresh {
            max_age_exceeded: false,
        } => validator.evaluate_existing(payload),
        outcome => outcome,
    }
}

fn group_by_claim(validators: &[ClaimValidator]) -> Vec<Vec<&ClaimValidator>> {
    let mut groups: Vec<Vec<&ClaimValidator>> = Vec::new();

    for validator in validators {
        match groups
            .iter_mut()
            .find(|g| g[0].claim_key() == validator.claim_key())
        {
            Some(group) => group.push(validator),
            None => groups.push(vec![validator]),
        }
    }

    groups
}
