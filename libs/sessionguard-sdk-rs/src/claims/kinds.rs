//! Ready-made claim kinds with their usual validators.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use super::claim::SessionClaim;
use super::validator::ClaimValidator;
use crate::context::UserContext;
use crate::error::SessionResult;

const MISSING: &str = "value does not exist";

/// Claim holding a single JSON scalar.
#[derive(Debug, Clone)]
pub struct PrimitiveClaim {
    claim: SessionClaim,
}

impl PrimitiveClaim {
    pub fn new<F, Fut>(key: impl Into<String>, fetch_value: F) -> Self
    where
        F: Fn(String, UserContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SessionResult<Option<Value>>> + Send + 'static,
    {
        Self {
            claim: SessionClaim::new(key, fetch_value),
        }
    }

    pub fn claim(&self) -> &SessionClaim {
        &self.claim
    }

    pub fn has_value(&self, expected: impl Into<Value>, max_age: Option<Duration>) -> ClaimValidator {
        let expected = expected.into();
        ClaimValidator::new(
            format!("{}-has-value", self.claim.key()),
            self.claim.clone(),
            max_age,
            move |value| match value {
                Some(v) if *v == expected => Ok(()),
                Some(v) => Err(format!("wrong value: expected {expected}, got {v}")),
                None => Err(MISSING.to_string()),
            },
        )
    }
}

/// Claim holding a boolean flag, such as a verified email.
#[derive(Debug, Clone)]
pub struct BooleanClaim {
    inner: PrimitiveClaim,
}

impl BooleanClaim {
    pub fn new<F, Fut>(key: impl Into<String>, fetch_value: F) -> Self
    where
        F: Fn(String, UserContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SessionResult<Option<bool>>> + Send + 'static,
    {
        Self {
            inner: PrimitiveClaim::new(key, move |user_id, ctx| {
                let fetched = fetch_value(user_id, ctx);
                async move { Ok(fetched.await?.map(Value::Bool)) }
            }),
        }
    }

    pub fn claim(&self) -> &SessionClaim {
        self.inner.claim()
    }

    pub fn is_true(&self, max_age: Option<Duration>) -> ClaimValidator {
        self.inner.has_value(true, max_age)
    }

    pub fn is_false(&self, max_age: Option<Duration>) -> ClaimValidator {
        self.inner.has_value(false, max_age)
    }
}

/// Claim holding an array of scalars, such as roles.
#[derive(Debug, Clone)]
pub struct PrimitiveArrayClaim {
    claim: SessionClaim,
}

impl PrimitiveArrayClaim {
    pub fn new<F, Fut>(key: impl Into<String>, fetch_value: F) -> Self
    where
        F: Fn(String, UserContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SessionResult<Option<Vec<Value>>>> + Send + 'static,
    {
        Self {
            claim: SessionClaim::new(key, move |user_id, ctx| {
                let fetched = fetch_value(user_id, ctx);
                async move { Ok(fetched.await?.map(Value::Array)) }
            }),
        }
    }

    pub fn claim(&self) -> &SessionClaim {
        &self.claim
    }

    pub fn includes(&self, item: impl Into<Value>, max_age: Option<Duration>) -> ClaimValidator {
        self.includes_all(vec![item.into()], max_age)
            .with_id(format!("{}-includes", self.claim.key()))
    }

    pub fn excludes(&self, item: impl Into<Value>, max_age: Option<Duration>) -> ClaimValidator {
        self.excludes_all(vec![item.into()], max_age)
            .with_id(format!("{}-excludes", self.claim.key()))
    }

    pub fn includes_all(&self, items: Vec<Value>, max_age: Option<Duration>) -> ClaimValidator {
        ClaimValidator::new(
            format!("{}-includes-all", self.claim.key()),
            self.claim.clone(),
            max_age,
            move |value| {
                let array = as_array(value)?;
                match items.iter().find(|item| !array.contains(item)) {
                    Some(missing) => Err(format!("wrong value: does not include {missing}")),
                    None => Ok(()),
                }
            },
        )
    }

    pub fn excludes_all(&self, items: Vec<Value>, max_age: Option<Duration>) -> ClaimValidator {
        ClaimValidator::new(
            format!("{}-excludes-all", self.claim.key()),
            self.claim.clone(),
            max_age,
            move |value| {
                let array = as_array(value)?;
                match items.iter().find(|item| array.contains(item)) {
                    Some(present) => Err(format!("wrong value: includes {present}")),
                    None => Ok(()),
                }
            },
        )
    }
}

fn as_array(value: Option<&Value>) -> Result<&Vec<Value>, String> {
    match value {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(format!("value is not an array: {other}")),
        None => Err(MISSING.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ValidationOutcome;
    use serde_json::{Map, json};

    fn roles() -> PrimitiveArrayClaim {
        PrimitiveArrayClaim::new("st-role", |_user_id, _ctx| async {
            Ok(Some(vec![json!("admin"), json!("editor")]))
        })
    }

    #[tokio::test]
    async fn test_boolean_claim_builds_bool() {
        let verified = BooleanClaim::new("st-ev", |_user_id, _ctx| async { Ok(Some(true)) });
        let payload = verified
            .claim()
            .build("u1", &Map::new(), &UserContext::new())
            .await
            .unwrap();

        assert_eq!(verified.is_true(None).evaluate(&payload, 0), ValidationOutcome::Satisfied);
        assert!(matches!(
            verified.is_false(None).evaluate(&payload, 0),
            ValidationOutcome::NotSatisfied(_)
        ));
    }

    #[test]
    fn test_primitive_has_value() {
        let claim = PrimitiveClaim::new("st-tier", |_user_id, _ctx| async { Ok(Some(json!("gold"))) });
        let payload = claim.claim().add_to_payload(&Map::new(), json!("silver"), 0);

        let outcome = claim.has_value("gold", None).evaluate(&payload, 0);

        assert_eq!(
            outcome,
            ValidationOutcome::NotSatisfied("wrong value: expected \"gold\", got \"silver\"".to_string())
        );
        assert_eq!(claim.has_value("gold", None).id(), "st-tier-has-value");
    }

    #[test]
    fn test_array_includes_and_excludes() {
        let claim = roles();
        let payload = claim
            .claim()
            .add_to_payload(&Map::new(), json!(["admin", "editor"]), 0);

        assert_eq!(claim.includes("admin", None).evaluate(&payload, 0), ValidationOutcome::Satisfied);
        assert_eq!(claim.excludes("viewer", None).evaluate(&payload, 0), ValidationOutcome::Satisfied);
        assert_eq!(
            claim
                .includes_all(vec![json!("admin"), json!("owner")], None)
                .evaluate(&payload, 0),
            ValidationOutcome::NotSatisfied("wrong value: does not include \"owner\"".to_string())
        );
        assert!(matches!(
            claim
                .excludes_all(vec![json!("viewer"), json!("editor")], None)
                .evaluate(&payload, 0),
            ValidationOutcome::NotSatisfied(_)
        ));
        assert_eq!(claim.includes("admin", None).id(), "st-role-includes");
    }

    #[test]
    fn test_array_validator_rejects_non_array() {
        let claim = roles();
        let payload = claim.claim().add_to_payload(&Map::new(), json!("admin"), 0);

        assert!(matches!(
            claim.includes("admin", None).evaluate(&payload, 0),
            ValidationOutcome::NotSatisfied(reason) if reason.starts_with("value is not an array")
        ));
    }
}
