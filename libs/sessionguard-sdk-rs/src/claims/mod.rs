//! Session claims: definitions, validators and the registry.

mod claim;
mod kinds;
mod registry;
mod validation;
mod validator;

pub use claim::{ClaimFunctions, FetchValueFn, SessionClaim};
pub use kinds::{BooleanClaim, PrimitiveArrayClaim, PrimitiveClaim};
pub use registry::{ClaimRegistry, RegisteredClaim};
pub use validation::{ClaimRefresh, ClaimsCheck, validate_claims};
pub use validator::{ClaimValidator, ValidationOutcome, ValuePredicate};
