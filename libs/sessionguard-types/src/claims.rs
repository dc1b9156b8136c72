use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::TokenVersion;

/// Access token claims for the current (embedded payload) schema.
///
/// Signed by the session engine and verified by every SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// User ID (subject)
    pub sub: String,

    /// Server-side session handle
    #[serde(rename = "sessionHandle")]
    pub session_handle: String,

    /// Caller and claim payload, in insertion order
    pub payload: Map<String, Value>,

    /// Token expiration (Unix timestamp)
    pub exp: i64,

    /// Token issued at (Unix timestamp)
    pub iat: i64,

    /// Present when anti-CSRF protection is enabled
    #[serde(
        rename = "antiCsrfToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub anti_csrf_token: Option<String>,

    /// Always `TokenVersion::Current` for tokens built with this struct
    pub version: TokenVersion,
}

/// Access token claims for the legacy (handle lookup) schema.
///
/// The payload is not embedded; it is resolved from the session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyAccessTokenClaims {
    #[serde(rename = "userId")]
    pub user_id: String,

    #[serde(rename = "sessionHandle")]
    pub session_handle: String,

    pub exp: i64,

    pub iat: i64,

    #[serde(
        rename = "antiCsrfToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub anti_csrf_token: Option<String>,

    pub version: TokenVersion,
}

/// Materialized claim value embedded in a payload: `{"v": value, "t": built_at_ms}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimValue {
    pub v: Value,
    pub t: i64,
}

impl ClaimValue {
    pub fn new(v: Value, t: i64) -> Self {
        Self { v, t }
    }

    /// Reads a claim value out of a payload entry, if it has the `{v, t}` shape.
    pub fn from_entry(entry: &Value) -> Option<Self> {
        let obj = entry.as_object()?;
        let v = obj.get("v")?.clone();
        let t = obj.get("t")?.as_i64()?;
        Some(Self { v, t })
    }

    pub fn into_entry(self) -> Value {
        let mut obj = Map::new();
        obj.insert("v".to_string(), self.v);
        obj.insert("t".to_string(), Value::from(self.t));
        Value::Object(obj)
    }
}
