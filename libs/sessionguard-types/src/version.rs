use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TokenError;

/// Schema version tag carried in every access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum TokenVersion {
    /// Token carries identity only; the payload lives with the session record.
    Legacy,
    /// Token embeds the full signed payload.
    Current,
}

impl TokenVersion {
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Legacy => 1,
            Self::Current => 2,
        }
    }
}

impl TryFrom<u32> for TokenVersion {
    type Error = TokenError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Legacy),
            2 => Ok(Self::Current),
            other => Err(TokenError::UnsupportedVersion(other)),
        }
    }
}

impl From<TokenVersion> for u32 {
    fn from(version: TokenVersion) -> Self {
        version.as_u32()
    }
}

/// Backend API version negotiated with the session storage service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    /// Last backend version that strips nulls from access token payloads.
    pub const LAST_NULL_DROPPING: ApiVersion = ApiVersion::new(2, 14);

    pub const CURRENT: ApiVersion = ApiVersion::new(3, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.trim().split_once('.').unwrap_or((s.trim(), "0"));
        let major = major
            .parse()
            .map_err(|_| format!("invalid api version: {s}"))?;
        let minor = minor
            .parse()
            .map_err(|_| format!("invalid api version: {s}"))?;
        Ok(Self { major, minor })
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// How explicit nulls in a payload update are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullHandling {
    /// Null keys are removed and nested nulls stripped.
    #[default]
    Drop,
    /// Null is stored as a distinct value.
    Preserve,
}

impl NullHandling {
    pub fn for_api_version(version: ApiVersion) -> Self {
        if version > ApiVersion::LAST_NULL_DROPPING {
            Self::Preserve
        } else {
            Self::Drop
        }
    }
}

impl FromStr for NullHandling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "preserve" => Ok(Self::Preserve),
            other => Err(format!("unknown null handling: {other}")),
        }
    }
}
