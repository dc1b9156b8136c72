//! Access token signing and verification.
//!
//! Tokens are HS256 JWTs carrying a `version` tag. Verification first peeks
//! at the tag (unverified) to pick the claim layout, then tries the key named
//! by the `kid` header followed by every other trusted key. `sign` always
//! produces the current layout.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sessionguard_types::{
    AccessTokenClaims, LegacyAccessTokenClaims, TokenError, TokenVersion, peek_token_version,
};

use crate::keys::{DerivedKey, TrustedKeySet};

/// Claims recovered from a verified access token, tagged by schema version.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifiedToken {
    Current(AccessTokenClaims),
    Legacy(LegacyAccessTokenClaims),
}

impl VerifiedToken {
    pub fn version(&self) -> TokenVersion {
        match self {
            Self::Current(_) => TokenVersion::Current,
            Self::Legacy(_) => TokenVersion::Legacy,
        }
    }

    pub fn session_handle(&self) -> &str {
        match self {
            Self::Current(c) => &c.session_handle,
            Self::Legacy(c) => &c.session_handle,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Current(c) => &c.sub,
            Self::Legacy(c) => &c.user_id,
        }
    }

    pub fn exp(&self) -> i64 {
        match self {
            Self::Current(c) => c.exp,
            Self::Legacy(c) => c.exp,
        }
    }

    pub fn iat(&self) -> i64 {
        match self {
            Self::Current(c) => c.iat,
            Self::Legacy(c) => c.iat,
        }
    }

    pub fn anti_csrf_token(&self) -> Option<&str> {
        match self {
            Self::Current(c) => c.anti_csrf_token.as_deref(),
            Self::Legacy(c) => c.anti_csrf_token.as_deref(),
        }
    }

    /// Embedded payload; `None` for legacy tokens, whose payload must be
    /// looked up by session handle.
    pub fn payload(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Current(c) => Some(&c.payload),
            Self::Legacy(_) => None,
        }
    }
}

/// Pure signer/verifier over a supplied key set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCodec {
    clock_skew_seconds: u64,
}

impl TokenCodec {
    pub fn new(clock_skew_seconds: u64) -> Self {
        Self { clock_skew_seconds }
    }

    /// Signs claims with the newest trusted key, naming it in the `kid` header.
    pub fn sign(&self, claims: &AccessTokenClaims, keys: &TrustedKeySet) -> Result<String, TokenError> {
        if claims.version != TokenVersion::Current {
            return Err(TokenError::UnsupportedVersion(claims.version.as_u32()));
        }

        let key = keys.signing_key().ok_or(TokenError::NoSigningKey)?;

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(key.id.clone());

        Ok(encode(
            &header,
            claims,
            &EncodingKey::from_secret(key.secret_bytes()),
        )?)
    }

    /// Verifies a token against every trusted key.
    ///
    /// Fails with `Expired` as soon as a key matches an expired token, and with
    /// `InvalidSignature` only when no key matches.
    pub fn verify(&self, token: &str, keys: &TrustedKeySet) -> Result<VerifiedToken, TokenError> {
        let version = peek_token_version(token)?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| TokenError::InvalidFormat(format!("Invalid token header: {}", e)))?;

        match version {
            TokenVersion::Current => self
                .verify_with_keys::<AccessTokenClaims>(token, header.kid.as_deref(), keys)
                .map(VerifiedToken::Current),
            TokenVersion::Legacy => self
                .verify_with_keys::<LegacyAccessTokenClaims>(token, header.kid.as_deref(), keys)
                .map(VerifiedToken::Legacy),
        }
    }

    fn verify_with_keys<T: DeserializeOwned>(
        &self,
        token: &str,
        kid: Option<&str>,
        keys: &TrustedKeySet,
    ) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.clock_skew_seconds;

        // If kid is present, try that key first
        let preferred = kid.and_then(|kid| keys.get(kid));
        let candidates = preferred.into_iter().chain(
            keys.keys()
                .iter()
                .filter(|k| preferred.is_none_or(|p| p.id != k.id)),
        );

        for key in candidates {
            match decode_with::<T>(token, key, &validation) {
                Ok(claims) => return Ok(claims),
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature => continue,
                    ErrorKind::ExpiredSignature => return Err(TokenError::Expired),
                    _ => return Err(TokenError::Library(e)),
                },
            }
        }

        Err(TokenError::InvalidSignature)
    }
}

fn decode_with<T: DeserializeOwned>(
    token: &str,
    key: &DerivedKey,
    validation: &Validation,
) -> Result<T, jsonwebtoken::errors::Error> {
    decode::<T>(token, &DecodingKey::from_secret(key.secret_bytes()), validation).map(|data| data.claims)
}
