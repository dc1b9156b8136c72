use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hkdf::Hkdf;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{TokenError, TokenVersion};

const SIGNING_INFO: &[u8] = b"sessionguard-access-token-v2";

/// Derives an HS256 signing secret from raw key material using HKDF-SHA256.
///
/// # Arguments
/// * `key_material` - The raw signing key material handed out by the storage backend
/// * `key_id` - Identifier of the key (used as salt so rotated keys never collide)
///
/// # Returns
/// A 64-character hex-encoded string representing 32 bytes.
/// This string's ASCII bytes are used as the JWT signing secret.
///
/// # Example
/// ```
/// use sessionguard_types::derive_signing_secret;
///
/// let secret = derive_signing_secret("key-material", "k1");
/// assert_eq!(secret.len(), 64); // 32 bytes hex-encoded
/// ```
pub fn derive_signing_secret(key_material: &str, key_id: &str) -> String {
    let hk = Hkdf::<Sha256>::new(Some(key_id.as_bytes()), key_material.as_bytes());
    let mut output = [0u8; 32];
    hk.expand(SIGNING_INFO, &mut output)
        .expect("32 bytes is valid for SHA256 HKDF expand");

    hex::encode(output)
}

/// Generates an opaque bearer token (32 random bytes, base64url without padding).
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hashes a refresh token for storage. Only this hash ever leaves the engine.
pub fn hash_refresh_token(raw: &str) -> String {
    let hash = Sha256::digest(raw.as_bytes());
    hex::encode(hash)
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

/// Peeks at the schema version tag without verifying the signature.
///
/// # Security Note
/// The returned version only selects which claim layout to verify against.
/// The token must still be verified before any of its content is trusted.
pub fn peek_token_version(token: &str) -> Result<TokenVersion, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = decode::<VersionProbe>(token, &DecodingKey::from_secret(b"ignored"), &validation)
        .map_err(|e| TokenError::InvalidFormat(e.to_string()))?;

    let version = token_data
        .claims
        .version
        .ok_or_else(|| TokenError::MissingClaim("version".into()))?;

    TokenVersion::try_from(version)
}
