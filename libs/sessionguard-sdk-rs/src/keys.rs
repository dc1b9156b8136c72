//! Trusted signing keys.
//!
//! The process-wide key set is an immutable [`TrustedKeySet`] behind an
//! `Arc`. Readers clone the `Arc` and keep verifying against that snapshot;
//! a refresh builds a complete new set and swaps the pointer, so nobody ever
//! sees a half-updated set.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use sessionguard_types::derive_signing_secret;

/// Raw signing key as handed out by the storage backend.
#[derive(Debug)]
pub struct SigningKey {
    pub id: String,
    pub material: SecretString,
    pub created_at_ms: i64,
}

impl SigningKey {
    pub fn new(id: impl Into<String>, material: impl Into<String>, created_at_ms: i64) -> Self {
        let material: String = material.into();
        Self {
            id: id.into(),
            material: SecretString::new(material.into()),
            created_at_ms,
        }
    }
}

/// A signing key with its HS256 secret already derived.
#[derive(Debug)]
pub struct DerivedKey {
    pub id: String,
    pub secret: SecretString,
    pub created_at_ms: i64,
}

impl DerivedKey {
    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }
}

/// Immutable snapshot of the keys that are currently trusted.
///
/// Keys are ordered newest first; the first key signs new tokens.
#[derive(Debug)]
pub struct TrustedKeySet {
    keys: Vec<DerivedKey>,
    fetched_at: Instant,
}

impl TrustedKeySet {
    pub fn new(keys: Vec<SigningKey>) -> Self {
        let mut keys: Vec<DerivedKey> = keys
            .into_iter()
            .map(|k| DerivedKey {
                secret: SecretString::new(
                    derive_signing_secret(k.material.expose_secret(), &k.id).into(),
                ),
                id: k.id,
                created_at_ms: k.created_at_ms,
            })
            .collect();
        keys.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));

        Self {
            keys,
            fetched_at: Instant::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn signing_key(&self) -> Option<&DerivedKey> {
        self.keys.first()
    }

    pub fn get(&self, kid: &str) -> Option<&DerivedKey> {
        self.keys.iter().find(|k| k.id == kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.get(kid).is_some()
    }

    pub fn keys(&self) -> &[DerivedKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

/// Holder of the current key snapshot.
///
/// The lock only guards the pointer swap; verification runs on the cloned
/// snapshot without holding it.
#[derive(Debug)]
pub struct KeyStore {
    current: RwLock<Arc<TrustedKeySet>>,
}

impl KeyStore {
    pub fn new(initial: TrustedKeySet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<TrustedKeySet> {
        self.current.read().clone()
    }

    pub fn replace(&self, next: TrustedKeySet) -> Arc<TrustedKeySet> {
        let next = Arc::new(next);
        *self.current.write() = next.clone();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_key_signs() {
        let set = TrustedKeySet::new(vec![
            SigningKey::new("old", "material-old", 1_000),
            SigningKey::new("new", "material-new", 2_000),
        ]);

        assert_eq!(set.signing_key().map(|k| k.id.as_str()), Some("new"));
        assert!(set.contains("old"));
        assert!(!set.contains("missing"));
    }

    #[test]
    fn test_derived_secret_differs_from_material() {
        let set = TrustedKeySet::new(vec![SigningKey::new("k1", "material", 1)]);
        let key = set.get("k1").unwrap();

        assert_ne!(key.secret.expose_secret(), "material");
        assert_eq!(key.secret_bytes().len(), 64);
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let store = KeyStore::new(TrustedKeySet::new(vec![SigningKey::new("k1", "m1", 1)]));
        let before = store.snapshot();

        store.replace(TrustedKeySet::new(vec![SigningKey::new("k2", "m2", 2)]));

        assert!(before.contains("k1"));
        assert!(!before.contains("k2"));
        let after = store.snapshot();
        assert!(after.contains("k2"));
        assert!(!after.contains("k1"));
    }

    #[test]
    fn test_empty_set_has_no_signing_key() {
        assert!(TrustedKeySet::empty().signing_key().is_none());
        assert!(TrustedKeySet::empty().is_empty());
    }
}
