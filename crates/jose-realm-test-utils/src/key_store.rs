//! In-memory [`KeyStore`] for tests.

use jose_realm::errors::KeyStoreError;
use jose_realm::keys::{KeyPair, KeyStore};
use secrecy::SecretBox;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Key store backed by two maps. Counts lookups so tests can observe
/// when assembly actually touched the store.
#[derive(Default)]
pub struct InMemoryKeyStore {
    secrets: HashMap<String, Vec<u8>>,
    pairs: HashMap<String, (Vec<u8>, Vec<u8>)>,
    lookups: AtomicUsize,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symmetric secret under `alias`
    pub fn with_secret(mut self, alias: &str, secret: &[u8]) -> Self {
        self.secrets.insert(alias.to_string(), secret.to_vec());
        self
    }

    /// Add a key pair (SPKI public DER, PKCS#8 private DER) under `alias`
    pub fn with_key_pair(mut self, alias: &str, public_der: Vec<u8>, private_der: Vec<u8>) -> Self {
        self.pairs
            .insert(alias.to_string(), (public_der, private_der));
        self
    }

    /// Number of `secret_key` / `key_pair` calls served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl KeyStore for InMemoryKeyStore {
    fn secret_key(&self, alias: &str) -> Result<SecretBox<Vec<u8>>, KeyStoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .get(alias)
            .map(|secret| SecretBox::new(Box::new(secret.clone())))
            .ok_or_else(|| KeyStoreError::NotFound(alias.to_string()))
    }

    fn key_pair(&self, alias: &str) -> Result<KeyPair, KeyStoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.pairs
            .get(alias)
            .map(|(public, private)| KeyPair::new(public.clone(), private.clone()))
            .ok_or_else(|| KeyStoreError::NotFound(alias.to_string()))
    }
}
