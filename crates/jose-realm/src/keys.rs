//! Key material lookup.
//!
//! Raw keys come from an external [`KeyStore`]. They are read once, when a
//! validator is assembled, into a [`KeyRing`] addressed by key id; token
//! validation then only ever touches memory.
//!
//! Secrets stay wrapped in [`SecretBox`] so they cannot end up in logs.

use crate::algorithm::SignatureAlgorithm;
use crate::errors::{KeyStoreError, ValidationError};
use jsonwebtoken::DecodingKey;
use secrecy::{ExposeSecret, SecretBox};
use std::collections::HashMap;
use std::fmt;
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

/// An asymmetric key pair as stored.
pub struct KeyPair {
    /// DER `SubjectPublicKeyInfo`.
    pub public_key_der: Vec<u8>,
    /// DER PKCS#8 private key.
    pub private_key_der: SecretBox<Vec<u8>>,
}

impl KeyPair {
    pub fn new(public_key_der: Vec<u8>, private_key_der: Vec<u8>) -> Self {
        Self {
            public_key_der,
            private_key_der: SecretBox::new(Box::new(private_key_der)),
        }
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            public_key_der: self.public_key_der.clone(),
            private_key_der: SecretBox::new(Box::new(self.private_key_der.expose_secret().clone())),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key_der", &format_args!("{} bytes", self.public_key_der.len()))
            .field("private_key_der", &"[REDACTED]")
            .finish()
    }
}

/// External secret / key-pair storage.
///
/// Called only during assembly. Implementations may block.
pub trait KeyStore: Send + Sync {
    /// Raw symmetric key stored under `alias`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unusable` or `Unavailable`.
    fn secret_key(&self, alias: &str) -> Result<SecretBox<Vec<u8>>, KeyStoreError>;

    /// Key pair stored under `alias`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unusable` or `Unavailable`.
    fn key_pair(&self, alias: &str) -> Result<KeyPair, KeyStoreError>;

    /// Public half of the key pair under `alias`.
    ///
    /// # Errors
    ///
    /// As [`key_pair`](Self::key_pair).
    fn public_key(&self, alias: &str) -> Result<Vec<u8>, KeyStoreError> {
        self.key_pair(alias).map(|pair| pair.public_key_der)
    }
}

/// Key material addressed by key id.
pub struct KeyRing<K> {
    keys: HashMap<String, K>,
}

impl<K> KeyRing<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    pub fn insert(&mut self, kid: impl Into<String>, key: K) {
        self.keys.insert(kid.into(), key);
    }

    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&K> {
        self.keys.get(kid)
    }

    /// The only key, when exactly one is loaded.
    #[must_use]
    pub fn sole(&self) -> Option<&K> {
        if self.keys.len() == 1 {
            self.keys.values().next()
        } else {
            None
        }
    }

    /// Key for `kid`, or the sole key when the token names none.
    #[must_use]
    pub fn select(&self, kid: Option<&str>) -> Option<&K> {
        match kid {
            Some(kid) => self.get(kid),
            None => self.sole(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids, sorted.
    #[must_use]
    pub fn kids(&self) -> Vec<&str> {
        let mut kids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        kids.sort_unstable();
        kids
    }
}

impl<K> Default for KeyRing<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyRing<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing").field("kids", &self.kids()).finish()
    }
}

/// A signature verification key.
pub enum VerificationKey {
    /// Shared HMAC secret.
    Secret(SecretBox<Vec<u8>>),
    /// DER `SubjectPublicKeyInfo`.
    Public(Vec<u8>),
}

impl VerificationKey {
    /// Build the decoding key `alg` needs.
    ///
    /// # Errors
    ///
    /// `SignatureInvalid` when the key type does not fit `alg` or the public key
    /// cannot be parsed.
    pub fn decoding_key(&self, alg: SignatureAlgorithm) -> Result<DecodingKey, ValidationError> {
        match self {
            VerificationKey::Secret(secret) if alg.is_symmetric() => {
                Ok(DecodingKey::from_secret(secret.expose_secret()))
            }
            VerificationKey::Public(spki) if !alg.is_symmetric() => decoding_key_from_spki(spki, alg),
            _ => Err(ValidationError::SignatureInvalid(format!(
                "selected key cannot verify {alg}"
            ))),
        }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationKey::Secret(_) => f.write_str("Secret([REDACTED])"),
            VerificationKey::Public(der) => write!(f, "Public({} bytes)", der.len()),
        }
    }
}

/// Decoding key for an asymmetric `alg` from DER `SubjectPublicKeyInfo`.
///
/// # Errors
///
/// `SignatureInvalid` when the DER does not parse.
pub fn decoding_key_from_spki(
    spki_der: &[u8],
    alg: SignatureAlgorithm,
) -> Result<DecodingKey, ValidationError> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(spki_der).map_err(|e| {
        tracing::debug!(target: "jose_realm.validator", error = %e, "Failed to parse public key");
        ValidationError::SignatureInvalid("public key is not valid SubjectPublicKeyInfo".to_string())
    })?;
    let raw = spki.subject_public_key.data.as_ref();

    Ok(match alg {
        SignatureAlgorithm::Rs256
        | SignatureAlgorithm::Rs384
        | SignatureAlgorithm::Rs512
        | SignatureAlgorithm::Ps256
        | SignatureAlgorithm::Ps384
        | SignatureAlgorithm::Ps512 => DecodingKey::from_rsa_der(raw),
        SignatureAlgorithm::Es256 | SignatureAlgorithm::Es384 => DecodingKey::from_ec_der(raw),
        SignatureAlgorithm::EdDsa => DecodingKey::from_ed_der(raw),
        SignatureAlgorithm::Hs256 | SignatureAlgorithm::Hs384 | SignatureAlgorithm::Hs512 => {
            return Err(ValidationError::SignatureInvalid(format!(
                "public key cannot verify {alg}"
            )))
        }
    })
}

/// Verify `signature` (base64url) over `message`.
///
/// # Errors
///
/// `SignatureInvalid` when the signature does not verify.
pub fn verify_signature(
    signature: &str,
    message: &[u8],
    key: &DecodingKey,
    alg: SignatureAlgorithm,
) -> Result<(), ValidationError> {
    match jsonwebtoken::crypto::verify(signature, message, key, alg.to_jsonwebtoken()) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ValidationError::SignatureInvalid(
            "signature does not verify".to_string(),
        )),
        Err(e) => {
            tracing::debug!(target: "jose_realm.validator", error = %e, "Signature verification errored");
            Err(ValidationError::SignatureInvalid(
                "signature could not be checked".to_string(),
            ))
        }
    }
}

/// Load signature verification keys, secrets first.
///
/// # Errors
///
/// The first key-store failure.
pub fn load_verification_keys(
    store: &dyn KeyStore,
    secret_key_ids: &[String],
    public_key_ids: &[String],
) -> Result<KeyRing<VerificationKey>, KeyStoreError> {
    let mut ring = KeyRing::new();
    for alias in secret_key_ids {
        ring.insert(alias.clone(), VerificationKey::Secret(store.secret_key(alias)?));
    }
    for alias in public_key_ids {
        ring.insert(alias.clone(), VerificationKey::Public(store.public_key(alias)?));
    }
    Ok(ring)
}
