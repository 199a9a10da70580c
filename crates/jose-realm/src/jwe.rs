//! JWE decryption.
//!
//! `dir` key management is handled here: the selected secret key is the
//! content-encryption key. Every other key-management algorithm hands the
//! encrypted key to an injected [`KeyUnwrapper`].
//!
//! Content is decrypted with AES-GCM (ring) using the ASCII of the protected
//! header as AAD, then inflated when the token declares `zip: DEF`.

use crate::algorithm::{
    negotiate, CompressionAlgorithm, ContentEncryptionAlgorithm, KeyManagementAlgorithm,
};
use crate::errors::{KeyStoreError, ValidationError};
use crate::jose::{EncryptedToken, JoseHeader};
use crate::keys::{KeyPair, KeyRing, KeyStore};
use flate2::read::DeflateDecoder;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM, NONCE_LEN};
use secrecy::{ExposeSecret, SecretBox};
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use tracing::instrument;

/// Upper bound on an inflated payload.
pub const MAX_DECOMPRESSED_BYTES: usize = 256 * 1024;

const GCM_TAG_LEN: usize = 16;

/// Key material used to recover a content-encryption key.
pub enum DecryptionKey {
    Secret(SecretBox<Vec<u8>>),
    Pair(KeyPair),
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecryptionKey::Secret(_) => f.write_str("Secret([REDACTED])"),
            DecryptionKey::Pair(pair) => f.debug_tuple("Pair").field(pair).finish(),
        }
    }
}

/// Recovers the content-encryption key for non-`dir` algorithms.
pub trait KeyUnwrapper: Send + Sync {
    /// Unwrap `encrypted_key` with `key`.
    ///
    /// # Errors
    ///
    /// A diagnostic string; it is logged, never returned to callers.
    fn unwrap_key(
        &self,
        alg: KeyManagementAlgorithm,
        enc: ContentEncryptionAlgorithm,
        header: &JoseHeader,
        encrypted_key: &[u8],
        key: &DecryptionKey,
    ) -> Result<SecretBox<Vec<u8>>, String>;
}

/// Load decryption keys. Key pairs take precedence over secrets.
///
/// # Errors
///
/// The first key-store failure.
pub fn load_decryption_keys(
    store: &dyn KeyStore,
    key_pair_ids: &[String],
    secret_key_ids: &[String],
) -> Result<KeyRing<DecryptionKey>, KeyStoreError> {
    let mut ring = KeyRing::new();
    if key_pair_ids.is_empty() {
        for alias in secret_key_ids {
            ring.insert(alias.clone(), DecryptionKey::Secret(store.secret_key(alias)?));
        }
    } else {
        for alias in key_pair_ids {
            ring.insert(alias.clone(), DecryptionKey::Pair(store.key_pair(alias)?));
        }
    }
    Ok(ring)
}

/// The decryption stage of a validator.
pub struct DecryptionStep {
    key_management: Option<KeyManagementAlgorithm>,
    content_encryption: Option<ContentEncryptionAlgorithm>,
    compression: Option<CompressionAlgorithm>,
    keys: KeyRing<DecryptionKey>,
    unwrapper: Option<Arc<dyn KeyUnwrapper>>,
}

impl DecryptionStep {
    /// # Errors
    ///
    /// `ConfigurationError` when no keys are loaded, or a non-`dir` key
    /// management algorithm is required without a [`KeyUnwrapper`].
    pub fn new(
        key_management: Option<KeyManagementAlgorithm>,
        content_encryption: Option<ContentEncryptionAlgorithm>,
        compression: Option<CompressionAlgorithm>,
        keys: KeyRing<DecryptionKey>,
        unwrapper: Option<Arc<dyn KeyUnwrapper>>,
    ) -> Result<Self, ValidationError> {
        if keys.is_empty() {
            return Err(ValidationError::ConfigurationError(
                "encryption configured without decryption keys".to_string(),
            ));
        }
        if let Some(alg) = key_management {
            if alg != KeyManagementAlgorithm::Dir && unwrapper.is_none() {
                return Err(ValidationError::ConfigurationError(format!(
                    "key management algorithm '{alg}' requires a key unwrapper"
                )));
            }
        }

        Ok(Self {
            key_management,
            content_encryption,
            compression,
            keys,
            unwrapper,
        })
    }

    /// Decrypt `token` and return the plaintext.
    ///
    /// # Errors
    ///
    /// - `ConfigurationError` on an algorithm mismatch
    /// - `TokenMalformed` when `alg` or `enc` is missing or unknown
    /// - `DecryptionFailed` for everything else
    #[instrument(skip_all)]
    pub fn decrypt(&self, token: &EncryptedToken<'_>) -> Result<Vec<u8>, ValidationError> {
        let header = &token.header;
        let alg = negotiate(self.key_management, header.alg())?
            .ok_or_else(|| ValidationError::TokenMalformed("JWE header has no alg".to_string()))?;
        let enc = negotiate(self.content_encryption, header.enc())?
            .ok_or_else(|| ValidationError::TokenMalformed("JWE header has no enc".to_string()))?;
        let zip = negotiate(self.compression, header.zip())?;

        let key = self
            .keys
            .select(header.kid())
            .ok_or_else(|| failed("no decryption key for token"))?;

        let cek = self.content_key(alg, enc, token, key)?;
        if cek.expose_secret().len() != enc.key_len() {
            return Err(failed("content key has the wrong length"));
        }

        let plaintext = open(enc, cek.expose_secret(), token)?;
        match zip {
            Some(CompressionAlgorithm::Deflate) => inflate(&plaintext),
            None => Ok(plaintext),
        }
    }

    fn content_key(
        &self,
        alg: KeyManagementAlgorithm,
        enc: ContentEncryptionAlgorithm,
        token: &EncryptedToken<'_>,
        key: &DecryptionKey,
    ) -> Result<SecretBox<Vec<u8>>, ValidationError> {
        if alg == KeyManagementAlgorithm::Dir {
            if !token.encrypted_key.is_empty() {
                return Err(ValidationError::TokenMalformed(
                    "dir JWE carries an encrypted key".to_string(),
                ));
            }
            return match key {
                DecryptionKey::Secret(secret) => {
                    Ok(SecretBox::new(Box::new(secret.expose_secret().clone())))
                }
                DecryptionKey::Pair(_) => Err(failed("dir requires a secret key")),
            };
        }

        let unwrapper = self.unwrapper.as_ref().ok_or_else(|| {
            ValidationError::ConfigurationError(format!("no key unwrapper for '{alg}'"))
        })?;
        unwrapper
            .unwrap_key(alg, enc, &token.header, &token.encrypted_key, key)
            .map_err(|reason| {
                tracing::debug!(target: "jose_realm.jwe", alg = %alg, reason = %reason, "Key unwrap failed");
                failed("content key unwrap failed")
            })
    }
}

impl fmt::Debug for DecryptionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionStep")
            .field("key_management", &self.key_management)
            .field("content_encryption", &self.content_encryption)
            .field("compression", &self.compression)
            .field("keys", &self.keys)
            .field("unwrapper", &self.unwrapper.is_some())
            .finish()
    }
}

fn open(
    enc: ContentEncryptionAlgorithm,
    cek: &[u8],
    token: &EncryptedToken<'_>,
) -> Result<Vec<u8>, ValidationError> {
    let algorithm = match enc {
        ContentEncryptionAlgorithm::A128Gcm => &AES_128_GCM,
        ContentEncryptionAlgorithm::A256Gcm => &AES_256_GCM,
        other => {
            tracing::debug!(target: "jose_realm.jwe", enc = %other, "Unsupported content encryption");
            return Err(failed("unsupported content encryption"));
        }
    };

    if token.iv.len() != NONCE_LEN {
        return Err(failed("iv has the wrong length"));
    }
    if token.tag.len() != GCM_TAG_LEN {
        return Err(failed("tag has the wrong length"));
    }

    let nonce = Nonce::try_assume_unique_for_key(&token.iv).map_err(|_| failed("invalid iv"))?;
    let unbound = UnboundKey::new(algorithm, cek).map_err(|_| failed("invalid content key"))?;
    let key = LessSafeKey::new(unbound);

    let mut in_out = Vec::with_capacity(token.ciphertext.len() + token.tag.len());
    in_out.extend_from_slice(&token.ciphertext);
    in_out.extend_from_slice(&token.tag);

    let plaintext = key
        .open_in_place(nonce, Aad::from(token.protected.as_bytes()), &mut in_out)
        .map_err(|_| {
            tracing::debug!(target: "jose_realm.jwe", "Content decryption failed");
            failed("content decryption failed")
        })?;
    Ok(plaintext.to_vec())
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, ValidationError> {
    let limit = u64::try_from(MAX_DECOMPRESSED_BYTES).unwrap_or(u64::MAX);
    let mut inflated = Vec::new();
    DeflateDecoder::new(compressed)
        .take(limit.saturating_add(1))
        .read_to_end(&mut inflated)
        .map_err(|e| {
            tracing::debug!(target: "jose_realm.jwe", error = %e, "Failed to inflate payload");
            failed("payload does not inflate")
        })?;
    if inflated.len() > MAX_DECOMPRESSED_BYTES {
        return Err(failed("inflated payload exceeds maximum size"));
    }
    Ok(inflated)
}

fn failed(reason: &str) -> ValidationError {
    ValidationError::DecryptionFailed(reason.to_string())
}
