//! Compact JOSE serialization parsing.
//!
//! Two shapes are accepted:
//!
//! - JWS: `header.payload.signature` (3 parts)
//! - JWE: `header.encrypted_key.iv.ciphertext.tag` (5 parts)
//!
//! Parsing is purely structural. Nothing here verifies a signature or decrypts.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any base64 decoding
//! - Headers declaring `crit` extensions are rejected, none are understood

use crate::errors::ValidationError;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// Maximum accepted token size in bytes (8KB).
///
/// Checked before base64 decoding and any cryptographic work.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// A decoded protected header.
#[derive(Clone, PartialEq, Deserialize)]
pub struct JoseHeader {
    alg: Option<String>,
    enc: Option<String>,
    zip: Option<String>,
    kid: Option<String>,
    cty: Option<String>,
    x5c: Option<Value>,
    crit: Option<Value>,
    /// Remaining parameters, for key unwrappers (`epk`, `p2s`, ...).
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl JoseHeader {
    /// Parse a base64url-encoded JSON header.
    ///
    /// # Errors
    ///
    /// `TokenMalformed` on bad base64, a non-object or mistyped header, or a
    /// `crit` parameter.
    pub fn decode(encoded: &str) -> Result<Self, ValidationError> {
        let bytes = decode_segment("header", encoded)?;
        let header: JoseHeader = serde_json::from_slice(&bytes).map_err(|e| {
            tracing::debug!(target: "jose_realm.validator", error = %e, "Failed to parse token header JSON");
            malformed("header is not a valid JOSE header")
        })?;

        if header.crit.is_some() {
            return Err(malformed("critical header extensions are not supported"));
        }

        Ok(header)
    }

    /// `alg`: signature or key-management algorithm.
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// `enc`: content-encryption algorithm.
    #[must_use]
    pub fn enc(&self) -> Option<&str> {
        self.enc.as_deref()
    }

    /// `zip`: compression algorithm.
    #[must_use]
    pub fn zip(&self) -> Option<&str> {
        self.zip.as_deref()
    }

    /// `kid`, ignoring empty values.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref().filter(|kid| !kid.is_empty())
    }

    #[must_use]
    pub fn cty(&self) -> Option<&str> {
        self.cty.as_deref()
    }

    /// Any other header parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// `x5c`: the DER certificate chain, leaf first.
    ///
    /// # Errors
    ///
    /// `TokenMalformed` when present but not an array of base64 strings.
    pub fn x5c(&self) -> Result<Option<Vec<Vec<u8>>>, ValidationError> {
        let Some(chain) = &self.x5c else {
            return Ok(None);
        };
        let Value::Array(entries) = chain else {
            return Err(malformed("x5c is not an array"));
        };
        if entries.is_empty() {
            return Err(malformed("x5c is empty"));
        }

        entries
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .and_then(|b64| STANDARD.decode(b64).ok())
                    .ok_or_else(|| malformed("x5c entry is not base64 DER"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

impl fmt::Debug for JoseHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoseHeader")
            .field("alg", &self.alg())
            .field("enc", &self.enc())
            .field("zip", &self.zip())
            .field("kid", &self.kid())
            .field("x5c", &self.x5c.is_some())
            .finish()
    }
}

/// A structurally parsed JWS.
#[derive(Debug, Clone)]
pub struct SignedToken<'a> {
    pub header: JoseHeader,
    /// `header.payload`, exactly as received.
    pub signing_input: &'a str,
    /// The base64url signature segment, undecoded.
    pub signature: &'a str,
    /// Decoded payload bytes.
    pub payload: Vec<u8>,
}

/// A structurally parsed JWE.
#[derive(Clone)]
pub struct EncryptedToken<'a> {
    pub header: JoseHeader,
    /// The base64url protected header, used as AAD.
    pub protected: &'a str,
    pub encrypted_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl fmt::Debug for EncryptedToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedToken")
            .field("header", &self.header)
            .field("encrypted_key_len", &self.encrypted_key.len())
            .field("iv_len", &self.iv.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Either compact shape.
#[derive(Debug, Clone)]
pub enum CompactToken<'a> {
    Signed(SignedToken<'a>),
    Encrypted(EncryptedToken<'a>),
}

/// Parse a compact JWS or JWE.
///
/// # Errors
///
/// `TokenMalformed` when the token is oversized, has neither 3 nor 5 parts,
/// or any segment fails to decode.
pub fn parse(token: &str) -> Result<CompactToken<'_>, ValidationError> {
    check_size(token)?;
    match token.split('.').count() {
        3 => parse_signed(token).map(CompactToken::Signed),
        5 => parse_encrypted(token).map(CompactToken::Encrypted),
        parts => {
            tracing::debug!(
                target: "jose_realm.validator",
                parts,
                "Token rejected: invalid compact serialization"
            );
            Err(malformed(&format!("expected 3 or 5 parts, found {parts}")))
        }
    }
}

/// Parse a compact JWS.
///
/// # Errors
///
/// See [`parse`].
pub fn parse_signed(token: &str) -> Result<SignedToken<'_>, ValidationError> {
    check_size(token)?;
    let (signing_input, signature) = token
        .rsplit_once('.')
        .ok_or_else(|| malformed("missing signature segment"))?;
    let (header_b64, payload_b64) = signing_input
        .split_once('.')
        .ok_or_else(|| malformed("missing payload segment"))?;
    if payload_b64.contains('.') {
        return Err(malformed("expected 3 parts"));
    }

    Ok(SignedToken {
        header: JoseHeader::decode(header_b64)?,
        signing_input,
        signature,
        payload: decode_segment("payload", payload_b64)?,
    })
}

/// Parse a compact JWE.
///
/// # Errors
///
/// See [`parse`].
pub fn parse_encrypted(token: &str) -> Result<EncryptedToken<'_>, ValidationError> {
    check_size(token)?;
    let mut parts = token.split('.');
    let mut next = |name: &'static str| parts.next().ok_or_else(|| malformed(name));

    let protected = next("missing protected header")?;
    let encrypted_key = next("missing encrypted key")?;
    let iv = next("missing iv")?;
    let ciphertext = next("missing ciphertext")?;
    let tag = next("missing tag")?;
    if parts.next().is_some() {
        return Err(malformed("expected 5 parts"));
    }

    Ok(EncryptedToken {
        header: JoseHeader::decode(protected)?,
        protected,
        encrypted_key: decode_segment("encrypted key", encrypted_key)?,
        iv: decode_segment("iv", iv)?,
        ciphertext: decode_segment("ciphertext", ciphertext)?,
        tag: decode_segment("tag", tag)?,
    })
}

/// Decode a JSON claim set.
///
/// # Errors
///
/// `TokenMalformed` when the bytes are not a JSON object.
pub fn decode_claims(payload: &[u8]) -> Result<Map<String, Value>, ValidationError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(malformed("payload is not a JSON object")),
        Err(e) => {
            tracing::debug!(target: "jose_realm.validator", error = %e, "Failed to parse token payload JSON");
            Err(malformed("payload is not valid JSON"))
        }
    }
}

fn check_size(token: &str) -> Result<(), ValidationError> {
    if token.len() > MAX_TOKEN_SIZE_BYTES {
        tracing::debug!(
            target: "jose_realm.validator",
            token_size = token.len(),
            max_size = MAX_TOKEN_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(malformed("token exceeds maximum size"));
    }
    Ok(())
}

fn decode_segment(name: &str, encoded: &str) -> Result<Vec<u8>, ValidationError> {
    URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
        tracing::debug!(target: "jose_realm.validator", segment = name, error = %e, "Failed to decode token segment");
        malformed(&format!("{name} is not base64url"))
    })
}

fn malformed(reason: &str) -> ValidationError {
    ValidationError::TokenMalformed(reason.to_string())
}
