//! Error types for the realm.
//!
//! Three families, each surfaced at a different boundary:
//!
//! - [`ClaimError`] - returned by [`Claim`](crate::claims::Claim) accessors. These are
//!   contract violations of the caller and are never swallowed.
//! - [`ValidationError`] - the classified outcome of one pipeline stage inside the
//!   [`Validator`](crate::validator::Validator).
//! - [`AuthenticationFailure`] - the only error that crosses the
//!   [`Authenticator`](crate::authenticator::Authenticator) boundary. Its message is
//!   fixed so that nothing about the token or the keys leaks to the caller.

use std::fmt;
use thiserror::Error;

/// Message returned to callers for every rejected token.
pub const GENERIC_FAILURE_MESSAGE: &str = "The access token is invalid or expired";

/// Errors raised by claim accessors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// The (post-transform) value cannot be read as the requested representation.
    #[error("claim '{claim}' cannot be read as {expected}: found {found}")]
    TypeMismatch {
        claim: String,
        expected: &'static str,
        found: &'static str,
    },

    /// No conversion path exists to the requested target type.
    #[error("claim '{claim}' has no conversion to {target}")]
    ConversionUnsupported { claim: String, target: &'static str },

    /// The claim value itself is not representable (e.g. a nested object).
    #[error("claim '{claim}' has an unsupported value: {reason}")]
    UnsupportedValue { claim: String, reason: String },
}

/// Classified failure of one validation stage.
///
/// Messages carry diagnostics for logs only. They must never be returned to the
/// caller of [`Authenticator::validate`](crate::authenticator::Authenticator::validate).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The compact serialization could not be parsed.
    #[error("malformed token: {0}")]
    TokenMalformed(String),

    /// The signature did not verify, or no key could be selected for it.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// The JWE could not be decrypted.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The token is outside its validity window (including tolerance).
    #[error("token expired: {0}")]
    Expired(String),

    /// A claim assertion did not hold.
    #[error("assertion '{name}' failed: {message}")]
    AssertionFailed { name: String, message: String },

    /// Algorithm negotiation failed or a required provider is missing.
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl ValidationError {
    /// Bounded label used for log correlation and metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            ValidationError::TokenMalformed(_) => "token_malformed",
            ValidationError::SignatureInvalid(_) => "signature_invalid",
            ValidationError::DecryptionFailed(_) => "decryption_failed",
            ValidationError::Expired(_) => "expired",
            ValidationError::AssertionFailed { .. } => "assertion_failed",
            ValidationError::ConfigurationError(_) => "configuration_error",
        }
    }
}

impl From<ClaimError> for ValidationError {
    fn from(err: ClaimError) -> Self {
        ValidationError::TokenMalformed(err.to_string())
    }
}

/// Errors returned by external key stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// No entry under the requested alias.
    #[error("no key stored under alias '{0}'")]
    NotFound(String),

    /// The entry exists but is not usable (wrong type, bad encoding).
    #[error("key '{alias}' is unusable: {reason}")]
    Unusable { alias: String, reason: String },

    /// The backing store could not be reached.
    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

impl From<KeyStoreError> for ValidationError {
    fn from(err: KeyStoreError) -> Self {
        ValidationError::ConfigurationError(err.to_string())
    }
}

/// The single failure value returned by the authenticator.
///
/// `Display` always renders [`GENERIC_FAILURE_MESSAGE`]. The classification is
/// kept for metrics and log correlation; the detailed diagnostic is not exposed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationFailure {
    category: &'static str,
}

impl AuthenticationFailure {
    /// Classification label of the stage that rejected the token.
    #[must_use]
    pub fn category(&self) -> &'static str {
        self.category
    }

    /// The caller-facing message.
    #[must_use]
    pub fn message(&self) -> &'static str {
        GENERIC_FAILURE_MESSAGE
    }
}

impl From<&ValidationError> for AuthenticationFailure {
    fn from(err: &ValidationError) -> Self {
        Self {
            category: err.category(),
        }
    }
}

impl fmt::Debug for AuthenticationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationFailure")
            .field("message", &GENERIC_FAILURE_MESSAGE)
            .field("category", &self.category)
            .finish()
    }
}

impl fmt::Display for AuthenticationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(GENERIC_FAILURE_MESSAGE)
    }
}

impl std::error::Error for AuthenticationFailure {}
