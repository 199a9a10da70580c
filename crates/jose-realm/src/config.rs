//! Realm configuration.
//!
//! Scalar settings are loaded from environment variables by
//! [`RealmSettings::from_vars`]. Collaborators (key stores, trust anchors,
//! assertions, transforms) are already-resolved objects attached through
//! [`Configuration::builder`]. A built [`Configuration`] is immutable; a change
//! means building a new one and invalidating the authenticator cache.

use crate::algorithm::{
    CompressionAlgorithm, ContentEncryptionAlgorithm, JoseAlgorithm, KeyManagementAlgorithm,
    SignatureAlgorithm,
};
use crate::assertions::{ClaimAssertion, SharedAssertion};
use crate::claims::ConverterTable;
use crate::jwe::KeyUnwrapper;
use crate::keys::KeyStore;
use crate::transforms::TransformConfig;
use crate::trust::TrustConfig;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default expiration tolerance (60 seconds).
pub const DEFAULT_EXPIRATION_TOLERANCE: Duration = Duration::from_secs(60);

/// Maximum expiration tolerance (10 minutes).
pub const MAX_EXPIRATION_TOLERANCE: Duration = Duration::from_secs(600);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid issuer base URL: {0}")]
    InvalidIssuerBaseUrl(String),

    #[error("Invalid expiration tolerance configuration: {0}")]
    InvalidExpirationTolerance(String),

    #[error("Unknown algorithm in {var}: '{value}'")]
    UnknownAlgorithm { var: String, value: String },
}

/// Scalar realm settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmSettings {
    /// Expected `iss`.
    pub issuer: String,

    /// Base URL of the issuer, http(s).
    pub issuer_base_url: String,

    /// Expected `aud`, when set.
    pub audience: Option<String>,

    /// Clock-skew leeway for `exp`, `nbf` and `iat`.
    pub expiration_tolerance: Duration,

    pub signature_algorithm: Option<SignatureAlgorithm>,
    pub key_management_algorithm: Option<KeyManagementAlgorithm>,
    pub content_encryption_algorithm: Option<ContentEncryptionAlgorithm>,
    pub compression_algorithm: Option<CompressionAlgorithm>,
}

impl RealmSettings {
    /// Settings with defaults for everything but the issuer.
    pub fn new(issuer: impl Into<String>, issuer_base_url: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            issuer_base_url: issuer_base_url.into(),
            audience: None,
            expiration_tolerance: DEFAULT_EXPIRATION_TOLERANCE,
            signature_algorithm: None,
            key_management_algorithm: None,
            content_encryption_algorithm: None,
            compression_algorithm: None,
        }
    }

    /// Load settings from environment variables.
    ///
    /// # Errors
    ///
    /// See [`from_vars`](Self::from_vars).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load settings from a HashMap (for testing).
    ///
    /// # Errors
    ///
    /// A missing required variable, an invalid URL or tolerance, or an
    /// algorithm token that does not name a known algorithm.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer = vars
            .get("JWT_ISSUER")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_ISSUER".to_string()))?
            .clone();

        let issuer_base_url = vars
            .get("JWT_ISSUER_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_ISSUER_BASE_URL".to_string()))?
            .clone();
        let has_host = issuer_base_url
            .strip_prefix("https://")
            .or_else(|| issuer_base_url.strip_prefix("http://"))
            .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'));
        if !has_host {
            return Err(ConfigError::InvalidIssuerBaseUrl(format!(
                "JWT_ISSUER_BASE_URL must be an http(s) URL, got '{issuer_base_url}'"
            )));
        }

        let audience = vars
            .get("JWT_AUDIENCE")
            .filter(|v| !v.trim().is_empty())
            .cloned();

        let expiration_tolerance =
            if let Some(value_str) = vars.get("JWT_EXPIRATION_TOLERANCE_SECONDS") {
                let value: i64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidExpirationTolerance(format!(
                        "JWT_EXPIRATION_TOLERANCE_SECONDS must be a valid integer, got '{value_str}': {e}"
                    ))
                })?;

                let seconds = u64::try_from(value).map_err(|_| {
                    ConfigError::InvalidExpirationTolerance(format!(
                        "JWT_EXPIRATION_TOLERANCE_SECONDS must not be negative, got {value}"
                    ))
                })?;

                if seconds > MAX_EXPIRATION_TOLERANCE.as_secs() {
                    return Err(ConfigError::InvalidExpirationTolerance(format!(
                        "JWT_EXPIRATION_TOLERANCE_SECONDS must not exceed {} seconds, got {seconds}",
                        MAX_EXPIRATION_TOLERANCE.as_secs()
                    )));
                }

                Duration::from_secs(seconds)
            } else {
                DEFAULT_EXPIRATION_TOLERANCE
            };

        Ok(Self {
            issuer,
            issuer_base_url,
            audience,
            expiration_tolerance,
            signature_algorithm: algorithm_var(vars, "JWT_SIGNATURE_ALGORITHM")?,
            key_management_algorithm: algorithm_var(vars, "JWT_KEY_MANAGEMENT_ALGORITHM")?,
            content_encryption_algorithm: algorithm_var(vars, "JWT_CONTENT_ENCRYPTION_ALGORITHM")?,
            compression_algorithm: algorithm_var(vars, "JWT_COMPRESSION_ALGORITHM")?,
        })
    }

    /// Tolerance in whole seconds, saturating.
    #[must_use]
    pub fn tolerance_seconds(&self) -> i64 {
        i64::try_from(self.expiration_tolerance.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Case-insensitive algorithm lookup; unset or blank means "no requirement".
fn algorithm_var<A: JoseAlgorithm>(
    vars: &HashMap<String, String>,
    var: &str,
) -> Result<Option<A>, ConfigError> {
    match vars.get(var).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => A::from_config_token(value)
            .map(Some)
            .ok_or_else(|| ConfigError::UnknownAlgorithm {
                var: var.to_string(),
                value: value.to_string(),
            }),
    }
}

/// Where signature verification keys come from.
#[derive(Clone)]
pub struct SignatureKeys {
    pub store: Arc<dyn KeyStore>,
    /// Aliases of HMAC secrets; each alias is also the `kid`.
    pub secret_key_ids: Vec<String>,
    /// Aliases of key pairs whose public half verifies signatures.
    pub public_key_ids: Vec<String>,
}

impl SignatureKeys {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            secret_key_ids: Vec::new(),
            public_key_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn secret_key(mut self, alias: impl Into<String>) -> Self {
        self.secret_key_ids.push(alias.into());
        self
    }

    #[must_use]
    pub fn public_key(mut self, alias: impl Into<String>) -> Self {
        self.public_key_ids.push(alias.into());
        self
    }
}

impl fmt::Debug for SignatureKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureKeys")
            .field("secret_key_ids", &self.secret_key_ids)
            .field("public_key_ids", &self.public_key_ids)
            .finish_non_exhaustive()
    }
}

/// Decryption configuration.
///
/// Key pairs and secret keys are mutually exclusive; key pairs win when both
/// are listed. Algorithms left unset fall back to the realm settings.
#[derive(Clone)]
pub struct EncryptionConfig {
    pub store: Arc<dyn KeyStore>,
    pub key_pair_ids: Vec<String>,
    pub secret_key_ids: Vec<String>,
    pub key_management_algorithm: Option<KeyManagementAlgorithm>,
    pub content_encryption_algorithm: Option<ContentEncryptionAlgorithm>,
    pub compression_algorithm: Option<CompressionAlgorithm>,
    pub unwrapper: Option<Arc<dyn KeyUnwrapper>>,
}

impl EncryptionConfig {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            key_pair_ids: Vec::new(),
            secret_key_ids: Vec::new(),
            key_management_algorithm: None,
            content_encryption_algorithm: None,
            compression_algorithm: None,
            unwrapper: None,
        }
    }

    #[must_use]
    pub fn key_pair(mut self, alias: impl Into<String>) -> Self {
        self.key_pair_ids.push(alias.into());
        self
    }

    #[must_use]
    pub fn secret_key(mut self, alias: impl Into<String>) -> Self {
        self.secret_key_ids.push(alias.into());
        self
    }

    #[must_use]
    pub fn key_management_algorithm(mut self, alg: KeyManagementAlgorithm) -> Self {
        self.key_management_algorithm = Some(alg);
        self
    }

    #[must_use]
    pub fn content_encryption_algorithm(mut self, enc: ContentEncryptionAlgorithm) -> Self {
        self.content_encryption_algorithm = Some(enc);
        self
    }

    #[must_use]
    pub fn compression_algorithm(mut self, zip: CompressionAlgorithm) -> Self {
        self.compression_algorithm = Some(zip);
        self
    }

    #[must_use]
    pub fn unwrapper(mut self, unwrapper: Arc<dyn KeyUnwrapper>) -> Self {
        self.unwrapper = Some(unwrapper);
        self
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key_pair_ids", &self.key_pair_ids)
            .field("secret_key_ids", &self.secret_key_ids)
            .field("key_management_algorithm", &self.key_management_algorithm)
            .field("content_encryption_algorithm", &self.content_encryption_algorithm)
            .field("compression_algorithm", &self.compression_algorithm)
            .field("unwrapper", &self.unwrapper.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything a validator is assembled from.
#[derive(Clone)]
pub struct Configuration {
    pub settings: RealmSettings,
    pub signature_keys: Option<SignatureKeys>,
    pub trust: Option<TrustConfig>,
    pub encryption: Option<EncryptionConfig>,
    /// User-declared assertions, evaluated after the built-in ones.
    pub assertions: Vec<SharedAssertion>,
    pub transforms: Vec<TransformConfig>,
    pub converters: Arc<ConverterTable>,
}

impl Configuration {
    #[must_use]
    pub fn builder(settings: RealmSettings) -> ConfigurationBuilder {
        ConfigurationBuilder {
            config: Configuration {
                settings,
                signature_keys: None,
                trust: None,
                encryption: None,
                assertions: Vec::new(),
                transforms: Vec::new(),
                converters: Arc::new(ConverterTable::default()),
            },
        }
    }

    /// Key-management algorithm in force: encryption config, else settings.
    #[must_use]
    pub fn key_management_algorithm(&self) -> Option<KeyManagementAlgorithm> {
        self.encryption
            .as_ref()
            .and_then(|e| e.key_management_algorithm)
            .or(self.settings.key_management_algorithm)
    }

    #[must_use]
    pub fn content_encryption_algorithm(&self) -> Option<ContentEncryptionAlgorithm> {
        self.encryption
            .as_ref()
            .and_then(|e| e.content_encryption_algorithm)
            .or(self.settings.content_encryption_algorithm)
    }

    #[must_use]
    pub fn compression_algorithm(&self) -> Option<CompressionAlgorithm> {
        self.encryption
            .as_ref()
            .and_then(|e| e.compression_algorithm)
            .or(self.settings.compression_algorithm)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("settings", &self.settings)
            .field("signature_keys", &self.signature_keys)
            .field("trust", &self.trust)
            .field("encryption", &self.encryption)
            .field(
                "assertions",
                &self.assertions.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .field("transforms", &self.transforms)
            .field("converters", &self.converters)
            .finish()
    }
}

/// Builder for [`Configuration`].
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    #[must_use]
    pub fn signature_keys(mut self, keys: SignatureKeys) -> Self {
        self.config.signature_keys = Some(keys);
        self
    }

    #[must_use]
    pub fn trust(mut self, trust: TrustConfig) -> Self {
        self.config.trust = Some(trust);
        self
    }

    #[must_use]
    pub fn encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.config.encryption = Some(encryption);
        self
    }

    /// Append an assertion. Order of calls is evaluation order.
    #[must_use]
    pub fn assertion(mut self, assertion: impl ClaimAssertion + 'static) -> Self {
        self.config.assertions.push(Arc::new(assertion));
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: TransformConfig) -> Self {
        self.config.transforms.push(transform);
        self
    }

    #[must_use]
    pub fn converters(mut self, converters: ConverterTable) -> Self {
        self.config.converters = Arc::new(converters);
        self
    }

    #[must_use]
    pub fn build(self) -> Configuration {
        self.config
    }
}
