//! Validator assembly and the per-token validation pipeline.
//!
//! [`ValidatorAssembler::assemble`] turns a [`Configuration`] into an immutable
//! [`Validator`]. All key-store access happens here; validation itself is
//! pure in-memory work.
//!
//! Each call to [`Validator::validate`] walks
//! `Received -> Parsed -> (Decrypted) -> SignatureVerified -> AssertionsEvaluated -> Accepted`
//! and stops at the first failing stage. Nothing is retried.

use crate::algorithm::{negotiate, SignatureAlgorithm};
use crate::assertions::{builtin, AssertionContext, AssertionSet, SharedAssertion};
use crate::claims::ConverterTable;
use crate::config::Configuration;
use crate::errors::ValidationError;
use crate::jose::{self, CompactToken, SignedToken};
use crate::jwe::{load_decryption_keys, DecryptionStep};
use crate::keys::{
    decoding_key_from_spki, load_verification_keys, verify_signature, KeyRing, VerificationKey,
};
use crate::principal::Principal;
use crate::transforms::TransformChain;
use crate::trust::{CertificateChainValidator, CertificateIdentity};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Name of the top-level assertion group.
pub const REALM_ASSERTIONS: &str = "realm";

/// Stages of one validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
    Received,
    Parsed,
    Decrypted,
    SignatureVerified,
    AssertionsEvaluated,
    Accepted,
}

impl ValidationStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStage::Received => "received",
            ValidationStage::Parsed => "parsed",
            ValidationStage::Decrypted => "decrypted",
            ValidationStage::SignatureVerified => "signature_verified",
            ValidationStage::AssertionsEvaluated => "assertions_evaluated",
            ValidationStage::Accepted => "accepted",
        }
    }
}

/// Signature verification: keys by `kid`, then `x5c` chains.
struct SignatureStep {
    required: Option<SignatureAlgorithm>,
    keys: KeyRing<VerificationKey>,
    chain: Option<CertificateChainValidator>,
}

impl SignatureStep {
    /// Verify `token`, returning the leaf identity when a certificate chain was used.
    fn verify(
        &self,
        token: &SignedToken<'_>,
        now: i64,
    ) -> Result<Option<CertificateIdentity>, ValidationError> {
        let alg = negotiate(self.required, token.header.alg())?
            .ok_or_else(|| ValidationError::TokenMalformed("JWS header has no alg".to_string()))?;
        let kid = token.header.kid();
        let x5c = token.header.x5c()?;

        let keyed = match (kid, &x5c) {
            (Some(kid), _) => self.keys.get(kid),
            (None, None) => self.keys.sole(),
            (None, Some(_)) => None,
        };
        if let Some(key) = keyed {
            let decoding = key.decoding_key(alg)?;
            verify_signature(token.signature, token.signing_input.as_bytes(), &decoding, alg)?;
            return Ok(None);
        }

        match (&self.chain, x5c) {
            (Some(chain), Some(certificates)) => {
                let leaf = chain.validate(&certificates, now)?;
                let decoding = decoding_key_from_spki(&leaf.public_key_der, alg)?;
                verify_signature(token.signature, token.signing_input.as_bytes(), &decoding, alg)?;
                Ok(Some(leaf.identity))
            }
            _ => {
                tracing::debug!(
                    target: "jose_realm.validator",
                    kid = kid.unwrap_or("<none>"),
                    "No verification key for token"
                );
                Err(ValidationError::SignatureInvalid(
                    "no verification key for token".to_string(),
                ))
            }
        }
    }
}

/// An immutable, assembled token validator.
pub struct Validator {
    signature: Option<SignatureStep>,
    decryption: Option<DecryptionStep>,
    assertions: AssertionSet,
    transforms: TransformChain,
    converters: Arc<ConverterTable>,
}

impl Validator {
    /// Validate `token` against the current time.
    ///
    /// # Errors
    ///
    /// The classified failure of the first stage that rejects the token.
    pub fn validate(&self, token: &str) -> Result<Principal, ValidationError> {
        self.validate_at(token, chrono::Utc::now().timestamp())
    }

    /// Validate `token` as of `now` (epoch seconds).
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    #[instrument(skip_all)]
    pub fn validate_at(&self, token: &str, now: i64) -> Result<Principal, ValidationError> {
        let mut stage = ValidationStage::Received;
        let result = self.run(token, now, &mut stage);
        if let Err(e) = &result {
            tracing::debug!(
                target: "jose_realm.validator",
                stage = stage.as_str(),
                error_category = e.category(),
                error = %e,
                "Token rejected"
            );
        }
        result
    }

    /// Names of the top-level assertions, in evaluation order.
    #[must_use]
    pub fn assertion_names(&self) -> Vec<&str> {
        self.assertions.member_names()
    }

    #[must_use]
    pub fn decrypts(&self) -> bool {
        self.decryption.is_some()
    }

    #[must_use]
    pub fn verifies_signatures(&self) -> bool {
        self.signature.is_some()
    }

    fn run(
        &self,
        token: &str,
        now: i64,
        stage: &mut ValidationStage,
    ) -> Result<Principal, ValidationError> {
        let parsed = jose::parse(token)?;
        *stage = ValidationStage::Parsed;

        let (claims, certificate) = match parsed {
            CompactToken::Signed(jws) => {
                if self.decryption.is_some() {
                    return Err(ValidationError::TokenMalformed(
                        "token must be encrypted".to_string(),
                    ));
                }
                let certificate = self.verify_signature(&jws, now)?;
                *stage = ValidationStage::SignatureVerified;
                (jose::decode_claims(&jws.payload)?, certificate)
            }
            CompactToken::Encrypted(jwe) => {
                let decryption = self.decryption.as_ref().ok_or_else(|| {
                    ValidationError::TokenMalformed("encrypted tokens are not accepted".to_string())
                })?;
                let plaintext = decryption.decrypt(&jwe)?;
                *stage = ValidationStage::Decrypted;
                self.open_nested(&plaintext, jwe.header.cty(), now, stage)?
            }
        };

        let ctx = AssertionContext::new(&claims, now).with_certificate(certificate.as_ref());
        self.assertions.evaluate(&ctx)?;
        *stage = ValidationStage::AssertionsEvaluated;

        let principal = Principal::from_payload(&claims, &self.transforms, &self.converters)?;
        *stage = ValidationStage::Accepted;
        Ok(principal)
    }

    fn verify_signature(
        &self,
        jws: &SignedToken<'_>,
        now: i64,
    ) -> Result<Option<CertificateIdentity>, ValidationError> {
        match &self.signature {
            Some(step) => step.verify(jws, now),
            None => Err(ValidationError::ConfigurationError(
                "no signature verification source configured".to_string(),
            )),
        }
    }

    /// Interpret a decrypted payload: a nested JWS, or a bare claim set.
    fn open_nested(
        &self,
        plaintext: &[u8],
        cty: Option<&str>,
        now: i64,
        stage: &mut ValidationStage,
    ) -> Result<(Map<String, Value>, Option<CertificateIdentity>), ValidationError> {
        let plaintext = plaintext.strip_prefix(UTF8_BOM).unwrap_or(plaintext);
        let nested = cty.is_some_and(|cty| cty.eq_ignore_ascii_case("JWT"))
            || plaintext
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .is_some_and(|b| *b != b'{');

        if nested {
            let inner = std::str::from_utf8(plaintext)
                .map_err(|_| ValidationError::TokenMalformed("nested token is not UTF-8".to_string()))?;
            let jws = jose::parse_signed(inner.trim())?;
            let certificate = self.verify_signature(&jws, now)?;
            *stage = ValidationStage::SignatureVerified;
            return Ok((jose::decode_claims(&jws.payload)?, certificate));
        }

        if self.signature.is_some() {
            return Err(ValidationError::SignatureInvalid(
                "encrypted token carries no signature".to_string(),
            ));
        }
        Ok((jose::decode_claims(plaintext)?, None))
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("signature", &self.signature.as_ref().map(|s| s.keys.kids()))
            .field("decryption", &self.decryption)
            .field("assertions", &self.assertions)
            .field("transforms", &self.transforms)
            .finish()
    }
}

/// Builds a [`Validator`] from a [`Configuration`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorAssembler;

impl ValidatorAssembler {
    /// Assemble a validator. Blocks on key-store access.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` when a key cannot be loaded, the trust or
    /// encryption configuration is inconsistent, or neither a signature nor a
    /// decryption source is configured.
    #[instrument(skip_all)]
    pub fn assemble(config: &Configuration) -> Result<Validator, ValidationError> {
        let settings = &config.settings;

        let keys = match &config.signature_keys {
            Some(sources) => load_verification_keys(
                sources.store.as_ref(),
                &sources.secret_key_ids,
                &sources.public_key_ids,
            )
            .map_err(|e| {
                tracing::warn!(target: "jose_realm.assembler", error = %e, "Failed to load signature keys");
                ValidationError::from(e)
            })?,
            None => KeyRing::new(),
        };
        let chain = config
            .trust
            .as_ref()
            .map(CertificateChainValidator::from_config)
            .transpose()?;
        let signature = if keys.is_empty() && chain.is_none() {
            None
        } else {
            Some(SignatureStep {
                required: settings.signature_algorithm,
                keys,
                chain,
            })
        };

        let decryption = match &config.encryption {
            Some(encryption) => {
                let keys = load_decryption_keys(
                    encryption.store.as_ref(),
                    &encryption.key_pair_ids,
                    &encryption.secret_key_ids,
                )
                .map_err(|e| {
                    tracing::warn!(target: "jose_realm.assembler", error = %e, "Failed to load decryption keys");
                    ValidationError::from(e)
                })?;
                Some(DecryptionStep::new(
                    config.key_management_algorithm(),
                    config.content_encryption_algorithm(),
                    config.compression_algorithm(),
                    keys,
                    encryption.unwrapper.clone(),
                )?)
            }
            None => None,
        };

        if signature.is_none() && decryption.is_none() {
            return Err(ValidationError::ConfigurationError(
                "neither signature verification nor decryption is configured".to_string(),
            ));
        }

        let assertions = AssertionSet::all_of(REALM_ASSERTIONS, realm_assertions(config));
        let transforms = TransformChain::from_configs(&config.transforms);

        tracing::info!(
            target: "jose_realm.assembler",
            issuer = %settings.issuer,
            signature_keys = signature.as_ref().map_or(0, |s| s.keys.len()),
            trust_anchors = config.trust.as_ref().map_or(0, |t| t.anchors.len()),
            encrypted = decryption.is_some(),
            assertions = assertions.len(),
            transforms = transforms.len(),
            "Validator assembled"
        );

        Ok(Validator {
            signature,
            decryption,
            assertions,
            transforms,
            converters: Arc::clone(&config.converters),
        })
    }
}

/// Built-in assertions followed by the user-declared ones.
fn realm_assertions(config: &Configuration) -> Vec<SharedAssertion> {
    let settings = &config.settings;
    let tolerance_seconds = settings.tolerance_seconds();

    let mut members: Vec<SharedAssertion> = vec![
        Arc::new(builtin::IssuerEquals {
            issuer: settings.issuer.clone(),
        }),
        Arc::new(builtin::NotExpired { tolerance_seconds }),
        Arc::new(builtin::NotBefore { tolerance_seconds }),
        Arc::new(builtin::SubjectPresent),
    ];

    if let Some(trust) = &config.trust {
        members.push(Arc::new(builtin::CertificateSubjectMatches {
            expected: trust
                .certificate_subject
                .clone()
                .unwrap_or_else(|| settings.issuer.clone()),
            common_name_only: trust.subject_common_name_only,
        }));
    }

    if let Some(audience) = &settings.audience {
        members.push(Arc::new(builtin::AudienceEquals {
            audience: audience.clone(),
        }));
    }

    members.extend(config.assertions.iter().cloned());
    members
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::assertions::AssertionConfig;
    use crate::config::{EncryptionConfig, RealmSettings, SignatureKeys};
    use crate::errors::KeyStoreError;
    use crate::keys::{KeyPair, KeyStore};
    use crate::transforms::{builtin as transforms, TransformConfig};
    use crate::trust::{TrustAnchorSet, TrustConfig};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use ring::hmac;
    use secrecy::SecretBox;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;
    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct Secrets;

    impl KeyStore for Secrets {
        fn secret_key(&self, alias: &str) -> Result<SecretBox<Vec<u8>>, KeyStoreError> {
            match alias {
                "k1" => Ok(SecretBox::new(Box::new(SECRET.to_vec()))),
                _ => Err(KeyStoreError::NotFound(alias.to_string())),
            }
        }

        fn key_pair(&self, alias: &str) -> Result<KeyPair, KeyStoreError> {
            Err(KeyStoreError::NotFound(alias.to_string()))
        }
    }

    fn sign(header: &Value, claims: &Value) -> String {
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let key = hmac::Key::new(hmac::HMAC_SHA256, SECRET);
        let signature = URL_SAFE_NO_PAD.encode(hmac::sign(&key, input.as_bytes()).as_ref());
        format!("{input}.{signature}")
    }

    fn settings() -> RealmSettings {
        let mut settings = RealmSettings::new("X", "https://issuer.example");
        settings.signature_algorithm = Some(SignatureAlgorithm::Hs256);
        settings.audience = Some("api".to_string());
        settings
    }

    fn config(settings: RealmSettings) -> crate::config::ConfigurationBuilder {
        Configuration::builder(settings)
            .signature_keys(SignatureKeys::new(Arc::new(Secrets)).secret_key("k1"))
    }

    fn claims() -> Value {
        json!({"sub": "alice", "iss": "X", "aud": "api", "exp": NOW + 60})
    }

    fn header() -> Value {
        json!({"alg": "HS256", "kid": "k1"})
    }

    #[test]
    fn test_valid_token_yields_principal() {
        let validator = ValidatorAssembler::assemble(&config(settings()).build()).unwrap();
        let principal = validator.validate_at(&sign(&header(), &claims()), NOW).unwrap();
        assert_eq!(principal.subject(), "alice");
        assert_eq!(principal.claim_names(), vec!["aud", "exp", "iss", "sub"]);
    }

    #[test]
    fn test_builtin_assertion_order() {
        let validator = ValidatorAssembler::assemble(
            &config(settings())
                .assertion(AssertionConfig::claim_equals("tenant", "acme"))
                .build(),
        )
        .unwrap();
        assert_eq!(
            validator.assertion_names(),
            vec![
                "issuer",
                "not-expired",
                "not-before",
                "subject-present",
                "audience",
                "tenant-equals"
            ]
        );
    }

    #[test]
    fn test_wrong_issuer_fails_assertion() {
        let mut settings = settings();
        settings.issuer = "Y".to_string();
        let validator = ValidatorAssembler::assemble(&config(settings).build()).unwrap();
        assert!(matches!(
            validator.validate_at(&sign(&header(), &claims()), NOW),
            Err(ValidationError::AssertionFailed { name, .. }) if name == "issuer"
        ));
    }

    #[test]
    fn test_algorithm_mismatch_is_configuration_error() {
        let validator = ValidatorAssembler::assemble(&config(settings()).build()).unwrap();
        let token = sign(&json!({"alg": "RS256", "kid": "k1"}), &claims());
        assert!(matches!(
            validator.validate_at(&token, NOW),
            Err(ValidationError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let validator = ValidatorAssembler::assemble(&config(settings()).build()).unwrap();
        let token = sign(&header(), &claims());
        assert!(validator.validate_at(&token, NOW + 120).is_ok(), "within tolerance");
        assert!(matches!(
            validator.validate_at(&token, NOW + 121),
            Err(ValidationError::Expired(_))
        ));
    }

    #[test]
    fn test_tampered_signature() {
        let validator = ValidatorAssembler::assemble(&config(settings()).build()).unwrap();
        let token = sign(&header(), &claims());
        let (input, _) = token.rsplit_once('.').unwrap();
        let forged = format!("{input}.{}", URL_SAFE_NO_PAD.encode([0u8; 32]));
        assert!(matches!(
            validator.validate_at(&forged, NOW),
            Err(ValidationError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_unknown_kid_is_signature_invalid() {
        let validator = ValidatorAssembler::assemble(&config(settings()).build()).unwrap();
        let token = sign(&json!({"alg": "HS256", "kid": "k2"}), &claims());
        assert!(matches!(
            validator.validate_at(&token, NOW),
            Err(ValidationError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_sole_key_is_used_without_kid() {
        let validator = ValidatorAssembler::assemble(&config(settings()).build()).unwrap();
        let token = sign(&json!({"alg": "HS256"}), &claims());
        assert!(validator.validate_at(&token, NOW).is_ok());
    }

    #[test]
    fn test_transforms_shape_principal_claims() {
        let validator = ValidatorAssembler::assemble(
            &config(settings())
                .transform(TransformConfig::new("grp", transforms::to_lowercase()))
                .build(),
        )
        .unwrap();
        let mut claims = claims();
        claims
            .as_object_mut()
            .unwrap()
            .insert("grp".to_string(), json!(["A", "B"]));
        let principal = validator.validate_at(&sign(&header(), &claims), NOW).unwrap();
        assert_eq!(
            principal.claim("grp").unwrap().as_list_of::<String>().unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_object_claim_is_accepted_and_kept_raw() {
        let validator = ValidatorAssembler::assemble(&config(settings()).build()).unwrap();
        let mut claims = claims();
        claims
            .as_object_mut()
            .unwrap()
            .insert("profile".to_string(), json!({"name": "alice"}));
        let principal = validator.validate_at(&sign(&header(), &claims), NOW).unwrap();

        assert!(principal.claim("profile").is_none());
        assert!(!principal.claim_names().contains(&"profile"));
        assert_eq!(principal.raw_claim("profile"), Some(&json!({"name": "alice"})));
    }

    #[test]
    fn test_missing_key_fails_assembly() {
        let config = Configuration::builder(settings())
            .signature_keys(SignatureKeys::new(Arc::new(Secrets)).secret_key("missing"))
            .build();
        assert!(matches!(
            ValidatorAssembler::assemble(&config),
            Err(ValidationError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_nothing_configured_fails_assembly() {
        let config = Configuration::builder(settings()).build();
        assert!(matches!(
            ValidatorAssembler::assemble(&config),
            Err(ValidationError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_empty_trust_anchor_set_fails_assembly() {
        let config = config(settings())
            .trust(TrustConfig::new(TrustAnchorSet::default()))
            .build();
        assert!(ValidatorAssembler::assemble(&config).is_err());
    }

    #[test]
    fn test_signed_token_rejected_when_encryption_required() {
        let config = config(settings())
            .encryption(EncryptionConfig::new(Arc::new(Secrets)).secret_key("k1"))
            .build();
        let validator = ValidatorAssembler::assemble(&config).unwrap();
        assert!(validator.decrypts());
        assert!(matches!(
            validator.validate_at(&sign(&header(), &claims()), NOW),
            Err(ValidationError::TokenMalformed(_))
        ));
    }

    #[test]
    fn test_encrypted_token_rejected_without_encryption() {
        let validator = ValidatorAssembler::assemble(&config(settings()).build()).unwrap();
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "dir", "enc": "A256GCM"}).to_string());
        let token = format!("{header}..aXY.Y3Q.dGFn");
        assert!(matches!(
            validator.validate_at(&token, NOW),
            Err(ValidationError::TokenMalformed(_))
        ));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ValidationStage::Received.as_str(), "received");
        assert_eq!(ValidationStage::Accepted.as_str(), "accepted");
    }
}
