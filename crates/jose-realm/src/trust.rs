//! Certificate-chain validation for `x5c` signed tokens.
//!
//! A chain is accepted when every certificate is signed by the next one and
//! the last certificate either is a trust anchor or is signed by one. Every
//! certificate above the leaf must be a CA allowed to sign certificates.
//! Expiration and revocation checks are opt-in.

use crate::errors::ValidationError;
use std::fmt;
use std::sync::Arc;
use x509_parser::certificate::X509Certificate;

/// Subject of the leaf certificate that verified a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    /// Full distinguished name, e.g. `CN=issuer.example, O=Example`.
    pub subject: String,
    /// First common name in the subject, if any.
    pub common_name: Option<String>,
}

/// Revocation lookup, supplied by the host.
pub trait RevocationChecker: Send + Sync {
    /// Whether the DER certificate has been revoked.
    fn is_revoked(&self, certificate_der: &[u8]) -> bool;
}

impl<F> RevocationChecker for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn is_revoked(&self, certificate_der: &[u8]) -> bool {
        self(certificate_der)
    }
}

/// DER certificates accepted as roots of trust.
#[derive(Clone, Default)]
pub struct TrustAnchorSet {
    anchors: Vec<Vec<u8>>,
}

impl TrustAnchorSet {
    /// Build from DER certificates.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` when an anchor does not parse.
    pub fn from_der(anchors: Vec<Vec<u8>>) -> Result<Self, ValidationError> {
        for (index, der) in anchors.iter().enumerate() {
            parse(der).map_err(|_| {
                ValidationError::ConfigurationError(format!(
                    "trust anchor {index} is not a DER certificate"
                ))
            })?;
        }
        Ok(Self { anchors })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

impl fmt::Debug for TrustAnchorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchorSet")
            .field("anchors", &self.anchors.len())
            .finish()
    }
}

/// Trust-anchor configuration and certificate-checking flags.
#[derive(Clone, Default)]
pub struct TrustConfig {
    pub anchors: TrustAnchorSet,
    pub check_expiration: bool,
    pub check_revocation: bool,
    /// Compare only the common name when matching the leaf subject.
    pub subject_common_name_only: bool,
    /// Fixed subject the leaf must carry. Defaults to the configured issuer.
    pub certificate_subject: Option<String>,
    pub revocation_checker: Option<Arc<dyn RevocationChecker>>,
}

impl TrustConfig {
    #[must_use]
    pub fn new(anchors: TrustAnchorSet) -> Self {
        Self {
            anchors,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn check_expiration(mut self, enabled: bool) -> Self {
        self.check_expiration = enabled;
        self
    }

    /// Enable revocation checks through `checker`.
    #[must_use]
    pub fn check_revocation(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.check_revocation = true;
        self.revocation_checker = Some(checker);
        self
    }

    #[must_use]
    pub fn subject_common_name_only(mut self, enabled: bool) -> Self {
        self.subject_common_name_only = enabled;
        self
    }

    #[must_use]
    pub fn certificate_subject(mut self, subject: impl Into<String>) -> Self {
        self.certificate_subject = Some(subject.into());
        self
    }
}

impl fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustConfig")
            .field("anchors", &self.anchors)
            .field("check_expiration", &self.check_expiration)
            .field("check_revocation", &self.check_revocation)
            .field("subject_common_name_only", &self.subject_common_name_only)
            .field("certificate_subject", &self.certificate_subject)
            .finish_non_exhaustive()
    }
}

/// A leaf certificate whose chain validated.
#[derive(Debug, Clone)]
pub struct ValidatedLeaf {
    pub identity: CertificateIdentity,
    /// DER `SubjectPublicKeyInfo` of the leaf.
    pub public_key_der: Vec<u8>,
}

/// Validates presented chains against a [`TrustAnchorSet`].
pub struct CertificateChainValidator {
    anchors: TrustAnchorSet,
    check_expiration: bool,
    revocation: Option<Arc<dyn RevocationChecker>>,
}

impl CertificateChainValidator {
    /// # Errors
    ///
    /// `ConfigurationError` when revocation checking is enabled without a checker,
    /// or the anchor set is empty.
    pub fn from_config(config: &TrustConfig) -> Result<Self, ValidationError> {
        if config.anchors.is_empty() {
            return Err(ValidationError::ConfigurationError(
                "trust anchor set is empty".to_string(),
            ));
        }
        let revocation = match (config.check_revocation, &config.revocation_checker) {
            (false, _) => None,
            (true, Some(checker)) => Some(Arc::clone(checker)),
            (true, None) => {
                return Err(ValidationError::ConfigurationError(
                    "revocation checking enabled without a revocation checker".to_string(),
                ))
            }
        };

        Ok(Self {
            anchors: config.anchors.clone(),
            check_expiration: config.check_expiration,
            revocation,
        })
    }

    /// Validate `chain` (DER, leaf first) at `now` (epoch seconds).
    ///
    /// # Errors
    ///
    /// `SignatureInvalid` on any chain failure.
    pub fn validate(&self, chain: &[Vec<u8>], now: i64) -> Result<ValidatedLeaf, ValidationError> {
        let parsed = chain
            .iter()
            .map(|der| parse(der))
            .collect::<Result<Vec<_>, _>>()?;
        let (Some(leaf), Some(last)) = (parsed.first(), parsed.last()) else {
            return Err(untrusted("empty certificate chain"));
        };

        for (intermediates_below, pair) in parsed.windows(2).enumerate() {
            if let [child, parent] = pair {
                child
                    .verify_signature(Some(parent.public_key()))
                    .map_err(|_| untrusted("certificate not signed by its successor"))?;
                check_issuer(parent, intermediates_below)?;
            }
        }

        let last_der = chain.last().map(Vec::as_slice).unwrap_or_default();
        let anchored = self.anchors.anchors.iter().any(|anchor_der| {
            anchor_der.as_slice() == last_der
                || parse(anchor_der)
                    .map(|anchor| last.verify_signature(Some(anchor.public_key())).is_ok())
                    .unwrap_or(false)
        });
        if !anchored {
            tracing::debug!(target: "jose_realm.trust", chain_len = chain.len(), "Certificate chain does not reach a trust anchor");
            return Err(untrusted("chain does not reach a trust anchor"));
        }

        if self.check_expiration {
            for cert in &parsed {
                let validity = cert.validity();
                if now < validity.not_before.timestamp() || now > validity.not_after.timestamp() {
                    tracing::debug!(target: "jose_realm.trust", "Certificate outside its validity period");
                    return Err(untrusted("certificate outside its validity period"));
                }
            }
        }

        if let Some(checker) = &self.revocation {
            if chain.iter().any(|der| checker.is_revoked(der)) {
                tracing::debug!(target: "jose_realm.trust", "Certificate in chain is revoked");
                return Err(untrusted("certificate revoked"));
            }
        }

        Ok(ValidatedLeaf {
            identity: identity_of(leaf),
            public_key_der: leaf.public_key().raw.to_vec(),
        })
    }
}

impl fmt::Debug for CertificateChainValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateChainValidator")
            .field("anchors", &self.anchors)
            .field("check_expiration", &self.check_expiration)
            .field("check_revocation", &self.revocation.is_some())
            .finish()
    }
}

/// Subject identity of a DER certificate.
///
/// # Errors
///
/// `SignatureInvalid` when the certificate does not parse.
pub fn certificate_identity(der: &[u8]) -> Result<CertificateIdentity, ValidationError> {
    parse(der).map(|cert| identity_of(&cert))
}

fn identity_of(cert: &X509Certificate<'_>) -> CertificateIdentity {
    CertificateIdentity {
        subject: cert.subject().to_string(),
        common_name: cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(ToString::to_string),
    }
}

/// `cert` signs another certificate with `intermediates_below` CA
/// certificates between it and the leaf.
fn check_issuer(
    cert: &X509Certificate<'_>,
    intermediates_below: usize,
) -> Result<(), ValidationError> {
    let constraints = cert
        .basic_constraints()
        .map_err(|_| untrusted("malformed basic constraints"))?
        .filter(|constraints| constraints.value.ca)
        .ok_or_else(|| {
            tracing::debug!(target: "jose_realm.trust", subject = %cert.subject(), "Issuing certificate is not a CA");
            untrusted("issuing certificate is not a CA")
        })?;

    if let Some(max) = constraints.value.path_len_constraint {
        if intermediates_below > max as usize {
            tracing::debug!(target: "jose_realm.trust", max, intermediates_below, "Path length constraint exceeded");
            return Err(untrusted("path length constraint exceeded"));
        }
    }

    let key_usage = cert
        .key_usage()
        .map_err(|_| untrusted("malformed key usage"))?;
    if let Some(usage) = key_usage {
        if !usage.value.key_cert_sign() {
            return Err(untrusted("issuing certificate may not sign certificates"));
        }
    }
    Ok(())
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>, ValidationError> {
    x509_parser::parse_x509_certificate(der)
        .map(|(_, cert)| cert)
        .map_err(|e| {
            tracing::debug!(target: "jose_realm.trust", error = %e, "Failed to parse certificate");
            untrusted("certificate does not parse")
        })
}

fn untrusted(reason: &str) -> ValidationError {
    ValidationError::SignatureInvalid(reason.to_string())
}
