//! JOSE algorithm identifiers and per-token negotiation.
//!
//! Four independent families are negotiated for each token: signature
//! (`alg` of a JWS), key management (`alg` of a JWE), content encryption
//! (`enc`) and compression (`zip`). Header values are matched exactly.
//! Case-insensitive matching is only done when parsing configuration, see
//! [`JoseAlgorithm::from_config_token`].

use crate::errors::ValidationError;
use std::fmt;

/// Common surface of the algorithm families.
pub trait JoseAlgorithm: Copy + Eq + fmt::Debug + 'static {
    /// Family name used in diagnostics (`"signature"`, `"compression"`, ...).
    const FAMILY: &'static str;

    /// Every member of the family.
    const ALL: &'static [Self];

    /// The registered JOSE token, e.g. `"HS256"`.
    fn token(self) -> &'static str;

    /// Exact, case-sensitive parse of a header value.
    fn from_header(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|alg| alg.token() == value)
    }

    /// Case-insensitive parse of a configured value.
    fn from_config_token(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.token().eq_ignore_ascii_case(value))
    }
}

macro_rules! jose_algorithm {
    (
        $(#[$meta:meta])*
        $name:ident, $family:literal {
            $($variant:ident => $token:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl JoseAlgorithm for $name {
            const FAMILY: &'static str = $family;
            const ALL: &'static [Self] = &[$($name::$variant,)+];

            fn token(self) -> &'static str {
                match self {
                    $($name::$variant => $token,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.token())
            }
        }
    };
}

jose_algorithm! {
    /// JWS signature algorithms.
    SignatureAlgorithm, "signature" {
        Hs256 => "HS256",
        Hs384 => "HS384",
        Hs512 => "HS512",
        Rs256 => "RS256",
        Rs384 => "RS384",
        Rs512 => "RS512",
        Ps256 => "PS256",
        Ps384 => "PS384",
        Ps512 => "PS512",
        Es256 => "ES256",
        Es384 => "ES384",
        EdDsa => "EdDSA",
    }
}

impl SignatureAlgorithm {
    /// HMAC algorithms verify with a shared secret; the rest with a public key.
    #[must_use]
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::Hs256 | SignatureAlgorithm::Hs384 | SignatureAlgorithm::Hs512
        )
    }

    #[must_use]
    pub fn to_jsonwebtoken(self) -> jsonwebtoken::Algorithm {
        use jsonwebtoken::Algorithm;
        match self {
            SignatureAlgorithm::Hs256 => Algorithm::HS256,
            SignatureAlgorithm::Hs384 => Algorithm::HS384,
            SignatureAlgorithm::Hs512 => Algorithm::HS512,
            SignatureAlgorithm::Rs256 => Algorithm::RS256,
            SignatureAlgorithm::Rs384 => Algorithm::RS384,
            SignatureAlgorithm::Rs512 => Algorithm::RS512,
            SignatureAlgorithm::Ps256 => Algorithm::PS256,
            SignatureAlgorithm::Ps384 => Algorithm::PS384,
            SignatureAlgorithm::Ps512 => Algorithm::PS512,
            SignatureAlgorithm::Es256 => Algorithm::ES256,
            SignatureAlgorithm::Es384 => Algorithm::ES384,
            SignatureAlgorithm::EdDsa => Algorithm::EdDSA,
        }
    }
}

jose_algorithm! {
    /// JWE key-management algorithms.
    KeyManagementAlgorithm, "key management" {
        Dir => "dir",
        A128Kw => "A128KW",
        A192Kw => "A192KW",
        A256Kw => "A256KW",
        A128GcmKw => "A128GCMKW",
        A192GcmKw => "A192GCMKW",
        A256GcmKw => "A256GCMKW",
        RsaOaep => "RSA-OAEP",
        RsaOaep256 => "RSA-OAEP-256",
        EcdhEs => "ECDH-ES",
        EcdhEsA128Kw => "ECDH-ES+A128KW",
        EcdhEsA192Kw => "ECDH-ES+A192KW",
        EcdhEsA256Kw => "ECDH-ES+A256KW",
    }
}

impl KeyManagementAlgorithm {
    /// Whether the algorithm unwraps the content key with a private key.
    #[must_use]
    pub fn is_asymmetric(self) -> bool {
        matches!(
            self,
            KeyManagementAlgorithm::RsaOaep
                | KeyManagementAlgorithm::RsaOaep256
                | KeyManagementAlgorithm::EcdhEs
                | KeyManagementAlgorithm::EcdhEsA128Kw
                | KeyManagementAlgorithm::EcdhEsA192Kw
                | KeyManagementAlgorithm::EcdhEsA256Kw
        )
    }
}

jose_algorithm! {
    /// JWE content-encryption algorithms.
    ContentEncryptionAlgorithm, "content encryption" {
        A128CbcHs256 => "A128CBC-HS256",
        A192CbcHs384 => "A192CBC-HS384",
        A256CbcHs512 => "A256CBC-HS512",
        A128Gcm => "A128GCM",
        A192Gcm => "A192GCM",
        A256Gcm => "A256GCM",
    }
}

impl ContentEncryptionAlgorithm {
    /// Content-encryption key length in bytes.
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            ContentEncryptionAlgorithm::A128Gcm => 16,
            ContentEncryptionAlgorithm::A192Gcm => 24,
            ContentEncryptionAlgorithm::A256Gcm | ContentEncryptionAlgorithm::A128CbcHs256 => 32,
            ContentEncryptionAlgorithm::A192CbcHs384 => 48,
            ContentEncryptionAlgorithm::A256CbcHs512 => 64,
        }
    }
}

jose_algorithm! {
    /// JWE compression algorithms.
    CompressionAlgorithm, "compression" {
        Deflate => "DEF",
    }
}

/// Resolve the effective algorithm for one token.
///
/// - `required` absent: the header value is accepted as-is; an absent header
///   yields `Ok(None)` ("use the decoder default").
/// - `required` present: the header must name exactly the same algorithm.
///
/// # Errors
///
/// - `ConfigurationError` naming the required token when the header is absent
///   or names another algorithm
/// - `TokenMalformed` when no requirement is configured and the header names an
///   algorithm outside the family
pub fn negotiate<A: JoseAlgorithm>(
    required: Option<A>,
    header_value: Option<&str>,
) -> Result<Option<A>, ValidationError> {
    match required {
        None => match header_value {
            None => Ok(None),
            Some(value) => A::from_header(value).map(Some).ok_or_else(|| {
                ValidationError::TokenMalformed(format!(
                    "unsupported {} algorithm '{value}'",
                    A::FAMILY
                ))
            }),
        },
        Some(required) => match header_value.and_then(A::from_header) {
            Some(presented) if presented == required => Ok(Some(required)),
            _ => Err(ValidationError::ConfigurationError(format!(
                "{} algorithm '{}' is required, token declares '{}'",
                A::FAMILY,
                required.token(),
                header_value.unwrap_or("<none>")
            ))),
        },
    }
}
