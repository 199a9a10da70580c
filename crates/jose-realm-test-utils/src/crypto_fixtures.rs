//! Cryptographic fixtures for testing
//!
//! Provides P-256 signing keys, throwaway certificate authorities for `x5c`
//! chains, AES-GCM sealing for `dir` JWE and raw deflate.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair,
};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM, NONCE_LEN};
use std::io::Write;
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Certificate generation failed: {0}")]
    Certificate(String),
}

impl From<rcgen::Error> for FixtureError {
    fn from(err: rcgen::Error) -> Self {
        FixtureError::Certificate(err.to_string())
    }
}

/// A P-256 key pair as DER.
pub struct TestEcKey {
    /// `SubjectPublicKeyInfo`
    pub public_der: Vec<u8>,
    /// PKCS#8
    pub private_pkcs8: Vec<u8>,
}

/// Generate a fresh P-256 signing key.
pub fn test_ec_key() -> Result<TestEcKey, FixtureError> {
    let key = KeyPair::generate()?;
    Ok(TestEcKey {
        public_der: key.public_key_der(),
        private_pkcs8: key.serialize_der(),
    })
}

/// A self-signed CA that can issue leaf certificates.
pub struct TestCa {
    cert: Certificate,
    key: KeyPair,
}

/// A leaf certificate with its private key.
pub struct TestLeaf {
    pub der: Vec<u8>,
    pub private_pkcs8: Vec<u8>,
}

impl TestCa {
    /// Create a CA with the given common name
    pub fn new(common_name: &str) -> Result<Self, FixtureError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key)?;
        Ok(Self { cert, key })
    }

    /// DER of the CA certificate
    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    /// Issue a currently valid leaf with `common_name`
    pub fn issue(&self, common_name: &str) -> Result<TestLeaf, FixtureError> {
        self.issue_with(common_name, |_| {})
    }

    /// Issue a leaf whose validity ended in 2001
    pub fn issue_expired(&self, common_name: &str) -> Result<TestLeaf, FixtureError> {
        self.issue_with(common_name, |params| {
            params.not_before = date_time_ymd(2000, 1, 1);
            params.not_after = date_time_ymd(2001, 1, 1);
        })
    }

    /// Issue an intermediate CA signed by this one
    pub fn intermediate(&self, common_name: &str) -> Result<TestCa, FixtureError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.signed_by(&key, &self.cert, &self.key)?;
        Ok(TestCa { cert, key })
    }

    /// Issue an end-entity certificate that keeps its key, so it can sign
    /// further certificates a verifier must not trust
    pub fn end_entity_signer(&self, common_name: &str) -> Result<TestCa, FixtureError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![common_name.to_string()])?;
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::ExplicitNoCa;
        let cert = params.signed_by(&key, &self.cert, &self.key)?;
        Ok(TestCa { cert, key })
    }

    fn issue_with(
        &self,
        common_name: &str,
        customize: impl FnOnce(&mut CertificateParams),
    ) -> Result<TestLeaf, FixtureError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![common_name.to_string()])?;
        params.distinguished_name.push(DnType::CommonName, common_name);
        customize(&mut params);
        let cert = params.signed_by(&key, &self.cert, &self.key)?;
        Ok(TestLeaf {
            der: cert.der().to_vec(),
            private_pkcs8: key.serialize_der(),
        })
    }
}

/// Encode a DER chain as an `x5c` header value (standard base64, leaf first).
pub fn x5c_chain<D: AsRef<[u8]>>(chain: &[D]) -> Vec<String> {
    chain.iter().map(|der| STANDARD.encode(der.as_ref())).collect()
}

/// AES-GCM output split the way JWE carries it.
pub struct SealedPayload {
    pub iv: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Fixed IV; every test content key is used for one purpose only.
const TEST_IV: [u8; NONCE_LEN] = [9; NONCE_LEN];

/// Seal with AES-256-GCM
pub fn seal_a256gcm(cek: &[u8], aad: &[u8], plaintext: &[u8]) -> SealedPayload {
    seal(&AES_256_GCM, cek, aad, plaintext)
}

/// Seal with AES-128-GCM
pub fn seal_a128gcm(cek: &[u8], aad: &[u8], plaintext: &[u8]) -> SealedPayload {
    seal(&AES_128_GCM, cek, aad, plaintext)
}

fn seal(
    algorithm: &'static ring::aead::Algorithm,
    cek: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> SealedPayload {
    let key = LessSafeKey::new(UnboundKey::new(algorithm, cek).expect("Invalid test content key"));
    let mut in_out = plaintext.to_vec();
    let tag = key
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(TEST_IV),
            Aad::from(aad),
            &mut in_out,
        )
        .expect("Failed to seal test payload");
    SealedPayload {
        iv: TEST_IV,
        ciphertext: in_out,
        tag: tag.as_ref().to_vec(),
    }
}

/// Raw deflate (`zip: DEF`)
pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("Failed to deflate test payload");
    encoder.finish().expect("Failed to finish deflate stream")
}
