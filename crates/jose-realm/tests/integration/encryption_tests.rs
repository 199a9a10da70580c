//! Integration tests for encrypted (JWE) tokens
//!
//! `dir` key management with AES-GCM content encryption, nested signed
//! tokens, `DEF` compression and algorithm requirements.

use jose_realm::{
    Authenticator, Configuration, ContentEncryptionAlgorithm, EncryptionConfig, RealmSettings,
    SignatureAlgorithm, SignatureKeys,
};
use jose_realm_test_utils::*;
use std::sync::Arc;

// ============================================================================
// Helper Functions
// ============================================================================

fn store() -> Arc<InMemoryKeyStore> {
    Arc::new(
        InMemoryKeyStore::new()
            .with_secret(TEST_KID, TEST_SECRET)
            .with_secret(TEST_ENCRYPTION_KID, &TEST_CEK)
            .with_secret(TEST_KID_2, &TEST_CEK_128),
    )
}

fn settings() -> RealmSettings {
    let mut settings = RealmSettings::new(TEST_ISSUER, TEST_ISSUER_BASE_URL);
    settings.signature_algorithm = Some(SignatureAlgorithm::Hs256);
    settings
}

/// Signed and encrypted: the common nested-token deployment.
fn nested_realm() -> Result<Authenticator, anyhow::Error> {
    let store = store();
    let config = Configuration::builder(settings())
        .signature_keys(SignatureKeys::new(store.clone()).secret_key(TEST_KID))
        .encryption(EncryptionConfig::new(store).secret_key(TEST_ENCRYPTION_KID))
        .build();
    Ok(Authenticator::from_configuration(&config)?)
}

/// Encrypted only: bare claim sets are acceptable.
fn encryption_only_realm(encryption: EncryptionConfig) -> Result<Authenticator, anyhow::Error> {
    let config = Configuration::builder(settings())
        .encryption(encryption)
        .build();
    Ok(Authenticator::from_configuration(&config)?)
}

fn inner_jws() -> String {
    TestJwsBuilder::hs256(TEST_SECRET)
        .kid(TEST_KID)
        .sign(&TestClaimsBuilder::new().build())
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_nested_signed_token_is_accepted() -> Result<(), anyhow::Error> {
    let token = TestJweBuilder::a256gcm(&TEST_CEK)
        .kid(TEST_ENCRYPTION_KID)
        .nested_jwt()
        .seal(inner_jws().as_bytes());

    nested_realm()?
        .validate(&token)
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}

#[test]
fn test_compressed_nested_token_is_accepted() -> Result<(), anyhow::Error> {
    let token = TestJweBuilder::a256gcm(&TEST_CEK)
        .kid(TEST_ENCRYPTION_KID)
        .nested_jwt()
        .deflate()
        .seal(inner_jws().as_bytes());

    nested_realm()?
        .validate(&token)
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}

#[test]
fn test_nested_token_without_cty_is_detected() -> Result<(), anyhow::Error> {
    let token = TestJweBuilder::a256gcm(&TEST_CEK)
        .kid(TEST_ENCRYPTION_KID)
        .seal(inner_jws().as_bytes());

    nested_realm()?
        .validate(&token)
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}

#[test]
fn test_bare_claims_require_signature_when_keys_configured() -> Result<(), anyhow::Error> {
    let claims = TestClaimsBuilder::new().build().to_string();
    let token = TestJweBuilder::a256gcm(&TEST_CEK)
        .kid(TEST_ENCRYPTION_KID)
        .seal(claims.as_bytes());

    nested_realm()?
        .validate(&token)
        .assert_rejected_with("signature_invalid");
    Ok(())
}

#[test]
fn test_bare_claims_accepted_without_signature_source() -> Result<(), anyhow::Error> {
    let claims = TestClaimsBuilder::new().claim("role", serde_json::json!("admin")).build();
    let token = TestJweBuilder::a256gcm(&TEST_CEK)
        .kid(TEST_ENCRYPTION_KID)
        .seal(claims.to_string().as_bytes());
    let authenticator =
        encryption_only_realm(EncryptionConfig::new(store()).secret_key(TEST_ENCRYPTION_KID))?;

    authenticator
        .validate(&token)
        .assert_subject(TEST_USER_ALICE)
        .assert_claim_str("role", "admin");
    Ok(())
}

#[test]
fn test_bare_claims_with_leading_whitespace_or_bom() -> Result<(), anyhow::Error> {
    let claims = TestClaimsBuilder::new().build().to_string();
    let authenticator =
        encryption_only_realm(EncryptionConfig::new(store()).secret_key(TEST_ENCRYPTION_KID))?;

    for plaintext in [format!("\n  {claims}"), format!("\u{feff}{claims}")] {
        let token = TestJweBuilder::a256gcm(&TEST_CEK)
            .kid(TEST_ENCRYPTION_KID)
            .seal(plaintext.as_bytes());
        authenticator
            .validate(&token)
            .assert_subject(TEST_USER_ALICE);
        // Still a claim set, not a nested token
        nested_realm()?
            .validate(&token)
            .assert_rejected_with("signature_invalid");
    }
    Ok(())
}

#[test]
fn test_plain_jws_rejected_when_encryption_required() -> Result<(), anyhow::Error> {
    nested_realm()?
        .validate(&inner_jws())
        .assert_rejected_with("token_malformed");
    Ok(())
}

#[test]
fn test_wrong_content_key_fails_decryption() -> Result<(), anyhow::Error> {
    let token = TestJweBuilder::a256gcm(&[0x11; 32])
        .kid(TEST_ENCRYPTION_KID)
        .nested_jwt()
        .seal(inner_jws().as_bytes());

    nested_realm()?
        .validate(&token)
        .assert_rejected_with("decryption_failed");
    Ok(())
}

#[test]
fn test_required_content_encryption_mismatch() -> Result<(), anyhow::Error> {
    let authenticator = encryption_only_realm(
        EncryptionConfig::new(store())
            .secret_key(TEST_ENCRYPTION_KID)
            .content_encryption_algorithm(ContentEncryptionAlgorithm::A128Gcm),
    )?;
    let token = TestJweBuilder::a256gcm(&TEST_CEK)
        .kid(TEST_ENCRYPTION_KID)
        .seal(TestClaimsBuilder::new().build().to_string().as_bytes());

    authenticator
        .validate(&token)
        .assert_rejected_with("configuration_error");
    Ok(())
}

#[test]
fn test_a128gcm_with_sole_key() -> Result<(), anyhow::Error> {
    let authenticator = encryption_only_realm(
        EncryptionConfig::new(store())
            .secret_key(TEST_KID_2)
            .content_encryption_algorithm(ContentEncryptionAlgorithm::A128Gcm),
    )?;
    // No kid: the only configured key is used
    let token = TestJweBuilder::a128gcm(&TEST_CEK_128)
        .seal(TestClaimsBuilder::new().build().to_string().as_bytes());

    authenticator
        .validate(&token)
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}
