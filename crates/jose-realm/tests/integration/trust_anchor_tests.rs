//! Integration tests for `x5c` certificate chains
//!
//! Tokens signed by a leaf certificate's key and verified against a trust
//! anchor set, with subject, expiration and revocation checks.

use jose_realm::{
    Authenticator, Configuration, RealmSettings, SignatureAlgorithm, SignatureKeys,
    TrustAnchorSet, TrustConfig,
};
use jose_realm_test_utils::*;
use std::sync::Arc;

// ============================================================================
// Helper Functions
// ============================================================================

fn settings() -> RealmSettings {
    let mut settings = RealmSettings::new(TEST_ISSUER, TEST_ISSUER_BASE_URL);
    settings.signature_algorithm = Some(SignatureAlgorithm::Es256);
    settings
}

fn trust(ca: &TestCa) -> Result<TrustConfig, anyhow::Error> {
    let anchors = TrustAnchorSet::from_der(vec![ca.der()])?;
    Ok(TrustConfig::new(anchors).subject_common_name_only(true))
}

fn realm(trust: TrustConfig) -> Result<Authenticator, anyhow::Error> {
    let config = Configuration::builder(settings()).trust(trust).build();
    Ok(Authenticator::from_configuration(&config)?)
}

fn signed_by(leaf: &TestLeaf, chain: &[Vec<u8>]) -> String {
    TestJwsBuilder::es256(&leaf.private_pkcs8)
        .x5c(x5c_chain(chain))
        .sign(&TestClaimsBuilder::new().build())
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_leaf_issued_by_anchor_is_accepted() -> Result<(), anyhow::Error> {
    let ca = TestCa::new("Test Root")?;
    let leaf = ca.issue(TEST_ISSUER)?;

    realm(trust(&ca)?)?
        .validate(&signed_by(&leaf, &[leaf.der.clone()]))
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}

#[test]
fn test_chain_through_intermediate_is_accepted() -> Result<(), anyhow::Error> {
    let root = TestCa::new("Test Root")?;
    let intermediate = root.intermediate("Test Intermediate")?;
    let leaf = intermediate.issue(TEST_ISSUER)?;

    realm(trust(&root)?)?
        .validate(&signed_by(&leaf, &[leaf.der.clone(), intermediate.der()]))
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}

#[test]
fn test_leaf_signed_by_end_entity_is_rejected() -> Result<(), anyhow::Error> {
    let root = TestCa::new("Test Root")?;
    let end_entity = root.end_entity_signer("other.example")?;
    let forged = end_entity.issue(TEST_ISSUER)?;

    realm(trust(&root)?)?
        .validate(&signed_by(&forged, &[forged.der.clone(), end_entity.der()]))
        .assert_rejected_with("signature_invalid");
    Ok(())
}

#[test]
fn test_leaf_from_untrusted_ca_is_rejected() -> Result<(), anyhow::Error> {
    let trusted = TestCa::new("Test Root")?;
    let rogue = TestCa::new("Rogue Root")?;
    let leaf = rogue.issue(TEST_ISSUER)?;

    realm(trust(&trusted)?)?
        .validate(&signed_by(&leaf, &[leaf.der.clone()]))
        .assert_rejected_with("signature_invalid");
    Ok(())
}

#[test]
fn test_leaf_subject_must_match_issuer() -> Result<(), anyhow::Error> {
    let ca = TestCa::new("Test Root")?;
    let leaf = ca.issue("someone-else")?;

    realm(trust(&ca)?)?
        .validate(&signed_by(&leaf, &[leaf.der.clone()]))
        .assert_rejected_with("assertion_failed");
    Ok(())
}

#[test]
fn test_fixed_certificate_subject_overrides_issuer() -> Result<(), anyhow::Error> {
    let ca = TestCa::new("Test Root")?;
    let leaf = ca.issue("signer.example")?;

    realm(trust(&ca)?.certificate_subject("signer.example"))?
        .validate(&signed_by(&leaf, &[leaf.der.clone()]))
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}

#[test]
fn test_expired_leaf_rejected_only_when_checked() -> Result<(), anyhow::Error> {
    let ca = TestCa::new("Test Root")?;
    let leaf = ca.issue_expired(TEST_ISSUER)?;
    let token = signed_by(&leaf, &[leaf.der.clone()]);

    realm(trust(&ca)?)?
        .validate(&token)
        .assert_subject(TEST_USER_ALICE);
    realm(trust(&ca)?.check_expiration(true))?
        .validate(&token)
        .assert_rejected_with("signature_invalid");
    Ok(())
}

#[test]
fn test_revoked_leaf_is_rejected() -> Result<(), anyhow::Error> {
    let ca = TestCa::new("Test Root")?;
    let leaf = ca.issue(TEST_ISSUER)?;
    let revoked = leaf.der.clone();
    let checker = Arc::new(move |der: &[u8]| der == revoked.as_slice());

    realm(trust(&ca)?.check_revocation(checker))?
        .validate(&signed_by(&leaf, &[leaf.der.clone()]))
        .assert_rejected_with("signature_invalid");
    Ok(())
}

#[test]
fn test_kid_key_skips_certificate_subject() -> Result<(), anyhow::Error> {
    let ca = TestCa::new("Test Root")?;
    let store = InMemoryKeyStore::new().with_secret(TEST_KID, TEST_SECRET);
    let mut settings = settings();
    settings.signature_algorithm = None;
    let config = Configuration::builder(settings)
        .signature_keys(SignatureKeys::new(Arc::new(store)).secret_key(TEST_KID))
        .trust(trust(&ca)?)
        .build();
    let token = TestJwsBuilder::hs256(TEST_SECRET)
        .kid(TEST_KID)
        .sign(&TestClaimsBuilder::new().build());

    Authenticator::from_configuration(&config)?
        .validate(&token)
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}
