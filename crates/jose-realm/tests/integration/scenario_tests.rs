//! End-to-end validation of signed tokens
//!
//! Covers the accepted path, issuer and algorithm mismatches, typed claim
//! access, transforms and user-declared assertions.

use jose_realm::assertions::{AssertionConfig, AssertionSet, SharedAssertion};
use jose_realm::errors::ValidationError;
use jose_realm::transforms::builtin;
use jose_realm::{
    Authenticator, Configuration, ConfigurationBuilder, RealmSettings, SignatureAlgorithm,
    SignatureKeys, TransformConfig, ValidatorAssembler,
};
use jose_realm_test_utils::*;
use serde_json::{json, Value};
use std::sync::Arc;

// ============================================================================
// Helper Functions
// ============================================================================

fn settings(issuer: &str) -> RealmSettings {
    let mut settings = RealmSettings::new(issuer, TEST_ISSUER_BASE_URL);
    settings.audience = Some(TEST_AUDIENCE.to_string());
    settings.signature_algorithm = Some(SignatureAlgorithm::Hs256);
    settings
}

fn realm(issuer: &str) -> ConfigurationBuilder {
    let store = InMemoryKeyStore::new().with_secret(TEST_KID, TEST_SECRET);
    Configuration::builder(settings(issuer))
        .signature_keys(SignatureKeys::new(Arc::new(store)).secret_key(TEST_KID))
}

fn hs256(claims: &Value) -> String {
    TestJwsBuilder::hs256(TEST_SECRET).kid(TEST_KID).sign(claims)
}

fn scenario_claims() -> Value {
    TestClaimsBuilder::new()
        .for_user(TEST_USER_ALICE)
        .expires_in(60)
        .build()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_hs256_token_is_accepted() -> Result<(), anyhow::Error> {
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;

    authenticator
        .validate(&hs256(&scenario_claims()))
        .assert_subject(TEST_USER_ALICE)
        .assert_claim_str("iss", TEST_ISSUER);

    Ok(())
}

#[test]
fn test_issuer_mismatch_fails_assertion() -> Result<(), anyhow::Error> {
    let config = realm("Y").build();
    let token = hs256(&scenario_claims());

    let validator = ValidatorAssembler::assemble(&config)?;
    let err = validator.validate(&token).unwrap_err();
    assert!(
        matches!(&err, ValidationError::AssertionFailed { name, .. } if name == "issuer"),
        "unexpected error: {err:?}"
    );

    Authenticator::from_configuration(&config)?
        .validate(&token)
        .assert_rejected_with("assertion_failed");
    Ok(())
}

#[test]
fn test_algorithm_mismatch_is_configuration_error() -> Result<(), anyhow::Error> {
    // Signed with the HS256 secret so only the header disagrees
    let token = sign_with_raw_header(
        &json!({"alg": "RS256", "kid": TEST_KID}),
        &scenario_claims(),
        TEST_SECRET,
    );
    let validator = ValidatorAssembler::assemble(&realm(TEST_ISSUER).build())?;

    let err = validator.validate(&token).unwrap_err();

    assert!(matches!(err, ValidationError::ConfigurationError(_)));
    Ok(())
}

#[test]
fn test_array_claim_reads_as_list_and_set() -> Result<(), anyhow::Error> {
    let claims = TestClaimsBuilder::new()
        .claim("grp", json!(["a", "b", "c"]))
        .claim("dup", json!(["a", "b", "a", "c", "b"]))
        .build();
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;

    let result = authenticator.validate(&hs256(&claims));
    let principal = result.assert_accepted().principal();

    let grp = principal.claim("grp").unwrap();
    assert_eq!(
        grp.as_list_of::<String>()?,
        Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );
    assert_eq!(grp.as_set()?, Some(vec![json!("a"), json!("b"), json!("c")]));

    let dup = principal.claim("dup").unwrap();
    assert_eq!(
        dup.as_set_of::<String>()?,
        Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );
    Ok(())
}

// ============================================================================
// Claim fidelity
// ============================================================================

#[test]
fn test_principal_claims_equal_payload() -> Result<(), anyhow::Error> {
    let claims = TestClaimsBuilder::new()
        .claim("admin", json!(true))
        .claim("level", json!(7))
        .claim("ratio", json!(0.5))
        .claim("nick", Value::Null)
        .build();
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;

    let result = authenticator.validate(&hs256(&claims));
    let principal = result.assert_accepted().principal();

    let payload = claims.as_object().unwrap();
    let mut expected: Vec<&str> = payload.keys().map(String::as_str).collect();
    expected.sort_unstable();
    assert_eq!(principal.claim_names(), expected);
    for (name, value) in payload {
        assert_eq!(&principal.claim(name).unwrap().value(), value, "claim {name}");
    }
    assert_eq!(principal.claim("admin").unwrap().as_bool()?, Some(true));
    assert_eq!(principal.claim("level").unwrap().as_f64()?, Some(7.0));
    assert!(principal.claim("nick").unwrap().is_null());
    Ok(())
}

#[test]
fn test_object_claims_do_not_reject_token() -> Result<(), anyhow::Error> {
    let claims = TestClaimsBuilder::new()
        .claim("realm_access", json!({"roles": ["admin"]}))
        .claim("cnf", json!({"jkt": "thumbprint"}))
        .claim("role", json!("admin"))
        .build();
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;

    let result = authenticator.validate(&hs256(&claims));
    result
        .assert_subject(TEST_USER_ALICE)
        .assert_claim_str("role", "admin");
    let principal = result.assert_accepted().principal();

    assert!(principal.claim("realm_access").is_none());
    assert!(!principal.claim_names().contains(&"cnf"));
    assert_eq!(
        principal.raw_claim("realm_access"),
        Some(&json!({"roles": ["admin"]}))
    );
    Ok(())
}

#[test]
fn test_string_claim_as_bool_is_type_mismatch() -> Result<(), anyhow::Error> {
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;

    let result = authenticator.validate(&hs256(&scenario_claims()));
    let sub = result.assert_accepted().principal().claim("sub").unwrap();

    assert!(sub.as_bool().is_err());
    Ok(())
}

#[test]
fn test_transforms_apply_in_declaration_order() -> Result<(), anyhow::Error> {
    let config = realm(TEST_ISSUER)
        .transform(TransformConfig::new("email", builtin::to_lowercase()))
        .transform(TransformConfig::new("email", builtin::prefix("mailto:")))
        .build();
    let claims = TestClaimsBuilder::new()
        .claim("email", json!("Alice@Example.COM"))
        .build();

    Authenticator::from_configuration(&config)?
        .validate(&hs256(&claims))
        .assert_claim_str("email", "mailto:alice@example.com")
        .assert_claim_str("sub", TEST_USER_ALICE);
    Ok(())
}

// ============================================================================
// Time and audience
// ============================================================================

#[test]
fn test_expiry_respects_tolerance() -> Result<(), anyhow::Error> {
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;

    let within = TestClaimsBuilder::new()
        .issued_at(TEST_NOW - 600)
        .expires_at(TEST_NOW - 30)
        .build();
    assert!(authenticator.validate_at(&hs256(&within), TEST_NOW).is_ok());

    let beyond = TestClaimsBuilder::new()
        .issued_at(TEST_NOW - 600)
        .expires_at(TEST_NOW - 61)
        .build();
    authenticator
        .validate_at(&hs256(&beyond), TEST_NOW)
        .assert_rejected_with("expired");
    Ok(())
}

#[test]
fn test_future_not_before_is_expired() -> Result<(), anyhow::Error> {
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;
    let claims = TestClaimsBuilder::new()
        .issued_at(TEST_NOW)
        .expires_at(TEST_NOW + 600)
        .not_before(TEST_NOW + 300)
        .build();

    authenticator
        .validate_at(&hs256(&claims), TEST_NOW)
        .assert_rejected_with("expired");
    Ok(())
}

#[test]
fn test_audience_array_matches_any_element() -> Result<(), anyhow::Error> {
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;

    let listed = TestClaimsBuilder::new()
        .audience(json!(["other", TEST_AUDIENCE]))
        .build();
    assert!(authenticator.validate(&hs256(&listed)).is_ok());

    let missing = TestClaimsBuilder::new().audience(json!(["other"])).build();
    authenticator
        .validate(&hs256(&missing))
        .assert_rejected_with("assertion_failed");
    Ok(())
}

// ============================================================================
// User assertions
// ============================================================================

#[test]
fn test_user_assertion_groups_compose() -> Result<(), anyhow::Error> {
    let tenant_ok: Vec<SharedAssertion> = vec![
        Arc::new(AssertionConfig::claim_equals("tenant", "acme")),
        Arc::new(AssertionConfig::claim_equals("tenant", "globex")),
    ];
    let banned: Vec<SharedAssertion> = vec![Arc::new(AssertionConfig::claim_equals(
        "sub",
        TEST_USER_BOB,
    ))];
    let config = realm(TEST_ISSUER)
        .assertion(AssertionSet::any_of("tenant", tenant_ok))
        .assertion(AssertionSet::none_of("banned", banned))
        .build();
    let authenticator = Authenticator::from_configuration(&config)?;

    let globex = TestClaimsBuilder::new().claim("tenant", json!("globex")).build();
    authenticator.validate(&hs256(&globex)).assert_subject(TEST_USER_ALICE);

    let initech = TestClaimsBuilder::new().claim("tenant", json!("initech")).build();
    authenticator
        .validate(&hs256(&initech))
        .assert_rejected_with("assertion_failed");

    let bob = TestClaimsBuilder::new()
        .for_user(TEST_USER_BOB)
        .claim("tenant", json!("acme"))
        .build();
    authenticator
        .validate(&hs256(&bob))
        .assert_rejected_with("assertion_failed");
    Ok(())
}

#[test]
fn test_custom_assertion_message_is_not_exposed() -> Result<(), anyhow::Error> {
    let config = realm(TEST_ISSUER)
        .assertion(AssertionConfig::new(
            "level-at-least-5",
            |ctx| ctx.numeric_date("level").is_some_and(|level| level >= 5),
            |_| "level too low".to_string(),
        ))
        .build();
    let token = hs256(&TestClaimsBuilder::new().claim("level", json!(2)).build());

    let err = ValidatorAssembler::assemble(&config)?
        .validate(&token)
        .unwrap_err();
    assert!(err.to_string().contains("level too low"));

    let failure = Authenticator::from_configuration(&config)?
        .validate(&token)
        .unwrap_err();
    assert!(!failure.to_string().contains("level too low"));
    Ok(())
}

// ============================================================================
// Malformed input and keys
// ============================================================================

#[test]
fn test_malformed_tokens_are_rejected() -> Result<(), anyhow::Error> {
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;

    authenticator
        .validate("not-a-token")
        .assert_rejected_with("token_malformed");
    authenticator
        .validate(&"a".repeat(9000))
        .assert_rejected_with("token_malformed");

    let critical = sign_with_raw_header(
        &json!({"alg": "HS256", "kid": TEST_KID, "crit": ["exp"]}),
        &scenario_claims(),
        TEST_SECRET,
    );
    authenticator
        .validate(&critical)
        .assert_rejected_with("token_malformed");
    Ok(())
}

#[test]
fn test_wrong_secret_is_signature_invalid() -> Result<(), anyhow::Error> {
    let authenticator = Authenticator::from_configuration(&realm(TEST_ISSUER).build())?;
    let token = TestJwsBuilder::hs256(TEST_SECRET_2)
        .kid(TEST_KID)
        .sign(&scenario_claims());

    authenticator
        .validate(&token)
        .assert_rejected_with("signature_invalid");
    Ok(())
}

#[test]
fn test_es256_public_key_by_kid() -> Result<(), anyhow::Error> {
    let key = test_ec_key()?;
    let store = InMemoryKeyStore::new().with_key_pair(
        TEST_EC_KID,
        key.public_der.clone(),
        key.private_pkcs8.clone(),
    );
    let mut settings = settings(TEST_ISSUER);
    settings.signature_algorithm = Some(SignatureAlgorithm::Es256);
    let config = Configuration::builder(settings)
        .signature_keys(SignatureKeys::new(Arc::new(store)).public_key(TEST_EC_KID))
        .build();
    let token = TestJwsBuilder::es256(&key.private_pkcs8)
        .kid(TEST_EC_KID)
        .sign(&scenario_claims());

    Authenticator::from_configuration(&config)?
        .validate(&token)
        .assert_subject(TEST_USER_ALICE);
    Ok(())
}

#[test]
fn test_missing_key_fails_assembly() {
    let store = InMemoryKeyStore::new();
    let config = Configuration::builder(settings(TEST_ISSUER))
        .signature_keys(SignatureKeys::new(Arc::new(store)).secret_key(TEST_KID))
        .build();

    let err = Authenticator::from_configuration(&config).unwrap_err();

    assert!(matches!(err, ValidationError::ConfigurationError(_)));
}
