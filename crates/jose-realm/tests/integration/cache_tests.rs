//! Integration tests for the authenticator cache
//!
//! Instance identity across `get()`, rebuilds after `invalidate()`, failed
//! builds, concurrent callers and the emitted metrics.

use jose_realm::{
    AuthenticatorCache, Configuration, RealmSettings, SignatureAlgorithm, SignatureKeys,
};
use jose_realm_test_utils::*;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use parking_lot::Mutex;
use std::sync::Arc;

// ============================================================================
// Helper Functions
// ============================================================================

/// Mutable realm state standing in for the owning management layer.
struct RealmState {
    issuer: String,
    key_alias: String,
}

fn source(
    state: Arc<Mutex<RealmState>>,
    store: Arc<InMemoryKeyStore>,
) -> impl Fn() -> Configuration + Send + Sync {
    move || {
        let state = state.lock();
        let mut settings = RealmSettings::new(state.issuer.clone(), TEST_ISSUER_BASE_URL);
        settings.signature_algorithm = Some(SignatureAlgorithm::Hs256);
        Configuration::builder(settings)
            .signature_keys(SignatureKeys::new(store.clone()).secret_key(state.key_alias.clone()))
            .build()
    }
}

fn state(issuer: &str, key_alias: &str) -> Arc<Mutex<RealmState>> {
    Arc::new(Mutex::new(RealmState {
        issuer: issuer.to_string(),
        key_alias: key_alias.to_string(),
    }))
}

fn store() -> Arc<InMemoryKeyStore> {
    Arc::new(InMemoryKeyStore::new().with_secret(TEST_KID, TEST_SECRET))
}

fn token() -> String {
    TestJwsBuilder::hs256(TEST_SECRET)
        .kid(TEST_KID)
        .sign(&TestClaimsBuilder::new().build())
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_get_returns_identical_instance() -> Result<(), anyhow::Error> {
    let store = store();
    let cache = AuthenticatorCache::new(source(state(TEST_ISSUER, TEST_KID), store.clone()));

    let first = cache.get()?;
    let lookups = store.lookups();
    let second = cache.get()?;

    assert!(Arc::ptr_eq(&first, &second));
    // The second get did not reassemble
    assert_eq!(store.lookups(), lookups);
    Ok(())
}

#[test]
fn test_invalidate_rebuilds_from_current_configuration() -> Result<(), anyhow::Error> {
    let realm = state("Y", TEST_KID);
    let cache = AuthenticatorCache::new(source(realm.clone(), store()));

    let before = cache.get()?;
    before.validate(&token()).assert_rejected_with("assertion_failed");

    realm.lock().issuer = TEST_ISSUER.to_string();
    // Still the old instance until invalidated
    assert!(Arc::ptr_eq(&before, &cache.get()?));

    cache.invalidate();
    let after = cache.get()?;

    assert!(!Arc::ptr_eq(&before, &after));
    after.validate(&token()).assert_subject(TEST_USER_ALICE);
    Ok(())
}

#[test]
fn test_failed_build_is_retried() -> Result<(), anyhow::Error> {
    let realm = state(TEST_ISSUER, "missing");
    let cache = AuthenticatorCache::new(source(realm.clone(), store()));

    let err = cache.get().unwrap_err();
    assert_eq!(err.category(), "configuration_error");
    assert!(!cache.is_built());

    realm.lock().key_alias = TEST_KID.to_string();
    let authenticator = cache.get()?;

    authenticator.validate(&token()).assert_subject(TEST_USER_ALICE);
    assert!(cache.is_built());
    Ok(())
}

#[test]
fn test_concurrent_callers_share_one_build() -> Result<(), anyhow::Error> {
    let store = store();
    let cache = Arc::new(AuthenticatorCache::new(source(
        state(TEST_ISSUER, TEST_KID),
        store.clone(),
    )));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let authenticator = cache.get().unwrap();
                authenticator.validate(&token()).assert_subject(TEST_USER_ALICE);
                authenticator
            })
        })
        .collect();
    let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let first = instances.first().unwrap();
    assert!(instances.iter().all(|a| Arc::ptr_eq(a, first)));
    // One assembly, one secret lookup
    assert_eq!(store.lookups(), 1);
    Ok(())
}

#[test]
fn test_cache_and_validation_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let cache = AuthenticatorCache::new(source(state(TEST_ISSUER, TEST_KID), store()));
        let authenticator = cache.get().unwrap();
        authenticator.validate(&token()).assert_subject(TEST_USER_ALICE);
        authenticator
            .validate("garbage")
            .assert_rejected_with("token_malformed");
        cache.invalidate();
    });

    let snapshot = snapshotter.snapshot().into_vec();
    let counter = |name: &str, label: (&str, &str)| {
        snapshot
            .iter()
            .find(|(key, _, _, _)| {
                key.key().name() == name
                    && key
                        .key()
                        .labels()
                        .any(|l| l.key() == label.0 && l.value() == label.1)
            })
            .map(|(_, _, _, value)| value)
    };

    assert!(matches!(
        counter("jose_realm_authenticator_builds_total", ("status", "success")),
        Some(DebugValue::Counter(1))
    ));
    assert!(matches!(
        counter(
            "jose_realm_token_validations_total",
            ("error_category", "token_malformed")
        ),
        Some(DebugValue::Counter(1))
    ));
    assert!(matches!(
        counter("jose_realm_token_validations_total", ("error_category", "none")),
        Some(DebugValue::Counter(1))
    ));
    assert!(snapshot
        .iter()
        .any(|(key, _, _, _)| key.key().name() == "jose_realm_authenticator_invalidations_total"));
}
