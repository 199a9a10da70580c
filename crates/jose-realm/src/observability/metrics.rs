//! Metrics definitions for the realm.
//!
//! All metrics follow Prometheus naming conventions:
//! - `jose_realm_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `status`: 2 values (success, error)
//! - `error_category`: 7 values (the six validation categories, or `none`)

use metrics::{counter, histogram};
use std::time::Duration;

/// Record one token validation.
///
/// Metrics: `jose_realm_token_validations_total`,
/// `jose_realm_token_validation_duration_seconds`
/// Labels: `status`, `error_category`
pub fn record_token_validation(status: &str, error_category: Option<&str>, duration: Duration) {
    let category = error_category.unwrap_or("none");
    histogram!("jose_realm_token_validation_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("jose_realm_token_validations_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

/// Record an authenticator assembly attempt.
///
/// Metric: `jose_realm_authenticator_builds_total`
/// Labels: `status`
pub fn record_authenticator_build(status: &str) {
    counter!("jose_realm_authenticator_builds_total", "status" => status.to_string()).increment(1);
}

/// Record a cache invalidation.
///
/// Metric: `jose_realm_authenticator_invalidations_total`
pub fn record_authenticator_invalidation() {
    counter!("jose_realm_authenticator_invalidations_total").increment(1);
}
