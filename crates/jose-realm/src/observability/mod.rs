//! Observability for the realm.
//!
//! # Privacy by Default
//!
//! Public pipeline entry points use `#[instrument(skip_all)]`. Log fields are
//! limited to bounded values: error categories, algorithm tokens, key ids and
//! counts. Tokens, claim values and key material never appear in logs.
//!
//! Tracing targets:
//! - `jose_realm.authenticator` - rejected tokens at the caller boundary
//! - `jose_realm.validator` - per-token pipeline
//! - `jose_realm.assembler` - validator assembly
//! - `jose_realm.cache` - authenticator cache builds and invalidations
//! - `jose_realm.trust` - certificate chain checks
//! - `jose_realm.jwe` - decryption

pub mod metrics;

pub use metrics::{
    record_authenticator_build, record_authenticator_invalidation, record_token_validation,
};
