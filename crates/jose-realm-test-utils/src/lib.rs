//! # Jose Realm Test Utilities
//!
//! Shared fixtures for `jose-realm` integration tests.
//!
//! This crate provides:
//! - Claim and token builders (HS256, ES256, `dir` JWE)
//! - Throwaway certificate authorities for `x5c` chains
//! - An in-memory key store
//! - Fixed test identifiers
//! - Custom assertions on validation results
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jose_realm_test_utils::*;
//!
//! let claims = TestClaimsBuilder::new().for_user("alice").build();
//! let token = TestJwsBuilder::hs256(TEST_SECRET).kid(TEST_KID).sign(&claims);
//!
//! authenticator.validate(&token).assert_subject("alice");
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod key_store;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use key_store::*;
pub use test_ids::*;
pub use token_builders::*;
