//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions on authenticator results.

use jose_realm::errors::{AuthenticationFailure, GENERIC_FAILURE_MESSAGE};
use jose_realm::principal::Credential;

/// Custom assertions for `Authenticator::validate` results
///
/// # Example
/// ```rust,ignore
/// authenticator
///     .validate(&token)
///     .assert_subject("alice")
///     .assert_claim_str("iss", "X");
/// ```
pub trait ValidationAssertions {
    /// Assert the token was accepted and return the credential
    fn assert_accepted(&self) -> &Credential;

    /// Assert the token was accepted for `subject`
    fn assert_subject(&self, subject: &str) -> &Self;

    /// Assert the accepted credential carries a string claim with `value`
    fn assert_claim_str(&self, name: &str, value: &str) -> &Self;

    /// Assert the token was rejected with `category`, behind the generic message
    fn assert_rejected_with(&self, category: &str) -> &Self;
}

impl ValidationAssertions for Result<Credential, AuthenticationFailure> {
    fn assert_accepted(&self) -> &Credential {
        match self {
            Ok(credential) => credential,
            Err(failure) => panic!(
                "Expected token to be accepted, rejected with category {}",
                failure.category()
            ),
        }
    }

    fn assert_subject(&self, subject: &str) -> &Self {
        assert_eq!(self.assert_accepted().principal().subject(), subject);
        self
    }

    fn assert_claim_str(&self, name: &str, value: &str) -> &Self {
        let claim = self
            .assert_accepted()
            .principal()
            .claim(name)
            .unwrap_or_else(|| panic!("Expected claim {name} to be present"));
        assert_eq!(
            claim.as_string().expect("Claim is not a string").as_deref(),
            Some(value),
            "Unexpected value for claim {name}"
        );
        self
    }

    fn assert_rejected_with(&self, category: &str) -> &Self {
        match self {
            Ok(credential) => panic!(
                "Expected rejection with {category}, accepted for {}",
                credential.principal().subject()
            ),
            Err(failure) => {
                assert_eq!(failure.category(), category, "Unexpected failure category");
                assert_eq!(failure.to_string(), GENERIC_FAILURE_MESSAGE);
            }
        }
        self
    }
}
