//! Claim assertions and their composition.
//!
//! An assertion is a pure predicate over the verified claim set. Assertions
//! compose into an [`AssertionSet`] in one of three modes:
//!
//! | Mode     | Holds when               | Empty set        |
//! |----------|--------------------------|------------------|
//! | `AllOf`  | every member holds       | `empty_result`   |
//! | `AnyOf`  | at least one member holds| `empty_result`   |
//! | `NoneOf` | no member holds          | `empty_result`   |
//!
//! `empty_result` defaults to `true` for every mode. An empty `AnyOf` is
//! therefore vacuously satisfied unless the set is built with
//! [`AssertionSet::with_empty_result`]`(false)`.

use crate::claims::ClaimScalar;
use crate::errors::ValidationError;
use crate::trust::CertificateIdentity;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// What an assertion is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct AssertionContext<'a> {
    /// The verified, untransformed claim set.
    pub claims: &'a Map<String, Value>,
    /// Evaluation time, epoch seconds.
    pub now: i64,
    /// Leaf certificate identity when the signature was verified via `x5c`.
    pub certificate: Option<&'a CertificateIdentity>,
}

impl<'a> AssertionContext<'a> {
    #[must_use]
    pub fn new(claims: &'a Map<String, Value>, now: i64) -> Self {
        Self {
            claims,
            now,
            certificate: None,
        }
    }

    #[must_use]
    pub fn with_certificate(mut self, certificate: Option<&'a CertificateIdentity>) -> Self {
        self.certificate = certificate;
        self
    }

    /// String claim `name`, if present and a string.
    #[must_use]
    pub fn string_claim(&self, name: &str) -> Option<&'a str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Numeric date claim `name` in epoch seconds.
    #[must_use]
    pub fn numeric_date(&self, name: &str) -> Option<i64> {
        self.claims.get(name).and_then(i64::from_value)
    }
}

/// A named predicate over the claim set.
pub trait ClaimAssertion: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Whether the assertion holds.
    fn test(&self, ctx: &AssertionContext<'_>) -> bool;

    /// The error reported when [`test`](Self::test) is false.
    fn failure(&self, ctx: &AssertionContext<'_>) -> ValidationError {
        let _ = ctx;
        ValidationError::AssertionFailed {
            name: self.name().to_string(),
            message: "assertion did not hold".to_string(),
        }
    }
}

/// Shared handle to an assertion.
pub type SharedAssertion = Arc<dyn ClaimAssertion>;

type Predicate = Arc<dyn Fn(&AssertionContext<'_>) -> bool + Send + Sync>;
type ErrorFactory = Arc<dyn Fn(&AssertionContext<'_>) -> String + Send + Sync>;

/// A user-declared assertion: name, predicate, and error-message factory.
#[derive(Clone)]
pub struct AssertionConfig {
    name: String,
    predicate: Predicate,
    error_factory: ErrorFactory,
}

impl AssertionConfig {
    pub fn new<P, E>(name: impl Into<String>, predicate: P, error_factory: E) -> Self
    where
        P: Fn(&AssertionContext<'_>) -> bool + Send + Sync + 'static,
        E: Fn(&AssertionContext<'_>) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            error_factory: Arc::new(error_factory),
        }
    }

    /// Assertion that holds when string claim `claim` equals `expected`.
    pub fn claim_equals(claim: impl Into<String>, expected: impl Into<String>) -> Self {
        let claim = claim.into();
        let expected = expected.into();
        let name = format!("{claim}-equals");
        let message = format!("claim '{claim}' must equal '{expected}'");
        Self::new(
            name,
            move |ctx| ctx.string_claim(&claim) == Some(expected.as_str()),
            move |_| message.clone(),
        )
    }
}

impl ClaimAssertion for AssertionConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn test(&self, ctx: &AssertionContext<'_>) -> bool {
        (self.predicate)(ctx)
    }

    fn failure(&self, ctx: &AssertionContext<'_>) -> ValidationError {
        ValidationError::AssertionFailed {
            name: self.name.clone(),
            message: (self.error_factory)(ctx),
        }
    }
}

impl fmt::Debug for AssertionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionConfig")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// How the members of an [`AssertionSet`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionMode {
    AllOf,
    AnyOf,
    NoneOf,
}

/// An immutable composition of assertions.
#[derive(Clone)]
pub struct AssertionSet {
    name: String,
    mode: CompositionMode,
    members: Vec<SharedAssertion>,
    empty_result: bool,
}

impl AssertionSet {
    pub fn new(name: impl Into<String>, mode: CompositionMode, members: Vec<SharedAssertion>) -> Self {
        Self {
            name: name.into(),
            mode,
            members,
            empty_result: true,
        }
    }

    pub fn all_of(name: impl Into<String>, members: Vec<SharedAssertion>) -> Self {
        Self::new(name, CompositionMode::AllOf, members)
    }

    pub fn any_of(name: impl Into<String>, members: Vec<SharedAssertion>) -> Self {
        Self::new(name, CompositionMode::AnyOf, members)
    }

    pub fn none_of(name: impl Into<String>, members: Vec<SharedAssertion>) -> Self {
        Self::new(name, CompositionMode::NoneOf, members)
    }

    /// Override the result of evaluating an empty set.
    #[must_use]
    pub fn with_empty_result(mut self, result: bool) -> Self {
        self.empty_result = result;
        self
    }

    #[must_use]
    pub fn mode(&self) -> CompositionMode {
        self.mode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Names of the members, in order.
    #[must_use]
    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name()).collect()
    }

    /// Evaluate the set.
    ///
    /// `AllOf` stops at the first failing member and reports its failure;
    /// `NoneOf` stops at the first member that holds.
    ///
    /// # Errors
    ///
    /// The failure of the deciding member, or an `AssertionFailed` naming the set.
    pub fn evaluate(&self, ctx: &AssertionContext<'_>) -> Result<(), ValidationError> {
        if self.members.is_empty() {
            return if self.empty_result {
                Ok(())
            } else {
                Err(self.set_failure("empty assertion group"))
            };
        }

        match self.mode {
            CompositionMode::AllOf => match self.members.iter().find(|m| !m.test(ctx)) {
                Some(failed) => Err(failed.failure(ctx)),
                None => Ok(()),
            },
            CompositionMode::AnyOf => {
                if self.members.iter().any(|m| m.test(ctx)) {
                    Ok(())
                } else {
                    Err(self.set_failure(&format!(
                        "none of [{}] held",
                        self.member_names().join(", ")
                    )))
                }
            }
            CompositionMode::NoneOf => match self.members.iter().find(|m| m.test(ctx)) {
                Some(held) => Err(ValidationError::AssertionFailed {
                    name: held.name().to_string(),
                    message: format!("'{}' must not hold", held.name()),
                }),
                None => Ok(()),
            },
        }
    }

    fn set_failure(&self, message: &str) -> ValidationError {
        ValidationError::AssertionFailed {
            name: self.name.clone(),
            message: message.to_string(),
        }
    }
}

impl ClaimAssertion for AssertionSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn test(&self, ctx: &AssertionContext<'_>) -> bool {
        self.evaluate(ctx).is_ok()
    }

    fn failure(&self, ctx: &AssertionContext<'_>) -> ValidationError {
        self.evaluate(ctx)
            .err()
            .unwrap_or_else(|| self.set_failure("assertion group did not hold"))
    }
}

impl fmt::Debug for AssertionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionSet")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("members", &self.member_names())
            .field("empty_result", &self.empty_result)
            .finish()
    }
}

/// Assertions every validator installs.
pub mod builtin {
    use super::{AssertionContext, ClaimAssertion};
    use crate::errors::ValidationError;
    use serde_json::Value;

    /// `iss` equals the configured issuer.
    #[derive(Debug, Clone)]
    pub struct IssuerEquals {
        pub issuer: String,
    }

    impl ClaimAssertion for IssuerEquals {
        fn name(&self) -> &str {
            "issuer"
        }

        fn test(&self, ctx: &AssertionContext<'_>) -> bool {
            ctx.string_claim("iss") == Some(self.issuer.as_str())
        }

        fn failure(&self, ctx: &AssertionContext<'_>) -> ValidationError {
            ValidationError::AssertionFailed {
                name: self.name().to_string(),
                message: format!(
                    "expected issuer '{}', got '{}'",
                    self.issuer,
                    ctx.string_claim("iss").unwrap_or("<absent>")
                ),
            }
        }
    }

    /// `exp` is present and `now <= exp + tolerance`.
    #[derive(Debug, Clone)]
    pub struct NotExpired {
        pub tolerance_seconds: i64,
    }

    impl ClaimAssertion for NotExpired {
        fn name(&self) -> &str {
            "not-expired"
        }

        fn test(&self, ctx: &AssertionContext<'_>) -> bool {
            ctx.numeric_date("exp")
                .is_some_and(|exp| ctx.now <= exp.saturating_add(self.tolerance_seconds))
        }

        fn failure(&self, ctx: &AssertionContext<'_>) -> ValidationError {
            match ctx.numeric_date("exp") {
                Some(exp) => ValidationError::Expired(format!(
                    "exp {exp} is before now {} minus tolerance {}s",
                    ctx.now, self.tolerance_seconds
                )),
                None => ValidationError::Expired("missing or non-numeric exp".to_string()),
            }
        }
    }

    /// `nbf` (when present) is not after `now + tolerance`, and `iat` (when
    /// present) is not further in the future than the tolerance.
    #[derive(Debug, Clone)]
    pub struct NotBefore {
        pub tolerance_seconds: i64,
    }

    impl NotBefore {
        fn violation(&self, ctx: &AssertionContext<'_>) -> Option<String> {
            let latest = ctx.now.saturating_add(self.tolerance_seconds);
            for claim in ["nbf", "iat"] {
                match ctx.claims.get(claim) {
                    None => {}
                    Some(value) => match ctx.numeric_date(claim) {
                        Some(at) if at > latest => {
                            return Some(format!(
                                "{claim} {at} is after now {} plus tolerance {}s",
                                ctx.now, self.tolerance_seconds
                            ))
                        }
                        Some(_) => {}
                        None => {
                            return Some(format!(
                                "{claim} is not a numeric date: {}",
                                crate::claims::value_type_name(value)
                            ))
                        }
                    },
                }
            }
            None
        }
    }

    impl ClaimAssertion for NotBefore {
        fn name(&self) -> &str {
            "not-before"
        }

        fn test(&self, ctx: &AssertionContext<'_>) -> bool {
            self.violation(ctx).is_none()
        }

        fn failure(&self, ctx: &AssertionContext<'_>) -> ValidationError {
            ValidationError::Expired(
                self.violation(ctx)
                    .unwrap_or_else(|| "token not yet valid".to_string()),
            )
        }
    }

    /// `sub` is a non-empty string.
    #[derive(Debug, Clone, Copy)]
    pub struct SubjectPresent;

    impl ClaimAssertion for SubjectPresent {
        fn name(&self) -> &str {
            "subject-present"
        }

        fn test(&self, ctx: &AssertionContext<'_>) -> bool {
            ctx.string_claim("sub").is_some_and(|sub| !sub.is_empty())
        }

        fn failure(&self, _ctx: &AssertionContext<'_>) -> ValidationError {
            ValidationError::AssertionFailed {
                name: self.name().to_string(),
                message: "token has no subject".to_string(),
            }
        }
    }

    /// The leaf certificate's subject equals `expected`.
    ///
    /// Holds trivially when the signature was verified with a key selected by
    /// `kid` rather than through a certificate chain.
    #[derive(Debug, Clone)]
    pub struct CertificateSubjectMatches {
        pub expected: String,
        pub common_name_only: bool,
    }

    impl CertificateSubjectMatches {
        fn presented<'a>(&self, ctx: &AssertionContext<'a>) -> Option<Option<&'a str>> {
            ctx.certificate.map(|cert| {
                if self.common_name_only {
                    cert.common_name.as_deref()
                } else {
                    Some(cert.subject.as_str())
                }
            })
        }
    }

    impl ClaimAssertion for CertificateSubjectMatches {
        fn name(&self) -> &str {
            "certificate-subject"
        }

        fn test(&self, ctx: &AssertionContext<'_>) -> bool {
            match self.presented(ctx) {
                None => true,
                Some(presented) => presented == Some(self.expected.as_str()),
            }
        }

        fn failure(&self, ctx: &AssertionContext<'_>) -> ValidationError {
            ValidationError::AssertionFailed {
                name: self.name().to_string(),
                message: format!(
                    "expected certificate subject '{}', got '{}'",
                    self.expected,
                    self.presented(ctx).flatten().unwrap_or("<none>")
                ),
            }
        }
    }

    /// `aud` equals, or (as an array) contains, the configured audience.
    #[derive(Debug, Clone)]
    pub struct AudienceEquals {
        pub audience: String,
    }

    impl ClaimAssertion for AudienceEquals {
        fn name(&self) -> &str {
            "audience"
        }

        fn test(&self, ctx: &AssertionContext<'_>) -> bool {
            match ctx.claims.get("aud") {
                Some(Value::String(aud)) => *aud == self.audience,
                Some(Value::Array(auds)) => auds
                    .iter()
                    .any(|aud| aud.as_str() == Some(self.audience.as_str())),
                _ => false,
            }
        }

        fn failure(&self, _ctx: &AssertionContext<'_>) -> ValidationError {
            ValidationError::AssertionFailed {
                name: self.name().to_string(),
                message: format!("expected audience '{}'", self.audience),
            }
        }
    }
}
