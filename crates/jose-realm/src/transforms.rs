//! Claim transforms and their per-claim composition.
//!
//! A transform maps one decoded payload value to another. Transforms are
//! declared as `(claim-name, transform)` pairs; all transforms declared for the
//! same claim are composed left-to-right into one function, which every
//! [`Claim`](crate::claims::Claim) re-applies on each read.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A pure mapping over one claim value.
pub trait ClaimTransform: Send + Sync {
    /// Map `value` to its transformed form.
    fn apply(&self, value: Value) -> Value;
}

impl<F> ClaimTransform for F
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn apply(&self, value: Value) -> Value {
        self(value)
    }
}

/// Shared handle to a transform.
pub type SharedTransform = Arc<dyn ClaimTransform>;

struct Identity;

impl ClaimTransform for Identity {
    fn apply(&self, value: Value) -> Value {
        value
    }
}

struct Composed(Vec<SharedTransform>);

impl ClaimTransform for Composed {
    fn apply(&self, value: Value) -> Value {
        self.0.iter().fold(value, |acc, transform| transform.apply(acc))
    }
}

/// The identity transform.
#[must_use]
pub fn identity() -> SharedTransform {
    Arc::new(Identity)
}

/// Compose `chain` so that `compose([f, g, h])(x) == h(g(f(x)))`.
///
/// A single transform is returned as-is; an empty chain yields [`identity`].
#[must_use]
pub fn compose(chain: Vec<SharedTransform>) -> SharedTransform {
    if chain.len() <= 1 {
        return chain.into_iter().next().unwrap_or_else(identity);
    }
    Arc::new(Composed(chain))
}

/// One declared transform for one claim.
#[derive(Clone)]
pub struct TransformConfig {
    /// Name of the claim the transform applies to.
    pub claim_name: String,
    /// The transform itself.
    pub transform: SharedTransform,
}

impl TransformConfig {
    pub fn new(claim_name: impl Into<String>, transform: impl ClaimTransform + 'static) -> Self {
        Self {
            claim_name: claim_name.into(),
            transform: Arc::new(transform),
        }
    }
}

impl fmt::Debug for TransformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformConfig")
            .field("claim_name", &self.claim_name)
            .finish_non_exhaustive()
    }
}

/// Per-claim composed transforms.
#[derive(Clone)]
pub struct TransformChain {
    by_claim: HashMap<String, SharedTransform>,
    identity: SharedTransform,
}

impl TransformChain {
    /// Group `configs` by claim name, preserving declaration order within each
    /// claim, and compose each group.
    #[must_use]
    pub fn from_configs(configs: &[TransformConfig]) -> Self {
        let mut grouped: HashMap<String, Vec<SharedTransform>> = HashMap::new();
        for config in configs {
            grouped
                .entry(config.claim_name.clone())
                .or_default()
                .push(Arc::clone(&config.transform));
        }

        let by_claim = grouped
            .into_iter()
            .map(|(name, chain)| (name, compose(chain)))
            .collect();

        Self {
            by_claim,
            identity: identity(),
        }
    }

    /// The composed transform for `claim_name`, or the identity.
    #[must_use]
    pub fn for_claim(&self, claim_name: &str) -> SharedTransform {
        self.by_claim
            .get(claim_name)
            .map_or_else(|| Arc::clone(&self.identity), Arc::clone)
    }

    /// Whether any transform is configured for `claim_name`.
    #[must_use]
    pub fn contains(&self, claim_name: &str) -> bool {
        self.by_claim.contains_key(claim_name)
    }

    /// Number of claims with a configured transform.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_claim.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_claim.is_empty()
    }
}

impl Default for TransformChain {
    fn default() -> Self {
        Self::from_configs(&[])
    }
}

impl fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut claims: Vec<&String> = self.by_claim.keys().collect();
        claims.sort();
        f.debug_struct("TransformChain")
            .field("claims", &claims)
            .finish()
    }
}

/// Ready-made transforms.
///
/// String transforms also map over the string elements of an array; any
/// other value passes through untouched.
pub mod builtin {
    use super::ClaimTransform;
    use serde_json::Value;

    fn map_strings(value: Value, f: &dyn Fn(String) -> String) -> Value {
        match value {
            Value::String(s) => Value::String(f(s)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Value::String(f(s)),
                        other => other,
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    /// Lowercase string values.
    #[must_use]
    pub fn to_lowercase() -> impl ClaimTransform {
        |value: Value| map_strings(value, &|s| s.to_lowercase())
    }

    /// Prepend `prefix` to string values.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> impl ClaimTransform {
        let prefix = prefix.into();
        move |value: Value| map_strings(value, &|s| format!("{prefix}{s}"))
    }

    /// Strip `prefix` from string values that start with it.
    #[must_use]
    pub fn strip_prefix(prefix: impl Into<String>) -> impl ClaimTransform {
        let prefix = prefix.into();
        move |value: Value| {
            map_strings(value, &|s| {
                s.strip_prefix(prefix.as_str())
                    .map_or_else(|| s.clone(), ToString::to_string)
            })
        }
    }

    /// Replace every occurrence of `from` with `to` in string values.
    #[must_use]
    pub fn replace(from: impl Into<String>, to: impl Into<String>) -> impl ClaimTransform {
        let from = from.into();
        let to = to.into();
        move |value: Value| map_strings(value, &|s| s.replace(from.as_str(), to.as_str()))
    }
}
