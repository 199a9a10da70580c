//! The authenticated identity produced by a successful validation.

use crate::claims::{Claim, ConverterTable};
use crate::errors::ClaimError;
use crate::transforms::TransformChain;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Subject plus every payload claim, each wrapped in a [`Claim`].
///
/// Values a [`Claim`] cannot represent (objects, arrays of non-scalars) are
/// left out of the typed map and only reachable through [`Principal::raw_claim`].
/// Built once per successful validation and immutable afterwards.
#[derive(Clone)]
pub struct Principal {
    subject: String,
    claims: HashMap<String, Claim>,
    payload: Map<String, Value>,
}

impl Principal {
    /// Wrap every entry of `payload` in a [`Claim`] carrying its configured transform.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` when `sub` is absent or not a string.
    pub fn from_payload(
        payload: &Map<String, Value>,
        transforms: &TransformChain,
        converters: &Arc<ConverterTable>,
    ) -> Result<Self, ClaimError> {
        let mut claims = HashMap::with_capacity(payload.len());
        for (name, raw) in payload {
            match Claim::with_transform(
                name.clone(),
                raw.clone(),
                transforms.for_claim(name),
                Arc::clone(converters),
            ) {
                Ok(claim) => {
                    claims.insert(name.clone(), claim);
                }
                Err(ClaimError::UnsupportedValue { reason, .. }) => {
                    tracing::debug!(target: "jose_realm.validator", claim = %name, reason = %reason, "Claim kept raw only");
                }
                Err(e) => return Err(e),
            }
        }

        // The subject is read from the raw payload; transforms shape claim
        // reads, not the identity itself.
        let subject = match payload.get("sub") {
            Some(Value::String(sub)) => sub.clone(),
            other => {
                return Err(ClaimError::TypeMismatch {
                    claim: "sub".to_string(),
                    expected: "string",
                    found: other.map_or("absent", crate::claims::value_type_name),
                })
            }
        };

        Ok(Self {
            subject,
            claims,
            payload: payload.clone(),
        })
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The claim named `name`, if present in the payload.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Claim> {
        self.claims.get(name)
    }

    /// Untransformed payload value of `name`, including values with no typed
    /// [`Claim`].
    #[must_use]
    pub fn raw_claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    #[must_use]
    pub fn has_claim(&self, name: &str) -> bool {
        self.claims.contains_key(name)
    }

    /// Names of all claims, sorted.
    #[must_use]
    pub fn claim_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.claims.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Iterate over all claims in unspecified order.
    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    /// Transformed `iss`, when present and a string.
    #[must_use]
    pub fn issuer(&self) -> Option<String> {
        self.claim("iss").and_then(|c| c.as_string().ok().flatten())
    }

    /// Transformed `aud` as a list: a single string becomes a one-element list.
    #[must_use]
    pub fn audience(&self) -> Vec<String> {
        let Some(aud) = self.claim("aud") else {
            return Vec::new();
        };
        if let Ok(Some(list)) = aud.as_list_of::<String>() {
            return list;
        }
        aud.as_string().ok().flatten().into_iter().collect()
    }

    /// Distinct string values of the array claim `claim_name`.
    ///
    /// # Errors
    ///
    /// Propagates the claim accessor's `TypeMismatch`.
    pub fn groups(&self, claim_name: &str) -> Result<Vec<String>, ClaimError> {
        match self.claim(claim_name) {
            Some(claim) => Ok(claim.as_set_of::<String>()?.unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("subject", &"[REDACTED]")
            .field("claims", &self.claim_names())
            .finish()
    }
}

/// What a successful validation hands back to the caller.
#[derive(Clone, Debug)]
pub struct Credential {
    principal: Principal,
}

impl Credential {
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[must_use]
    pub fn into_principal(self) -> Principal {
        self.principal
    }
}
