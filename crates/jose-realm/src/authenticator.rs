//! Request-facing authenticator and its rebuild cache.
//!
//! [`Authenticator`] is the only boundary callers cross: every pipeline
//! failure comes back as a single [`AuthenticationFailure`] carrying the safe
//! generic message, while the classified cause goes to logs and metrics.
//!
//! [`AuthenticatorCache`] memoizes one assembled authenticator per
//! configuration scope. Assembly may block on key-store access, so at most one
//! build runs at a time; readers never observe a half-built instance.

use crate::config::Configuration;
use crate::errors::{AuthenticationFailure, ValidationError};
use crate::observability::metrics;
use crate::principal::Credential;
use crate::validator::{Validator, ValidatorAssembler};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Turns bearer tokens into [`Credential`]s.
#[derive(Debug)]
pub struct Authenticator {
    validator: Validator,
}

impl Authenticator {
    #[must_use]
    pub fn new(validator: Validator) -> Self {
        Self { validator }
    }

    /// Assemble a validator from `config` and wrap it.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` from [`ValidatorAssembler::assemble`].
    pub fn from_configuration(config: &Configuration) -> Result<Self, ValidationError> {
        ValidatorAssembler::assemble(config).map(Self::new)
    }

    /// Validate `token` against the current time.
    ///
    /// # Errors
    ///
    /// [`AuthenticationFailure`] when any pipeline stage rejects the token.
    pub fn validate(&self, token: &str) -> Result<Credential, AuthenticationFailure> {
        self.validate_at(token, chrono::Utc::now().timestamp())
    }

    /// Validate `token` as of `now` (epoch seconds).
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    #[instrument(skip_all)]
    pub fn validate_at(&self, token: &str, now: i64) -> Result<Credential, AuthenticationFailure> {
        let start = Instant::now();
        let result = self.validator.validate_at(token, now);
        let duration = start.elapsed();

        match result {
            Ok(principal) => {
                metrics::record_token_validation("success", None, duration);
                Ok(Credential::new(principal))
            }
            Err(e) => {
                metrics::record_token_validation("error", Some(e.category()), duration);
                tracing::debug!(
                    target: "jose_realm.authenticator",
                    error_category = e.category(),
                    "Authentication failed"
                );
                Err(AuthenticationFailure::from(&e))
            }
        }
    }

    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }
}

/// Supplies the current configuration on every cache rebuild.
pub trait ConfigurationSource: Send + Sync {
    fn configuration(&self) -> Configuration;
}

impl<F> ConfigurationSource for F
where
    F: Fn() -> Configuration + Send + Sync,
{
    fn configuration(&self) -> Configuration {
        self()
    }
}

/// Holds at most one assembled [`Authenticator`].
///
/// `get()` uses double-checked locking around a build mutex. `invalidate()`
/// only touches the published slot, so it never waits for an in-flight build;
/// a build that started before an invalidation is handed to its caller but is
/// not published.
pub struct AuthenticatorCache {
    slot: RwLock<Option<Arc<Authenticator>>>,
    build_lock: Mutex<()>,
    /// Bumped on every invalidation. Guarded by `slot` for writes.
    generation: AtomicU64,
    source: Arc<dyn ConfigurationSource>,
}

impl AuthenticatorCache {
    pub fn new(source: impl ConfigurationSource + 'static) -> Self {
        Self::from_source(Arc::new(source))
    }

    pub fn from_source(source: Arc<dyn ConfigurationSource>) -> Self {
        Self {
            slot: RwLock::new(None),
            build_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            source,
        }
    }

    /// A cache over a configuration that never changes.
    #[must_use]
    pub fn from_configuration(config: Configuration) -> Self {
        Self::new(move || config.clone())
    }

    /// The cached authenticator, building one if none is published.
    ///
    /// # Errors
    ///
    /// The assembly failure. Failures are not cached; the next call retries.
    #[instrument(skip_all)]
    pub fn get(&self) -> Result<Arc<Authenticator>, ValidationError> {
        if let Some(authenticator) = self.slot.read().as_ref() {
            return Ok(Arc::clone(authenticator));
        }

        let _build = self.build_lock.lock();
        if let Some(authenticator) = self.slot.read().as_ref() {
            return Ok(Arc::clone(authenticator));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let config = self.source.configuration();
        let authenticator = match Authenticator::from_configuration(&config) {
            Ok(authenticator) => Arc::new(authenticator),
            Err(e) => {
                metrics::record_authenticator_build("error");
                tracing::warn!(
                    target: "jose_realm.cache",
                    error_category = e.category(),
                    error = %e,
                    "Authenticator build failed"
                );
                return Err(e);
            }
        };
        metrics::record_authenticator_build("success");

        let mut slot = self.slot.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *slot = Some(Arc::clone(&authenticator));
            tracing::info!(target: "jose_realm.cache", generation, "Authenticator built");
        } else {
            tracing::info!(
                target: "jose_realm.cache",
                generation,
                "Authenticator built during invalidation, not published"
            );
        }
        Ok(authenticator)
    }

    /// Drop the published authenticator so the next `get()` rebuilds.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let had_instance = slot.take().is_some();
        drop(slot);

        metrics::record_authenticator_invalidation();
        tracing::info!(
            target: "jose_realm.cache",
            generation,
            had_instance,
            "Authenticator invalidated"
        );
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Number of invalidations so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl fmt::Debug for AuthenticatorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatorCache")
            .field("built", &self.is_built())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
