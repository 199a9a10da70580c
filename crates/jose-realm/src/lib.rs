//! JOSE bearer-token authentication core.
//!
//! Validates compact JWS and JWE tokens against an immutable, assembled
//! pipeline and exposes the accepted claims as typed [`Claim`]s on a
//! [`Principal`].
//!
//! # Modules
//!
//! - `algorithm` - JOSE algorithm families and header negotiation
//! - `assertions` - claim predicates and their AllOf/AnyOf/NoneOf composition
//! - `authenticator` - request-facing entry point and its rebuild cache
//! - `claims` - typed access to a single claim value
//! - `config` - realm settings and the assembled configuration
//! - `errors` - error types
//! - `jose` - compact serialization parsing
//! - `jwe` - decryption step
//! - `keys` - key store seam and verification keys
//! - `observability` - metrics
//! - `principal` - authenticated identity
//! - `transforms` - per-claim value transforms
//! - `trust` - X.509 trust anchors and chain validation
//! - `validator` - pipeline assembly and execution

pub mod algorithm;
pub mod assertions;
pub mod authenticator;
pub mod claims;
pub mod config;
pub mod errors;
pub mod jose;
pub mod jwe;
pub mod keys;
pub mod observability;
pub mod principal;
pub mod transforms;
pub mod trust;
pub mod validator;

pub use algorithm::{
    CompressionAlgorithm, ContentEncryptionAlgorithm, JoseAlgorithm, KeyManagementAlgorithm,
    SignatureAlgorithm,
};
pub use assertions::{AssertionConfig, AssertionSet, ClaimAssertion, CompositionMode};
pub use authenticator::{Authenticator, AuthenticatorCache, ConfigurationSource};
pub use claims::{Claim, ClaimKind, ConverterTable, EpochUnit};
pub use config::{
    Configuration, ConfigurationBuilder, EncryptionConfig, RealmSettings, SignatureKeys,
};
pub use errors::{AuthenticationFailure, ClaimError, KeyStoreError, ValidationError};
pub use keys::{KeyPair, KeyStore};
pub use principal::{Credential, Principal};
pub use transforms::{TransformChain, TransformConfig};
pub use trust::{TrustAnchorSet, TrustConfig};
pub use validator::{Validator, ValidatorAssembler};
