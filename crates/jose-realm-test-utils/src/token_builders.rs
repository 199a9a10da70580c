//! Builder patterns for test claims and compact tokens
//!
//! Provides fluent APIs for creating claim sets, signed tokens (HS256/ES256)
//! and `dir` encrypted tokens.

use crate::crypto_fixtures::{deflate, seal_a128gcm, seal_a256gcm};
use crate::test_ids::{TEST_AUDIENCE, TEST_ISSUER, TEST_USER_ALICE};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::hmac;
use serde_json::{json, Map, Value};

/// Builder for creating test claim sets
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaimsBuilder::new()
///     .for_user("alice")
///     .claim("grp", json!(["A", "B"]))
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestClaimsBuilder {
    claims: Map<String, Value>,
}

impl TestClaimsBuilder {
    /// Create a claim set with `sub`, `iss`, `aud`, `iat` and a one hour `exp`
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!(TEST_USER_ALICE));
        claims.insert("iss".to_string(), json!(TEST_ISSUER));
        claims.insert("aud".to_string(), json!(TEST_AUDIENCE));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        Self { claims }
    }

    /// Set the subject
    pub fn for_user(self, subject: &str) -> Self {
        self.claim("sub", json!(subject))
    }

    /// Set the issuer
    pub fn issuer(self, issuer: &str) -> Self {
        self.claim("iss", json!(issuer))
    }

    /// Set the audience
    pub fn audience(self, audience: Value) -> Self {
        self.claim("aud", audience)
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.expires_at((Utc::now() + Duration::seconds(seconds)).timestamp())
    }

    /// Set the absolute expiration timestamp
    pub fn expires_at(self, timestamp: i64) -> Self {
        self.claim("exp", json!(timestamp))
    }

    /// Set issued-at timestamp
    pub fn issued_at(self, timestamp: i64) -> Self {
        self.claim("iat", json!(timestamp))
    }

    /// Set not-before timestamp
    pub fn not_before(self, timestamp: i64) -> Self {
        self.claim("nbf", json!(timestamp))
    }

    /// Set any claim
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}

impl Default for TestClaimsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Signing material for [`TestJwsBuilder`].
enum SigningKey {
    Hmac(Vec<u8>),
    EcPkcs8(Vec<u8>),
}

/// Builder for compact JWS tokens
///
/// # Example
/// ```rust,ignore
/// let token = TestJwsBuilder::es256(&pkcs8)
///     .x5c(chain)
///     .sign(&claims);
/// ```
pub struct TestJwsBuilder {
    key: SigningKey,
    kid: Option<String>,
    x5c: Option<Vec<String>>,
}

impl TestJwsBuilder {
    /// HS256 with a shared secret
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: SigningKey::Hmac(secret.to_vec()),
            kid: None,
            x5c: None,
        }
    }

    /// ES256 with a PKCS#8 P-256 private key
    pub fn es256(private_pkcs8: &[u8]) -> Self {
        Self {
            key: SigningKey::EcPkcs8(private_pkcs8.to_vec()),
            kid: None,
            x5c: None,
        }
    }

    /// Set the `kid` header
    pub fn kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// Set the `x5c` header (standard base64 DER, leaf first)
    pub fn x5c(mut self, chain: Vec<String>) -> Self {
        self.x5c = Some(chain);
        self
    }

    /// Sign `claims` into a compact JWS
    pub fn sign(&self, claims: &Value) -> String {
        let (algorithm, key) = match &self.key {
            SigningKey::Hmac(secret) => (Algorithm::HS256, EncodingKey::from_secret(secret)),
            SigningKey::EcPkcs8(der) => (Algorithm::ES256, EncodingKey::from_ec_der(der)),
        };
        let mut header = Header::new(algorithm);
        header.kid = self.kid.clone();
        header.x5c = self.x5c.clone();
        encode(&header, claims, &key).expect("Failed to sign test token")
    }
}

/// HS256-sign `claims` under an arbitrary header.
///
/// For headers `jsonwebtoken` refuses to produce (unknown `alg`, `crit`,
/// mismatched algorithms).
pub fn sign_with_raw_header(header: &Value, claims: &Value, secret: &[u8]) -> String {
    let input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let signature = URL_SAFE_NO_PAD.encode(hmac::sign(&key, input.as_bytes()).as_ref());
    format!("{input}.{signature}")
}

/// Builder for `dir` JWE tokens
///
/// # Example
/// ```rust,ignore
/// let token = TestJweBuilder::a256gcm(&TEST_CEK)
///     .kid(TEST_ENCRYPTION_KID)
///     .nested_jwt()
///     .seal(inner_jws.as_bytes());
/// ```
pub struct TestJweBuilder {
    cek: Vec<u8>,
    enc: &'static str,
    kid: Option<String>,
    cty: Option<String>,
    deflate: bool,
}

impl TestJweBuilder {
    /// `dir` + `A256GCM` with a 32 byte content key
    pub fn a256gcm(cek: &[u8]) -> Self {
        Self::with_enc(cek, "A256GCM")
    }

    /// `dir` + `A128GCM` with a 16 byte content key
    pub fn a128gcm(cek: &[u8]) -> Self {
        Self::with_enc(cek, "A128GCM")
    }

    fn with_enc(cek: &[u8], enc: &'static str) -> Self {
        Self {
            cek: cek.to_vec(),
            enc,
            kid: None,
            cty: None,
            deflate: false,
        }
    }

    /// Set the `kid` header
    pub fn kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// Mark the payload as a nested JWT (`cty: JWT`)
    pub fn nested_jwt(mut self) -> Self {
        self.cty = Some("JWT".to_string());
        self
    }

    /// Compress the payload with `zip: DEF`
    pub fn deflate(mut self) -> Self {
        self.deflate = true;
        self
    }

    /// The protected header this builder will emit
    pub fn header(&self) -> Value {
        let mut header = Map::new();
        header.insert("alg".to_string(), json!("dir"));
        header.insert("enc".to_string(), json!(self.enc));
        if let Some(kid) = &self.kid {
            header.insert("kid".to_string(), json!(kid));
        }
        if let Some(cty) = &self.cty {
            header.insert("cty".to_string(), json!(cty));
        }
        if self.deflate {
            header.insert("zip".to_string(), json!("DEF"));
        }
        Value::Object(header)
    }

    /// Encrypt `plaintext` into a compact JWE
    pub fn seal(&self, plaintext: &[u8]) -> String {
        self.seal_with_header(&self.header(), plaintext)
    }

    /// Encrypt under an arbitrary protected header
    pub fn seal_with_header(&self, header: &Value, plaintext: &[u8]) -> String {
        let protected = URL_SAFE_NO_PAD.encode(header.to_string());
        let payload = if self.deflate {
            deflate(plaintext)
        } else {
            plaintext.to_vec()
        };
        let sealed = match self.enc {
            "A128GCM" => seal_a128gcm(&self.cek, protected.as_bytes(), &payload),
            _ => seal_a256gcm(&self.cek, protected.as_bytes(), &payload),
        };
        format!(
            "{protected}..{}.{}.{}",
            URL_SAFE_NO_PAD.encode(sealed.iv),
            URL_SAFE_NO_PAD.encode(&sealed.ciphertext),
            URL_SAFE_NO_PAD.encode(&sealed.tag)
        )
    }
}
