//! Fixed identifiers and key material for deterministic tests.

// Realm
pub const TEST_ISSUER: &str = "X";
pub const TEST_ISSUER_BASE_URL: &str = "https://issuer.example";
pub const TEST_AUDIENCE: &str = "api";

// Subjects
pub const TEST_USER_ALICE: &str = "alice";
pub const TEST_USER_BOB: &str = "bob";

// Key ids
pub const TEST_KID: &str = "k1";
pub const TEST_KID_2: &str = "k2";
pub const TEST_EC_KID: &str = "ec-1";
pub const TEST_ENCRYPTION_KID: &str = "enc-1";

// Symmetric material (test only)
pub const TEST_SECRET: &[u8] = b"test-hmac-secret-do-not-use-0001";
pub const TEST_SECRET_2: &[u8] = b"test-hmac-secret-do-not-use-0002";
pub const TEST_CEK: [u8; 32] = [0x42; 32];
pub const TEST_CEK_128: [u8; 16] = [0x24; 16];

/// Fixed "now" for tests that pin the clock (2023-11-14T22:13:20Z).
pub const TEST_NOW: i64 = 1_700_000_000;
