// =============================================================================
// Webhook signature verification — HMAC-SHA256 over the raw body
// =============================================================================
//
// The platform signs every webhook delivery: base64(HMAC-SHA256(channel
// secret, raw request body)), carried in the `x-line-signature` header.
// Verification recomputes the MAC over the exact raw bytes (before any JSON
// parsing) and compares in constant time.
// =============================================================================

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// Compute the expected signature for `body` under `secret`.
pub fn signature_b64(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify a presented signature against the raw body. An empty secret
/// rejects everything — a misconfigured relay must not accept traffic.
pub fn verify(secret: &str, body: &[u8], presented: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    constant_time_eq(signature_b64(secret, body).as_bytes(), presented.as_bytes())
}

/// Compare two byte slices in constant time. The comparison examines every
/// byte even after a mismatch is found, preventing timing side-channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// =============================================================================
// Tests
// =============================================================================
