//! Webhook payload authentication.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw body, using the
//! shared secret configured on the hook, and sends the result in the
//! `X-Hub-Signature-256` header as `sha256=<hex>`. Verification happens
//! before the body is parsed; an unauthenticated delivery is rejected without
//! looking at its contents.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Extracts the raw signature bytes from a `sha256=<hex>` header value.
///
/// Returns `None` for a missing prefix, a different algorithm, or bad hex.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 of a payload under the given secret.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature the way GitHub sends it: `sha256=<hex>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Checks a delivery's `X-Hub-Signature-256` header against the raw body.
///
/// The comparison is constant-time (via `Mac::verify_slice`). Malformed
/// headers fail verification rather than erroring.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let claimed = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&claimed).is_ok()
}
