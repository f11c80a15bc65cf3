use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature, as sent by the platform.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Hex-encoded HMAC-SHA256 of a raw webhook body.
pub fn body_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the `X-Hub-Signature-256` header against the raw request body.
///
/// The header format is `sha256=<hex digest>`. A missing or malformed header
/// rejects; this never panics and must run before the body is parsed.
pub fn verify_webhook_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else {
        tracing::warn!("webhook signature header missing");
        return false;
    };
    let Some(presented) = header.strip_prefix("sha256=") else {
        tracing::warn!("webhook signature header not sha256-prefixed");
        return false;
    };
    let expected = body_signature(secret, body);
    // Constant-time comparison to prevent timing attacks
    constant_time_eq(expected.as_bytes(), presented.as_bytes())
}

/// Constant-time byte comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
