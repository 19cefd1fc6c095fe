//! Webhook signature verification.
//!
//! LINE signs every webhook body with HMAC-SHA256 keyed by the channel secret and sends
//! the base64 digest in `x-line-signature`. Verification runs over the raw body bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-line-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header is not valid base64")]
    Malformed,
    #[error("signature does not match body")]
    Mismatch,
}

fn keyed(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

/// Base64 HMAC-SHA256 of `body` keyed by `secret`, as LINE puts it in the header.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = keyed(secret);
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify the header value against the raw body. The digest comparison is constant-time.
pub fn verify(secret: &str, body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Missing)?;
    let provided = STANDARD
        .decode(signature)
        .map_err(|_| SignatureError::Malformed)?;
    let mut mac = keyed(secret);
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}
