//! HMAC-SHA256 payload signatures.
//!
//! Every outbound request carries `X-Medhook-Signature: sha256=<hex>`, the
//! HMAC of the raw body under the endpoint's secret. Receivers recompute it
//! to authenticate the sender.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::error::{DeliveryError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Prefix of every signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

const SECRET_PREFIX: &str = "whsec_";
const SECRET_BYTES: usize = 32;

/// Signs `body` with `secret`, returning the full header value.
///
/// # Errors
///
/// Returns `DeliveryError::Configuration` if the MAC rejects the key.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DeliveryError::configuration(format!("invalid signing secret: {e}")))?;
    mac.update(body);
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks a `sha256=<hex>` header value against `body` in constant time.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Generates a random endpoint secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}
