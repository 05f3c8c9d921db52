//! HMAC signing for outbound deliveries.
//!
//! Outbound notifications present `sha256=<hex>` computed over the raw
//! JSON body. This is deliberately a different scheme from the
//! provider's inbound `t=…,v0=…` format.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Signature header value for a raw body.
#[must_use]
pub fn sign_body(secret: &str, body: &str) -> String {
	let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
	mac.update(body.as_bytes());
	format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification of a presented `sha256=<hex>` header.
/// Length mismatch is an immediate non-match.
#[must_use]
pub fn verify_body(secret: &str, body: &str, presented: &str) -> bool {
	let Some(presented_hex) = presented.strip_prefix(SIGNATURE_PREFIX) else {
		return false;
	};

	let Ok(presented_bytes) = hex::decode(presented_hex) else {
		return false;
	};

	if presented_bytes.len() != 32 {
		return false;
	}

	let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
	mac.update(body.as_bytes());
	mac.verify_slice(&presented_bytes).is_ok()
}
