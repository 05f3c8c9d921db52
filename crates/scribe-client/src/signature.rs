//! Verification of the provider's callback signature.
//!
//! The provider signs `<timestamp>.<raw-json-body>` with a shared secret
//! and presents the result as `t=<unix>,v0=<hex>`. This scheme is not
//! the same as the one we use for outbound client notifications.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use bridge_core::BridgeError;

type HmacSha256 = Hmac<Sha256>;

/// Produce a `t=<unix>,v0=<hex>` header for a body. In production the
/// provider does this signing; this end exists for tests and local
/// tooling that replay callbacks.
#[must_use]
pub fn sign_callback(timestamp: &str, body: &str, secret: &str) -> String {
	let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
	mac.update(timestamp.as_bytes());
	mac.update(b".");
	mac.update(body.as_bytes());
	format!("t={timestamp},v0={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a `t=<unix>,v0=<hex>` signature header against the raw body.
///
/// # Errors
/// `BridgeError::Validation` for a malformed header,
/// `BridgeError::Authentication` when the signature does not match.
pub fn verify_callback_signature(header: &str, body: &str, secret: &str) -> Result<(), BridgeError> {
	let (timestamp, presented_hex) = parse_header(header)?;

	let presented = hex::decode(presented_hex).map_err(|_| BridgeError::validation("callback signature is not valid hex"))?;

	let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| BridgeError::internal(format!("invalid webhook secret: {e}")))?;
	mac.update(timestamp.as_bytes());
	mac.update(b".");
	mac.update(body.as_bytes());

	mac
		.verify_slice(&presented)
		.map_err(|_| BridgeError::authentication("callback signature mismatch"))
}

fn parse_header(header: &str) -> Result<(&str, &str), BridgeError> {
	let mut timestamp = None;
	let mut signature = None;

	for part in header.split(',') {
		if let Some(t) = part.strip_prefix("t=") {
			timestamp = Some(t);
		} else if let Some(v0) = part.strip_prefix("v0=") {
			signature = Some(v0);
		}
	}

	match (timestamp, signature) {
		(Some(t), Some(v0)) if !t.is_empty() && !v0.is_empty() => Ok((t, v0)),
		_ => Err(BridgeError::validation("callback signature header must carry t= and v0=")),
	}
}
