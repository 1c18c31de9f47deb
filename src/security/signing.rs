//! Signed cookie values.
//!
//! A signed value has the form `base64(value)|timestamp|signature`, where the
//! timestamp is nanoseconds since the Unix epoch and the signature is the
//! hex HMAC-SHA1 of the first two parts concatenated.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Sign `value` with the current time.
pub fn sign(secret: &str, value: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    sign_at(secret, value, nanos)
}

/// Sign `value` with an explicit timestamp.
pub fn sign_at(secret: &str, value: &str, timestamp_nanos: u128) -> String {
    let encoded = URL_SAFE.encode(value.as_bytes());
    let timestamp = timestamp_nanos.to_string();
    let signature = to_hex(&mac(secret, &encoded, &timestamp).finalize().into_bytes());
    format!("{encoded}|{timestamp}|{signature}")
}

/// Decode a signed value. `None` when malformed or the signature is wrong.
pub fn verify(secret: &str, token: &str) -> Option<String> {
    let mut parts = token.splitn(3, '|');
    let (encoded, timestamp, signature) = (parts.next()?, parts.next()?, parts.next()?);

    let expected = from_hex(signature)?;
    mac(secret, encoded, timestamp).verify_slice(&expected).ok()?;

    let decoded = URL_SAFE.decode(encoded).ok()?;
    String::from_utf8(decoded).ok()
}

fn mac(secret: &str, encoded: &str, timestamp: &str) -> HmacSha1 {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(encoded.as_bytes());
    mac.update(timestamp.as_bytes());
    mac
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
