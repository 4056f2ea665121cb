//! The protocol's three SHA-256 hash constructions.

use keydir_core::UserName;
use sha2::{Digest, Sha256};

/// Prefix of the message signed to prove ownership of a domain.
pub const DOMAIN_PROOF_PREFIX: &str = "upspin-domain:";

/// Tag prefixed to the length-delimited signup request fields.
pub const SIGNUP_REQUEST_TAG: &str = "signup-request";

/// Hash of the domain-ownership message:
/// `SHA256("upspin-domain:" + domain + "-" + user)`.
pub fn domain_proof_hash(domain: &str, user: &UserName) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(DOMAIN_PROOF_PREFIX.as_bytes());
    h.update(domain.as_bytes());
    h.update(b"-");
    h.update(user.as_str().as_bytes());
    h.finalize().into()
}

/// Hash binding a verification URL to its issue time:
/// `SHA256(json(userRecord) || decimalAscii(unixSeconds))`.
pub fn signup_url_hash(user_json: &[u8], now_unix: i64) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(user_json);
    h.update(now_unix.to_string().as_bytes());
    h.finalize().into()
}

/// Hash of a signup request. Each field is preceded by its byte length as a
/// 4-byte big-endian prefix, so no field boundary is ambiguous.
pub fn signup_request_hash(name: &str, dir: &str, store: &str, key: &str) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(SIGNUP_REQUEST_TAG.as_bytes());
    for field in [name, dir, store, key] {
        h.update((field.len() as u32).to_be_bytes());
        h.update(field.as_bytes());
    }
    h.finalize().into()
}
