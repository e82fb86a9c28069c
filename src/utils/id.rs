//! Random identifier generation for personas and messages.
//!
//! Ids are url-safe base64 over OS randomness, so they are filesystem- and
//! key-safe without escaping. When the OS RNG is unavailable the generator
//! falls back to a time-seeded xorshift stream rather than failing id
//! creation.

use base64::Engine as _;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length in random bytes of a persona id (128 bits).
const PERSONA_ID_BYTES: usize = 16;

/// Length in random bytes of a message id (96 bits).
const MESSAGE_ID_BYTES: usize = 12;

/// Generate a fresh persona id.
pub fn persona_id() -> String {
    random_urlsafe(PERSONA_ID_BYTES)
}

/// Generate a fresh message id.
pub fn message_id() -> String {
    random_urlsafe(MESSAGE_ID_BYTES)
}

/// Encode `bytes_len` random bytes as url-safe base64 without padding.
pub fn random_urlsafe(bytes_len: usize) -> String {
    let bytes = best_effort_random_bytes(bytes_len);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn best_effort_random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0_u8; len];

    if getrandom::fill(&mut out).is_ok() {
        return out;
    }

    // Last resort: xorshift seeded from the clock and pid. Not
    // cryptographic, but ids only need to avoid collisions.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut x = nanos ^ ((std::process::id() as u64) << 32) ^ (len as u64);
    for byte in &mut out {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        *byte = (x & 0xFF) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_urlsafe() {
        let id = persona_id();
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(!id.is_empty());
    }

    #[test]
    fn ids_do_not_collide_in_practice() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(message_id()));
        }
    }

    #[test]
    fn message_and_persona_ids_differ_in_length() {
        assert!(persona_id().len() > message_id().len());
    }
}
