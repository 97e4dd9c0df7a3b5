use sha2::{Digest, Sha256};

use crate::types::Fingerprint;

/// Version byte prefixed to every hash input. Bumping this forces every
/// fingerprint in the system to change, which is the only safe way to
/// alter the hashing scheme without silently colliding with old variants.
const FORMAT_VERSION: u8 = 1;

/// Separator byte between fields, chosen outside the range UTF-8 text,
/// model slugs, voice slugs, and codec names can legally contain, so no
/// combination of field values can produce an ambiguous concatenation
/// (e.g. text="ab" + model="c" colliding with text="a" + model="bc").
const FIELD_SEPARATOR: u8 = 0x1f;

/// Computes the stable content fingerprint for a synthesis request. Pure:
/// no I/O, no dependency on replica identity, no randomness. Identical
/// inputs on any replica, at any time, produce an identical hex digest.
///
/// `speed` is rendered to exactly two decimal digits before hashing, so
/// `1.0` and `1.00` are indistinguishable to callers and therefore hash
/// identically.
pub fn compute_fingerprint(text: &str, model_slug: &str, voice_slug: &str, speed: f64, codec: &str) -> Fingerprint {
    let speed_str = format!("{:.2}", speed);

    let mut hasher = Sha256::new();
    hasher.update([FORMAT_VERSION]);
    for field in [text, model_slug, voice_slug, speed_str.as_str(), codec] {
        hasher.update(field.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
    }

    let digest = hasher.finalize();
    Fingerprint::new(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
