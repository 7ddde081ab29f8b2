use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

pub mod brain;

pub use brain::{fallback_action, l0_decide, L0WorldMap, DEFAULT_L0_WORLD_MAP};

/// Wall-clock milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// RFC 8785 (JCS) encoding: sorted keys, no whitespace, canonical numbers.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_jcs::to_string(value).map_err(|err| format!("failed to canonicalize JSON via JCS: {err}"))
}

pub fn jcs_sha256_hex(value: &Value) -> Result<String, String> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// First 16 hex chars of the JCS sha256 of `value`.
pub fn short_hash<T: Serialize>(value: &T) -> Result<String, String> {
    let canonical = canonical_json(value)?;
    let mut full = sha256_hex(canonical.as_bytes());
    full.truncate(16);
    Ok(full)
}

pub fn stable_request_id(seed: u64, seq: u64, intent_id: &str) -> String {
    hash_id("req", &[&seed.to_string(), &seq.to_string(), intent_id])
}

/// 32-bit FNV-1a over the UTF-8 bytes of `input`.
pub fn fnv1a32(input: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

pub fn quantize(n: f64, step: f64) -> f64 {
    (n / step).round() * step
}

pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn hash_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    let short: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}_{short}")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
