//! Hashing primitives used for traffic allocation, ID-list membership, and
//! client payload key obfuscation.
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of buckets for pass-percentage allocation.
pub const CONDITION_SEGMENT_COUNT: u64 = 10_000;
/// Number of buckets for `user_bucket` conditions.
pub const USER_BUCKET_COUNT: u64 = 1_000;
/// Upper bound on the process-lifetime memoization cache for [`sha256_to_u64`].
pub const HASH_MEMO_MAX_ENTRIES: usize = 100_000;

fn memo_cache() -> &'static Mutex<HashMap<String, u64>> {
    static CACHE: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The first 8 bytes of the SHA-256 digest of `input`, read as a big-endian
/// unsigned integer.
///
/// Allocation arithmetic on the returned value must stay in unsigned 64-bit
/// space; modulo by the bucket constants never truncates to 32 bits.
///
/// Results are memoized in a process-lifetime cache bounded at
/// [`HASH_MEMO_MAX_ENTRIES`]; on overflow the cache is cleared and restarted.
pub fn sha256_to_u64(input: &str) -> u64 {
    let mut cache = memo_cache()
        .lock()
        .expect("thread holding hash memo lock should not panic");
    if let Some(hit) = cache.get(input) {
        return *hit;
    }

    let digest = Sha256::digest(input.as_bytes());
    let value = u64::from_be_bytes(digest[0..8].try_into().unwrap());

    if cache.len() >= HASH_MEMO_MAX_ENTRIES {
        cache.clear();
    }
    cache.insert(input.to_owned(), value);
    value
}

/// First 8 hex characters of the SHA-256 digest of `input`. This is the form
/// IDs take inside segment ID lists.
pub fn sha256_hex_prefix(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(8);
    for byte in &digest[0..4] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// 32-bit djb2-style string hash, rendered as a decimal string. Operates on
/// UTF-16 code units to stay byte-compatible with ID obfuscation performed by
/// web clients.
pub fn djb2(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    (hash as u32).to_string()
}

/// Hash applied to gate/config/layer names in client bootstrap payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Base64-encoded SHA-256 digest of the name.
    #[default]
    Sha256,
    /// Decimal djb2 hash of the name.
    Djb2,
    /// Plaintext name, no hashing.
    None,
}

impl HashAlgorithm {
    /// Apply the algorithm to `name`.
    pub fn hash_name(&self, name: &str) -> String {
        match self {
            HashAlgorithm::Sha256 => BASE64_STANDARD.encode(Sha256::digest(name.as_bytes())),
            HashAlgorithm::Djb2 => djb2(name),
            HashAlgorithm::None => name.to_owned(),
        }
    }

    /// Wire name of the algorithm, reported as `hash_used`.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Djb2 => "djb2",
            HashAlgorithm::None => "none",
        }
    }
}
