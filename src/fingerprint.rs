//! Deterministic content fingerprinting and bucket assignment.
//!
//! Every file gets a 64-bit SimHash computed over a token or shingle
//! multiset, picked by a crude text/binary heuristic. Buckets are then
//! `fingerprint mod buckets` unless a pluggable bucketizer overrides it.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Matches the reference tokenizer: runs of word characters, length >= 2.
fn token_re() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| Regex::new(r"[A-Za-z0-9_]{2,}").unwrap())
}

/// A SimHash-based content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub algo: &'static str,
    pub simhash64: u64,
    pub is_text: bool,
    pub token_count: usize,
}

fn h64(data: &[u8]) -> u64 {
    let digest = blake3::hash(data);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(buf)
}

/// Combine weighted 64-bit hashes into a single SimHash value.
fn simhash64(weighted: &[(u64, i64)]) -> u64 {
    let mut acc = [0i64; 64];
    for &(h, w) in weighted {
        for (i, slot) in acc.iter_mut().enumerate() {
            let bit = (h >> i) & 1;
            *slot += if bit == 1 { w } else { -w };
        }
    }
    let mut out = 0u64;
    for (i, &v) in acc.iter().enumerate() {
        if v >= 0 {
            out |= 1 << i;
        }
    }
    out
}

/// Analysis window: fingerprinting never reads more than this many bytes.
pub const DEFAULT_ANALYZE_MAX_BYTES: usize = 1_000_000;

/// Fingerprint a byte slice, reading at most `max_bytes` of it.
pub fn fingerprint_bytes(data: &[u8], max_bytes: usize) -> Fingerprint {
    let b = &data[..data.len().min(max_bytes)];
    if b.is_empty() {
        return Fingerprint { algo: "simhash64:text", simhash64: 0, is_text: true, token_count: 0 };
    }

    let printable = b.iter().filter(|&&x| (32..=126).contains(&x) || matches!(x, 9 | 10 | 13)).count();
    let is_text = (printable as f64 / b.len() as f64) >= 0.85;

    if is_text {
        let txt = String::from_utf8_lossy(b).to_lowercase();
        let toks: Vec<&str> = token_re().find_iter(&txt).map(|m| m.as_str()).collect();
        if toks.is_empty() {
            let chunks: Vec<&str> = txt.lines().filter(|l| !l.trim().is_empty()).take(5000).collect();
            let weighted: Vec<(u64, i64)> = chunks.iter().map(|c| (h64(c.as_bytes()), 1)).collect();
            return Fingerprint {
                algo: "simhash64:lines",
                simhash64: simhash64(&weighted),
                is_text: true,
                token_count: chunks.len(),
            };
        }
        let mut freq: HashMap<&str, i64> = HashMap::new();
        for &t in &toks {
            let e = freq.entry(t).or_insert(0);
            *e = (*e + 1).min(20);
        }
        let weighted: Vec<(u64, i64)> = freq.iter().map(|(k, &v)| (h64(k.as_bytes()), v)).collect();
        return Fingerprint {
            algo: "simhash64:tokens",
            simhash64: simhash64(&weighted),
            is_text: true,
            token_count: toks.len(),
        };
    }

    const STEP: usize = 4;
    let window = b.len().min(200_000);
    let mut weighted = Vec::new();
    let mut i = 0usize;
    while i + STEP <= window {
        weighted.push((h64(&b[i..i + STEP]), 1i64));
        i += STEP;
    }
    Fingerprint {
        algo: "simhash64:bin4",
        simhash64: simhash64(&weighted),
        is_text: false,
        token_count: weighted.len(),
    }
}

/// Default bucketizer: `fingerprint mod buckets`.
pub fn fallback_bucket(simhash: u64, buckets: u32) -> u32 {
    (simhash % buckets as u64) as u32
}

/// A pluggable bucketizer. If it returns a value outside `[0, buckets)`,
/// the caller must fall back to [`fallback_bucket`].
pub trait Bucketizer: Send + Sync {
    fn bucket_for(&self, simhash: u64, buckets: u32) -> u32;
}

/// Resolve a bucket index, validating a plugin's answer against the
/// `[0, buckets)` range and falling back to the deterministic default
/// when the plugin is absent or returns garbage.
pub fn bucket_for(simhash: u64, buckets: u32, plugin: Option<&dyn Bucketizer>) -> u32 {
    if let Some(p) = plugin {
        let b = p.bucket_for(simhash, buckets);
        if b < buckets {
            return b;
        }
    }
    fallback_bucket(simhash, buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_text_with_zero_hash() {
        let fp = fingerprint_bytes(b"", DEFAULT_ANALYZE_MAX_BYTES);
        assert_eq!(fp.simhash64, 0);
        assert!(fp.is_text);
        assert_eq!(fp.token_count, 0);
    }

    #[test]
    fn similar_text_produces_identical_fingerprint_for_identical_input() {
        let data = b"HELLO 123\nHELLO 123\n".to_vec();
        let a = fingerprint_bytes(&data, DEFAULT_ANALYZE_MAX_BYTES);
        let b = fingerprint_bytes(&data, DEFAULT_ANALYZE_MAX_BYTES);
        assert_eq!(a, b);
    }

    #[test]
    fn binary_data_is_classified_as_non_text() {
        let data: Vec<u8> = (0u8..=255u8).cycle().take(4096).collect();
        let fp = fingerprint_bytes(&data, DEFAULT_ANALYZE_MAX_BYTES);
        assert!(!fp.is_text);
        assert_eq!(fp.algo, "simhash64:bin4");
    }

    #[test]
    fn bucket_for_default_is_modulo() {
        let fp = fingerprint_bytes(b"some example text here", DEFAULT_ANALYZE_MAX_BYTES);
        assert_eq!(bucket_for(fp.simhash64, 4, None), fallback_bucket(fp.simhash64, 4));
        assert!(bucket_for(fp.simhash64, 4, None) < 4);
    }

    struct OutOfRangeBucketizer;
    impl Bucketizer for OutOfRangeBucketizer {
        fn bucket_for(&self, _simhash: u64, buckets: u32) -> u32 {
            buckets + 100
        }
    }

    #[test]
    fn bucket_for_falls_back_when_plugin_out_of_range() {
        let plugin = OutOfRangeBucketizer;
        let fp = fingerprint_bytes(b"some example text here", DEFAULT_ANALYZE_MAX_BYTES);
        assert_eq!(bucket_for(fp.simhash64, 4, Some(&plugin)), fallback_bucket(fp.simhash64, 4));
    }
}
