//! `num_v1`: a small top-K dictionary-substitution codec for numeric streams
//! (PTC-inspired). Input/output is always a `num_stream` blob — the
//! concatenation of `varint(zigzag(int))`.
//!
//! Modes:
//!   - RAW:    payload = raw input
//!   - DICT:   payload = varint(K) + dict(K zigzag-varint ints) + code-stream
//!   - SHARED: payload = tag8(8B) + code-stream
//!
//! Code-stream: `varint(code)`, where `code==0` is an escape followed by
//! `varint(zigzag(int))`, and `code in [1..K]` selects `dict[code-1]`.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::{GccError, GccResult};
use crate::varint::{decode_ints, decode_varint, encode_ints, encode_varint, zigzag_decode, zigzag_encode};

const MODE_RAW: u8 = 0;
const MODE_DICT: u8 = 1;
const MODE_SHARED: u8 = 2;
const MAGIC: &[u8; 3] = b"NV1";
const K_CANDIDATES: [usize; 5] = [8, 16, 32, 64, 128];

pub fn dict_tag8(dict_vals: &[i64]) -> [u8; 8] {
    let raw = encode_ints(dict_vals);
    let digest = Sha256::digest(&raw);
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&digest[..8]);
    tag
}

#[derive(Default, Clone)]
pub struct SharedDict {
    vals: Vec<i64>,
    tag8: [u8; 8],
}

impl SharedDict {
    pub fn new(vals: Vec<i64>) -> Option<Self> {
        if vals.is_empty() {
            return None;
        }
        let tag8 = dict_tag8(&vals);
        Some(SharedDict { vals, tag8 })
    }
}

fn encode_codes(ints: &[i64], idx_map: &HashMap<i64, usize>) -> Vec<u8> {
    let mut codes = Vec::new();
    for &n in ints {
        match idx_map.get(&n) {
            Some(&j) => encode_varint((j + 1) as u64, &mut codes),
            None => {
                encode_varint(0, &mut codes);
                encode_varint(zigzag_encode(n), &mut codes);
            }
        }
    }
    codes
}

fn encode_dict(ints: &[i64], dict_vals: &[i64]) -> GccResult<Vec<u8>> {
    let k = dict_vals.len();
    if k == 0 {
        return Err(GccError::Other("num_v1: K deve essere > 0".into()));
    }
    let idx_map: HashMap<i64, usize> = dict_vals.iter().enumerate().map(|(i, &v)| (v, i)).collect();
    let dict_raw = encode_ints(dict_vals);
    let codes = encode_codes(ints, &idx_map);

    let mut out = Vec::new();
    encode_varint(k as u64, &mut out);
    out.extend_from_slice(&dict_raw);
    out.extend_from_slice(&codes);
    Ok(out)
}

/// Compresses a `num_stream` blob, optionally consulting a bucket-level
/// shared dictionary. Always returns the smallest candidate tried.
pub fn compress(data: &[u8], shared: Option<&SharedDict>) -> Vec<u8> {
    let mut best_blob = {
        let mut v = Vec::with_capacity(4 + data.len());
        v.extend_from_slice(MAGIC);
        v.push(MODE_RAW);
        v.extend_from_slice(data);
        v
    };

    let ints = match decode_ints(data) {
        Ok(v) => v,
        Err(_) => return best_blob,
    };
    if ints.len() < 8 {
        return best_blob;
    }

    if let Some(sd) = shared {
        let idx_map: HashMap<i64, usize> = sd.vals.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let codes = encode_codes(&ints, &idx_map);
        let mut blob = Vec::with_capacity(4 + 8 + codes.len());
        blob.extend_from_slice(MAGIC);
        blob.push(MODE_SHARED);
        blob.extend_from_slice(&sd.tag8);
        blob.extend_from_slice(&codes);
        if blob.len() < best_blob.len() {
            best_blob = blob;
        }
    }

    let mut freq: HashMap<i64, u64> = HashMap::new();
    for &n in &ints {
        *freq.entry(n).or_insert(0) += 1;
    }
    if freq.len() < 4 {
        return best_blob;
    }

    let mut ordered: Vec<(i64, u64)> = freq.into_iter().collect();
    ordered.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| a.0.abs().cmp(&b.0.abs()))
            .then_with(|| a.0.cmp(&b.0))
    });
    let unique_vals: Vec<i64> = ordered.into_iter().map(|(k, _)| k).collect();

    for &k in K_CANDIDATES.iter() {
        let dict_vals: &[i64] = if k >= unique_vals.len() { &unique_vals } else { &unique_vals[..k] };
        if dict_vals.len() < 4 {
            continue;
        }
        let payload = match encode_dict(&ints, dict_vals) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let mut blob = Vec::with_capacity(4 + payload.len());
        blob.extend_from_slice(MAGIC);
        blob.push(MODE_DICT);
        blob.extend_from_slice(&payload);
        if blob.len() < best_blob.len() {
            best_blob = blob;
        }
    }

    best_blob
}

fn decode_codes(payload: &[u8], dict_vals: &[i64]) -> GccResult<Vec<i64>> {
    let mut ints = Vec::new();
    let mut idx = 0;
    while idx < payload.len() {
        let (code, next) = decode_varint(payload, idx)?;
        idx = next;
        if code == 0 {
            let (u, next2) = decode_varint(payload, idx)?;
            idx = next2;
            ints.push(zigzag_decode(u));
        } else {
            let j = (code - 1) as usize;
            if j >= dict_vals.len() {
                return Err(GccError::CorruptPayload(format!("num_v1: code fuori dizionario: {code}")));
            }
            ints.push(dict_vals[j]);
        }
    }
    Ok(ints)
}

pub fn decompress(data: &[u8], shared: Option<&SharedDict>, out_size: Option<usize>) -> GccResult<Vec<u8>> {
    if data.len() < 4 || &data[..3] != MAGIC {
        return Err(GccError::CorruptPayload("num_v1: magic non valido".into()));
    }
    let mode = data[3];
    let payload = &data[4..];

    let out = match mode {
        MODE_RAW => payload.to_vec(),
        MODE_DICT => {
            let (k, mut idx) = decode_varint(payload, 0)?;
            if k == 0 || k > 1_000_000 {
                return Err(GccError::CorruptPayload(format!("num_v1: K non valido: {k}")));
            }
            let mut dict_vals = Vec::with_capacity(k as usize);
            for _ in 0..k {
                let (u, next) = decode_varint(payload, idx)?;
                idx = next;
                dict_vals.push(zigzag_decode(u));
            }
            let ints = decode_codes(&payload[idx..], &dict_vals)?;
            encode_ints(&ints)
        }
        MODE_SHARED => {
            if payload.len() < 8 {
                return Err(GccError::CorruptPayload("num_v1: SHARED payload troppo corto".into()));
            }
            let tag8 = &payload[..8];
            let codes_payload = &payload[8..];
            let sd = shared.ok_or_else(|| GccError::MissingResource("num_v1: shared dict mancante".into()))?;
            if tag8 != sd.tag8 {
                return Err(GccError::HashMismatch("num_v1: shared dict tag mismatch".into()));
            }
            let ints = decode_codes(codes_payload, &sd.vals)?;
            encode_ints(&ints)
        }
        other => return Err(GccError::CorruptPayload(format!("num_v1: mode sconosciuto: {other}"))),
    };

    if let Some(expected) = out_size {
        if out.len() != expected {
            return Err(GccError::CorruptPayload(format!(
                "num_v1: out_size mismatch: got={} expected={expected}",
                out.len()
            )));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_fallback_for_short_stream() {
        let ints = vec![1i64, 2, 3];
        let raw = encode_ints(&ints);
        let comp = compress(&raw, None);
        assert_eq!(comp[3], MODE_RAW);
        let out = decompress(&comp, None, None).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn dict_roundtrip_repetitive() {
        let mut ints = Vec::new();
        for _ in 0..50 {
            ints.extend_from_slice(&[1i64, 2, 3, 4, 1, 2, 3, 4]);
        }
        ints.push(999999);
        let raw = encode_ints(&ints);
        let comp = compress(&raw, None);
        assert_eq!(comp[3], MODE_DICT);
        let out = decompress(&comp, None, None).unwrap();
        assert_eq!(decode_ints(&out).unwrap(), ints);
    }

    #[test]
    fn shared_dict_roundtrip() {
        let dict_vals = vec![10i64, 20, 30, 40, 50];
        let sd = SharedDict::new(dict_vals).unwrap();
        let ints = vec![10i64, 20, 30, 10, 20, 999, 40, 50, 10, 20];
        let raw = encode_ints(&ints);
        let comp = compress(&raw, Some(&sd));
        let out = decompress(&comp, Some(&sd), None).unwrap();
        assert_eq!(decode_ints(&out).unwrap(), ints);
    }
}
