//! Experimental lossless TEXT/NUMS split: pulls ASCII digit runs (with an
//! optional unary sign in value context) out of the byte stream into a
//! numeric side-channel, leaving everything else — including separators
//! like the `-` in `2024-01-01` — in the text stream.

use crate::error::{GccError, GccResult};
use crate::layers::{is_digit, is_unary_sign_context, LayerSymbols};
use crate::varint::{decode_ints, encode_ints};

const SIGN_NONE: i64 = 0;
const SIGN_PLUS: i64 = 1;
const SIGN_MINUS: i64 = 2;

pub const FMT_VERSION: u8 = 1;
pub const TOK_RULES: u8 = 1;

#[derive(Default)]
pub struct Meta {
    pub fmt: u8,
    pub tok: u8,
}

pub fn encode(data: &[u8]) -> (LayerSymbols, Meta) {
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut nums_meta: Vec<(i64, i64, i64)> = Vec::new();

    let n = data.len();
    let mut i = 0usize;
    let mut last = 0usize;

    while i < n {
        let c = data[i];
        let mut sign_code = SIGN_NONE;
        let start;
        let mut j;

        if (c == b'+' || c == b'-') && i + 1 < n && is_digit(data[i + 1]) && is_unary_sign_context(data, i) {
            start = i;
            sign_code = if c == b'+' { SIGN_PLUS } else { SIGN_MINUS };
            j = i + 1;
        } else if is_digit(c) {
            start = i;
            j = i;
        } else {
            i += 1;
            continue;
        }

        while j < n && is_digit(data[j]) {
            j += 1;
        }

        let token = &data[start..j];
        chunks.push(data[last..start].to_vec());
        last = j;

        let digits = if token.first().map_or(false, |&b| b == b'+' || b == b'-') { &token[1..] } else { token };
        if digits.is_empty() {
            i = j;
            continue;
        }

        let digits_len = digits.len() as i64;
        let magnitude: i64 = std::str::from_utf8(digits).unwrap().parse().unwrap_or(0);
        nums_meta.push((sign_code, digits_len, magnitude));

        i = j;
    }

    chunks.push(data[last..].to_vec());

    let n_numbers = nums_meta.len();
    let mut seq: Vec<i64> = Vec::with_capacity(1 + chunks.len() + 3 * n_numbers);
    seq.push(n_numbers as i64);
    seq.extend(chunks.iter().map(|c| c.len() as i64));
    for &(sign_code, digits_len, magnitude) in &nums_meta {
        seq.push(sign_code);
        seq.push(digits_len);
        seq.push(magnitude);
    }

    let text_stream: Vec<u8> = chunks.into_iter().flatten().collect();
    let nums_stream = encode_ints(&seq);

    (
        LayerSymbols::MultiBytes(vec![("text", text_stream), ("nums", nums_stream)]),
        Meta { fmt: FMT_VERSION, tok: TOK_RULES },
    )
}

pub fn decode(symbols: LayerSymbols, meta: &Meta) -> GccResult<Vec<u8>> {
    if meta.fmt != 0 && meta.fmt != FMT_VERSION {
        return Err(GccError::CorruptPayload(format!("split_text_nums: fmt non supportato: {}", meta.fmt)));
    }

    let streams = match symbols {
        LayerSymbols::MultiBytes(s) => s,
        _ => return Err(GccError::CorruptPayload("split_text_nums: symbols non multi-bytes".into())),
    };
    let mut text_stream = Vec::new();
    let mut nums_stream = Vec::new();
    for (name, data) in streams {
        match name {
            "text" => text_stream = data,
            "nums" => nums_stream = data,
            _ => {}
        }
    }

    let seq = decode_ints(&nums_stream)?;
    if seq.is_empty() {
        return Ok(text_stream);
    }

    let n_numbers = seq[0];
    if n_numbers < 0 {
        return Err(GccError::CorruptPayload("split_text_nums: n_numbers negativo".into()));
    }
    let n_numbers = n_numbers as usize;

    let need = 1 + (n_numbers + 1) + 3 * n_numbers;
    if seq.len() < need {
        return Err(GccError::CorruptPayload(format!(
            "split_text_nums: NUMS stream troppo corto: have={} need>={need}",
            seq.len()
        )));
    }

    let chunk_lens: Vec<i64> = seq[1..1 + n_numbers + 1].to_vec();
    if chunk_lens.iter().any(|&x| x < 0) {
        return Err(GccError::CorruptPayload("split_text_nums: chunk_len negativo".into()));
    }

    let mut chunks: Vec<&[u8]> = Vec::with_capacity(chunk_lens.len());
    let mut pos = 0usize;
    for &ln in &chunk_lens {
        let ln = ln as usize;
        if pos + ln > text_stream.len() {
            return Err(GccError::CorruptPayload("split_text_nums: chunk oltre la fine del testo".into()));
        }
        chunks.push(&text_stream[pos..pos + ln]);
        pos += ln;
    }
    if pos != text_stream.len() {
        return Err(GccError::CorruptPayload(format!(
            "split_text_nums: chunk_len sum mismatch: sum={pos} text_len={}",
            text_stream.len()
        )));
    }

    let mut idx = 1 + (n_numbers + 1);
    let mut nums: Vec<Vec<u8>> = Vec::with_capacity(n_numbers);
    for _ in 0..n_numbers {
        let sign_code = seq[idx];
        let digits_len = seq[idx + 1];
        let magnitude = seq[idx + 2];
        idx += 3;

        if digits_len <= 0 {
            return Err(GccError::CorruptPayload("split_text_nums: digits_len <= 0".into()));
        }
        if magnitude < 0 {
            return Err(GccError::CorruptPayload("split_text_nums: magnitude negativo".into()));
        }

        let mut s = Vec::new();
        if sign_code == SIGN_PLUS {
            s.push(b'+');
        } else if sign_code == SIGN_MINUS {
            s.push(b'-');
        } else if sign_code != SIGN_NONE {
            return Err(GccError::CorruptPayload(format!("split_text_nums: sign_code sconosciuto: {sign_code}")));
        }

        let digits = magnitude.to_string().into_bytes();
        let digits_len = digits_len as usize;
        if digits.len() > digits_len {
            return Err(GccError::CorruptPayload(format!(
                "split_text_nums: digits_len troppo piccolo: {digits_len} < {}",
                digits.len()
            )));
        }
        let mut padded = vec![b'0'; digits_len - digits.len()];
        padded.extend_from_slice(&digits);
        s.extend_from_slice(&padded);
        nums.push(s);
    }

    let mut out = Vec::new();
    for i in 0..n_numbers {
        out.extend_from_slice(chunks[i]);
        out.extend_from_slice(&nums[i]);
    }
    out.extend_from_slice(chunks[n_numbers]);
    Ok(out)
}

pub fn pack_meta(meta: &Meta) -> Vec<u8> {
    if meta.fmt == 0 && meta.tok == 0 {
        return Vec::new();
    }
    vec![meta.fmt, meta.tok]
}

pub fn unpack_meta(meta_bytes: &[u8]) -> GccResult<Meta> {
    if meta_bytes.is_empty() {
        return Ok(Meta { fmt: 0, tok: 0 });
    }
    if meta_bytes.len() < 2 {
        return Err(GccError::CorruptPayload("split_text_nums: meta troppo corta".into()));
    }
    Ok(Meta { fmt: meta_bytes[0], tok: meta_bytes[1] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_mixed_text_and_numbers() {
        let data = b"invoice #42 total=+123.50 date 2024-01-01 qty: -7".to_vec();
        let (symbols, meta) = encode(&data);
        let packed = pack_meta(&meta);
        let meta2 = unpack_meta(&packed).unwrap();
        assert_eq!(decode(symbols, &meta2).unwrap(), data);
    }

    #[test]
    fn date_like_range_not_treated_as_negative() {
        let data = b"2024-01-01".to_vec();
        let (symbols, meta) = encode(&data);
        assert_eq!(decode(symbols, &meta).unwrap(), data);
    }

    #[test]
    fn no_numbers_roundtrip() {
        let data = b"just plain text".to_vec();
        let (symbols, meta) = encode(&data);
        assert_eq!(decode(symbols, &meta).unwrap(), data);
    }
}
