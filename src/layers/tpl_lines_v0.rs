//! Line template mining: dedups lines into "templates" (the chunks around
//! each line's numeric tokens) plus a per-line template id and a NUMS
//! stream describing the numbers that fill each template's gaps.

use std::collections::HashMap;

use crate::error::{GccError, GccResult};
use crate::layers::lines_dict::splitlines_keepends;
use crate::layers::{is_digit, is_unary_sign_context, LayerSymbols};
use crate::varint::{decode_ints, decode_varint, encode_ints, encode_varint};

pub const SIGN_NONE: i64 = 0;
pub const SIGN_PLUS: i64 = 1;
pub const SIGN_MINUS: i64 = 2;

pub const FMT_VERSION: u8 = 1;
pub const TOK_RULES: u8 = 1;

pub struct Meta {
    pub fmt: u8,
    pub tok: u8,
    pub empty: bool,
}

impl Default for Meta {
    fn default() -> Self {
        Meta { fmt: FMT_VERSION, tok: TOK_RULES, empty: false }
    }
}

pub(crate) fn pack_templates(templates: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(templates.len() as u64, &mut out);
    for tpl in templates {
        encode_varint(tpl.len() as u64, &mut out);
        for chunk in tpl {
            encode_varint(chunk.len() as u64, &mut out);
            out.extend_from_slice(chunk);
        }
    }
    out
}

pub(crate) fn unpack_templates(raw: &[u8]) -> GccResult<Vec<Vec<Vec<u8>>>> {
    let mut idx = 0usize;
    let (n, next) = decode_varint(raw, idx)?;
    idx = next;
    if n > 1_000_000 {
        return Err(GccError::CorruptPayload("tpl_lines: troppi template".into()));
    }
    let mut templates = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let (n_chunks, next) = decode_varint(raw, idx)?;
        idx = next;
        if n_chunks == 0 || n_chunks > 1_000_000 {
            return Err(GccError::CorruptPayload("tpl_lines: n_chunks non valido".into()));
        }
        let mut chunks = Vec::with_capacity(n_chunks as usize);
        for _ in 0..n_chunks {
            let (len, next) = decode_varint(raw, idx)?;
            idx = next;
            let len = len as usize;
            if idx + len > raw.len() {
                return Err(GccError::CorruptPayload("tpl_lines: chunk oltre la fine del buffer".into()));
            }
            chunks.push(raw[idx..idx + len].to_vec());
            idx += len;
        }
        templates.push(chunks);
    }
    if idx != raw.len() {
        return Err(GccError::CorruptPayload("tpl_lines: byte residui dopo i template".into()));
    }
    Ok(templates)
}

pub(crate) fn split_line(line: &[u8]) -> (Vec<Vec<u8>>, Vec<(i64, i64, i64)>) {
    let mut chunks = Vec::new();
    let mut nums_meta = Vec::new();

    let n = line.len();
    let mut i = 0usize;
    let mut last = 0usize;

    while i < n {
        let c = line[i];
        let mut sign_code = SIGN_NONE;
        let start;
        let mut j;

        if (c == b'+' || c == b'-') && i + 1 < n && is_digit(line[i + 1]) && is_unary_sign_context(line, i) {
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

        while j < n && is_digit(line[j]) {
            j += 1;
        }

        let token = &line[start..j];
        chunks.push(line[last..start].to_vec());
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

    chunks.push(line[last..].to_vec());
    (chunks, nums_meta)
}

pub fn encode(data: &[u8]) -> (LayerSymbols, Meta) {
    let lines = splitlines_keepends(data);

    if lines.is_empty() && data.is_empty() {
        let tpl_raw = pack_templates(&[vec![Vec::new()]]);
        let ids_raw = encode_ints(&[0]);
        let nums_raw = encode_ints(&[1, 0]);
        return (
            LayerSymbols::MultiBytes(vec![("tpl", tpl_raw), ("ids", ids_raw), ("nums", nums_raw)]),
            Meta { fmt: FMT_VERSION, tok: TOK_RULES, empty: true },
        );
    }

    let mut templates: Vec<Vec<Vec<u8>>> = Vec::new();
    let mut tpl_index: HashMap<Vec<Vec<u8>>, usize> = HashMap::new();
    let mut ids: Vec<i64> = Vec::with_capacity(lines.len());
    let mut nums_ints: Vec<i64> = vec![lines.len() as i64];

    for line in &lines {
        let (chunks, nums_meta) = split_line(line);
        let tid = *tpl_index.entry(chunks.clone()).or_insert_with(|| {
            templates.push(chunks);
            templates.len() - 1
        });
        ids.push(tid as i64);

        nums_ints.push(nums_meta.len() as i64);
        for (sign_code, digits_len, magnitude) in nums_meta {
            nums_ints.push(sign_code);
            nums_ints.push(digits_len);
            nums_ints.push(magnitude);
        }
    }

    let tpl_raw = pack_templates(&templates);
    let ids_raw = encode_ints(&ids);
    let nums_raw = encode_ints(&nums_ints);

    (
        LayerSymbols::MultiBytes(vec![("tpl", tpl_raw), ("ids", ids_raw), ("nums", nums_raw)]),
        Meta { fmt: FMT_VERSION, tok: TOK_RULES, empty: false },
    )
}

fn number_bytes(sign_code: i64, digits_len: i64, magnitude: i64) -> GccResult<Vec<u8>> {
    if digits_len <= 0 {
        return Err(GccError::CorruptPayload("tpl_lines: digits_len <= 0".into()));
    }
    if magnitude < 0 {
        return Err(GccError::CorruptPayload("tpl_lines: magnitude negativo".into()));
    }
    let mut s = Vec::new();
    if sign_code == SIGN_PLUS {
        s.push(b'+');
    } else if sign_code == SIGN_MINUS {
        s.push(b'-');
    } else if sign_code != SIGN_NONE {
        return Err(GccError::CorruptPayload(format!("tpl_lines: sign_code sconosciuto: {sign_code}")));
    }
    let digits = magnitude.to_string().into_bytes();
    let digits_len = digits_len as usize;
    if digits.len() > digits_len {
        return Err(GccError::CorruptPayload("tpl_lines: digits_len troppo piccolo".into()));
    }
    let mut padded = vec![b'0'; digits_len - digits.len()];
    padded.extend_from_slice(&digits);
    s.extend_from_slice(&padded);
    Ok(s)
}

pub fn decode(symbols: LayerSymbols, meta: &Meta) -> GccResult<Vec<u8>> {
    if meta.fmt != FMT_VERSION {
        return Err(GccError::CorruptPayload(format!("tpl_lines_v0: fmt non supportato: {}", meta.fmt)));
    }

    let streams = match symbols {
        LayerSymbols::MultiBytes(s) => s,
        _ => return Err(GccError::CorruptPayload("tpl_lines_v0: symbols non multi-bytes".into())),
    };
    let mut tpl_raw = Vec::new();
    let mut ids_raw = Vec::new();
    let mut nums_raw = Vec::new();
    for (name, data) in streams {
        match name {
            "tpl" => tpl_raw = data,
            "ids" => ids_raw = data,
            "nums" => nums_raw = data,
            _ => {}
        }
    }

    let templates = unpack_templates(&tpl_raw)?;
    let ids = decode_ints(&ids_raw)?;
    let nums = decode_ints(&nums_raw)?;
    if nums.is_empty() {
        return Err(GccError::CorruptPayload("tpl_lines_v0: NUMS stream vuoto".into()));
    }

    let n_lines = nums[0];
    if n_lines < 0 {
        return Err(GccError::CorruptPayload("tpl_lines_v0: n_lines negativo".into()));
    }
    let n_lines = n_lines as usize;

    if n_lines != ids.len() && !(meta.empty && n_lines == 1 && ids.len() == 1) {
        return Err(GccError::CorruptPayload("tpl_lines_v0: n_lines/ids mismatch".into()));
    }

    let mut out = Vec::new();
    let mut idx = 1usize;
    for li in 0..n_lines {
        if idx >= nums.len() {
            return Err(GccError::CorruptPayload("tpl_lines_v0: NUMS stream troncato".into()));
        }
        let n_nums = nums[idx];
        idx += 1;
        if n_nums < 0 {
            return Err(GccError::CorruptPayload("tpl_lines_v0: n_nums negativo".into()));
        }
        let n_nums = n_nums as usize;

        let tid = *ids.get(li).unwrap_or(&0);
        if tid < 0 || tid as usize >= templates.len() {
            return Err(GccError::CorruptPayload("tpl_lines_v0: template id fuori range".into()));
        }
        let chunks = &templates[tid as usize];
        let expected = chunks.len().saturating_sub(1);
        if expected != n_nums {
            return Err(GccError::CorruptPayload("tpl_lines_v0: n_nums/template mismatch".into()));
        }

        out.extend_from_slice(&chunks[0]);
        for ni in 0..n_nums {
            if idx + 3 > nums.len() {
                return Err(GccError::CorruptPayload("tpl_lines_v0: NUMS stream troncato".into()));
            }
            let sign_code = nums[idx];
            let digits_len = nums[idx + 1];
            let magnitude = nums[idx + 2];
            idx += 3;
            out.extend_from_slice(&number_bytes(sign_code, digits_len, magnitude)?);
            out.extend_from_slice(&chunks[ni + 1]);
        }
    }

    if idx != nums.len() {
        return Err(GccError::CorruptPayload("tpl_lines_v0: byte residui nello stream NUMS".into()));
    }

    Ok(out)
}

pub fn pack_meta(meta: &Meta) -> Vec<u8> {
    vec![meta.fmt, meta.tok]
}

pub fn unpack_meta(meta_bytes: &[u8]) -> GccResult<Meta> {
    if meta_bytes.is_empty() {
        return Ok(Meta { fmt: 0, tok: 0, empty: false });
    }
    if meta_bytes.len() < 2 {
        return Err(GccError::CorruptPayload("tpl_lines_v0: meta troppo corta".into()));
    }
    Ok(Meta { fmt: meta_bytes[0], tok: meta_bytes[1], empty: false })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_repeated_template() {
        let data = b"user 1 logged in\nuser 2 logged in\nuser 3 logged in\n".to_vec();
        let (symbols, meta) = encode(&data);
        assert_eq!(decode(symbols, &meta).unwrap(), data);
    }

    #[test]
    fn empty_file_roundtrip() {
        let data: Vec<u8> = Vec::new();
        let (symbols, meta) = encode(&data);
        assert!(meta.empty);
        assert_eq!(decode(symbols, &meta).unwrap(), data);
    }

    #[test]
    fn no_trailing_newline_line_roundtrip() {
        let data = b"a=1\nb=2".to_vec();
        let (symbols, meta) = encode(&data);
        assert_eq!(decode(symbols, &meta).unwrap(), data);
    }
}
