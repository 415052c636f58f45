//! Line dictionary layer: split on lines (keeping line endings), dedup into
//! a vocabulary, and emit one id per line as the main ids stream.

use std::collections::HashMap;

use crate::error::{GccError, GccResult};
use crate::layers::{vocab_blob, LayerSymbols};

/// Mirrors Python's `bytes.splitlines(keepends=True)`: splits on the usual
/// universal newline set and keeps the terminator attached to each line.
pub fn splitlines_keepends(data: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let n = data.len();
    while i < n {
        let b = data[i];
        let is_break = matches!(b, 0x0a | 0x0b | 0x0c | 0x0d | 0x1c | 0x1d | 0x1e | 0x85);
        if is_break {
            let mut end = i + 1;
            if b == 0x0d && i + 1 < n && data[i + 1] == 0x0a {
                end += 1;
            }
            out.push(data[start..end].to_vec());
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }
    if start < n {
        out.push(data[start..n].to_vec());
    }
    out
}

pub struct Meta {
    pub vocab_list: Vec<Vec<u8>>,
}

pub fn encode(data: &[u8]) -> (LayerSymbols, Meta) {
    let lines = splitlines_keepends(data);
    let mut vocab: Vec<Vec<u8>> = Vec::new();
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut ids: Vec<i64> = Vec::with_capacity(lines.len());

    for line in lines {
        let j = *index.entry(line.clone()).or_insert_with(|| {
            vocab.push(line);
            vocab.len() - 1
        });
        ids.push(j as i64);
    }

    let vocab_size = vocab.len();
    (LayerSymbols::Ids { data: ids, vocab_size }, Meta { vocab_list: vocab })
}

pub fn decode(symbols: LayerSymbols, meta: &Meta) -> GccResult<Vec<u8>> {
    let ids = match symbols {
        LayerSymbols::Ids { data, .. } => data,
        _ => return Err(GccError::CorruptPayload("lines_dict: symbols non ids".into())),
    };
    let vocab = &meta.vocab_list;
    let mut out = Vec::new();
    for i in ids {
        if i < 0 || i as usize >= vocab.len() {
            return Err(GccError::CorruptPayload("lines_dict: id fuori range".into()));
        }
        out.extend_from_slice(&vocab[i as usize]);
    }
    Ok(out)
}

pub fn pack_meta(meta: &Meta) -> Vec<u8> {
    vocab_blob::pack_vocab_list(&meta.vocab_list)
}

pub fn unpack_meta(meta_bytes: &[u8]) -> GccResult<Meta> {
    Ok(Meta { vocab_list: vocab_blob::unpack_vocab_list(meta_bytes)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"foo\nbar\nfoo\nbaz".to_vec();
        let (symbols, meta) = encode(&data);
        let packed = pack_meta(&meta);
        let meta2 = unpack_meta(&packed).unwrap();
        assert_eq!(decode(symbols, &meta2).unwrap(), data);
    }

    #[test]
    fn no_trailing_newline_preserved() {
        let data = b"a\nb".to_vec();
        let lines = splitlines_keepends(&data);
        assert_eq!(lines, vec![b"a\n".to_vec(), b"b".to_vec()]);
    }
}
