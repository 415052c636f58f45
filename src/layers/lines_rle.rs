//! Line dictionary layer with run-length encoding on the id sequence.
//! Main stream is `(varint(id), varint(run))` pairs; meta carries
//! `varint(n_lines)` plus the packed vocabulary.

use std::collections::HashMap;

use crate::error::{GccError, GccResult};
use crate::layers::lines_dict::splitlines_keepends;
use crate::layers::{vocab_blob, LayerSymbols};
use crate::varint::{decode_varint, encode_varint};

pub struct Meta {
    pub vocab_list: Vec<Vec<u8>>,
    pub n_lines: u64,
}

pub fn encode(data: &[u8]) -> (LayerSymbols, Meta) {
    let lines = splitlines_keepends(data);
    let mut vocab: Vec<Vec<u8>> = Vec::new();
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut ids: Vec<usize> = Vec::with_capacity(lines.len());

    for line in &lines {
        let j = *index.entry(line.clone()).or_insert_with(|| {
            vocab.push(line.clone());
            vocab.len() - 1
        });
        ids.push(j);
    }

    let mut out = Vec::new();
    if let Some(&first) = ids.first() {
        let mut cur = first;
        let mut run = 1u64;
        for &v in &ids[1..] {
            if v == cur {
                run += 1;
            } else {
                encode_varint(cur as u64, &mut out);
                encode_varint(run, &mut out);
                cur = v;
                run = 1;
            }
        }
        encode_varint(cur as u64, &mut out);
        encode_varint(run, &mut out);
    }

    (LayerSymbols::Bytes(out), Meta { vocab_list: vocab, n_lines: lines.len() as u64 })
}

pub fn decode(symbols: LayerSymbols, meta: &Meta) -> GccResult<Vec<u8>> {
    let raw = match symbols {
        LayerSymbols::Bytes(b) => b,
        _ => return Err(GccError::CorruptPayload("lines_rle: symbols non bytes".into())),
    };
    let vocab = &meta.vocab_list;

    let mut ids = Vec::new();
    let mut idx = 0;
    while idx < raw.len() {
        let (vid, next) = decode_varint(&raw, idx)?;
        idx = next;
        let (run, next) = decode_varint(&raw, idx)?;
        idx = next;
        if vid as usize >= vocab.len() {
            return Err(GccError::CorruptPayload("lines_rle: id fuori range".into()));
        }
        if run == 0 {
            return Err(GccError::CorruptPayload("lines_rle: run non valido".into()));
        }
        for _ in 0..run {
            ids.push(vid as usize);
        }
    }

    if ids.len() as u64 != meta.n_lines {
        return Err(GccError::CorruptPayload("lines_rle: n_lines mismatch (file corrotto?)".into()));
    }

    let mut out = Vec::new();
    for i in ids {
        out.extend_from_slice(&vocab[i]);
    }
    Ok(out)
}

pub fn pack_meta(meta: &Meta) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(meta.n_lines, &mut out);
    out.extend_from_slice(&vocab_blob::pack_vocab_list(&meta.vocab_list));
    out
}

pub fn unpack_meta(meta_bytes: &[u8]) -> GccResult<Meta> {
    let (n_lines, idx) = decode_varint(meta_bytes, 0)?;
    let vocab_list = vocab_blob::unpack_vocab_list(&meta_bytes[idx..])?;
    Ok(Meta { vocab_list, n_lines })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_repeats() {
        let data = b"x\nx\nx\ny\nx\n".to_vec();
        let (symbols, meta) = encode(&data);
        let packed = pack_meta(&meta);
        let meta2 = unpack_meta(&packed).unwrap();
        assert_eq!(decode(symbols, &meta2).unwrap(), data);
    }

    #[test]
    fn empty_input() {
        let (symbols, meta) = encode(b"");
        let packed = pack_meta(&meta);
        let meta2 = unpack_meta(&packed).unwrap();
        assert_eq!(decode(symbols, &meta2).unwrap(), Vec::<u8>::new());
    }
}
