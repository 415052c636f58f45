//! Line-vocabulary serialization shared by `lines_dict` and `lines_rle`.
//!
//! v1 (legacy): `u32 BE count` + repeat(`u32 BE len` + bytes).
//! v2 (`VB2\0`): `varint(count)` + repeat(`varint(len)` + bytes).
//!
//! [`pack_vocab_list`] always emits v2; [`unpack_vocab_list`] auto-detects.

use crate::error::{GccError, GccResult};
use crate::varint::{decode_varint, encode_varint};

const MAGIC_VB2: &[u8; 4] = b"VB2\0";

pub fn pack_vocab_list(vocab_list: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC_VB2);
    encode_varint(vocab_list.len() as u64, &mut out);
    for tok in vocab_list {
        encode_varint(tok.len() as u64, &mut out);
        out.extend_from_slice(tok);
    }
    out
}

pub fn unpack_vocab_list(blob: &[u8]) -> GccResult<Vec<Vec<u8>>> {
    if blob.len() >= 4 && &blob[..4] == MAGIC_VB2 {
        let mut idx = 4;
        let (n, next) = decode_varint(blob, idx)?;
        idx = next;
        let mut vocab = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let (l, next) = decode_varint(blob, idx)?;
            idx = next;
            let l = l as usize;
            if idx + l > blob.len() {
                return Err(GccError::CorruptPayload("vocab VB2 troncato (data)".into()));
            }
            vocab.push(blob[idx..idx + l].to_vec());
            idx += l;
        }
        if idx != blob.len() {
            return Err(GccError::CorruptPayload("vocab VB2 con trailing garbage".into()));
        }
        return Ok(vocab);
    }

    let mut idx = 0;
    if blob.len() < 4 {
        return Err(GccError::CorruptPayload("vocab v1 troppo corto".into()));
    }
    let n = u32::from_be_bytes(blob[idx..idx + 4].try_into().unwrap());
    idx += 4;

    let mut vocab = Vec::with_capacity(n as usize);
    for _ in 0..n {
        if idx + 4 > blob.len() {
            return Err(GccError::CorruptPayload("vocab v1 troncato (len)".into()));
        }
        let l = u32::from_be_bytes(blob[idx..idx + 4].try_into().unwrap()) as usize;
        idx += 4;
        if idx + l > blob.len() {
            return Err(GccError::CorruptPayload("vocab v1 troncato (data)".into()));
        }
        vocab.push(blob[idx..idx + l].to_vec());
        idx += l;
    }

    if idx != blob.len() {
        return Err(GccError::CorruptPayload("vocab v1 con trailing garbage".into()));
    }
    Ok(vocab)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_roundtrip() {
        let vocab = vec![b"foo\n".to_vec(), b"bar\n".to_vec(), b"".to_vec()];
        let blob = pack_vocab_list(&vocab);
        assert_eq!(&blob[..4], MAGIC_VB2);
        assert_eq!(unpack_vocab_list(&blob).unwrap(), vocab);
    }

    #[test]
    fn v1_legacy_parses() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&2u32.to_be_bytes());
        blob.extend_from_slice(&3u32.to_be_bytes());
        blob.extend_from_slice(b"abc");
        blob.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(unpack_vocab_list(&blob).unwrap(), vec![b"abc".to_vec(), Vec::new()]);
    }
}
