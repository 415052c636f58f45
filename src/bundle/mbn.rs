//! MBN: the multi-stream container used by container v6 to bundle a layer's
//! several named byte streams (e.g. vc0's mask/vowels/cons) under one codec
//! dispatch, each stream independently codec-tagged.
//!
//! Layout: `"MBN" + varint(count) + per-stream[u8 stype, u8 codec,
//! varint(ulen), varint(clen), varint(mlen), meta[mlen], comp[clen]]`.

use crate::error::{GccError, GccResult};
use crate::varint::{decode_varint, encode_varint};

pub const MAGIC: &[u8; 3] = b"MBN";

pub const ST_MAIN: u8 = 0;
pub const ST_MASK: u8 = 1;
pub const ST_VOWELS: u8 = 2;
pub const ST_CONS: u8 = 3;
pub const ST_TEXT: u8 = 10;
pub const ST_NUMS: u8 = 11;
pub const ST_TPL: u8 = 20;
pub const ST_IDS: u8 = 21;
pub const ST_META: u8 = 250;

const MAX_STREAMS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct MbnStream {
    pub stype: u8,
    pub codec: u8,
    pub ulen: u64,
    pub comp: Vec<u8>,
    pub meta: Vec<u8>,
}

pub fn is_mbn(payload: &[u8]) -> bool {
    payload.len() >= 3 && &payload[..3] == MAGIC
}

pub fn pack(streams: &[MbnStream]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    encode_varint(streams.len() as u64, &mut out);
    for s in streams {
        out.push(s.stype);
        out.push(s.codec);
        encode_varint(s.ulen, &mut out);
        encode_varint(s.comp.len() as u64, &mut out);
        encode_varint(s.meta.len() as u64, &mut out);
        if !s.meta.is_empty() {
            out.extend_from_slice(&s.meta);
        }
        out.extend_from_slice(&s.comp);
    }
    out
}

pub fn unpack(payload: &[u8]) -> GccResult<Vec<MbnStream>> {
    if !is_mbn(payload) {
        return Err(GccError::BadMagic("MBN: magic non valido".into()));
    }
    let mut idx = 3;
    let (n, next) = decode_varint(payload, idx)?;
    idx = next;
    if n > MAX_STREAMS {
        return Err(GccError::CorruptPayload("MBN: nstreams troppo grande (sanity check)".into()));
    }

    let mut streams = Vec::with_capacity(n as usize);
    for _ in 0..n {
        if idx + 2 > payload.len() {
            return Err(GccError::CorruptPayload("MBN: header stream troncato".into()));
        }
        let stype = payload[idx];
        let codec = payload[idx + 1];
        idx += 2;

        let (ulen, next) = decode_varint(payload, idx)?;
        idx = next;
        let (clen, next) = decode_varint(payload, idx)?;
        idx = next;
        let (mlen, next) = decode_varint(payload, idx)?;
        idx = next;

        let mlen = mlen as usize;
        let clen = clen as usize;
        if idx + mlen + clen > payload.len() {
            return Err(GccError::CorruptPayload("MBN: stream troncato (meta/comp)".into()));
        }
        let meta = if mlen > 0 { payload[idx..idx + mlen].to_vec() } else { Vec::new() };
        idx += mlen;
        let comp = payload[idx..idx + clen].to_vec();
        idx += clen;

        streams.push(MbnStream { stype, codec, ulen, comp, meta });
    }
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let streams = vec![
            MbnStream { stype: ST_MAIN, codec: 3, ulen: 5, comp: b"hello".to_vec(), meta: Vec::new() },
            MbnStream { stype: ST_META, codec: 3, ulen: 2, comp: b"ab".to_vec(), meta: b"x".to_vec() },
        ];
        let packed = pack(&streams);
        assert!(is_mbn(&packed));
        let unpacked = unpack(&packed).unwrap();
        assert_eq!(unpacked.len(), 2);
        assert_eq!(unpacked[0].comp, b"hello");
        assert_eq!(unpacked[1].meta, b"x");
    }
}
