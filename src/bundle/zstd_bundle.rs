//! zstd stream bundles. ZBN1 (legacy) compresses each stream's payload with
//! its own zstd frame; ZBN2 (current) serializes all streams into one inner
//! blob and compresses that with a single frame.

use crate::bundle::{SymbolStream, StreamKind};
use crate::codec::zstd::ZstdCodec;
use crate::error::{GccError, GccResult};
use crate::varint::{decode_varint, encode_varint};

const ZBN1_MAGIC: &[u8; 4] = b"ZBN1";
const ZBN2_MAGIC: &[u8; 4] = b"ZBN2";

fn pack_ids_varint(ids: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in ids {
        encode_varint(v as u64, &mut out);
    }
    out
}

fn unpack_ids_varint(data: &[u8], n: usize) -> GccResult<Vec<u32>> {
    let mut ids = Vec::with_capacity(n);
    let mut idx = 0;
    for _ in 0..n {
        let (v, next) = decode_varint(data, idx)?;
        ids.push(v as u32);
        idx = next;
    }
    if idx != data.len() {
        return Err(GccError::CorruptPayload("ids varint: bytes residui (n mismatch o payload corrotto)".into()));
    }
    Ok(ids)
}

fn stream_payload(s: &SymbolStream) -> GccResult<(u8, Vec<u8>)> {
    match s.kind {
        StreamKind::Bytes => {
            if s.n != s.bytes_data.len() {
                return Err(GccError::Other("SymbolStream.n mismatch (bytes)".into()));
            }
            Ok((0, s.bytes_data.clone()))
        }
        StreamKind::Ids => {
            if s.n != s.ids_data.len() {
                return Err(GccError::Other("SymbolStream.n mismatch (ids)".into()));
            }
            Ok((1, pack_ids_varint(&s.ids_data)))
        }
    }
}

fn stream_from_payload(name: String, kind_b: u8, alphabet_size: usize, n: usize, payload: &[u8]) -> GccResult<SymbolStream> {
    match kind_b {
        0 => {
            if payload.len() != n {
                return Err(GccError::CorruptPayload("bundle corrotto: n mismatch (bytes)".into()));
            }
            Ok(SymbolStream::bytes(name, payload.to_vec()))
        }
        1 => {
            let ids = unpack_ids_varint(payload, n)?;
            Ok(SymbolStream::ids(name, ids, alphabet_size))
        }
        other => Err(GccError::CorruptPayload(format!("kind byte sconosciuto: {other}"))),
    }
}

pub fn pack_zstd_bundle(streams: &[SymbolStream], codec: &ZstdCodec) -> GccResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(ZBN1_MAGIC);
    encode_varint(streams.len() as u64, &mut out);

    for s in streams {
        let name_b = s.name.as_bytes();
        if name_b.len() > 255 {
            return Err(GccError::Other("stream name troppo lungo (max 255)".into()));
        }
        out.push(name_b.len() as u8);
        out.extend_from_slice(name_b);

        let (kind, payload) = stream_payload(s)?;
        out.push(kind);
        out.extend_from_slice(&(s.alphabet_size as u32).to_be_bytes());
        out.extend_from_slice(&(s.n as u32).to_be_bytes());

        let comp = codec.compress(&payload)?;
        encode_varint(comp.len() as u64, &mut out);
        out.extend_from_slice(&comp);
    }
    Ok(out)
}

pub fn unpack_zstd_bundle(blob: &[u8]) -> GccResult<Vec<SymbolStream>> {
    if blob.len() < 4 || &blob[..4] != ZBN1_MAGIC {
        return Err(GccError::BadMagic("ZBN1 magic non valido".into()));
    }
    let mut idx = 4;
    let (n_streams, next) = decode_varint(blob, idx)?;
    idx = next;

    let mut streams = Vec::with_capacity(n_streams as usize);
    for _ in 0..n_streams {
        if idx >= blob.len() {
            return Err(GccError::CorruptPayload("bundle troncato (name_len)".into()));
        }
        let name_len = blob[idx] as usize; idx += 1;
        if idx + name_len > blob.len() {
            return Err(GccError::CorruptPayload("bundle troncato (name)".into()));
        }
        let name = String::from_utf8(blob[idx..idx + name_len].to_vec())
            .map_err(|_| GccError::CorruptPayload("nome stream non UTF-8".into()))?;
        idx += name_len;

        if idx >= blob.len() {
            return Err(GccError::CorruptPayload("bundle troncato (kind)".into()));
        }
        let kind_b = blob[idx]; idx += 1;

        if idx + 8 > blob.len() {
            return Err(GccError::CorruptPayload("bundle troncato (sizes)".into()));
        }
        let alphabet_size = u32::from_be_bytes(blob[idx..idx + 4].try_into().unwrap()) as usize; idx += 4;
        let n = u32::from_be_bytes(blob[idx..idx + 4].try_into().unwrap()) as usize; idx += 4;

        let (comp_len, next) = decode_varint(blob, idx)?; idx = next;
        let comp_len = comp_len as usize;
        if idx + comp_len > blob.len() {
            return Err(GccError::CorruptPayload("bundle troncato (comp bytes)".into()));
        }
        let comp = &blob[idx..idx + comp_len];
        idx += comp_len;

        let payload = crate::codec::zstd::decompress(comp, None)?;
        streams.push(stream_from_payload(name, kind_b, alphabet_size, n, &payload)?);
    }
    Ok(streams)
}

fn pack_inner(streams: &[SymbolStream]) -> GccResult<Vec<u8>> {
    let mut inner = Vec::new();
    encode_varint(streams.len() as u64, &mut inner);
    for s in streams {
        let name_b = s.name.as_bytes();
        if name_b.len() > 255 {
            return Err(GccError::Other("stream name troppo lungo (max 255)".into()));
        }
        inner.push(name_b.len() as u8);
        inner.extend_from_slice(name_b);

        let (kind, payload) = stream_payload(s)?;
        inner.push(kind);
        inner.extend_from_slice(&(s.alphabet_size as u32).to_be_bytes());
        inner.extend_from_slice(&(s.n as u32).to_be_bytes());
        encode_varint(payload.len() as u64, &mut inner);
        inner.extend_from_slice(&payload);
    }
    Ok(inner)
}

fn unpack_inner(inner: &[u8]) -> GccResult<Vec<SymbolStream>> {
    let mut idx = 0;
    let (n_streams, next) = decode_varint(inner, idx)?; idx = next;

    let mut streams = Vec::with_capacity(n_streams as usize);
    for _ in 0..n_streams {
        if idx >= inner.len() {
            return Err(GccError::CorruptPayload("inner troncato (name_len)".into()));
        }
        let name_len = inner[idx] as usize; idx += 1;
        if idx + name_len > inner.len() {
            return Err(GccError::CorruptPayload("inner troncato (name)".into()));
        }
        let name = String::from_utf8(inner[idx..idx + name_len].to_vec())
            .map_err(|_| GccError::CorruptPayload("nome stream non UTF-8".into()))?;
        idx += name_len;

        if idx >= inner.len() {
            return Err(GccError::CorruptPayload("inner troncato (kind)".into()));
        }
        let kind_b = inner[idx]; idx += 1;

        if idx + 8 > inner.len() {
            return Err(GccError::CorruptPayload("inner troncato (sizes)".into()));
        }
        let alphabet_size = u32::from_be_bytes(inner[idx..idx + 4].try_into().unwrap()) as usize; idx += 4;
        let n = u32::from_be_bytes(inner[idx..idx + 4].try_into().unwrap()) as usize; idx += 4;

        let (payload_len, next) = decode_varint(inner, idx)?; idx = next;
        let payload_len = payload_len as usize;
        if idx + payload_len > inner.len() {
            return Err(GccError::CorruptPayload("inner troncato (payload)".into()));
        }
        let payload = &inner[idx..idx + payload_len];
        idx += payload_len;

        streams.push(stream_from_payload(name, kind_b, alphabet_size, n, payload)?);
    }

    if idx != inner.len() {
        return Err(GccError::CorruptPayload("inner: bytes residui (corruzione o mismatch)".into()));
    }
    Ok(streams)
}

pub fn pack_zstd_bundle2(streams: &[SymbolStream], codec: &ZstdCodec) -> GccResult<Vec<u8>> {
    let inner = pack_inner(streams)?;
    let comp = codec.compress(&inner)?;
    let mut out = Vec::new();
    out.extend_from_slice(ZBN2_MAGIC);
    encode_varint(inner.len() as u64, &mut out);
    out.extend_from_slice(&comp);
    Ok(out)
}

pub fn unpack_zstd_bundle2(blob: &[u8]) -> GccResult<Vec<SymbolStream>> {
    if blob.len() < 4 || &blob[..4] != ZBN2_MAGIC {
        return Err(GccError::BadMagic("ZBN2 magic non valido".into()));
    }
    let mut idx = 4;
    let (inner_len, next) = decode_varint(blob, idx)?; idx = next;
    let comp = &blob[idx..];
    let inner = crate::codec::zstd::decompress(comp, Some(inner_len as usize))?;
    if inner.len() as u64 != inner_len {
        return Err(GccError::HashMismatch("ZBN2: inner_len mismatch (file corrotto?)".into()));
    }
    unpack_inner(&inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zbn2_roundtrip() {
        let streams = vec![
            SymbolStream::bytes("main", b"hello hello hello world".to_vec()),
            SymbolStream::ids("ids", vec![0, 1, 2, 1, 0], 3),
        ];
        let codec = ZstdCodec::default();
        let packed = pack_zstd_bundle2(&streams, &codec).unwrap();
        let unpacked = unpack_zstd_bundle2(&packed).unwrap();
        assert_eq!(unpacked.len(), 2);
        assert_eq!(unpacked[0].bytes_data, streams[0].bytes_data);
        assert_eq!(unpacked[1].ids_data, streams[1].ids_data);
    }

    #[test]
    fn zbn1_roundtrip() {
        let streams = vec![SymbolStream::bytes("main", b"abcabcabcabc".to_vec())];
        let codec = ZstdCodec::default();
        let packed = pack_zstd_bundle(&streams, &codec).unwrap();
        let unpacked = unpack_zstd_bundle(&packed).unwrap();
        assert_eq!(unpacked[0].bytes_data, streams[0].bytes_data);
    }
}
