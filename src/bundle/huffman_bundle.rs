//! Huffman stream bundle. Encoder always emits V2 (varint lengths,
//! delta-sorted-by-symbol freq table); the decoder also accepts legacy V1
//! (fixed u32 lengths, non-delta freq pairs) for backward compatibility.

use crate::error::{GccError, GccResult};
use crate::varint::{decode_varint, encode_varint};

use super::{EncodedStream, Encoding, StreamKind};

const MAGIC_V1: &[u8; 4] = b"HBN1";
const MAGIC_V2: &[u8; 4] = b"HBN2";

fn kind_flag(kind: StreamKind) -> u8 {
    match kind {
        StreamKind::Bytes => 0,
        StreamKind::Ids => 1,
    }
}

fn flag_kind(flag: u8) -> StreamKind {
    if flag == 0 { StreamKind::Bytes } else { StreamKind::Ids }
}

fn pack_stream_v2(enc: &EncodedStream) -> GccResult<Vec<u8>> {
    let name_b = enc.name.as_bytes();
    if name_b.len() > 0xFF {
        return Err(GccError::Other("stream name troppo lungo (max 255)".into()));
    }
    let mut out = Vec::new();
    out.push(if enc.encoding == Encoding::Raw { 0 } else { 1 });
    out.push(kind_flag(enc.kind));
    out.push(name_b.len() as u8);
    out.extend_from_slice(name_b);
    out.extend_from_slice(&(enc.alphabet_size as u32).to_be_bytes());
    out.extend_from_slice(&(enc.n as u32).to_be_bytes());

    if enc.encoding == Encoding::Raw {
        encode_varint(enc.raw.len() as u64, &mut out);
        out.extend_from_slice(&enc.raw);
        return Ok(out);
    }

    let mut used_sorted = enc.freq_used.clone();
    used_sorted.sort_by_key(|&(sym, _)| sym);
    encode_varint(used_sorted.len() as u64, &mut out);

    let mut prev = 0u32;
    let mut first = true;
    for &(sym, f) in &used_sorted {
        let delta = if first {
            first = false;
            sym
        } else {
            if sym < prev {
                return Err(GccError::Other("used_sorted non monotono".into()));
            }
            sym - prev
        };
        prev = sym;
        encode_varint(delta as u64, &mut out);
        encode_varint(f, &mut out);
    }

    out.push(enc.lastbits);
    encode_varint(enc.bitstream.len() as u64, &mut out);
    out.extend_from_slice(&enc.bitstream);
    Ok(out)
}

fn read_u32(blob: &[u8], idx: usize) -> GccResult<(u32, usize)> {
    if idx + 4 > blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (u32)".into()));
    }
    let mut b = [0u8; 4];
    b.copy_from_slice(&blob[idx..idx + 4]);
    Ok((u32::from_be_bytes(b), idx + 4))
}

fn unpack_stream_v1(blob: &[u8]) -> GccResult<EncodedStream> {
    let mut idx = 0;
    if idx + 1 + 1 + 1 + 4 + 4 > blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (header stream)".into()));
    }
    let enc_flag = blob[idx]; idx += 1;
    let kind_flag_v = blob[idx]; idx += 1;
    let name_len = blob[idx] as usize; idx += 1;

    if idx + name_len > blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (name)".into()));
    }
    let name = String::from_utf8(blob[idx..idx + name_len].to_vec())
        .map_err(|_| GccError::CorruptPayload("nome stream non UTF-8".into()))?;
    idx += name_len;

    let (alphabet_size, next) = read_u32(blob, idx)?; idx = next;
    let (n, next) = read_u32(blob, idx)?; idx = next;
    let kind = flag_kind(kind_flag_v);

    if enc_flag == 0 {
        let (raw_len, next) = read_u32(blob, idx)?; idx = next;
        let raw_len = raw_len as usize;
        if idx + raw_len > blob.len() {
            return Err(GccError::CorruptPayload("bundle troncato (raw)".into()));
        }
        let raw = blob[idx..idx + raw_len].to_vec();
        return Ok(EncodedStream {
            name, kind, alphabet_size: alphabet_size as usize, n: n as usize,
            encoding: Encoding::Raw, raw, freq_used: Vec::new(), lastbits: 0, bitstream: Vec::new(),
        });
    }

    let (num_used, next) = read_u32(blob, idx)?; idx = next;
    let mut used = Vec::with_capacity(num_used as usize);
    for _ in 0..num_used {
        if idx + 8 > blob.len() {
            return Err(GccError::CorruptPayload("bundle troncato (freq entries)".into()));
        }
        let (sym, next) = read_u32(blob, idx)?; idx = next;
        let (f, next) = read_u32(blob, idx)?; idx = next;
        used.push((sym, f as u64));
    }

    if idx >= blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (lastbits)".into()));
    }
    let lastbits = blob[idx]; idx += 1;

    let (bs_len, next) = read_u32(blob, idx)?; idx = next;
    let bs_len = bs_len as usize;
    if idx + bs_len > blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (bitstream)".into()));
    }
    let bitstream = blob[idx..idx + bs_len].to_vec();

    Ok(EncodedStream {
        name, kind, alphabet_size: alphabet_size as usize, n: n as usize,
        encoding: Encoding::Huffman, raw: Vec::new(), freq_used: used, lastbits, bitstream,
    })
}

fn unpack_stream_v2(blob: &[u8]) -> GccResult<EncodedStream> {
    let mut idx = 0;
    if idx + 1 + 1 + 1 + 4 + 4 > blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (header stream)".into()));
    }
    let enc_flag = blob[idx]; idx += 1;
    let kind_flag_v = blob[idx]; idx += 1;
    let name_len = blob[idx] as usize; idx += 1;

    if idx + name_len > blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (name)".into()));
    }
    let name = String::from_utf8(blob[idx..idx + name_len].to_vec())
        .map_err(|_| GccError::CorruptPayload("nome stream non UTF-8".into()))?;
    idx += name_len;

    let (alphabet_size, next) = read_u32(blob, idx)?; idx = next;
    let (n, next) = read_u32(blob, idx)?; idx = next;
    let kind = flag_kind(kind_flag_v);

    if enc_flag == 0 {
        let (raw_len, next) = decode_varint(blob, idx)?; idx = next;
        let raw_len = raw_len as usize;
        if idx + raw_len > blob.len() {
            return Err(GccError::CorruptPayload("bundle troncato (raw)".into()));
        }
        let raw = blob[idx..idx + raw_len].to_vec();
        return Ok(EncodedStream {
            name, kind, alphabet_size: alphabet_size as usize, n: n as usize,
            encoding: Encoding::Raw, raw, freq_used: Vec::new(), lastbits: 0, bitstream: Vec::new(),
        });
    }

    let (num_used, next) = decode_varint(blob, idx)?; idx = next;
    let mut used = Vec::with_capacity(num_used as usize);
    let mut sym = 0u32;
    let mut first = true;
    for _ in 0..num_used {
        let (delta, next) = decode_varint(blob, idx)?; idx = next;
        if first {
            sym = delta as u32;
            first = false;
        } else {
            sym += delta as u32;
        }
        let (f, next) = decode_varint(blob, idx)?; idx = next;
        used.push((sym, f));
    }

    if idx >= blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (lastbits)".into()));
    }
    let lastbits = blob[idx]; idx += 1;

    let (bs_len, next) = decode_varint(blob, idx)?; idx = next;
    let bs_len = bs_len as usize;
    if idx + bs_len > blob.len() {
        return Err(GccError::CorruptPayload("bundle troncato (bitstream)".into()));
    }
    let bitstream = blob[idx..idx + bs_len].to_vec();

    Ok(EncodedStream {
        name, kind, alphabet_size: alphabet_size as usize, n: n as usize,
        encoding: Encoding::Huffman, raw: Vec::new(), freq_used: used, lastbits, bitstream,
    })
}

pub fn pack_huffman_bundle(streams: &[EncodedStream]) -> GccResult<Vec<u8>> {
    if streams.len() > 0xFF {
        return Err(GccError::Other("troppi stream (max 255)".into()));
    }
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC_V2);
    out.push(streams.len() as u8);
    for s in streams {
        let sb = pack_stream_v2(s)?;
        encode_varint(sb.len() as u64, &mut out);
        out.extend_from_slice(&sb);
    }
    Ok(out)
}

pub fn unpack_huffman_bundle(payload: &[u8]) -> GccResult<Vec<EncodedStream>> {
    if payload.len() < 5 {
        return Err(GccError::CorruptPayload("payload troppo corto per bundle".into()));
    }
    let magic = &payload[..4];
    if magic != MAGIC_V1 && magic != MAGIC_V2 {
        return Err(GccError::BadMagic("payload non e' un Huffman bundle".into()));
    }
    let mut idx = 4;
    let n_streams = payload[idx]; idx += 1;
    let mut streams = Vec::with_capacity(n_streams as usize);

    if magic == MAGIC_V1 {
        for _ in 0..n_streams {
            let (l, next) = read_u32(payload, idx)?; idx = next;
            let l = l as usize;
            if idx + l > payload.len() {
                return Err(GccError::CorruptPayload("bundle V1 troncato (stream blob)".into()));
            }
            streams.push(unpack_stream_v1(&payload[idx..idx + l])?);
            idx += l;
        }
        return Ok(streams);
    }

    for _ in 0..n_streams {
        let (l, next) = decode_varint(payload, idx)?; idx = next;
        let l = l as usize;
        if idx + l > payload.len() {
            return Err(GccError::CorruptPayload("bundle V2 troncato (stream blob)".into()));
        }
        streams.push(unpack_stream_v2(&payload[idx..idx + l])?);
        idx += l;
    }
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::SymbolStream;

    #[test]
    fn roundtrip_bytes_and_ids() {
        let s1 = crate::bundle::encode_stream_huffman(&SymbolStream::bytes("main", b"hello world hello".to_vec())).unwrap();
        let s2 = crate::bundle::encode_stream_huffman(&SymbolStream::ids("ids", vec![0, 1, 1, 2, 0], 3)).unwrap();
        let packed = pack_huffman_bundle(&[s1, s2]).unwrap();
        let unpacked = unpack_huffman_bundle(&packed).unwrap();
        assert_eq!(unpacked.len(), 2);
        assert_eq!(unpacked[0].name, "main");
        assert_eq!(unpacked[1].name, "ids");
    }
}
