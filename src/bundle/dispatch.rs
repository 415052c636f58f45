//! Shared "streams -> codec bundle -> streams" dispatch used by the
//! container when a codec (not MBN) needs to wrap a layer's symbol streams.
//!
//! Given the streams a layer produced (plus an optional `__meta__` bytes
//! stream), picks the bundle format for the chosen codec: Huffman streams go
//! through [`huffman_bundle`], zstd streams take the [`zstd_raw`] fast path
//! when there is exactly one bare "main" bytes stream, otherwise fall back to
//! [`zstd_bundle`]'s ZBN2 format.

use crate::codec::zstd::ZstdCodec;
use crate::error::{GccError, GccResult};

use super::{encode_stream_huffman, encode_stream_raw, huffman_bundle, zstd_bundle, zstd_raw, SymbolStream, StreamKind};

pub const META_STREAM_NAME: &str = "__meta__";

pub enum StreamCodec {
    Huffman,
    Zstd(ZstdCodec),
}

/// Encodes a layer's symbol streams (plus optional packed meta bytes) into a
/// single self-describing payload blob.
pub fn encode_payload(mut streams: Vec<SymbolStream>, meta_bytes: Option<Vec<u8>>, codec: &StreamCodec) -> GccResult<Vec<u8>> {
    if let Some(mb) = meta_bytes {
        if !mb.is_empty() {
            streams.push(SymbolStream::bytes(META_STREAM_NAME, mb));
        }
    }

    match codec {
        StreamCodec::Huffman => {
            let enc_streams: GccResult<Vec<_>> = streams.iter().map(encode_stream_huffman).collect();
            huffman_bundle::pack_huffman_bundle(&enc_streams?)
        }
        StreamCodec::Zstd(zc) => {
            if streams.len() == 1 && streams[0].name == "main" && streams[0].kind == StreamKind::Bytes {
                zstd_raw::pack(&streams[0].bytes_data, zc)
            } else {
                zstd_bundle::pack_zstd_bundle2(&streams, zc)
            }
        }
    }
}

/// The inverse of [`encode_payload`]: returns the decoded symbol streams and
/// the `__meta__` bytes, if present.
pub fn decode_payload(payload: &[u8]) -> GccResult<(Vec<SymbolStream>, Option<Vec<u8>>)> {
    let streams = if zstd_raw::is_zraw1(payload) {
        let raw = zstd_raw::unpack(payload)?;
        vec![SymbolStream::bytes("main", raw)]
    } else if huffman_bundle_magic(payload) {
        let encoded = huffman_bundle::unpack_huffman_bundle(payload)?;
        encoded.into_iter().map(decode_encoded_stream).collect::<GccResult<Vec<_>>>()?
    } else if payload.len() >= 4 && &payload[..4] == b"ZBN1" {
        zstd_bundle::unpack_zstd_bundle(payload)?
    } else if payload.len() >= 4 && &payload[..4] == b"ZBN2" {
        zstd_bundle::unpack_zstd_bundle2(payload)?
    } else {
        return Err(GccError::BadMagic("payload v6 non riconosciuto (bundle sconosciuto)".into()));
    };

    split_meta(streams)
}

fn huffman_bundle_magic(payload: &[u8]) -> bool {
    payload.len() >= 4 && (&payload[..4] == b"HBN1" || &payload[..4] == b"HBN2")
}

fn decode_encoded_stream(enc: super::EncodedStream) -> GccResult<SymbolStream> {
    use super::Encoding;
    use crate::huffman;

    if enc.encoding == Encoding::Raw {
        if enc.kind != StreamKind::Bytes {
            return Err(GccError::CorruptPayload("raw supportato solo per bytes".into()));
        }
        return Ok(SymbolStream::bytes(enc.name, enc.raw));
    }

    let mut freq = vec![0u64; enc.alphabet_size];
    for &(sym, f) in &enc.freq_used {
        if sym as usize >= enc.alphabet_size {
            return Err(GccError::CorruptPayload("freq_used contiene sym fuori range".into()));
        }
        freq[sym as usize] = f;
    }

    match enc.kind {
        StreamKind::Bytes => {
            let data = huffman::decompress_bytes(&freq, &enc.bitstream, enc.n, enc.lastbits)?;
            Ok(SymbolStream::bytes(enc.name, data))
        }
        StreamKind::Ids => {
            let ids = huffman::decompress_ids(&freq, enc.n, enc.lastbits, &enc.bitstream)?;
            Ok(SymbolStream::ids(enc.name, ids, enc.alphabet_size))
        }
    }
}

fn split_meta(streams: Vec<SymbolStream>) -> GccResult<(Vec<SymbolStream>, Option<Vec<u8>>)> {
    let mut meta_bytes = None;
    let mut rest = Vec::with_capacity(streams.len());
    for s in streams {
        if s.name == META_STREAM_NAME {
            if !s.bytes_data.is_empty() {
                meta_bytes = Some(s.bytes_data);
            }
        } else {
            rest.push(s);
        }
    }
    Ok((rest, meta_bytes))
}

#[allow(dead_code)]
fn unused_raw_encoder_ref() {
    // encode_stream_raw stays reachable for codecs that never Huffman-code
    // (kept alongside encode_stream_huffman for symmetry).
    let _ = encode_stream_raw;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huffman_payload_roundtrip_with_meta() {
        let streams = vec![SymbolStream::bytes("main", b"hello world hello".to_vec())];
        let payload = encode_payload(streams, Some(b"m".to_vec()), &StreamCodec::Huffman).unwrap();
        let (decoded, meta) = decode_payload(&payload).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].bytes_data, b"hello world hello");
        assert_eq!(meta, Some(b"m".to_vec()));
    }

    #[test]
    fn zstd_single_stream_uses_zraw1_fastpath() {
        let streams = vec![SymbolStream::bytes("main", b"abcabcabcabc".to_vec())];
        let payload = encode_payload(streams, None, &StreamCodec::Zstd(ZstdCodec::default())).unwrap();
        assert!(zstd_raw::is_zraw1(&payload));
        let (decoded, meta) = decode_payload(&payload).unwrap();
        assert_eq!(decoded[0].bytes_data, b"abcabcabcabc");
        assert!(meta.is_none());
    }

    #[test]
    fn zstd_multi_stream_uses_zbn2() {
        let streams = vec![
            SymbolStream::bytes("mask", b"VVCC".to_vec()),
            SymbolStream::bytes("vowels", b"ae".to_vec()),
        ];
        let payload = encode_payload(streams, None, &StreamCodec::Zstd(ZstdCodec::default())).unwrap();
        let (decoded, _) = decode_payload(&payload).unwrap();
        assert_eq!(decoded.len(), 2);
    }
}
