//! Container v6: the compact on-disk header for a single compressed file,
//! wrapping either a Huffman/Zstd bundle payload or an MBN multi-stream
//! payload. This is the write target; v1-v5 containers are out of scope.
//!
//! `"GCC" | 0x06 | flags | layer_code | codec_code | [varint meta_len | meta]
//! | payload` (payload runs to the end of the blob; `F_HAS_PAYLOAD_LEN` is
//! accepted on read for forward compatibility but never written).

use crate::bundle::dispatch::{self, StreamCodec};
use crate::bundle::{mbn, SymbolStream, StreamKind};
use crate::codec::num_v1;
use crate::codec::zstd::ZstdCodec;
use crate::codec::{codes as codec_codes, raw, zlib};
use crate::error::{GccError, GccResult};
use crate::layers::{codes as layer_codes, lines_dict, lines_rle, split_text_nums, tpl_lines_shared_v0, tpl_lines_v0, vc0, LayerSymbols};
use crate::varint::{decode_varint, encode_varint};

pub const MAGIC: &[u8; 3] = b"GCC";
pub const VER_V6: u8 = 6;

const F_HAS_META: u8 = 0x01;
const F_HAS_PAYLOAD_LEN: u8 = 0x02;
const F_KIND_EXTRACT: u8 = 0x80;

pub fn is_container_v6(blob: &[u8]) -> bool {
    blob.len() >= 5 && &blob[..3] == MAGIC && blob[3] == VER_V6
}

#[derive(Debug, Clone)]
pub struct V6Header {
    pub layer_id: String,
    pub codec_id: String,
    pub is_extract: bool,
    pub meta: Vec<u8>,
    pub payload: Vec<u8>,
}

pub fn pack_container_v6(payload: &[u8], layer_id: &str, codec_id: &str, meta: &[u8], is_extract: bool) -> GccResult<Vec<u8>> {
    let layer_code = layer_codes::name_to_code(layer_id)
        .ok_or_else(|| GccError::Usage(format!("v6: layer_id non mappato: {layer_id:?}")))?;
    let codec_code = codec_codes::name_to_code(codec_id)
        .ok_or_else(|| GccError::Usage(format!("v6: codec_id non mappato: {codec_id:?}")))?;

    let mut flags = if is_extract { F_KIND_EXTRACT } else { 0 };
    if !meta.is_empty() {
        flags |= F_HAS_META;
    }

    let mut out = Vec::with_capacity(7 + meta.len() + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(VER_V6);
    out.push(flags);
    out.push(layer_code);
    out.push(codec_code);
    if !meta.is_empty() {
        encode_varint(meta.len() as u64, &mut out);
        out.extend_from_slice(meta);
    }
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn unpack_container_v6(blob: &[u8]) -> GccResult<V6Header> {
    if blob.len() < 7 {
        return Err(GccError::CorruptPayload("v6: blob troppo corto".into()));
    }
    if &blob[..3] != MAGIC {
        return Err(GccError::BadMagic("v6: magic non valido".into()));
    }
    let ver = blob[3];
    if ver != VER_V6 {
        return Err(GccError::UnsupportedVersion(format!("v6: version non supportata: {ver}")));
    }

    let flags = blob[4];
    let layer_code = blob[5];
    let codec_code = blob[6];

    let layer_id = layer_codes::code_to_name(layer_code)
        .ok_or_else(|| GccError::CorruptPayload(format!("v6: layer_code sconosciuto: {layer_code}")))?
        .to_string();
    let codec_id = codec_codes::code_to_name(codec_code)
        .ok_or_else(|| GccError::CorruptPayload(format!("v6: codec_code sconosciuto: {codec_code}")))?
        .to_string();

    let mut idx = 7usize;
    let mut meta = Vec::new();
    if flags & F_HAS_META != 0 {
        let (mlen, next) = decode_varint(blob, idx)?;
        idx = next;
        let mlen = mlen as usize;
        if idx + mlen > blob.len() {
            return Err(GccError::CorruptPayload("v6: meta troncata".into()));
        }
        meta = blob[idx..idx + mlen].to_vec();
        idx += mlen;
    }

    let payload = if flags & F_HAS_PAYLOAD_LEN != 0 {
        let (plen, next) = decode_varint(blob, idx)?;
        idx = next;
        let plen = plen as usize;
        if idx + plen > blob.len() {
            return Err(GccError::CorruptPayload("v6: payload troncato".into()));
        }
        blob[idx..idx + plen].to_vec()
    } else {
        blob[idx..].to_vec()
    };

    Ok(V6Header { layer_id, codec_id, is_extract: flags & F_KIND_EXTRACT != 0, meta, payload })
}

/// A byte-blob codec usable standalone for an individual MBN stream record
/// (as opposed to [`StreamCodec`], which needs a symbol alphabet).
pub enum ByteCodec<'a> {
    Raw,
    Zlib(u32),
    Zstd(ZstdCodec),
    NumV1(Option<&'a num_v1::SharedDict>),
}

impl<'a> ByteCodec<'a> {
    pub fn codec_id(&self) -> &'static str {
        match self {
            ByteCodec::Raw => "raw",
            ByteCodec::Zlib(_) => "zlib",
            ByteCodec::Zstd(zc) if zc.tight => "zstd_tight",
            ByteCodec::Zstd(_) => "zstd",
            ByteCodec::NumV1(_) => "num_v1",
        }
    }

    pub fn compress(&self, data: &[u8]) -> GccResult<Vec<u8>> {
        match self {
            ByteCodec::Raw => Ok(raw::compress(data)),
            ByteCodec::Zlib(level) => zlib::compress(data, *level),
            ByteCodec::Zstd(zc) => zc.compress(data),
            ByteCodec::NumV1(shared) => Ok(num_v1::compress(data, *shared)),
        }
    }

    pub fn decompress(&self, data: &[u8], out_size: Option<usize>) -> GccResult<Vec<u8>> {
        match self {
            ByteCodec::Raw => raw::decompress(data, out_size),
            ByteCodec::Zlib(_) => zlib::decompress(data),
            ByteCodec::Zstd(_) => crate::codec::zstd::decompress(data, out_size),
            ByteCodec::NumV1(shared) => num_v1::decompress(data, *shared, out_size),
        }
    }
}

pub(crate) fn byte_codec_by_name<'a>(name: &str, shared: &SharedResources<'a>) -> GccResult<ByteCodec<'a>> {
    Ok(match name {
        "raw" => ByteCodec::Raw,
        "zlib" => ByteCodec::Zlib(9),
        "zstd" => ByteCodec::Zstd(ZstdCodec { level: 19, tight: false }),
        "zstd_tight" => ByteCodec::Zstd(ZstdCodec { level: 19, tight: true }),
        "num_v1" => ByteCodec::NumV1(shared.num_dict),
        other => return Err(GccError::Usage(format!("MBN: codec non supportato per stream record: {other:?}"))),
    })
}

/// Bucket-level shared resources a layer or per-stream codec may consult.
#[derive(Default)]
pub struct SharedResources<'a> {
    pub tpl_dict: Option<&'a tpl_lines_shared_v0::SharedDict>,
    pub num_dict: Option<&'a num_v1::SharedDict>,
}

/// Layers whose symbol output maps onto a single bundle stream group that
/// `bundle::dispatch` (HBN2/ZBN2/ZRAW1) can carry without dropping data:
/// `bytes`, `vc0`, `lines_dict`, `lines_rle`. The other layers emit streams
/// whose shapes (`text`/`nums`, `tpl`/`ids`/`nums`) only the MBN envelope
/// preserves end to end, so the huffman/zstd bundle path is refused for them.
pub fn layer_supports_bundle(layer_id: &str) -> bool {
    matches!(layer_id, "bytes" | "vc0" | "lines_dict" | "lines_rle")
}

fn layer_encode_streams(layer_id: &str, data: &[u8], shared: &SharedResources<'_>) -> GccResult<(Vec<SymbolStream>, Option<Vec<u8>>)> {
    match layer_id {
        "bytes" => {
            let (symbols, _meta) = crate::layers::bytes::encode(data);
            Ok((vec![symbol_stream("main", symbols)?], None))
        }
        "vc0" => {
            let (symbols, _meta) = vc0::encode(data);
            Ok((multi_symbol_streams(symbols)?, None))
        }
        "lines_dict" => {
            let (symbols, meta) = lines_dict::encode(data);
            let meta_bytes = lines_dict::pack_meta(&meta);
            Ok((vec![symbol_stream("main", symbols)?], Some(meta_bytes)))
        }
        "lines_rle" => {
            let (symbols, meta) = lines_rle::encode(data);
            let meta_bytes = lines_rle::pack_meta(&meta);
            Ok((vec![symbol_stream("main", symbols)?], Some(meta_bytes)))
        }
        "split_text_nums" => {
            let (symbols, meta) = split_text_nums::encode(data);
            let meta_bytes = split_text_nums::pack_meta(&meta);
            Ok((multi_symbol_streams(symbols)?, non_empty(meta_bytes)))
        }
        "tpl_lines_v0" => {
            let (symbols, meta) = tpl_lines_v0::encode(data);
            let meta_bytes = tpl_lines_v0::pack_meta(&meta);
            Ok((multi_symbol_streams(symbols)?, non_empty(meta_bytes)))
        }
        "tpl_lines_shared_v0" => {
            let (symbols, meta) = tpl_lines_shared_v0::encode(data, shared.tpl_dict);
            let meta_bytes = tpl_lines_shared_v0::pack_meta(&meta);
            Ok((multi_symbol_streams(symbols)?, non_empty(meta_bytes)))
        }
        other => Err(GccError::Usage(format!("layer non supportato: {other:?}"))),
    }
}

fn non_empty(v: Vec<u8>) -> Option<Vec<u8>> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

fn symbol_stream(name: &'static str, symbols: LayerSymbols) -> GccResult<SymbolStream> {
    match symbols {
        LayerSymbols::Bytes(b) => Ok(SymbolStream::bytes(name, b)),
        LayerSymbols::Ids { data, vocab_size } => {
            let ids: Vec<u32> = data
                .into_iter()
                .map(|x| u32::try_from(x).map_err(|_| GccError::CorruptPayload("id fuori range u32".into())))
                .collect::<GccResult<Vec<u32>>>()?;
            Ok(SymbolStream::ids(name, ids, vocab_size))
        }
        LayerSymbols::MultiBytes(_) => Err(GccError::Other("atteso stream singolo, ricevuto multi-stream".into())),
    }
}

fn multi_symbol_streams(symbols: LayerSymbols) -> GccResult<Vec<SymbolStream>> {
    match symbols {
        LayerSymbols::MultiBytes(parts) => Ok(parts.into_iter().map(|(name, data)| SymbolStream::bytes(name, data)).collect()),
        _ => Err(GccError::Other("atteso multi-stream".into())),
    }
}

fn layer_decode_streams(layer_id: &str, streams: Vec<SymbolStream>, meta_bytes: Option<&[u8]>, shared: &SharedResources<'_>) -> GccResult<Vec<u8>> {
    match layer_id {
        "bytes" => crate::layers::bytes::decode(into_single(streams)?, &[]),
        "vc0" => vc0::decode(into_multi(streams), &[]),
        "lines_dict" => {
            let meta = lines_dict::unpack_meta(meta_bytes.unwrap_or(&[]))?;
            lines_dict::decode(into_single(streams)?, &meta)
        }
        "lines_rle" => {
            let meta = lines_rle::unpack_meta(meta_bytes.unwrap_or(&[]))?;
            lines_rle::decode(into_single(streams)?, &meta)
        }
        "split_text_nums" => {
            let meta = split_text_nums::unpack_meta(meta_bytes.unwrap_or(&[]))?;
            split_text_nums::decode(into_multi(streams), &meta)
        }
        "tpl_lines_v0" => {
            let meta = tpl_lines_v0::unpack_meta(meta_bytes.unwrap_or(&[]))?;
            tpl_lines_v0::decode(into_multi(streams), &meta)
        }
        "tpl_lines_shared_v0" => {
            let meta = tpl_lines_shared_v0::unpack_meta(meta_bytes.unwrap_or(&[]))?;
            tpl_lines_shared_v0::decode(into_multi(streams), &meta, shared.tpl_dict)
        }
        other => Err(GccError::Usage(format!("layer non supportato: {other:?}"))),
    }
}

fn into_single(mut streams: Vec<SymbolStream>) -> GccResult<LayerSymbols> {
    if streams.len() != 1 {
        return Err(GccError::CorruptPayload("atteso uno stream singolo".into()));
    }
    let s = streams.remove(0);
    Ok(match s.kind {
        StreamKind::Bytes => LayerSymbols::Bytes(s.bytes_data),
        StreamKind::Ids => LayerSymbols::Ids { data: s.ids_data.into_iter().map(|x| x as i64).collect(), vocab_size: s.alphabet_size },
    })
}

fn into_multi(streams: Vec<SymbolStream>) -> LayerSymbols {
    LayerSymbols::MultiBytes(streams.into_iter().map(|s| (leak_name(s.name), s.bytes_data)).collect())
}

/// Bundle/MBN round-trips always reconstruct one of a small fixed set of
/// stream names; interning them avoids plumbing lifetimes through
/// `LayerSymbols::MultiBytes`.
fn leak_name(name: String) -> &'static str {
    match name.as_str() {
        "main" => "main",
        "mask" => "mask",
        "vowels" => "vowels",
        "cons" => "cons",
        "text" => "text",
        "nums" => "nums",
        "tpl" => "tpl",
        "ids" => "ids",
        _ => Box::leak(name.into_boxed_str()),
    }
}

/// Encodes via the Huffman/Zstd bundle path (non-MBN). Only valid for
/// [`layer_supports_bundle`] layers.
pub fn compress_v6(data: &[u8], layer_id: &str, codec: &StreamCodec, shared: &SharedResources<'_>) -> GccResult<Vec<u8>> {
    if !layer_supports_bundle(layer_id) {
        return Err(GccError::Usage(format!(
            "layer {layer_id:?} e' multi-stream: richiede il container MBN (compress_v6_mbn)"
        )));
    }
    let (streams, meta_bytes) = layer_encode_streams(layer_id, data, shared)?;
    let codec_id = match codec {
        StreamCodec::Huffman => "huffman",
        StreamCodec::Zstd(zc) if zc.tight => "zstd_tight",
        StreamCodec::Zstd(_) => "zstd",
    };
    let payload = dispatch::encode_payload(streams, meta_bytes, codec)?;
    pack_container_v6(&payload, layer_id, codec_id, b"", false)
}

fn mbn_stype_for(name: &str) -> GccResult<u8> {
    Ok(match name {
        "main" => mbn::ST_MAIN,
        "mask" => mbn::ST_MASK,
        "vowels" => mbn::ST_VOWELS,
        "cons" => mbn::ST_CONS,
        "text" => mbn::ST_TEXT,
        "nums" => mbn::ST_NUMS,
        "tpl" => mbn::ST_TPL,
        "ids" => mbn::ST_IDS,
        other => return Err(GccError::Other(format!("MBN: nome stream sconosciuto: {other:?}"))),
    })
}

fn mbn_name_for(stype: u8) -> GccResult<&'static str> {
    Ok(match stype {
        mbn::ST_MAIN => "main",
        mbn::ST_MASK => "mask",
        mbn::ST_VOWELS => "vowels",
        mbn::ST_CONS => "cons",
        mbn::ST_TEXT => "text",
        mbn::ST_NUMS => "nums",
        mbn::ST_TPL => "tpl",
        mbn::ST_IDS => "ids",
        other => return Err(GccError::CorruptPayload(format!("MBN: stype sconosciuto: {other}"))),
    })
}

/// Encodes via container v6 + MBN: each stream gets its own byte codec
/// (`stream_codecs` overrides `default_codec` per stream name), with a
/// `META` record carrying the layer's packed meta, if any.
pub fn compress_v6_mbn(
    data: &[u8],
    layer_id: &str,
    default_codec: &str,
    stream_codecs: Option<&std::collections::HashMap<&str, &str>>,
    shared: &SharedResources<'_>,
) -> GccResult<Vec<u8>> {
    let (streams, meta_bytes) = layer_encode_streams(layer_id, data, shared)?;

    let mut records = Vec::with_capacity(streams.len() + 1);
    for s in streams {
        let name = s.name.clone();
        let cid = stream_codecs.and_then(|m| m.get(name.as_str())).copied().unwrap_or(default_codec);
        let codec = byte_codec_by_name(cid, shared)?;
        let stype = mbn_stype_for(&name)?;
        let raw_bytes = match s.kind {
            StreamKind::Bytes => s.bytes_data,
            StreamKind::Ids => crate::varint::encode_ints(&s.ids_data.iter().map(|&x| x as i64).collect::<Vec<_>>()),
        };
        let ulen = raw_bytes.len() as u64;
        let comp = codec.compress(&raw_bytes)?;
        let codec_code = codec_codes::name_to_code(cid)
            .ok_or_else(|| GccError::Usage(format!("v6: codec_id non mappato: {cid:?}")))?;
        records.push(mbn::MbnStream { stype, codec: codec_code, ulen, comp, meta: Vec::new() });
    }

    if let Some(mb) = meta_bytes {
        let comp = raw::compress(&mb);
        records.push(mbn::MbnStream {
            stype: mbn::ST_META,
            codec: codec_codes::RAW,
            ulen: mb.len() as u64,
            comp,
            meta: Vec::new(),
        });
    }

    let payload = mbn::pack(&records);
    pack_container_v6(&payload, layer_id, "mbn", b"", false)
}

pub fn decompress_v6(blob: &[u8], allow_extract: bool, shared: &SharedResources<'_>) -> GccResult<Vec<u8>> {
    let h = unpack_container_v6(blob)?;
    if h.is_extract && !allow_extract {
        return Err(GccError::Usage("file EXTRACT (lossy): usa extract-show".into()));
    }

    if mbn::is_mbn(&h.payload) {
        let records = mbn::unpack(&h.payload)?;
        let mut meta_bytes: Option<Vec<u8>> = None;
        let mut streams = Vec::with_capacity(records.len());
        for rec in records {
            let codec_name = codec_codes::code_to_name(rec.codec)
                .ok_or_else(|| GccError::CorruptPayload(format!("MBN: codec_code sconosciuto: {}", rec.codec)))?;
            let codec = byte_codec_by_name(codec_name, shared)?;
            let raw_bytes = codec.decompress(&rec.comp, Some(rec.ulen as usize))?;
            if rec.stype == mbn::ST_META {
                meta_bytes = Some(raw_bytes);
            } else {
                let name = mbn_name_for(rec.stype)?;
                streams.push(SymbolStream::bytes(name, raw_bytes));
            }
        }
        layer_decode_streams(&h.layer_id, streams, meta_bytes.as_deref(), shared)
    } else {
        let (streams, meta_bytes) = dispatch::decode_payload(&h.payload)?;
        layer_decode_streams(&h.layer_id, streams, meta_bytes.as_deref(), shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_fixture() {
        let blob = pack_container_v6(b"payload-bytes", "bytes", "zlib", b"", false).unwrap();
        assert_eq!(&blob[..4], &[0x47, 0x43, 0x43, 0x06]);
        let h = unpack_container_v6(&blob).unwrap();
        assert_eq!(h.layer_id, "bytes");
        assert_eq!(h.codec_id, "zlib");
        assert_eq!(h.payload, b"payload-bytes");
    }

    #[test]
    fn bytes_layer_huffman_bundle_roundtrip() {
        let data = b"HELLO 123\n".to_vec();
        let shared = SharedResources::default();
        let blob = compress_v6(&data, "bytes", &StreamCodec::Huffman, &shared).unwrap();
        assert!(is_container_v6(&blob));
        let out = decompress_v6(&blob, false, &shared).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn vc0_zstd_bundle_roundtrip() {
        let data = b"Hello, World! 123".to_vec();
        let shared = SharedResources::default();
        let blob = compress_v6(&data, "vc0", &StreamCodec::Zstd(ZstdCodec::default()), &shared).unwrap();
        let out = decompress_v6(&blob, false, &shared).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn lines_dict_huffman_bundle_roundtrip() {
        let data = b"foo\nbar\nfoo\nbaz".to_vec();
        let shared = SharedResources::default();
        let blob = compress_v6(&data, "lines_dict", &StreamCodec::Huffman, &shared).unwrap();
        let out = decompress_v6(&blob, false, &shared).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn split_text_nums_requires_mbn_not_bundle() {
        let data = b"qty=10 total=12.00\n".to_vec();
        let shared = SharedResources::default();
        assert!(compress_v6(&data, "split_text_nums", &StreamCodec::Huffman, &shared).is_err());
    }

    #[test]
    fn split_text_nums_mbn_roundtrip_with_stream_codecs() {
        let data = b"FATTURA 1001\nRIGA ARTICOLO: vite M3 qty=10 prezzo=1.20\nTOTALE 12.00\n".to_vec();
        let shared = SharedResources::default();
        let mut stream_codecs = std::collections::HashMap::new();
        stream_codecs.insert("text", "zlib");
        stream_codecs.insert("nums", "num_v1");
        let blob = compress_v6_mbn(&data, "split_text_nums", "zlib", Some(&stream_codecs), &shared).unwrap();
        let out = decompress_v6(&blob, false, &shared).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn tpl_lines_v0_mbn_roundtrip() {
        let data = b"user 1 logged in\nuser 2 logged in\nuser 3 logged in\n".to_vec();
        let shared = SharedResources::default();
        let blob = compress_v6_mbn(&data, "tpl_lines_v0", "zstd", None, &shared).unwrap();
        let out = decompress_v6(&blob, false, &shared).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn empty_file_via_bytes_layer_roundtrip() {
        let data: Vec<u8> = Vec::new();
        let shared = SharedResources::default();
        let blob = compress_v6(&data, "bytes", &StreamCodec::Zstd(ZstdCodec::default()), &shared).unwrap();
        let out = decompress_v6(&blob, false, &shared).unwrap();
        assert_eq!(out, data);
    }
}
