//! Multi-stream bundling: the layer between a semantic layer's raw output
//! (one or more named streams of bytes or ids) and a byte-codec.
//!
//! A [`SymbolStream`] is what a layer hands off. [`EncodedStream`] is what
//! results from running it through [`encode_stream`] — either stored raw or
//! Huffman-coded. Bundle formats ([`mbn`], [`huffman_bundle`], [`zstd_bundle`],
//! [`zstd_raw`]) serialize collections of these to/from a single blob.

pub mod dispatch;
pub mod huffman_bundle;
pub mod mbn;
pub mod zstd_bundle;
pub mod zstd_raw;

use crate::error::GccResult;
use crate::huffman;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Bytes,
    Ids,
}

/// A layer's raw output for one named stream, before any codec runs.
#[derive(Debug, Clone)]
pub struct SymbolStream {
    pub name: String,
    pub kind: StreamKind,
    /// 256 for bytes streams, vocab_size for ids streams.
    pub alphabet_size: usize,
    /// len(bytes) or number of id symbols.
    pub n: usize,
    pub bytes_data: Vec<u8>,
    pub ids_data: Vec<u32>,
}

impl SymbolStream {
    pub fn bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let n = data.len();
        SymbolStream { name: name.into(), kind: StreamKind::Bytes, alphabet_size: 256, n, bytes_data: data, ids_data: Vec::new() }
    }

    pub fn ids(name: impl Into<String>, data: Vec<u32>, alphabet_size: usize) -> Self {
        let n = data.len();
        SymbolStream { name: name.into(), kind: StreamKind::Ids, alphabet_size, n, bytes_data: Vec::new(), ids_data: data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Huffman,
}

/// The result of running a [`SymbolStream`] through a codec: either verbatim
/// bytes, or a Huffman frequency table plus bitstream.
#[derive(Debug, Clone)]
pub struct EncodedStream {
    pub name: String,
    pub kind: StreamKind,
    pub alphabet_size: usize,
    pub n: usize,
    pub encoding: Encoding,
    pub raw: Vec<u8>,
    pub freq_used: Vec<(u32, u64)>,
    pub lastbits: u8,
    pub bitstream: Vec<u8>,
}

/// Huffman-codes a stream, falling back to raw storage when Huffman buys
/// nothing (e.g. fewer than 2 distinct live symbols).
pub fn encode_stream_huffman(s: &SymbolStream) -> GccResult<EncodedStream> {
    match s.kind {
        StreamKind::Bytes => {
            let (freq, lastbits, bitstream) = huffman::compress_bytes(&s.bytes_data);
            let freq_used: Vec<(u32, u64)> = freq
                .iter()
                .enumerate()
                .filter(|&(_, &f)| f > 0)
                .map(|(sym, &f)| (sym as u32, f))
                .collect();
            Ok(EncodedStream {
                name: s.name.clone(),
                kind: s.kind,
                alphabet_size: s.alphabet_size,
                n: s.n,
                encoding: Encoding::Huffman,
                raw: Vec::new(),
                freq_used,
                lastbits,
                bitstream,
            })
        }
        StreamKind::Ids => {
            let (freq, lastbits, bitstream) = huffman::compress_ids(&s.ids_data, s.alphabet_size)?;
            let freq_used: Vec<(u32, u64)> = freq
                .iter()
                .enumerate()
                .filter(|&(_, &f)| f > 0)
                .map(|(sym, &f)| (sym as u32, f))
                .collect();
            Ok(EncodedStream {
                name: s.name.clone(),
                kind: s.kind,
                alphabet_size: s.alphabet_size,
                n: s.n,
                encoding: Encoding::Huffman,
                raw: Vec::new(),
                freq_used,
                lastbits,
                bitstream,
            })
        }
    }
}

pub fn encode_stream_raw(s: &SymbolStream) -> EncodedStream {
    let raw = match s.kind {
        StreamKind::Bytes => s.bytes_data.clone(),
        StreamKind::Ids => crate::varint::encode_ints(&s.ids_data.iter().map(|&x| x as i64).collect::<Vec<_>>()),
    };
    EncodedStream {
        name: s.name.clone(),
        kind: s.kind,
        alphabet_size: s.alphabet_size,
        n: s.n,
        encoding: Encoding::Raw,
        raw,
        freq_used: Vec::new(),
        lastbits: 0,
        bitstream: Vec::new(),
    }
}
