//! Canonical-ish Huffman coding over a byte alphabet (256 symbols) or an
//! arbitrary `0..vocab_size` id alphabet.
//!
//! This is a direct transliteration of the reference tree-building algorithm
//! (stable tie-breaking via insertion order, MSB-first bit packing, a dummy
//! neighbor symbol for single-symbol alphabets) rather than a from-scratch
//! canonical-code implementation, so encoders/decoders built on top of it can
//! share the exact frequency tables the wire format expects.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{GccError, GccResult};

#[derive(Debug)]
enum Node {
    Leaf { symbol: u32 },
    Branch { left: Box<Node>, right: Box<Node> },
}

struct HeapEntry {
    freq: u64,
    seq: u64,
    node: Node,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.freq == other.freq && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest (freq, seq) pops first.
        other.freq.cmp(&self.freq).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Builds the Huffman tree from a frequency table. Returns `None` if every
/// entry is zero (empty input). A single non-zero symbol gets a synthetic
/// "dummy" sibling at frequency zero so it still gets a 1-bit code.
fn build_tree(freq: &[u64]) -> Option<Node> {
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
    let mut seq = 0u64;
    for (sym, &f) in freq.iter().enumerate() {
        if f > 0 {
            heap.push(HeapEntry { freq: f, seq, node: Node::Leaf { symbol: sym as u32 } });
            seq += 1;
        }
    }
    if heap.is_empty() {
        return None;
    }
    if heap.len() == 1 {
        let only = heap.peek().unwrap();
        let only_symbol = match &only.node {
            Node::Leaf { symbol } => *symbol,
            _ => unreachable!(),
        };
        let dummy_symbol = (only_symbol + 1) % (freq.len() as u32);
        heap.push(HeapEntry { freq: 0, seq, node: Node::Leaf { symbol: dummy_symbol } });
    }
    while heap.len() > 1 {
        let a = heap.pop().unwrap();
        let b = heap.pop().unwrap();
        seq += 1;
        heap.push(HeapEntry {
            freq: a.freq + b.freq,
            seq,
            node: Node::Branch { left: Box::new(a.node), right: Box::new(b.node) },
        });
    }
    Some(heap.pop().unwrap().node)
}

/// A code as a bit-string, MSB-first.
#[derive(Clone, Default)]
struct Code {
    bits: Vec<u8>,
}

fn build_code_table(root: &Node, vocab_size: usize) -> Vec<Option<Code>> {
    let mut table = vec![None; vocab_size];
    fn walk(node: &Node, path: &mut Vec<u8>, table: &mut Vec<Option<Code>>) {
        match node {
            Node::Leaf { symbol } => {
                let bits = if path.is_empty() { vec![0] } else { path.clone() };
                table[*symbol as usize] = Some(Code { bits });
            }
            Node::Branch { left, right } => {
                path.push(0);
                walk(left, path, table);
                path.pop();
                path.push(1);
                walk(right, path, table);
                path.pop();
            }
        }
    }
    let mut path = Vec::new();
    walk(root, &mut path, &mut table);
    table
}

struct BitWriter {
    out: Vec<u8>,
    cur: u8,
    count: u8,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter { out: Vec::new(), cur: 0, count: 0 }
    }

    fn push_bits(&mut self, bits: &[u8]) {
        for &b in bits {
            self.cur = (self.cur << 1) | b;
            self.count += 1;
            if self.count == 8 {
                self.out.push(self.cur);
                self.cur = 0;
                self.count = 0;
            }
        }
    }

    /// Returns (bytes, lastbits). lastbits is 0 if the input was empty, 8 if
    /// the stream ended byte-aligned, otherwise the number of valid bits in
    /// the final byte.
    fn finish(mut self, had_input: bool) -> (Vec<u8>, u8) {
        if !had_input {
            return (Vec::new(), 0);
        }
        if self.count > 0 {
            let lastbits = self.count;
            self.cur <<= 8 - self.count;
            self.out.push(self.cur);
            (self.out, lastbits)
        } else {
            (self.out, 8)
        }
    }
}

fn decode_bitstream(root: &Node, bitstream: &[u8], n: usize, lastbits: u8) -> GccResult<Vec<u32>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(n);
    let mut node = root;
    let total_bytes = bitstream.len();
    'outer: for (i, &byte) in bitstream.iter().enumerate() {
        let bits_in_byte = if i == total_bytes - 1 && lastbits != 0 { lastbits } else { 8 };
        for bit_index in 0..bits_in_byte {
            let bit = (byte >> (7 - bit_index)) & 1;
            node = match node {
                Node::Branch { left, right } => if bit == 0 { left } else { right },
                Node::Leaf { .. } => unreachable!("walked past a leaf"),
            };
            if let Node::Leaf { symbol } = node {
                out.push(*symbol);
                node = root;
                if out.len() == n {
                    break 'outer;
                }
            }
        }
    }
    if out.len() != n {
        return Err(GccError::CorruptPayload(format!(
            "huffman: attesi {n} simboli, decodificati {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Builds a 256-entry byte frequency table.
pub fn build_freq_table_bytes(data: &[u8]) -> Vec<u64> {
    let mut freq = vec![0u64; 256];
    for &b in data {
        freq[b as usize] += 1;
    }
    freq
}

/// `data -> (freq, lastbits, bitstream)`.
pub fn compress_bytes(data: &[u8]) -> (Vec<u64>, u8, Vec<u8>) {
    let freq = build_freq_table_bytes(data);
    let root = match build_tree(&freq) {
        Some(r) => r,
        None => return (freq, 0, Vec::new()),
    };
    let codes = build_code_table(&root, 256);
    let mut w = BitWriter::new();
    for &b in data {
        w.push_bits(&codes[b as usize].as_ref().unwrap().bits);
    }
    let (bitstream, lastbits) = w.finish(!data.is_empty());
    (freq, lastbits, bitstream)
}

/// `(freq, bitstream, n, lastbits) -> data`.
pub fn decompress_bytes(freq: &[u64], bitstream: &[u8], n: usize, lastbits: u8) -> GccResult<Vec<u8>> {
    let root = match build_tree(freq) {
        Some(r) => r,
        None => return Ok(Vec::new()),
    };
    if n == 0 {
        return Ok(Vec::new());
    }
    let ids = decode_bitstream(&root, bitstream, n, lastbits)?;
    Ok(ids.into_iter().map(|s| s as u8).collect())
}

/// `id_stream -> (freq[vocab_size], lastbits, bitstream)`.
pub fn compress_ids(id_stream: &[u32], vocab_size: usize) -> GccResult<(Vec<u64>, u8, Vec<u8>)> {
    if vocab_size == 0 {
        return Ok((Vec::new(), 0, Vec::new()));
    }
    let mut freq = vec![0u64; vocab_size];
    for &sid in id_stream {
        if sid as usize >= vocab_size {
            return Err(GccError::CorruptPayload(format!("ID fuori range: {sid}")));
        }
        freq[sid as usize] += 1;
    }
    if freq.iter().all(|&f| f == 0) {
        return Ok((freq, 0, Vec::new()));
    }
    let root = build_tree(&freq).expect("non-empty freq yields a tree");
    let codes = build_code_table(&root, vocab_size);
    let mut w = BitWriter::new();
    for &sid in id_stream {
        w.push_bits(&codes[sid as usize].as_ref().unwrap().bits);
    }
    let (bitstream, count) = w.finish(true);
    // ids variant reports 0 (not 8) for a byte-aligned stream with content.
    let lastbits = if count == 8 && w_was_aligned(id_stream, &codes) { 0 } else { count };
    Ok((freq, lastbits, bitstream))
}

/// Mirrors the reference's distinct (buggy-by-convention) lastbits=0 meaning
/// "byte aligned" for the ids path, as opposed to lastbits=8 for the bytes path.
fn w_was_aligned(id_stream: &[u32], codes: &[Option<Code>]) -> bool {
    let total_bits: usize = id_stream
        .iter()
        .map(|&s| codes[s as usize].as_ref().unwrap().bits.len())
        .sum();
    total_bits % 8 == 0
}

/// `(freq, n_symbols, lastbits, bitstream) -> id_stream`.
pub fn decompress_ids(freq: &[u64], n_symbols: usize, lastbits: u8, bitstream: &[u8]) -> GccResult<Vec<u32>> {
    if n_symbols == 0 {
        return Ok(Vec::new());
    }
    if freq.is_empty() {
        return Err(GccError::CorruptPayload("freq vuoto in decompress_ids".into()));
    }
    let root = match build_tree(freq) {
        Some(r) => r,
        None => return Ok(Vec::new()),
    };
    decode_bitstream(&root, bitstream, n_symbols, lastbits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_roundtrip() {
        let (freq, lastbits, bs) = compress_bytes(b"");
        assert_eq!(lastbits, 0);
        assert!(bs.is_empty());
        let out = decompress_bytes(&freq, &bs, 0, lastbits).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn single_symbol_roundtrip() {
        let data = vec![b'a'; 10];
        let (freq, lastbits, bs) = compress_bytes(&data);
        let out = decompress_bytes(&freq, &bs, data.len(), lastbits).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn mixed_bytes_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let (freq, lastbits, bs) = compress_bytes(&data);
        let out = decompress_bytes(&freq, &bs, data.len(), lastbits).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn ids_roundtrip() {
        let ids = vec![0u32, 1, 1, 2, 2, 2, 0, 3];
        let (freq, lastbits, bs) = compress_ids(&ids, 4).unwrap();
        let out = decompress_ids(&freq, ids.len(), lastbits, &bs).unwrap();
        assert_eq!(out, ids);
    }
}
