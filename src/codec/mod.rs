//! Byte-level codecs: the things a [`crate::container`] payload is wrapped in
//! once a semantic layer has already turned a file into one or more streams.
//!
//! Each codec here operates on whole byte blobs (as opposed to [`crate::huffman`],
//! which needs a symbol alphabet). `raw`/`zlib`/`zstd` are thin wrappers;
//! `num_v1` is a small dictionary-substitution codec tuned for numeric streams.

pub mod num_v1;
pub mod raw;
pub mod zlib;
pub mod zstd;

/// Stable string identifiers used in container headers and pipeline specs.
/// Mirrors `CODEC_TO_CODE` ordering (reserved legacy slots kept as comments
/// so the numbering never shifts).
pub mod codes {
    pub const HUFFMAN: u8 = 0;
    pub const ZSTD: u8 = 1;
    pub const ZSTD_TIGHT: u8 = 2;
    pub const RAW: u8 = 3;
    pub const MBN: u8 = 4;
    // 5 = num_v0, legacy-only, not implemented.
    pub const ZLIB: u8 = 6;
    pub const NUM_V1: u8 = 7;

    pub fn name_to_code(name: &str) -> Option<u8> {
        Some(match name {
            "huffman" => HUFFMAN,
            "zstd" => ZSTD,
            "zstd_tight" => ZSTD_TIGHT,
            "raw" => RAW,
            "mbn" => MBN,
            "zlib" => ZLIB,
            "num_v1" => NUM_V1,
            _ => return None,
        })
    }

    pub fn code_to_name(code: u8) -> Option<&'static str> {
        Some(match code {
            HUFFMAN => "huffman",
            ZSTD => "zstd",
            ZSTD_TIGHT => "zstd_tight",
            RAW => "raw",
            MBN => "mbn",
            ZLIB => "zlib",
            NUM_V1 => "num_v1",
            _ => return None,
        })
    }
}
