//! Semantic layers: reversible byte/stream transforms that run before a
//! codec sees the data. Each layer turns a file's raw bytes into one or more
//! named streams (plus optional packed metadata) designed to compress
//! better than the original bytes would.

pub mod bytes;
pub mod lines_dict;
pub mod lines_rle;
pub mod split_text_nums;
pub mod tpl_lines_shared_v0;
pub mod tpl_lines_v0;
pub mod vc0;
pub mod vocab_blob;

/// What a layer's `encode` hands back, before codec/bundle dispatch.
pub enum LayerSymbols {
    Bytes(Vec<u8>),
    Ids { data: Vec<i64>, vocab_size: usize },
    /// Named byte streams (e.g. vc0's mask/vowels/cons, or tpl/nums streams
    /// that are themselves already varint-encoded `num_stream` blobs).
    MultiBytes(Vec<(&'static str, Vec<u8>)>),
}

/// Stable layer codes. Mirrors `LAYER_TO_CODE`; frozen once assigned.
pub mod codes {
    pub const BYTES: u8 = 0;
    // 1 = syllables_it, 2 = words_it: reserved, Italian-specific, not implemented.
    pub const VC0: u8 = 3;
    pub const LINES_DICT: u8 = 4;
    pub const LINES_RLE: u8 = 5;
    pub const SPLIT_TEXT_NUMS: u8 = 6;
    pub const TPL_LINES_V0: u8 = 7;
    pub const TPL_LINES_SHARED_V0: u8 = 8;

    pub fn name_to_code(name: &str) -> Option<u8> {
        Some(match name {
            "bytes" => BYTES,
            "vc0" => VC0,
            "lines_dict" => LINES_DICT,
            "lines_rle" => LINES_RLE,
            "split_text_nums" => SPLIT_TEXT_NUMS,
            "tpl_lines_v0" => TPL_LINES_V0,
            "tpl_lines_shared_v0" => TPL_LINES_SHARED_V0,
            _ => return None,
        })
    }

    pub fn code_to_name(code: u8) -> Option<&'static str> {
        Some(match code {
            BYTES => "bytes",
            VC0 => "vc0",
            LINES_DICT => "lines_dict",
            LINES_RLE => "lines_rle",
            SPLIT_TEXT_NUMS => "split_text_nums",
            TPL_LINES_V0 => "tpl_lines_v0",
            TPL_LINES_SHARED_V0 => "tpl_lines_shared_v0",
            _ => return None,
        })
    }
}

pub(crate) fn is_digit(x: u8) -> bool {
    (48..=57).contains(&x)
}

/// Conservative unary-sign detection shared by `split_text_nums` and the
/// `tpl_lines_*` family: a leading `+`/`-` counts as a sign only at the
/// start of the buffer, after whitespace, or after a typical "value"
/// separator — this keeps things like `2024-01-01` or `10-12` as text.
pub(crate) fn is_unary_sign_context(buf: &[u8], pos: usize) -> bool {
    if pos == 0 {
        return true;
    }
    let prev = buf[pos - 1];
    if matches!(prev, 9 | 10 | 13 | 32) {
        return true;
    }
    matches!(prev, b'(' | b'[' | b'{' | b'<' | b'=' | b':' | b',' | b';')
}
