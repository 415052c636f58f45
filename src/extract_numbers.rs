//! Lossy numeric extraction (`file extract numbers_only` / `extract-show`).
//!
//! Pulls every integer literal out of a file's lossy UTF-8 decoding and
//! stores them as a container v6 blob flagged `EXTRACT`. The result is not a
//! lossless encoding of the input — it can only be read back with
//! [`extract_show`], never with [`crate::container::decompress_v6`] in
//! non-`allow_extract` mode.

use std::path::Path;

use regex::Regex;
use serde_json::{json, Value};

use crate::bundle::mbn::{self, MbnStream, ST_META, ST_NUMS};
use crate::codec::{self, raw};
use crate::container::{self, SharedResources};
use crate::error::{GccError, GccResult};
use crate::varint;

fn int_pattern() -> Regex {
    Regex::new(r"-?\d+").expect("static regex")
}

/// Extract all integers from `input_path` and write a lossy `EXTRACT`
/// container v6 blob to `output_path`. Returns the number of integers found.
pub fn extract_numbers_only(input_path: &Path, output_path: &Path) -> GccResult<usize> {
    let src = std::fs::read(input_path).map_err(|e| GccError::io(e, input_path))?;
    let text = String::from_utf8_lossy(&src);
    let re = int_pattern();
    let nums: Vec<i64> = re
        .find_iter(&text)
        .filter_map(|m| m.as_str().parse::<i64>().ok())
        .collect();

    let raw_nums = varint::encode_ints(&nums);
    let comp_nums = codec::num_v1::compress(&raw_nums, None);

    let meta_obj = json!({
        "extractor": "numbers_only",
        "count": nums.len(),
        "src_bytes": src.len(),
    });
    let meta_bytes = serde_json::to_vec(&meta_obj)?;
    let comp_meta = raw::compress(&meta_bytes);

    let streams = vec![
        MbnStream { stype: ST_NUMS, codec: codec::codes::NUM_V1, ulen: raw_nums.len() as u64, comp: comp_nums, meta: Vec::new() },
        MbnStream { stype: ST_META, codec: codec::codes::RAW, ulen: meta_bytes.len() as u64, comp: comp_meta, meta: Vec::new() },
    ];

    let payload = mbn::pack(&streams);
    let blob = container::pack_container_v6(&payload, "bytes", "mbn", &[], true)?;
    std::fs::write(output_path, &blob).map_err(|e| GccError::io(e, output_path))?;
    Ok(nums.len())
}

/// Read back an `EXTRACT` blob written by [`extract_numbers_only`].
///
/// Returns `{"meta": ..., "nums": [...], "nums_total": N}`, matching the
/// original tool's `extract-show` output (numbers truncated to the first 200
/// for display).
pub fn extract_show(input_path: &Path) -> GccResult<Value> {
    let blob = std::fs::read(input_path).map_err(|e| GccError::io(e, input_path))?;
    let header = container::unpack_container_v6(&blob)?;
    if !header.is_extract {
        return Err(GccError::Usage("extract-show: il file non è un EXTRACT blob".into()));
    }
    if header.codec_id != "mbn" {
        return Err(GccError::CorruptPayload(format!("extract-show: codec inatteso: {}", header.codec_id)));
    }
    let streams = mbn::unpack(&header.payload)?;

    let shared = SharedResources::default();
    let mut meta = json!({});
    let mut nums: Vec<i64> = Vec::new();

    for s in &streams {
        let codec_name = codec::codes::code_to_name(s.codec)
            .ok_or_else(|| GccError::CorruptPayload(format!("extract-show: codec_code sconosciuto: {}", s.codec)))?;
        let byte_codec = container::byte_codec_by_name(codec_name, &shared)?;
        let raw_bytes = byte_codec.decompress(&s.comp, Some(s.ulen as usize))?;
        match s.stype {
            ST_META => {
                meta = serde_json::from_slice(&raw_bytes).unwrap_or_else(|_| {
                    json!({ "meta_raw_utf8": String::from_utf8_lossy(&raw_bytes).to_string() })
                });
            }
            ST_NUMS => {
                nums = varint::decode_ints(&raw_bytes)?;
            }
            _ => {}
        }
    }

    let nums_total = nums.len();
    let shown: Vec<i64> = nums.into_iter().take(200).collect();
    Ok(json!({ "meta": meta, "nums": shown, "nums_total": nums_total }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_extracts_integers_and_meta() {
        let src = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(src.path(), "a=1, b=-22, c=333 and 4\n").unwrap();
        let out = tempfile::NamedTempFile::new().unwrap();

        let n = extract_numbers_only(src.path(), out.path()).unwrap();
        assert_eq!(n, 4);

        let shown = extract_show(out.path()).unwrap();
        assert_eq!(shown["nums"], json!([1, -22, 333, 4]));
        assert_eq!(shown["nums_total"], 4);
        assert_eq!(shown["meta"]["extractor"], "numbers_only");
        assert_eq!(shown["meta"]["count"], 4);
    }

    #[test]
    fn extract_show_rejects_non_extract_blob() {
        let shared = SharedResources::default();
        let blob = container::compress_v6(b"hello hello hello", "bytes", &crate::bundle::dispatch::StreamCodec::Huffman, &shared).unwrap();
        let path = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(path.path(), &blob).unwrap();

        let err = extract_show(path.path()).unwrap_err();
        assert!(matches!(err, GccError::Usage(_)));
    }

    #[test]
    fn empty_input_extracts_zero_numbers() {
        let src = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(src.path(), b"no digits here").unwrap();
        let out = tempfile::NamedTempFile::new().unwrap();

        let n = extract_numbers_only(src.path(), out.path()).unwrap();
        assert_eq!(n, 0);
        let shown = extract_show(out.path()).unwrap();
        assert_eq!(shown["nums_total"], 0);
    }
}
