//! Bucket-level shared resources: amortize per-file dictionary overhead
//! across the files in a bucket.
//!
//! `num_dict_v1` is a top-K numeric-value dictionary for the `num_v1`
//! codec; `tpl_dict_v0` is a top-K line-template dictionary for
//! `tpl_lines_shared_v0`. Both are built only when the chosen or
//! runner-up plan actually uses them and the bucket has >= 2 files.

use std::collections::HashMap;
use std::path::Path;

use crate::codec::num_v1;
use crate::error::GccResult;
use crate::layers::{split_text_nums, tpl_lines_shared_v0, tpl_lines_v0, LayerSymbols};
use crate::varint::decode_ints;

use super::spec::DirPlan;

pub const DEFAULT_NUM_DICT_K: usize = 64;
pub const DEFAULT_TPL_DICT_K: usize = 64;

fn multibytes_stream(symbols: &LayerSymbols, name: &str) -> Vec<u8> {
    match symbols {
        LayerSymbols::MultiBytes(streams) => {
            streams.iter().find(|(n, _)| *n == name).map(|(_, d)| d.clone()).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// Extract the numeric magnitudes a layer's NUMS stream encodes for a given
/// file, used to build `num_dict_v1`. Layers without a numeric side-channel
/// contribute nothing.
fn extract_numeric_values(layer_id: &str, data: &[u8]) -> Vec<i64> {
    match layer_id {
        "split_text_nums" => {
            let (symbols, _meta) = split_text_nums::encode(data);
            let nums_raw = multibytes_stream(&symbols, "nums");
            let Ok(seq) = decode_ints(&nums_raw) else { return Vec::new() };
            if seq.is_empty() {
                return Vec::new();
            }
            let n_numbers = seq[0].max(0) as usize;
            let mut idx = 1 + (n_numbers + 1);
            let mut out = Vec::with_capacity(n_numbers);
            for _ in 0..n_numbers {
                if idx + 3 > seq.len() {
                    break;
                }
                out.push(seq[idx + 2]);
                idx += 3;
            }
            out
        }
        "tpl_lines_v0" | "tpl_lines_shared_v0" => {
            let (symbols, _meta) = tpl_lines_v0::encode(data);
            let nums_raw = multibytes_stream(&symbols, "nums");
            let Ok(nums) = decode_ints(&nums_raw) else { return Vec::new() };
            if nums.is_empty() {
                return Vec::new();
            }
            let n_lines = nums[0].max(0) as usize;
            let mut idx = 1usize;
            let mut out = Vec::new();
            for _ in 0..n_lines {
                if idx >= nums.len() {
                    break;
                }
                let n_nums = nums[idx].max(0) as usize;
                idx += 1;
                for _ in 0..n_nums {
                    if idx + 3 > nums.len() {
                        break;
                    }
                    out.push(nums[idx + 2]);
                    idx += 3;
                }
            }
            out
        }
        _ => Vec::new(),
    }
}

fn plan_uses_num_v1(plan: &DirPlan) -> bool {
    plan.codec == "num_v1" || plan.stream_codecs.as_ref().map(|m| m.values().any(|v| v == "num_v1")).unwrap_or(false)
}

fn plan_uses_tpl_shared(plan: &DirPlan) -> bool {
    plan.layer == "tpl_lines_shared_v0"
}

/// Build `num_dict_v1` if `chosen`/`runner_up` warrants it: top-K values by
/// `(-frequency, |value|, value)`. Returns `(resource_blob, shared_dict)`.
pub fn build_num_dict_v1(
    chosen: &DirPlan,
    runner_up: Option<&DirPlan>,
    layer_id: &str,
    file_paths: &[&Path],
    k: usize,
) -> Option<(Vec<u8>, num_v1::SharedDict)> {
    let wants = plan_uses_num_v1(chosen) || runner_up.map(plan_uses_num_v1).unwrap_or(false);
    if !wants || file_paths.len() < 2 {
        return None;
    }

    let mut freq: HashMap<i64, u64> = HashMap::new();
    for p in file_paths {
        let Ok(data) = std::fs::read(p) else { continue };
        for v in extract_numeric_values(layer_id, &data) {
            *freq.entry(v).or_insert(0) += 1;
        }
    }
    if freq.is_empty() {
        return None;
    }

    let mut items: Vec<(i64, u64)> = freq.into_iter().collect();
    items.sort_by(|a, b| {
        b.1.cmp(&a.1).then_with(|| a.0.abs().cmp(&b.0.abs())).then_with(|| a.0.cmp(&b.0))
    });
    items.truncate(k);
    let dict: Vec<i64> = items.into_iter().map(|(v, _)| v).collect();

    let shared = num_v1::SharedDict::new(dict.clone())?;
    let tag8 = num_v1::dict_tag8(&dict);
    let mut blob = Vec::with_capacity(8 + dict.len() * 2);
    blob.extend_from_slice(&tag8);
    blob.extend_from_slice(&crate::varint::encode_ints(&dict));
    Some((blob, shared))
}

/// Build `tpl_dict_v0` if `chosen`/`runner_up` warrants it: top-K templates
/// by `(-frequency, length, prefix_bytes)`.
pub fn build_tpl_dict_v0(
    chosen: &DirPlan,
    runner_up: Option<&DirPlan>,
    file_paths: &[&Path],
    k: usize,
) -> Option<(Vec<u8>, tpl_lines_shared_v0::SharedDict)> {
    let wants = plan_uses_tpl_shared(chosen) || runner_up.map(plan_uses_tpl_shared).unwrap_or(false);
    if !wants || file_paths.len() < 2 {
        return None;
    }

    let mut freq: HashMap<Vec<Vec<u8>>, u64> = HashMap::new();
    for p in file_paths {
        let Ok(data) = std::fs::read(p) else { continue };
        let (symbols, _meta) = tpl_lines_v0::encode(&data);
        let tpl_raw = multibytes_stream(&symbols, "tpl");
        let ids_raw = multibytes_stream(&symbols, "ids");
        let Ok(templates) = tpl_lines_v0::unpack_templates(&tpl_raw) else { continue };
        let Ok(ids) = decode_ints(&ids_raw) else { continue };
        for id in ids {
            if id < 0 || id as usize >= templates.len() {
                continue;
            }
            *freq.entry(templates[id as usize].clone()).or_insert(0) += 1;
        }
    }
    if freq.is_empty() {
        return None;
    }

    let mut items: Vec<(Vec<Vec<u8>>, u64)> = freq.into_iter().collect();
    items.sort_by(|a, b| {
        let len_a: usize = a.0.iter().map(|c| c.len()).sum();
        let len_b: usize = b.0.iter().map(|c| c.len()).sum();
        let prefix_a = a.0.first().cloned().unwrap_or_default();
        let prefix_b = b.0.first().cloned().unwrap_or_default();
        b.1.cmp(&a.1).then_with(|| len_a.cmp(&len_b)).then_with(|| prefix_a.cmp(&prefix_b))
    });
    items.truncate(k);
    let templates: Vec<Vec<Vec<u8>>> = items.into_iter().map(|(t, _)| t).collect();

    let (blob, _meta) = tpl_lines_shared_v0::pack_tpl_dict_resource(&templates, tpl_lines_v0::FMT_VERSION, tpl_lines_v0::TOK_RULES);
    let tag = tpl_lines_shared_v0::tag8(&blob);
    Some((blob, tpl_lines_shared_v0::SharedDict { templates, tag8: tag }))
}

pub fn apply_resource_defaults(k: Option<u32>, default: usize) -> usize {
    k.map(|v| v as usize).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_dict_built_when_plan_uses_num_v1() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.txt");
        let p2 = dir.path().join("b.txt");
        std::fs::write(&p1, "total 42 items 7\n").unwrap();
        std::fs::write(&p2, "total 42 items 9\n").unwrap();

        let chosen = DirPlan {
            layer: "split_text_nums".into(),
            codec: "zlib".into(),
            stream_codecs: Some(HashMap::from([("NUMS".to_string(), "num_v1".to_string())])),
            note: String::new(),
        };
        let result = build_num_dict_v1(&chosen, None, "split_text_nums", &[p1.as_path(), p2.as_path()], DEFAULT_NUM_DICT_K);
        assert!(result.is_some());
    }

    #[test]
    fn num_dict_not_built_for_single_file_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.txt");
        std::fs::write(&p1, "total 42 items 7\n").unwrap();
        let chosen = DirPlan {
            layer: "split_text_nums".into(),
            codec: "zlib".into(),
            stream_codecs: Some(HashMap::from([("NUMS".to_string(), "num_v1".to_string())])),
            note: String::new(),
        };
        assert!(build_num_dict_v1(&chosen, None, "split_text_nums", &[p1.as_path()], DEFAULT_NUM_DICT_K).is_none());
    }

    #[test]
    fn tpl_dict_built_when_plan_is_tpl_lines_shared() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.log");
        let p2 = dir.path().join("b.log");
        std::fs::write(&p1, "user 1 logged in\nuser 2 logged in\n").unwrap();
        std::fs::write(&p2, "user 3 logged in\nuser 4 logged in\n").unwrap();

        let chosen = DirPlan { layer: "tpl_lines_shared_v0".into(), codec: "zlib".into(), stream_codecs: None, note: String::new() };
        let result = build_tpl_dict_v0(&chosen, None, &[p1.as_path(), p2.as_path()], DEFAULT_TPL_DICT_K);
        assert!(result.is_some());
    }
}
