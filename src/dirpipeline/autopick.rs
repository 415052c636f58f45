//! Per-bucket plan selection: classify the bucket's content, gather a
//! candidate pool, score each candidate against a handful of sample files,
//! and pick a winner plus a diverse runner-up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::bundle::dispatch::StreamCodec;
use crate::codec::zstd::ZstdCodec;
use crate::container::{self, layer_supports_bundle, SharedResources};
use crate::error::GccResult;

use super::spec::DirPlan;

pub const ANALYZE_MAX_BYTES: usize = 64 * 1024;
pub const MAX_CLASSIFY_SAMPLES: usize = 4;
pub const DEFAULT_SAMPLE_N: u32 = 3;
pub const MAX_SAMPLE_N: u32 = 8;
pub const DEFAULT_TOP_K: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketType {
    Binaryish,
    MixedTextNums,
    Textish,
}

impl BucketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketType::Binaryish => "binaryish",
            BucketType::MixedTextNums => "mixed_text_nums",
            BucketType::Textish => "textish",
        }
    }
}

struct SampleStats {
    entropy: f64,
    nul_ratio: f64,
    printable_ratio: f64,
    digit_ratio: f64,
    utf8_ok: bool,
}

fn stats_for(buf: &[u8]) -> SampleStats {
    if buf.is_empty() {
        return SampleStats { entropy: 0.0, nul_ratio: 0.0, printable_ratio: 1.0, digit_ratio: 0.0, utf8_ok: true };
    }
    let mut counts = [0u64; 256];
    let mut nul = 0u64;
    let mut printable = 0u64;
    let mut digit = 0u64;
    for &b in buf {
        counts[b as usize] += 1;
        if b == 0 {
            nul += 1;
        }
        if (32..=126).contains(&b) || matches!(b, 9 | 10 | 13) {
            printable += 1;
        }
        if b.is_ascii_digit() {
            digit += 1;
        }
    }
    let n = buf.len() as f64;
    let mut entropy = 0.0;
    for &c in &counts {
        if c == 0 {
            continue;
        }
        let p = c as f64 / n;
        entropy -= p * p.log2();
    }
    SampleStats {
        entropy,
        nul_ratio: nul as f64 / n,
        printable_ratio: printable as f64 / n,
        digit_ratio: digit as f64 / n,
        utf8_ok: std::str::from_utf8(buf).is_ok(),
    }
}

/// Classify a bucket's `bucket_type` by sampling up to
/// [`MAX_CLASSIFY_SAMPLES`] of its largest files (tie-break by relative
/// path), reading up to [`ANALYZE_MAX_BYTES`] bytes of each.
pub fn classify_bucket(files: &[(PathBuf, String, u64)]) -> GccResult<BucketType> {
    let mut sorted: Vec<&(PathBuf, String, u64)> = files.iter().collect();
    sorted.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.1.cmp(&b.1)));
    sorted.truncate(MAX_CLASSIFY_SAMPLES);

    let mut buf = Vec::new();
    for (path, _, _) in &sorted {
        let data = std::fs::read(path).unwrap_or_default();
        buf.extend_from_slice(&data[..data.len().min(ANALYZE_MAX_BYTES)]);
    }

    let s = stats_for(&buf);
    if s.nul_ratio > 0.01 || (s.entropy > 6.6 && s.printable_ratio < 0.65 && !s.utf8_ok) {
        Ok(BucketType::Binaryish)
    } else if s.digit_ratio >= 0.10 {
        Ok(BucketType::MixedTextNums)
    } else {
        Ok(BucketType::Textish)
    }
}

/// Bootstrap candidate pools used when the pipeline spec and the
/// persisted TOP-K database both have nothing for a `bucket_type`.
pub fn bootstrap_pool(bucket_type: BucketType) -> Vec<DirPlan> {
    match bucket_type {
        BucketType::Textish => vec![
            DirPlan { layer: "lines_dict".into(), codec: "huffman".into(), stream_codecs: None, note: "bootstrap".into() },
            DirPlan { layer: "bytes".into(), codec: "zstd".into(), stream_codecs: None, note: "bootstrap".into() },
            DirPlan { layer: "lines_rle".into(), codec: "huffman".into(), stream_codecs: None, note: "bootstrap".into() },
        ],
        BucketType::MixedTextNums => vec![
            DirPlan {
                layer: "split_text_nums".into(),
                codec: "zlib".into(),
                stream_codecs: Some(HashMap::from([("NUMS".into(), "num_v1".into())])),
                note: "bootstrap".into(),
            },
            DirPlan { layer: "bytes".into(), codec: "zstd".into(), stream_codecs: None, note: "bootstrap".into() },
        ],
        BucketType::Binaryish => vec![
            DirPlan { layer: "bytes".into(), codec: "zstd".into(), stream_codecs: None, note: "bootstrap".into() },
            DirPlan { layer: "bytes".into(), codec: "zlib".into(), stream_codecs: None, note: "bootstrap".into() },
        ],
    }
}

pub(crate) fn zstd_unavailable() -> bool {
    false
}

/// Resolve zstd candidates to zlib when zstd isn't available, as the spec
/// requires. The `zstd` crate is always linked in this build, so this is a
/// no-op hook kept for parity with the reference's optional-dependency path.
fn resolve_codec_availability(mut plan: DirPlan) -> DirPlan {
    if zstd_unavailable() && (plan.codec == "zstd" || plan.codec == "zstd_tight") {
        plan.codec = "zlib".into();
    }
    plan
}

/// Resolve the candidate pool for a bucket: spec pools take priority,
/// then the (not-yet-persisted in this implementation) TOP-K database,
/// then the bootstrap set.
pub fn candidate_pool(bucket_type: BucketType, spec_pools: &HashMap<String, Vec<DirPlan>>) -> Vec<DirPlan> {
    let pool = spec_pools
        .get(bucket_type.as_str())
        .cloned()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| bootstrap_pool(bucket_type));
    pool.into_iter().map(resolve_codec_availability).collect()
}

fn codec_uses_numeric(plan: &DirPlan) -> bool {
    plan.codec == "num_v1"
        || plan.stream_codecs.as_ref().map(|m| m.values().any(|v| v == "num_v1")).unwrap_or(false)
}

/// Small deterministic CPU-cost penalty in `[0, ~0.05]`: layers/codecs that
/// do more work per byte (numeric extraction, Huffman tree construction)
/// cost a bit more than a flat zstd/raw pass.
fn cpu_penalty(plan: &DirPlan) -> f64 {
    let mut p = 0.0;
    match plan.layer.as_str() {
        "split_text_nums" | "tpl_lines_v0" | "tpl_lines_shared_v0" => p += 0.02,
        "lines_dict" | "lines_rle" | "vc0" => p += 0.01,
        _ => {}
    }
    match plan.codec.as_str() {
        "huffman" => p += 0.01,
        _ => {}
    }
    if codec_uses_numeric(plan) {
        p += 0.01;
    }
    p.min(0.05)
}

fn stream_codec_for_bundle(codec: &str) -> Option<StreamCodec> {
    match codec {
        "huffman" => Some(StreamCodec::Huffman),
        "zstd" => Some(StreamCodec::Zstd(ZstdCodec { level: 19, tight: false })),
        "zstd_tight" => Some(StreamCodec::Zstd(ZstdCodec { level: 19, tight: true })),
        _ => None,
    }
}

/// Apply a candidate/chosen plan to a file's bytes, producing a v6 (or
/// v6+MBN) blob. MBN is used whenever the layer is multi-stream or the
/// plan requests per-stream codecs, mirroring the spec's dispatch rule.
pub fn apply_plan(data: &[u8], plan: &DirPlan, shared: &SharedResources<'_>) -> GccResult<Vec<u8>> {
    let needs_mbn = !layer_supports_bundle(&plan.layer) || plan.stream_codecs.is_some();
    if needs_mbn {
        let lowered: Option<HashMap<String, String>> =
            plan.stream_codecs.as_ref().map(|m| m.iter().map(|(k, v)| (k.to_lowercase(), v.clone())).collect());
        let sc_refs: Option<HashMap<&str, &str>> =
            lowered.as_ref().map(|m| m.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect());
        container::compress_v6_mbn(data, &plan.layer, &plan.codec, sc_refs.as_ref(), shared)
    } else {
        let sc = stream_codec_for_bundle(&plan.codec)
            .unwrap_or(StreamCodec::Zstd(ZstdCodec { level: 19, tight: false }));
        container::compress_v6(data, &plan.layer, &sc, shared)
    }
}

#[derive(Debug, Clone)]
pub struct ScoredPlan {
    pub plan: DirPlan,
    pub score: f64,
}

fn plan_diversity_rank(a: &DirPlan, b: &DirPlan) -> u8 {
    if a.layer != b.layer {
        3
    } else if a.stream_codecs != b.stream_codecs {
        2
    } else if a.codec != b.codec {
        1
    } else {
        0
    }
}

/// Score every candidate against up to `sample_n` sample files, returning
/// `(chosen, runner_up)`. Samples are the bucket's files in relative-path
/// order, truncated to `sample_n`.
pub fn pick_plan(
    candidates: &[DirPlan],
    sample_paths: &[&Path],
    sample_n: u32,
) -> GccResult<(ScoredPlan, Option<ScoredPlan>)> {
    let sample_n = sample_n.clamp(1, MAX_SAMPLE_N) as usize;
    let mut samples = sample_paths.to_vec();
    samples.truncate(sample_n);
    let sample_data: Vec<Vec<u8>> = samples.iter().map(|p| std::fs::read(p).unwrap_or_default()).collect();

    let shared = SharedResources::default();
    let mut scored = Vec::with_capacity(candidates.len());
    for plan in candidates {
        let mut sum_in = 0u64;
        let mut sum_out = 0u64;
        let mut failed = false;
        for data in &sample_data {
            if data.is_empty() {
                continue;
            }
            sum_in += data.len() as u64;
            match apply_plan(data, plan, &shared) {
                Ok(blob) => sum_out += blob.len() as u64,
                Err(_) => {
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            continue;
        }
        let ratio = if sum_in > 0 { sum_out as f64 / sum_in as f64 } else { 1.0 };
        scored.push(ScoredPlan { plan: plan.clone(), score: ratio + cpu_penalty(plan) });
    }

    if scored.is_empty() {
        return Err(crate::error::GccError::Usage("autopick: nessun piano candidato valido per questo bucket".into()));
    }

    scored.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    let chosen = scored.remove(0);

    let runner_up = scored
        .iter()
        .max_by(|a, b| {
            let ra = plan_diversity_rank(&chosen.plan, &a.plan);
            let rb = plan_diversity_rank(&chosen.plan, &b.plan);
            ra.cmp(&rb).then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
        })
        .cloned();

    Ok((chosen, runner_up))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_binaryish_with_high_nul_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.bin");
        std::fs::write(&p, vec![0u8; 1000]).unwrap();
        let bt = classify_bucket(&[(p, "a.bin".into(), 1000)]).unwrap();
        assert_eq!(bt, BucketType::Binaryish);
    }

    #[test]
    fn classify_textish_for_plain_prose() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        std::fs::write(&p, b"the quick brown fox jumps over the lazy dog\n".repeat(20)).unwrap();
        let bt = classify_bucket(&[(p, "a.txt".into(), 900)]).unwrap();
        assert_eq!(bt, BucketType::Textish);
    }

    #[test]
    fn classify_mixed_text_nums_with_many_digits() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.csv");
        std::fs::write(&p, "1,2,3,4,5,6,7,8,9,10\n".repeat(50)).unwrap();
        let bt = classify_bucket(&[(p, "a.csv".into(), 1000)]).unwrap();
        assert_eq!(bt, BucketType::MixedTextNums);
    }

    #[test]
    fn pick_plan_prefers_smaller_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        std::fs::write(&p, "hello hello hello hello hello\n".repeat(200)).unwrap();
        let candidates = bootstrap_pool(BucketType::Textish);
        let (chosen, runner_up) = pick_plan(&candidates, &[p.as_path()], 1).unwrap();
        assert!(chosen.score <= runner_up.map(|r| r.score).unwrap_or(f64::MAX));
    }

    #[test]
    fn sample_n_clamped_to_8() {
        assert_eq!(MAX_SAMPLE_N, 8);
    }
}
