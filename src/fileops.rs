//! Semantic single-file compress/decompress: the `file compress`/`file
//! decompress` CLI surface, built on top of [`crate::container`] (and, for
//! multi-stream/forced-MBN plans, [`crate::dirpipeline::autopick::apply_plan`]).
//!
//! Dispatch rule (mirrors the directory autopick plan dispatch):
//!   - layer supports a bundle (`bytes`/`vc0`/`lines_dict`/`lines_rle`) AND no
//!     per-stream codecs AND not forced -> single-stream v6 bundle
//!     (huffman/zstd/zstd_tight only)
//!   - otherwise -> v6 + MBN payload, one stream per layer output, `--codec`
//!     as the default per-stream codec unless `--stream-codecs` overrides it

use std::collections::HashMap;
use std::path::Path;

use crate::container::{self, layer_supports_bundle, SharedResources};
use crate::dirpipeline::autopick::apply_plan;
use crate::dirpipeline::spec::DirPlan;
use crate::error::{GccError, GccResult};
use crate::pipeline_spec::PipelineSpecV1;

fn compress_with_plan(data: &[u8], plan: &DirPlan, force_mbn: bool) -> GccResult<Vec<u8>> {
    let shared = SharedResources::default();
    let already_mbn = !layer_supports_bundle(&plan.layer) || plan.stream_codecs.is_some();
    if force_mbn && !already_mbn {
        let lowered: Option<HashMap<String, String>> =
            plan.stream_codecs.as_ref().map(|m| m.iter().map(|(k, v)| (k.to_lowercase(), v.clone())).collect());
        let sc_refs: Option<HashMap<&str, &str>> =
            lowered.as_ref().map(|m| m.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect());
        return container::compress_v6_mbn(data, &plan.layer, &plan.codec, sc_refs.as_ref(), &shared);
    }
    apply_plan(data, plan, &shared)
}

/// `file compress IN OUT --layer L --codec C [--stream-codecs S] [--mbn]`
pub fn compress_file(
    input_path: &Path,
    output_path: &Path,
    layer: &str,
    codec: &str,
    stream_codecs_spec: Option<&str>,
    force_mbn: bool,
) -> GccResult<()> {
    let data = std::fs::read(input_path).map_err(|e| GccError::io(e, input_path))?;

    let stream_codecs = match stream_codecs_spec {
        None => None,
        Some(spec) => Some(parse_stream_codecs_spec(spec)?),
    };

    let plan = DirPlan { layer: layer.trim().to_string(), codec: codec.trim().to_string(), stream_codecs, note: String::new() };
    let blob = compress_with_plan(&data, &plan, force_mbn)?;
    std::fs::write(output_path, &blob).map_err(|e| GccError::io(e, output_path))
}

/// `file compress IN OUT --pipeline SPEC`
pub fn compress_file_with_pipeline(input_path: &Path, output_path: &Path, spec: &PipelineSpecV1) -> GccResult<()> {
    let data = std::fs::read(input_path).map_err(|e| GccError::io(e, input_path))?;

    let force_mbn = spec.mbn.unwrap_or(false);
    let plan = DirPlan {
        layer: spec.layer.clone(),
        codec: spec.codec.clone(),
        stream_codecs: spec.stream_codecs.clone(),
        note: spec.name.clone(),
    };
    let blob = compress_with_plan(&data, &plan, force_mbn)?;
    std::fs::write(output_path, &blob).map_err(|e| GccError::io(e, output_path))
}

/// `file decompress IN OUT`: universal lossless decode (container v6 only;
/// legacy v1-v5 payloads are out of scope).
pub fn decompress_file(input_path: &Path, output_path: &Path) -> GccResult<()> {
    let blob = std::fs::read(input_path).map_err(|e| GccError::io(e, input_path))?;
    let shared = SharedResources::default();
    let data = container::decompress_v6(&blob, false, &shared)?;
    std::fs::write(output_path, &data).map_err(|e| GccError::io(e, output_path))
}

/// Parses `"TEXT:zlib,NUMS:num_v1"` into an upper-cased stream-name map.
pub fn parse_stream_codecs_spec(spec: &str) -> GccResult<HashMap<String, String>> {
    let mut out = HashMap::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, codec) = part
            .split_once(':')
            .ok_or_else(|| GccError::Usage(format!("stream-codecs: voce invalida (atteso NAME:codec): {part:?}")))?;
        let name = name.trim();
        let codec = codec.trim();
        if name.is_empty() || codec.is_empty() {
            return Err(GccError::Usage(format!("stream-codecs: voce invalida: {part:?}")));
        }
        out.insert(name.to_uppercase(), codec.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_zlib_roundtrips_via_mbn() {
        let src = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(src.path(), b"hello hello hello hello\n".repeat(20)).unwrap();
        let out = tempfile::NamedTempFile::new().unwrap();

        compress_file(src.path(), out.path(), "bytes", "zlib", None, false).unwrap();

        let restored = tempfile::NamedTempFile::new().unwrap();
        decompress_file(out.path(), restored.path()).unwrap();
        assert_eq!(std::fs::read(restored.path()).unwrap(), std::fs::read(src.path()).unwrap());
    }

    #[test]
    fn bytes_huffman_roundtrips_via_bundle() {
        let src = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(src.path(), b"the quick brown fox the quick brown fox\n".repeat(10)).unwrap();
        let out = tempfile::NamedTempFile::new().unwrap();

        compress_file(src.path(), out.path(), "bytes", "huffman", None, false).unwrap();

        let restored = tempfile::NamedTempFile::new().unwrap();
        decompress_file(out.path(), restored.path()).unwrap();
        assert_eq!(std::fs::read(restored.path()).unwrap(), std::fs::read(src.path()).unwrap());
    }

    #[test]
    fn split_text_nums_with_stream_codecs_roundtrips() {
        let src = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(src.path(), "line one has 12 and 34\nline two has -5\n".repeat(5)).unwrap();
        let out = tempfile::NamedTempFile::new().unwrap();

        compress_file(src.path(), out.path(), "split_text_nums", "zlib", Some("TEXT:zlib,NUMS:num_v1"), false).unwrap();

        let restored = tempfile::NamedTempFile::new().unwrap();
        decompress_file(out.path(), restored.path()).unwrap();
        assert_eq!(std::fs::read(restored.path()).unwrap(), std::fs::read(src.path()).unwrap());
    }

    #[test]
    fn forced_mbn_wraps_single_stream_layer() {
        let src = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(src.path(), b"abcabcabcabc").unwrap();
        let out = tempfile::NamedTempFile::new().unwrap();

        compress_file(src.path(), out.path(), "bytes", "zstd_tight", None, true).unwrap();
        let blob = std::fs::read(out.path()).unwrap();
        let header = container::unpack_container_v6(&blob).unwrap();
        assert_eq!(header.codec_id, "mbn");
    }

    #[test]
    fn pipeline_spec_drives_compression() {
        let src = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(src.path(), b"payload payload payload\n".repeat(8)).unwrap();
        let out = tempfile::NamedTempFile::new().unwrap();

        let spec = PipelineSpecV1 { name: "p".into(), layer: "bytes".into(), codec: "raw".into(), stream_codecs: None, mbn: None };
        compress_file_with_pipeline(src.path(), out.path(), &spec).unwrap();

        let restored = tempfile::NamedTempFile::new().unwrap();
        decompress_file(out.path(), restored.path()).unwrap();
        assert_eq!(std::fs::read(restored.path()).unwrap(), std::fs::read(src.path()).unwrap());
    }
}
