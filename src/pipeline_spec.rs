//! File-level pipeline spec loader/validator.
//!
//! Makes a single encode plan reproducible and portable across the CLI and
//! CI (`file compress --pipeline '{...}'` or `--pipeline @file.json`).
//! Schema id: `gcc-ocf.pipeline.v1`. Distinct from [`crate::dirpipeline::spec`],
//! which governs directory-mode bucketing/autopick instead of a single plan.
//!
//! Strict: unknown keys are rejected. JSON only.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{GccError, GccResult};

pub const SCHEMA_ID: &str = "gcc-ocf.pipeline.v1";

/// A single lossless encode plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpecV1 {
    pub name: String,
    pub layer: String,
    pub codec: String,
    pub stream_codecs: Option<HashMap<String, String>>,
    pub mbn: Option<bool>,
}

impl PipelineSpecV1 {
    /// The legacy `"TEXT:zlib,NUMS:num_v1"` form, deterministic by sorted
    /// stream name.
    pub fn stream_codecs_spec(&self) -> Option<String> {
        let sc = self.stream_codecs.as_ref()?;
        if sc.is_empty() {
            return None;
        }
        let mut keys: Vec<&String> = sc.keys().collect();
        keys.sort();
        Some(keys.iter().map(|k| format!("{k}:{}", sc[*k])).collect::<Vec<_>>().join(","))
    }
}

fn read_json_text(arg: &str) -> GccResult<String> {
    let s = arg.trim();
    if s.is_empty() {
        return Err(GccError::Usage("pipeline: argomento vuoto".into()));
    }
    if let Some(rest) = s.strip_prefix('@') {
        let p = Path::new(rest);
        if !p.is_file() {
            return Err(GccError::Usage(format!("pipeline: file non trovato: {}", p.display())));
        }
        return std::fs::read_to_string(p).map_err(|e| GccError::io(e, p));
    }
    Ok(s.to_string())
}

fn expect_object<'a>(name: &str, v: &'a Value) -> GccResult<&'a serde_json::Map<String, Value>> {
    v.as_object().ok_or_else(|| GccError::Usage(format!("pipeline: '{name}' deve essere un oggetto")))
}

fn require_str(obj: &serde_json::Map<String, Value>, key: &str) -> GccResult<String> {
    let v = obj.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty());
    v.map(str::to_string).ok_or_else(|| GccError::Usage(format!("pipeline: campo '{key}' richiesto (string)")))
}

fn optional_bool(obj: &serde_json::Map<String, Value>, key: &str) -> GccResult<Option<bool>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(GccError::Usage(format!("pipeline: campo '{key}' deve essere booleano"))),
    }
}

fn optional_stream_codecs(obj: &serde_json::Map<String, Value>) -> GccResult<Option<HashMap<String, String>>> {
    match obj.get("stream_codecs") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let m = expect_object("stream_codecs", v)?;
            let mut out = HashMap::new();
            for (k, vv) in m {
                if k.trim().is_empty() {
                    return Err(GccError::Usage("pipeline: 'stream_codecs' ha una chiave non-stringa".into()));
                }
                let vv = vv.as_str().filter(|s| !s.trim().is_empty());
                let vv = vv.ok_or_else(|| GccError::Usage(format!("pipeline: stream_codecs['{k}'] deve essere una stringa")))?;
                out.insert(k.trim().to_uppercase(), vv.trim().to_string());
            }
            Ok(Some(out))
        }
    }
}

/// Load and validate a pipeline spec.
///
/// `pipeline_arg` is either `@file.json` or an inline JSON object.
pub fn load_pipeline_spec(pipeline_arg: &str) -> GccResult<PipelineSpecV1> {
    let text = read_json_text(pipeline_arg)?;
    let obj_val: Value = serde_json::from_str(&text).map_err(|e| GccError::Usage(format!("pipeline: JSON non valido: {e}")))?;
    let obj = expect_object("root", &obj_val)?;

    const ALLOWED: &[&str] = &["spec", "name", "layer", "codec", "stream_codecs", "mbn"];
    let mut extra: Vec<&str> = obj.keys().map(String::as_str).filter(|k| !ALLOWED.contains(k)).collect();
    if !extra.is_empty() {
        extra.sort_unstable();
        return Err(GccError::Usage(format!("pipeline: chiavi non supportate: {}", extra.join(", "))));
    }

    let spec_id = obj.get("spec").and_then(Value::as_str).unwrap_or_default();
    if spec_id != SCHEMA_ID {
        return Err(GccError::Usage(format!("pipeline: spec non supportata: {spec_id:?} (attesa {SCHEMA_ID:?})")));
    }

    let name = match obj.get("name") {
        None | Some(Value::Null) => "pipeline".to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return Err(GccError::Usage("pipeline: campo 'name' deve essere stringa".into())),
    };

    let layer = require_str(obj, "layer")?;
    let codec = match obj.get("codec") {
        None => "zlib".to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return Err(GccError::Usage("pipeline: campo 'codec' deve essere stringa".into())),
    };

    let stream_codecs = optional_stream_codecs(obj)?;
    let mbn = optional_bool(obj, "mbn")?;

    Ok(PipelineSpecV1 { name, layer, codec, stream_codecs, mbn })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_minimal_spec() {
        let spec = load_pipeline_spec(r#"{"spec":"gcc-ocf.pipeline.v1","name":"bytes+zlib","layer":"bytes","codec":"zlib"}"#).unwrap();
        assert_eq!(spec.layer, "bytes");
        assert_eq!(spec.codec, "zlib");
        assert!(spec.stream_codecs.is_none());
        assert!(spec.mbn.is_none());
    }

    #[test]
    fn stream_codecs_ordering_is_deterministic() {
        let spec = load_pipeline_spec(
            r#"{"spec":"gcc-ocf.pipeline.v1","name":"split_text_nums","layer":"split_text_nums","codec":"zlib","stream_codecs":{"NUMS":"num_v1","TEXT":"zlib"}}"#,
        )
        .unwrap();
        assert_eq!(spec.stream_codecs_spec().unwrap(), "NUMS:num_v1,TEXT:zlib");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = load_pipeline_spec(
            r#"{"spec":"gcc-ocf.pipeline.v1","name":"bad","layer":"bytes","codec":"zlib","wat":1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GccError::Usage(_)));
    }

    #[test]
    fn loads_from_file_reference() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("p.json");
        std::fs::write(&p, r#"{"spec":"gcc-ocf.pipeline.v1","name":"bytes+raw","layer":"bytes","codec":"raw"}"#).unwrap();
        let spec = load_pipeline_spec(&format!("@{}", p.display())).unwrap();
        assert_eq!(spec.codec, "raw");
    }

    #[test]
    fn default_codec_is_zlib_when_omitted() {
        let spec = load_pipeline_spec(r#"{"spec":"gcc-ocf.pipeline.v1","layer":"bytes"}"#).unwrap();
        assert_eq!(spec.codec, "zlib");
        assert_eq!(spec.name, "pipeline");
    }
}
