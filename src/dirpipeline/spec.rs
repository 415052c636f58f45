//! Directory pipeline spec loader/validator.
//!
//! Controls directory-mode behaviour (bucketing + autopick + candidate
//! pools + resources) in a reproducible way. Schema id:
//! `gcc-ocf.dir_pipeline.v1`.
//!
//! Strict: unknown keys are errors. Deterministic: defaults mirror classic
//! behaviour. Minimal: only the knobs actually used today.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{GccError, GccResult};

pub const SCHEMA_ID: &str = "gcc-ocf.dir_pipeline.v1";

#[derive(Debug, Clone, Default)]
pub struct DirAutopick {
    pub enabled: Option<bool>,
    pub sample_n: Option<u32>,
    pub top_k: Option<u32>,
    pub top_db_max: Option<u32>,
    pub refresh_top: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DirResourceNumDictV1 {
    pub enabled: Option<bool>,
    pub k: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct DirResourceTplDictV0 {
    pub enabled: Option<bool>,
    pub k: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirPlan {
    pub layer: String,
    pub codec: String,
    pub stream_codecs: Option<HashMap<String, String>>,
    pub note: String,
}

#[derive(Debug, Clone, Default)]
pub struct DirPipelineSpec {
    pub spec: String,
    pub buckets: Option<u32>,
    pub archive: Option<bool>,
    pub autopick: DirAutopick,
    pub candidate_pools: HashMap<String, Vec<DirPlan>>,
    pub num_dict_v1: DirResourceNumDictV1,
    pub tpl_dict_v0: DirResourceTplDictV0,
}

const STREAM_NAMES: &[&str] = &["MAIN", "TEXT", "NUMS", "IDS", "TPL", "META", "CONS", "VOWELS", "MASK"];

fn read_json_text(arg: &str) -> GccResult<String> {
    let s = arg.trim();
    if s.is_empty() {
        return Err(GccError::Usage("dir pipeline spec: input vuoto".into()));
    }
    if let Some(rest) = s.strip_prefix('@') {
        let p = Path::new(rest);
        if !p.is_file() {
            return Err(GccError::Usage(format!("dir pipeline spec: file non trovato: {}", p.display())));
        }
        return std::fs::read_to_string(p).map_err(|e| GccError::io(e, p));
    }
    Ok(s.to_string())
}

fn expect_object<'a>(name: &str, v: &'a Value) -> GccResult<&'a serde_json::Map<String, Value>> {
    v.as_object().ok_or_else(|| GccError::Usage(format!("dir pipeline spec: '{name}' deve essere un oggetto")))
}

fn ensure_allowed_keys(obj_name: &str, obj: &serde_json::Map<String, Value>, allowed: &[&str]) -> GccResult<()> {
    let mut extra: Vec<&str> = obj.keys().map(String::as_str).filter(|k| !allowed.contains(k)).collect();
    if !extra.is_empty() {
        extra.sort_unstable();
        return Err(GccError::Usage(format!(
            "dir pipeline spec: chiavi non supportate in {obj_name}: {}",
            extra.join(", ")
        )));
    }
    Ok(())
}

fn expect_bool(name: &str, v: &Value) -> GccResult<bool> {
    v.as_bool().ok_or_else(|| GccError::Usage(format!("dir pipeline spec: '{name}' deve essere bool")))
}

fn expect_i64(name: &str, v: &Value) -> GccResult<i64> {
    v.as_i64().ok_or_else(|| GccError::Usage(format!("dir pipeline spec: '{name}' deve essere int")))
}

fn parse_autopick(v: Option<&Value>) -> GccResult<DirAutopick> {
    let Some(v) = v else { return Ok(DirAutopick::default()) };
    if v.is_null() {
        return Ok(DirAutopick::default());
    }
    let obj = expect_object("autopick", v)?;
    ensure_allowed_keys("autopick", obj, &["enabled", "sample_n", "top_k", "top_db_max", "refresh_top"])?;

    let enabled = obj.get("enabled").map(|v| expect_bool("autopick.enabled", v)).transpose()?;
    let sample_n = obj
        .get("sample_n")
        .map(|v| expect_i64("autopick.sample_n", v))
        .transpose()?
        .map(|n| {
            if !(1..=8).contains(&n) {
                Err(GccError::Usage("dir pipeline spec: autopick.sample_n deve essere tra 1 e 8".into()))
            } else {
                Ok(n as u32)
            }
        })
        .transpose()?;
    let top_k = obj.get("top_k").map(|v| expect_i64("autopick.top_k", v)).transpose()?.map(|n| n as u32);
    let top_db_max = obj
        .get("top_db_max")
        .map(|v| expect_i64("autopick.top_db_max", v))
        .transpose()?
        .map(|n| {
            if n < 1 {
                Err(GccError::Usage("dir pipeline spec: autopick.top_db_max deve essere >= 1".into()))
            } else {
                Ok(n as u32)
            }
        })
        .transpose()?;
    let refresh_top = obj.get("refresh_top").map(|v| expect_bool("autopick.refresh_top", v)).transpose()?;

    Ok(DirAutopick { enabled, sample_n, top_k, top_db_max, refresh_top })
}

fn parse_plan(v: &Value) -> GccResult<DirPlan> {
    let obj = expect_object("plan", v)?;
    ensure_allowed_keys("plan", obj, &["layer", "codec", "stream_codecs", "note"])?;

    let layer = obj.get("layer").and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty());
    let layer = layer.ok_or_else(|| GccError::Usage("dir pipeline spec: plan.layer obbligatorio".into()))?.to_string();
    let codec = obj.get("codec").and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty());
    let codec = codec.ok_or_else(|| GccError::Usage("dir pipeline spec: plan.codec obbligatorio".into()))?.to_string();

    let note = match obj.get("note") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(GccError::Usage("dir pipeline spec: plan.note deve essere string".into())),
    };

    let stream_codecs = match obj.get("stream_codecs") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let m = expect_object("plan.stream_codecs", v)?;
            let mut out = HashMap::new();
            for (k, v) in m {
                let v = v.as_str().ok_or_else(|| {
                    GccError::Usage("dir pipeline spec: stream_codecs deve essere mappa string->string".into())
                })?;
                let k2 = k.trim().to_uppercase();
                if !STREAM_NAMES.contains(&k2.as_str()) {
                    return Err(GccError::Usage(format!("dir pipeline spec: stream name non supportato: {k}")));
                }
                if v.trim().is_empty() {
                    return Err(GccError::Usage("dir pipeline spec: codec vuoto in stream_codecs".into()));
                }
                out.insert(k2, v.trim().to_string());
            }
            Some(out)
        }
    };

    Ok(DirPlan { layer, codec, stream_codecs, note })
}

fn parse_candidate_pools(v: Option<&Value>) -> GccResult<HashMap<String, Vec<DirPlan>>> {
    let Some(v) = v else { return Ok(HashMap::new()) };
    if v.is_null() {
        return Ok(HashMap::new());
    }
    let obj = expect_object("candidate_pools", v)?;
    let mut pools = HashMap::new();
    for (bt, lst) in obj {
        if bt.trim().is_empty() {
            return Err(GccError::Usage("dir pipeline spec: candidate_pools keys devono essere string".into()));
        }
        let arr = lst.as_array().ok_or_else(|| {
            GccError::Usage(format!("dir pipeline spec: candidate_pools[{bt}] deve essere lista"))
        })?;
        let plans = arr.iter().map(parse_plan).collect::<GccResult<Vec<_>>>()?;
        pools.insert(bt.trim().to_string(), plans);
    }
    Ok(pools)
}

fn parse_resources(v: Option<&Value>) -> GccResult<(DirResourceNumDictV1, DirResourceTplDictV0)> {
    let Some(v) = v else { return Ok(Default::default()) };
    if v.is_null() {
        return Ok(Default::default());
    }
    let obj = expect_object("resources", v)?;
    ensure_allowed_keys("resources", obj, &["num_dict_v1", "tpl_dict_v0"])?;

    let nd = match obj.get("num_dict_v1") {
        None | Some(Value::Null) => DirResourceNumDictV1::default(),
        Some(v) => {
            let o = expect_object("resources.num_dict_v1", v)?;
            ensure_allowed_keys("resources.num_dict_v1", o, &["enabled", "k"])?;
            let enabled = o.get("enabled").map(|v| expect_bool("resources.num_dict_v1.enabled", v)).transpose()?;
            let k = o
                .get("k")
                .map(|v| expect_i64("resources.num_dict_v1.k", v))
                .transpose()?
                .map(|n| {
                    if n < 0 {
                        Err(GccError::Usage("dir pipeline spec: resources.num_dict_v1.k deve essere >= 0".into()))
                    } else {
                        Ok(n as u32)
                    }
                })
                .transpose()?;
            DirResourceNumDictV1 { enabled, k }
        }
    };

    let td = match obj.get("tpl_dict_v0") {
        None | Some(Value::Null) => DirResourceTplDictV0::default(),
        Some(v) => {
            let o = expect_object("resources.tpl_dict_v0", v)?;
            ensure_allowed_keys("resources.tpl_dict_v0", o, &["enabled", "k"])?;
            let enabled = o.get("enabled").map(|v| expect_bool("resources.tpl_dict_v0.enabled", v)).transpose()?;
            let k = o
                .get("k")
                .map(|v| expect_i64("resources.tpl_dict_v0.k", v))
                .transpose()?
                .map(|n| {
                    if n < 0 {
                        Err(GccError::Usage("dir pipeline spec: resources.tpl_dict_v0.k deve essere >= 0".into()))
                    } else {
                        Ok(n as u32)
                    }
                })
                .transpose()?;
            DirResourceTplDictV0 { enabled, k }
        }
    };

    Ok((nd, td))
}

/// Load and validate a dir pipeline spec from `@file.json` or inline JSON.
pub fn load_dir_pipeline_spec(arg: &str) -> GccResult<DirPipelineSpec> {
    let text = read_json_text(arg)?;
    let obj_val: Value = serde_json::from_str(&text).map_err(|e| GccError::Usage(format!("dir pipeline spec: JSON invalido: {e}")))?;
    let obj = expect_object("root", &obj_val)?;
    ensure_allowed_keys("root", obj, &["spec", "buckets", "archive", "autopick", "candidate_pools", "resources"])?;

    let spec = obj.get("spec").and_then(Value::as_str).unwrap_or_default();
    if spec != SCHEMA_ID {
        return Err(GccError::Usage(format!("dir pipeline spec: spec deve essere '{SCHEMA_ID}'")));
    }

    let buckets = obj
        .get("buckets")
        .map(|v| expect_i64("buckets", v))
        .transpose()?
        .map(|n| {
            if n <= 0 {
                Err(GccError::Usage("dir pipeline spec: buckets deve essere > 0".into()))
            } else {
                Ok(n as u32)
            }
        })
        .transpose()?;

    let archive = obj.get("archive").map(|v| expect_bool("archive", v)).transpose()?;
    let autopick = parse_autopick(obj.get("autopick"))?;
    let candidate_pools = parse_candidate_pools(obj.get("candidate_pools"))?;
    let (num_dict_v1, tpl_dict_v0) = parse_resources(obj.get("resources"))?;

    Ok(DirPipelineSpec {
        spec: spec.to_string(),
        buckets,
        archive,
        autopick,
        candidate_pools,
        num_dict_v1,
        tpl_dict_v0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_spec_parses_with_defaults() {
        let spec = load_dir_pipeline_spec(r#"{"spec":"gcc-ocf.dir_pipeline.v1"}"#).unwrap();
        assert_eq!(spec.spec, SCHEMA_ID);
        assert!(spec.buckets.is_none());
        assert!(spec.candidate_pools.is_empty());
    }

    #[test]
    fn unknown_root_key_is_rejected() {
        let err = load_dir_pipeline_spec(r#"{"spec":"gcc-ocf.dir_pipeline.v1","bogus":1}"#).unwrap_err();
        assert!(matches!(err, GccError::Usage(_)));
    }

    #[test]
    fn sample_n_out_of_range_is_rejected() {
        let err = load_dir_pipeline_spec(
            r#"{"spec":"gcc-ocf.dir_pipeline.v1","autopick":{"sample_n":9}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GccError::Usage(_)));
    }

    #[test]
    fn candidate_pool_with_stream_codecs_roundtrips() {
        let spec = load_dir_pipeline_spec(
            r#"{"spec":"gcc-ocf.dir_pipeline.v1","candidate_pools":{"textish":[{"layer":"split_text_nums","codec":"zlib","stream_codecs":{"nums":"num_v1"}}]}}"#,
        )
        .unwrap();
        let plans = &spec.candidate_pools["textish"];
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].stream_codecs.as_ref().unwrap()["NUMS"], "num_v1");
    }
}
