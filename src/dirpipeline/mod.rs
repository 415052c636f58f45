//! Directory pack/unpack orchestration: the "classic" mode that buckets
//! files by content similarity, autopicks a compression plan per bucket,
//! builds bucket-level shared resources, and writes one GCA1 archive per
//! bucket plus a JSONL manifest.
//!
//! Pipeline: enumerate (sorted, relative POSIX paths) -> fingerprint each
//! file -> assign to a bucket -> classify each bucket's `bucket_type` ->
//! autopick a plan (chosen + runner-up) -> build bucket resources -> apply
//! the chosen plan to every file, appending to its bucket's archive ->
//! write the manifest. Unpack reverses this by reading the manifest, opening
//! each referenced archive once, loading its resources once, and decoding
//! every file entry.

pub mod autopick;
pub mod report;
pub mod resources;
pub mod spec;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::archive::{self, GcaReader, GcaWriter};
use crate::codec::num_v1;
use crate::container::{self, SharedResources};
use crate::error::{GccError, GccResult};
use crate::layers::tpl_lines_shared_v0;

use autopick::{BucketType, ScoredPlan};
use spec::{DirPipelineSpec, DirPlan};

pub const MANIFEST_SCHEMA: &str = "gcc-ocf.dir_manifest.v1";
pub const DEFAULT_BUCKETS: u32 = 16;
pub const DEFAULT_JOBS: usize = 1;
/// Files at or under this size are eligible for the bounded worker pool;
/// larger files are still compressed, just without added parallel fan-out
/// benefit since one file alone already saturates a core.
const SMALL_FILE_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Compress every file in a bucket against `plan`, optionally spread over a
/// bounded worker pool. Order of the returned vector always matches `entries`,
/// regardless of which worker finished first.
fn compute_blobs(
    entries: &[(PathBuf, String, u64)],
    plan: &DirPlan,
    shared: &SharedResources<'_>,
    jobs: usize,
) -> Vec<(String, u64, GccResult<Vec<u8>>)> {
    let one_at_a_time = |items: &[(PathBuf, String, u64)]| -> Vec<(String, u64, GccResult<Vec<u8>>)> {
        items
            .iter()
            .map(|(path, rel, size)| {
                let result = std::fs::read(path).map_err(|e| GccError::io(e, path)).and_then(|data| autopick::apply_plan(&data, plan, shared));
                (rel.clone(), *size, result)
            })
            .collect()
    };

    let jobs = jobs.max(1);
    let small_enough = entries.iter().all(|(_, _, size)| *size <= SMALL_FILE_THRESHOLD);
    if jobs == 1 || entries.len() < 2 || !small_enough {
        return one_at_a_time(entries);
    }

    match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => pool.install(|| {
            entries
                .par_iter()
                .map(|(path, rel, size)| {
                    let result = std::fs::read(path).map_err(|e| GccError::io(e, path)).and_then(|data| autopick::apply_plan(&data, plan, shared));
                    (rel.clone(), *size, result)
                })
                .collect()
        }),
        Err(_) => one_at_a_time(entries),
    }
}

fn empty_sha256() -> String {
    archive::sha256_hex(&[])
}

fn rel_posix(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn enumerate_sorted(root: &Path) -> GccResult<Vec<(PathBuf, String, u64)>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| GccError::Other(format!("dir pack: walk fallita: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_path_buf();
        let rel = rel_posix(root, &path);
        let size = entry.metadata().map_err(|e| GccError::Other(format!("dir pack: stat fallita: {e}")))?.len();
        out.push((path, rel, size));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

struct BucketPlan {
    bucket_type: BucketType,
    chosen: ScoredPlan,
    runner_up: Option<ScoredPlan>,
    num_dict_blob: Option<(Vec<u8>, num_v1::SharedDict)>,
    tpl_dict_blob: Option<(Vec<u8>, tpl_lines_shared_v0::SharedDict)>,
}

fn plan_to_json(p: &DirPlan) -> Value {
    json!({
        "layer": p.layer,
        "codec": p.codec,
        "stream_codecs": p.stream_codecs,
        "note": p.note,
    })
}

/// Pack `input_dir` into `output_dir/manifest.jsonl` plus one
/// `bucket_XX.gca` archive per non-empty bucket.
pub fn pack_dir(input_dir: &Path, output_dir: &Path, pipeline: &DirPipelineSpec, jobs: usize) -> GccResult<report::DirPackReport> {
    std::fs::create_dir_all(output_dir).map_err(|e| GccError::io(e, output_dir))?;

    let files = enumerate_sorted(input_dir)?;
    let buckets = pipeline.buckets.unwrap_or(DEFAULT_BUCKETS).max(1);
    let sample_n = pipeline.autopick.sample_n.unwrap_or(autopick::DEFAULT_SAMPLE_N);
    let num_dict_k = resources::apply_resource_defaults(pipeline.num_dict_v1.k, resources::DEFAULT_NUM_DICT_K);
    let tpl_dict_k = resources::apply_resource_defaults(pipeline.tpl_dict_v0.k, resources::DEFAULT_TPL_DICT_K);

    let mut by_bucket: BTreeMap<u32, Vec<(PathBuf, String, u64)>> = BTreeMap::new();
    let mut empty_files: Vec<String> = Vec::new();

    for (path, rel, size) in &files {
        if *size == 0 {
            empty_files.push(rel.clone());
            continue;
        }
        let data = std::fs::read(path).map_err(|e| GccError::io(e, path))?;
        let fp = crate::fingerprint::fingerprint_bytes(&data, crate::fingerprint::DEFAULT_ANALYZE_MAX_BYTES);
        let bucket = crate::fingerprint::bucket_for(fp.simhash64, buckets, None);
        by_bucket.entry(bucket).or_default().push((path.clone(), rel.clone(), *size));
    }

    let mut bucket_plans: HashMap<u32, BucketPlan> = HashMap::new();
    for (&bucket, entries) in &by_bucket {
        let bucket_type = autopick::classify_bucket(entries)?;
        let candidates = autopick::candidate_pool(bucket_type, &pipeline.candidate_pools);
        let sample_paths: Vec<&Path> = entries.iter().map(|(p, _, _)| p.as_path()).collect();
        let (chosen, runner_up) = autopick::pick_plan(&candidates, &sample_paths, sample_n)?;

        let file_paths: Vec<&Path> = entries.iter().map(|(p, _, _)| p.as_path()).collect();
        let num_dict_blob = resources::build_num_dict_v1(
            &chosen.plan,
            runner_up.as_ref().map(|r| &r.plan),
            &chosen.plan.layer,
            &file_paths,
            num_dict_k,
        );
        let tpl_dict_blob =
            resources::build_tpl_dict_v0(&chosen.plan, runner_up.as_ref().map(|r| &r.plan), &file_paths, tpl_dict_k);

        bucket_plans.insert(bucket, BucketPlan { bucket_type, chosen, runner_up, num_dict_blob, tpl_dict_blob });
    }

    let mut writers: HashMap<u32, GcaWriter> = HashMap::new();
    let mut shared_num: HashMap<u32, num_v1::SharedDict> = HashMap::new();
    let mut shared_tpl: HashMap<u32, tpl_lines_shared_v0::SharedDict> = HashMap::new();
    let mut summarized: std::collections::HashSet<u32> = std::collections::HashSet::new();

    let manifest_path = output_dir.join("manifest.jsonl");
    let mut manifest_lines: Vec<Value> = Vec::new();
    manifest_lines.push(json!({"schema": MANIFEST_SCHEMA, "buckets": buckets}));

    let mut file_rows: Vec<report::FileRow> = Vec::new();
    let mut bucket_summaries: BTreeMap<u32, report::BucketSummaryRow> = BTreeMap::new();
    let mut error_rows: Vec<Value> = Vec::new();

    for (bucket, entries) in &by_bucket {
        let bucket = *bucket;
        if !summarized.contains(&bucket) {
            let plan = bucket_plans.get(&bucket).expect("bucket plan computed above");
            let archive_name = format!("bucket_{bucket:02}.gca");
            let archive_path = output_dir.join(&archive_name);
            let mut writer = GcaWriter::create(&archive_path)?;

            let mut resource_rows = Vec::new();
            if let Some((blob, dict)) = &plan.num_dict_blob {
                let entry = writer.append_resource("num_dict_v1", blob, serde_json::Map::new())?;
                resource_rows.push(json!({"name": "num_dict_v1", "rel": entry.rel, "blob_sha256": entry.meta.get("blob_sha256")}));
                shared_num.insert(bucket, dict.clone());
            }
            if let Some((blob, dict)) = &plan.tpl_dict_blob {
                let entry = writer.append_resource("tpl_dict_v0", blob, serde_json::Map::new())?;
                resource_rows.push(json!({"name": "tpl_dict_v0", "rel": entry.rel, "blob_sha256": entry.meta.get("blob_sha256")}));
                shared_tpl.insert(bucket, tpl_lines_shared_v0::SharedDict { templates: dict.templates.clone(), tag8: dict.tag8 });
            }

            manifest_lines.push(json!({
                "kind": "bucket_summary",
                "bucket": bucket,
                "bucket_type": plan.bucket_type.as_str(),
                "archive": archive_name,
                "chosen": plan_to_json(&plan.chosen.plan),
                "runner_up": plan.runner_up.as_ref().map(|r| plan_to_json(&r.plan)),
                "resources": resource_rows,
            }));
            bucket_summaries.insert(bucket, report::BucketSummaryRow { bucket_type: plan.bucket_type.as_str().to_string(), chosen: Some(plan_to_json(&plan.chosen.plan)) });

            writers.insert(bucket, writer);
            summarized.insert(bucket);
        }

        let plan = bucket_plans.get(&bucket).unwrap();
        let shared = SharedResources { num_dict: shared_num.get(&bucket), tpl_dict: shared_tpl.get(&bucket) };

        let computed = compute_blobs(entries, &plan.chosen.plan, &shared, jobs);
        for (rel, size, result) in &computed {
            let blob = match result {
                Ok(b) => b,
                Err(e) => {
                    error_rows.push(json!({"kind": "error", "rel": rel, "error": e.to_string()}));
                    manifest_lines.push(json!({"kind": "error", "rel": rel, "error": e.to_string()}));
                    continue;
                }
            };

            let writer = writers.get_mut(&bucket).expect("writer opened above");
            let entry = writer.append(rel, blob, serde_json::Map::new())?;
            let blob_sha256 = entry.meta.get("blob_sha256").cloned().unwrap_or(Value::Null);

            manifest_lines.push(json!({
                "kind": "file",
                "rel": rel,
                "bucket": bucket,
                "in_size": size,
                "archive": format!("bucket_{bucket:02}.gca"),
                "offset": entry.offset,
                "length": entry.length,
                "blob_sha256": blob_sha256,
                "layer": plan.chosen.plan.layer,
                "codec": plan.chosen.plan.codec,
                "stream_codecs": plan.chosen.plan.stream_codecs,
            }));

            file_rows.push(report::FileRow {
                rel: rel.clone(),
                bucket,
                in_size: *size,
                out_size: blob.len() as u64,
                layer_id: plan.chosen.plan.layer.clone(),
                codec_text: plan.chosen.plan.codec.clone(),
                stream_codecs: plan.chosen.plan.stream_codecs.clone().unwrap_or_default().into_iter().collect(),
                note: plan.chosen.plan.note.clone(),
            });
        }
    }

    for rel in &empty_files {
        manifest_lines.push(json!({
            "kind": "file",
            "rel": rel,
            "bucket": Value::Null,
            "in_size": 0,
            "sha256": empty_sha256(),
            "empty": true,
        }));
        file_rows.push(report::FileRow { rel: rel.clone(), bucket: 0, in_size: 0, out_size: 0, layer_id: String::new(), codec_text: String::new(), ..Default::default() });
    }

    for (_, writer) in writers {
        writer.close()?;
    }

    let manifest_text: String = manifest_lines.iter().map(|v| format!("{}\n", v)).collect();
    std::fs::write(&manifest_path, manifest_text).map_err(|e| GccError::io(e, &manifest_path))?;

    let files_ok = file_rows.len() as u64;
    let files_fail = error_rows.len() as u64;
    let rep = report::build_dir_pack_report(buckets, files_ok, files_fail, &file_rows, &bucket_summaries, error_rows);

    let report_path = output_dir.join("dir_pack_report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&rep)?).map_err(|e| GccError::io(e, &report_path))?;
    let report_txt_path = output_dir.join("dir_pack_report.txt");
    std::fs::write(&report_txt_path, report::render_dir_pack_report_text(&rep)).map_err(|e| GccError::io(e, &report_txt_path))?;

    Ok(rep)
}

/// Unpack a manifest produced by [`pack_dir`] into `output_dir`.
pub fn unpack_dir(manifest_dir: &Path, output_dir: &Path) -> GccResult<(u64, u64)> {
    let manifest_path = manifest_dir.join("manifest.jsonl");
    let text = std::fs::read_to_string(&manifest_path).map_err(|e| GccError::io(e, &manifest_path))?;

    let mut readers: HashMap<String, GcaReader> = HashMap::new();
    let mut num_dicts: HashMap<String, Option<num_v1::SharedDict>> = HashMap::new();
    let mut tpl_dicts: HashMap<String, Option<tpl_lines_shared_v0::SharedDict>> = HashMap::new();

    let mut ok = 0u64;
    let mut failed = 0u64;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let v: Value = serde_json::from_str(line)?;
        let kind = v.get("kind").and_then(|x| x.as_str()).unwrap_or("");

        match kind {
            "bucket_summary" => {
                let Some(archive_name) = v.get("archive").and_then(|x| x.as_str()) else { continue };
                load_bucket_resources(manifest_dir, archive_name, &mut readers, &mut num_dicts, &mut tpl_dicts)?;
            }
            "file" => {
                if v.get("empty").and_then(|x| x.as_bool()).unwrap_or(false) {
                    let rel = v.get("rel").and_then(|x| x.as_str()).unwrap_or_default();
                    let out_path = output_dir.join(rel);
                    if let Some(parent) = out_path.parent() {
                        std::fs::create_dir_all(parent).map_err(|e| GccError::io(e, parent))?;
                    }
                    std::fs::write(&out_path, []).map_err(|e| GccError::io(e, &out_path))?;
                    ok += 1;
                    continue;
                }

                let rel = v.get("rel").and_then(|x| x.as_str()).unwrap_or_default();
                let archive_name = v.get("archive").and_then(|x| x.as_str()).unwrap_or_default();
                let offset = v.get("offset").and_then(|x| x.as_u64()).unwrap_or(0);
                let length = v.get("length").and_then(|x| x.as_u64()).unwrap_or(0);

                load_bucket_resources(manifest_dir, archive_name, &mut readers, &mut num_dicts, &mut tpl_dicts)?;
                let reader = readers.get_mut(archive_name).expect("loaded above");
                let blob = match reader.read_blob(offset, length) {
                    Ok(b) => b,
                    Err(_) => {
                        failed += 1;
                        continue;
                    }
                };

                let shared = SharedResources {
                    num_dict: num_dicts.get(archive_name).and_then(|o| o.as_ref()),
                    tpl_dict: tpl_dicts.get(archive_name).and_then(|o| o.as_ref()),
                };
                match container::decompress_v6(&blob, false, &shared) {
                    Ok(data) => {
                        let out_path = output_dir.join(rel);
                        if let Some(parent) = out_path.parent() {
                            std::fs::create_dir_all(parent).map_err(|e| GccError::io(e, parent))?;
                        }
                        std::fs::write(&out_path, data).map_err(|e| GccError::io(e, &out_path))?;
                        ok += 1;
                    }
                    Err(_) => failed += 1,
                }
            }
            "error" => continue,
            _ => continue,
        }
    }

    Ok((ok, failed))
}

fn load_bucket_resources(
    manifest_dir: &Path,
    archive_name: &str,
    readers: &mut HashMap<String, GcaReader>,
    num_dicts: &mut HashMap<String, Option<num_v1::SharedDict>>,
    tpl_dicts: &mut HashMap<String, Option<tpl_lines_shared_v0::SharedDict>>,
) -> GccResult<()> {
    if readers.contains_key(archive_name) {
        return Ok(());
    }
    let path = manifest_dir.join(archive_name);
    let mut reader = GcaReader::open(&path)?;
    let res = reader.load_resources()?;

    let num_dict = res.get("num_dict_v1").and_then(|r| {
        if r.blob.len() < 8 {
            return None;
        }
        let vals = crate::varint::decode_ints(&r.blob[8..]).ok()?;
        num_v1::SharedDict::new(vals)
    });
    let tpl_dict = res.get("tpl_dict_v0").and_then(|r| {
        let (templates, _meta) = tpl_lines_shared_v0::unpack_tpl_dict_resource(&r.blob).ok()?;
        let tag = tpl_lines_shared_v0::tag8(&r.blob);
        Some(tpl_lines_shared_v0::SharedDict { templates, tag8: tag })
    });

    num_dicts.insert(archive_name.to_string(), num_dict);
    tpl_dicts.insert(archive_name.to_string(), tpl_dict);
    readers.insert(archive_name.to_string(), reader);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_roundtrips_plain_text_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "hello world\nhello world\n".repeat(10)).unwrap();
        std::fs::write(src.path().join("b.txt"), "hello world\nhello world\n".repeat(10)).unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/c.txt"), "another file here\n".repeat(5)).unwrap();
        std::fs::write(src.path().join("empty.txt"), []).unwrap();

        let out = tempfile::tempdir().unwrap();
        let spec = DirPipelineSpec { buckets: Some(2), ..Default::default() };
        let rep = pack_dir(src.path(), out.path(), &spec, 1).unwrap();
        assert!(rep.files_fail == 0);

        let restored = tempfile::tempdir().unwrap();
        let (ok, failed) = unpack_dir(out.path(), restored.path()).unwrap();
        assert_eq!(failed, 0);
        assert!(ok >= 4);

        assert_eq!(std::fs::read(restored.path().join("a.txt")).unwrap(), std::fs::read(src.path().join("a.txt")).unwrap());
        assert_eq!(std::fs::read(restored.path().join("sub/c.txt")).unwrap(), std::fs::read(src.path().join("sub/c.txt")).unwrap());
        assert_eq!(std::fs::read(restored.path().join("empty.txt")).unwrap(), Vec::<u8>::new());
    }
}
