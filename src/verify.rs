//! Verification helpers.
//!
//! Three surfaces:
//!   - [`verify_gca`]: a single GCA1 archive (index/trailer + optional
//!     recomputed blob hashes)
//!   - [`verify_packed_dir`]: a whole packed directory (manifest.jsonl +
//!     every referenced archive, cross-checked against the manifest)
//!   - [`verify_container_file`]: a single container v6 file
//!
//! Policy: light by default (structure + CRC, already enforced by
//! [`GcaReader`] on load), `full=true` recomputes every hash.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde_json::Value;

use crate::archive::{GcaReader, DEFAULT_CHUNK_SIZE};
use crate::container::{self, SharedResources};
use crate::error::{GccError, GccResult};

fn looks_like_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Verify a single GCA1 archive: trailer hash, well-formed `blob_sha256`
/// fields, and (if `full`) recomputed blob hashes/CRCs for every entry.
pub fn verify_gca(path: &Path, full: bool, chunk_size: usize) -> GccResult<()> {
    if !path.is_file() {
        return Err(GccError::CorruptPayload(format!("GCA non trovato: {}", path.display())));
    }
    let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
    let mut rd = GcaReader::open(path)?;
    let idx: Vec<Value> = rd.iter_index()?.cloned().collect();

    for e in &idx {
        let Some(obj) = e.as_object() else { continue };
        if obj.get("kind").and_then(Value::as_str) == Some("trailer") {
            continue;
        }
        let rel = obj.get("rel").and_then(Value::as_str).unwrap_or_default();
        let length = obj.get("length").and_then(Value::as_u64).unwrap_or(0);
        if length == 0 {
            continue;
        }
        if let Some(sha) = obj.get("blob_sha256").and_then(Value::as_str) {
            if !looks_like_sha256_hex(sha) {
                return Err(GccError::CorruptPayload(format!("GCA blob_sha256 malformato per {rel}")));
            }
        }

        if full {
            let offset = obj.get("offset").and_then(Value::as_u64).unwrap_or(0);
            let (got_sha, got_crc) = rd.sha256_crc32_blob(offset, length, chunk_size)?;
            if let Some(exp) = obj.get("blob_sha256").and_then(Value::as_str) {
                if !exp.is_empty() && got_sha != exp {
                    return Err(GccError::HashMismatch(format!("GCA blob hash mismatch per {rel}")));
                }
            }
            if let Some(exp_crc) = obj.get("blob_crc32").and_then(Value::as_u64) {
                if got_crc as u64 != exp_crc {
                    return Err(GccError::HashMismatch(format!("GCA blob CRC mismatch per {rel}")));
                }
            }
        }
    }
    Ok(())
}

struct ManifestFileRec {
    rel: String,
    bucket: Option<u32>,
    archive: Option<String>,
    offset: u64,
    length: u64,
    blob_sha256: Option<String>,
}

fn iter_manifest_records(manifest_path: &Path) -> GccResult<Vec<Value>> {
    let text = std::fs::read_to_string(manifest_path).map_err(|e| GccError::io(e, manifest_path))?;
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(v) = serde_json::from_str::<Value>(line) {
            if v.is_object() {
                out.push(v);
            }
        }
    }
    Ok(out)
}

/// Verify a packed directory (manifest.jsonl + every referenced GCA1
/// archive), cross-checking manifest entries against each archive's own
/// index and (if `full`) recomputing declared resource hashes.
pub fn verify_packed_dir(output_dir: &Path, full: bool, chunk_size: usize) -> GccResult<()> {
    let manifest_path = output_dir.join("manifest.jsonl");
    if !manifest_path.is_file() {
        return Err(GccError::CorruptPayload(format!("manifest non trovato: {}", manifest_path.display())));
    }

    let recs = iter_manifest_records(&manifest_path)?;
    let mut needed_archives: BTreeMap<String, Vec<ManifestFileRec>> = BTreeMap::new();
    let mut bucket_summaries: HashMap<u32, Value> = HashMap::new();

    for rec in &recs {
        let kind = rec.get("kind").and_then(Value::as_str).unwrap_or("");
        if kind == "bucket_summary" {
            if let Some(b) = rec.get("bucket").and_then(Value::as_u64) {
                bucket_summaries.insert(b as u32, rec.clone());
            }
            continue;
        }
        if kind != "file" {
            continue;
        }
        if rec.get("empty").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        let Some(rel) = rec.get("rel").and_then(Value::as_str) else { continue };
        let Some(archive) = rec.get("archive").and_then(Value::as_str) else { continue };
        let entry = ManifestFileRec {
            rel: rel.to_string(),
            bucket: rec.get("bucket").and_then(Value::as_u64).map(|b| b as u32),
            archive: Some(archive.to_string()),
            offset: rec.get("offset").and_then(Value::as_u64).unwrap_or(0),
            length: rec.get("length").and_then(Value::as_u64).unwrap_or(0),
            blob_sha256: rec.get("blob_sha256").and_then(Value::as_str).map(str::to_string),
        };
        needed_archives.entry(archive.to_string()).or_default().push(entry);
    }

    for archive in needed_archives.keys() {
        verify_gca(&output_dir.join(archive), full, chunk_size)?;
    }

    for (archive, file_recs) in &needed_archives {
        let archive_path = output_dir.join(archive);
        let mut rd = GcaReader::open(&archive_path)?;
        let idx: Vec<Value> = rd.iter_index()?.cloned().collect();
        let mut by_rel: HashMap<String, &Value> = HashMap::new();
        for e in &idx {
            let Some(obj) = e.as_object() else { continue };
            if obj.get("kind").and_then(Value::as_str) == Some("trailer") {
                continue;
            }
            if let Some(r) = obj.get("rel").and_then(Value::as_str) {
                by_rel.insert(r.to_string(), e);
            }
        }

        for rec in file_recs {
            let Some(e) = by_rel.get(&rec.rel) else {
                return Err(GccError::CorruptPayload(format!("manifest punta a entry mancante in {archive}: {}", rec.rel)));
            };
            let idx_sha = e.get("blob_sha256").and_then(Value::as_str);
            if let (Some(man_sha), Some(idx_sha)) = (rec.blob_sha256.as_deref(), idx_sha) {
                if !man_sha.is_empty() && man_sha != idx_sha {
                    return Err(GccError::HashMismatch(format!("manifest/blob_sha256 mismatch: {}", rec.rel)));
                }
            }
            if full {
                let (got_sha, got_crc) = rd.sha256_crc32_blob(rec.offset, rec.length, chunk_size)?;
                if let Some(exp) = idx_sha {
                    if !exp.is_empty() && got_sha != exp {
                        return Err(GccError::HashMismatch(format!("blob hash mismatch: {}", rec.rel)));
                    }
                }
                if let Some(exp_crc) = e.get("blob_crc32").and_then(Value::as_u64) {
                    if got_crc as u64 != exp_crc {
                        return Err(GccError::HashMismatch(format!("blob CRC mismatch: {}", rec.rel)));
                    }
                }
            }
        }

        let buckets_here: std::collections::BTreeSet<u32> = file_recs.iter().filter_map(|r| r.bucket).collect();
        if !buckets_here.is_empty() {
            let resources = rd.load_resources()?;
            for b in &buckets_here {
                let Some(summ) = bucket_summaries.get(b) else { continue };
                let Some(declared) = summ.get("resources").and_then(Value::as_array) else { continue };
                for res_decl in declared {
                    let Some(name) = res_decl.get("name").and_then(Value::as_str) else { continue };
                    let Some(got) = resources.get(name) else {
                        return Err(GccError::MissingResource(format!("resource mancante in {archive}: bucket={b} name={name}")));
                    };
                    let decl_sha = res_decl.get("blob_sha256").and_then(Value::as_str);
                    let got_sha = got.meta.get("blob_sha256").and_then(Value::as_str);
                    if let (Some(d), Some(g)) = (decl_sha, got_sha) {
                        if !d.is_empty() && d != g {
                            return Err(GccError::HashMismatch(format!("resource sha mismatch: {archive} {name}")));
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Verify a single container v6 file.
///
/// Light: parse the header only. Full: fully decode it (lossless, no
/// extract-mode side effects).
pub fn verify_container_file(path: &Path, full: bool) -> GccResult<()> {
    if !path.is_file() {
        return Err(GccError::CorruptPayload(format!("file non trovato: {}", path.display())));
    }
    let blob = std::fs::read(path).map_err(|e| GccError::io(e, path))?;
    container::unpack_container_v6(&blob)?;

    if full {
        let shared = SharedResources::default();
        container::decompress_v6(&blob, false, &shared)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirpipeline::spec::DirPipelineSpec;
    use crate::dirpipeline::{pack_dir, unpack_dir};

    #[test]
    fn verify_single_container_file_round_trip() {
        let data = b"hello hello hello hello\n".repeat(20);
        let shared = SharedResources::default();
        let blob = crate::container::compress_v6(&data, "bytes", &crate::bundle::dispatch::StreamCodec::Huffman, &shared).unwrap();
        let path = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(path.path(), &blob).unwrap();

        verify_container_file(path.path(), false).unwrap();
        verify_container_file(path.path(), true).unwrap();
    }

    #[test]
    fn verify_container_file_rejects_corrupt_magic() {
        let path = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(path.path(), b"nope").unwrap();
        let err = verify_container_file(path.path(), false).unwrap_err();
        assert!(matches!(err, GccError::BadMagic(_) | GccError::CorruptPayload(_)));
    }

    #[test]
    fn verify_packed_dir_accepts_freshly_packed_output() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "hello world\n".repeat(10)).unwrap();
        std::fs::write(src.path().join("b.txt"), "hello world\n".repeat(10)).unwrap();

        let out = tempfile::tempdir().unwrap();
        let spec = DirPipelineSpec { buckets: Some(1), ..Default::default() };
        pack_dir(src.path(), out.path(), &spec, 1).unwrap();

        verify_packed_dir(out.path(), false, DEFAULT_CHUNK_SIZE).unwrap();
        verify_packed_dir(out.path(), true, DEFAULT_CHUNK_SIZE).unwrap();

        let (ok, failed) = unpack_dir(out.path(), tempfile::tempdir().unwrap().path()).unwrap();
        assert_eq!(failed, 0);
        assert!(ok >= 2);
    }

    #[test]
    fn verify_packed_dir_rejects_missing_manifest() {
        let out = tempfile::tempdir().unwrap();
        let err = verify_packed_dir(out.path(), false, DEFAULT_CHUNK_SIZE).unwrap_err();
        assert!(matches!(err, GccError::CorruptPayload(_)));
    }
}
