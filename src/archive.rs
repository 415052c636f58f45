//! GCA1: the per-bucket archive wrapper.
//!
//! Not a new compression container — each entry payload is an already
//! self-contained compressed blob (container v6 bytes, possibly MBN).
//!
//! Layout: `blob0 blob1 ... blobN-1 index_zlib TRAILER`.
//!
//! TRAILER (fixed 16 bytes): `magic(4B="GCA1") index_len(u64 LE) index_crc(u32 LE)`.
//! `index_zlib` is zlib-compressed UTF-8 JSONL; the last line is a trailer
//! record (`kind:"trailer"`) carrying the sha256 of the preceding lines.
//!
//! The archive is append-friendly: blobs are written first, index+trailer last.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{GccError, GccResult};

pub const GCA_MAGIC: &[u8; 4] = b"GCA1";
pub const TRAILER_LEN: u64 = 16;
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

fn hex_encode(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect()
}

/// A single index entry: required `rel`/`offset`/`length`, plus whatever
/// extra metadata the caller attached (`blob_sha256`, `blob_crc32`,
/// plan fields, resource markers, ...).
#[derive(Debug, Clone)]
pub struct GcaEntry {
    pub rel: String,
    pub offset: u64,
    pub length: u64,
    pub meta: Map<String, Value>,
}

impl GcaEntry {
    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("rel".into(), Value::String(self.rel.clone()));
        obj.insert("offset".into(), Value::Number(self.offset.into()));
        obj.insert("length".into(), Value::Number(self.length.into()));
        for (k, v) in &self.meta {
            obj.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(obj)
    }
}

/// Sequentially appends blobs to a GCA1 archive, then finalizes it with a
/// zlib-compressed JSONL index and CRC-guarded trailer.
pub struct GcaWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    offset: u64,
    entries: Vec<GcaEntry>,
}

impl GcaWriter {
    pub fn create(path: impl AsRef<Path>) -> GccResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GccError::io(e, parent))?;
        }
        let file = File::create(&path).map_err(|e| GccError::io(e, &path))?;
        Ok(GcaWriter { path, file: Some(BufWriter::new(file)), offset: 0, entries: Vec::new() })
    }

    /// Append a file blob, computing `blob_sha256`/`blob_crc32` if the
    /// caller's meta doesn't already carry them.
    pub fn append(&mut self, rel: &str, blob: &[u8], mut meta: Map<String, Value>) -> GccResult<GcaEntry> {
        let file = self.file.as_mut().ok_or_else(|| GccError::Usage("GcaWriter: append su writer chiuso".into()))?;
        meta.entry("blob_sha256".to_string()).or_insert_with(|| {
            let mut h = Sha256::new();
            h.update(blob);
            Value::String(hex_encode(&h.finalize()))
        });
        meta.entry("blob_crc32".to_string()).or_insert_with(|| Value::Number(crc32(blob).into()));

        let off = self.offset;
        file.write_all(blob).map_err(|e| GccError::io(e, &self.path))?;
        self.offset += blob.len() as u64;

        let entry = GcaEntry { rel: rel.to_string(), offset: off, length: blob.len() as u64, meta };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Append a bucket-level shared resource under the reserved `__res__/` prefix.
    pub fn append_resource(&mut self, name: &str, blob: &[u8], mut meta: Map<String, Value>) -> GccResult<GcaEntry> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GccError::Usage("GcaWriter: resource name vuoto".into()));
        }
        meta.entry("kind".to_string()).or_insert_with(|| Value::String("resource".into()));
        meta.entry("res_name".to_string()).or_insert_with(|| Value::String(name.to_string()));
        self.append(&format!("__res__/{name}"), blob, meta)
    }

    /// Finalize the archive: write the index and trailer, consuming the writer.
    pub fn close(mut self) -> GccResult<()> {
        let mut file = self.file.take().ok_or_else(|| GccError::Usage("GcaWriter: close su writer gia' chiuso".into()))?;

        let mut idx_body = Vec::new();
        for e in &self.entries {
            idx_body.extend_from_slice(serde_json::to_string(&e.to_json())?.as_bytes());
            idx_body.push(b'\n');
        }
        let mut hasher = Sha256::new();
        hasher.update(&idx_body);
        let body_sha = hex_encode(&hasher.finalize());

        let trailer_rec = serde_json::json!({
            "kind": "trailer",
            "schema": "gca.index_trailer.v1",
            "index_body_sha256": body_sha,
            "entries": self.entries.len(),
        });
        let mut idx_raw = idx_body;
        idx_raw.extend_from_slice(serde_json::to_string(&trailer_rec)?.as_bytes());
        idx_raw.push(b'\n');

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(9));
        enc.write_all(&idx_raw).map_err(|e| GccError::io(e, &self.path))?;
        let idx_z = enc.finish().map_err(|e| GccError::io(e, &self.path))?;
        let idx_crc = crc32(&idx_z);

        file.write_all(&idx_z).map_err(|e| GccError::io(e, &self.path))?;
        file.write_all(GCA_MAGIC).map_err(|e| GccError::io(e, &self.path))?;
        file.write_all(&(idx_z.len() as u64).to_le_bytes()).map_err(|e| GccError::io(e, &self.path))?;
        file.write_all(&idx_crc.to_le_bytes()).map_err(|e| GccError::io(e, &self.path))?;
        file.flush().map_err(|e| GccError::io(e, &self.path))?;
        Ok(())
    }
}

/// A bucket-level shared resource loaded from an archive.
pub struct ResourceEntry {
    pub blob: Vec<u8>,
    pub meta: Map<String, Value>,
}

/// Random-access reader over a GCA1 archive. The index is parsed lazily
/// and cached on first access.
pub struct GcaReader {
    path: PathBuf,
    file: File,
    index: Option<Vec<Value>>,
    index_raw: Option<Vec<u8>>,
}

impl GcaReader {
    pub fn open(path: impl AsRef<Path>) -> GccResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| GccError::io(e, &path))?;
        Ok(GcaReader { path, file, index: None, index_raw: None })
    }

    fn load_index(&mut self) -> GccResult<&[Value]> {
        if self.index.is_none() {
            let size = self.file.seek(SeekFrom::End(0)).map_err(|e| GccError::io(e, &self.path))?;
            if size < TRAILER_LEN {
                return Err(GccError::CorruptPayload(format!("GCA archive troppo corto: {}", self.path.display())));
            }
            self.file.seek(SeekFrom::Start(size - TRAILER_LEN)).map_err(|e| GccError::io(e, &self.path))?;
            let mut trailer = [0u8; TRAILER_LEN as usize];
            self.file.read_exact(&mut trailer).map_err(|e| GccError::io(e, &self.path))?;
            if &trailer[0..4] != GCA_MAGIC {
                return Err(GccError::BadMagic(format!("GCA magic non valido: {}", self.path.display())));
            }
            let idx_len = u64::from_le_bytes(trailer[4..12].try_into().unwrap());
            let idx_crc = u32::from_le_bytes(trailer[12..16].try_into().unwrap());
            if idx_len == 0 || idx_len > size - TRAILER_LEN {
                return Err(GccError::CorruptPayload("GCA index_len non valido".into()));
            }
            let idx_off = size - TRAILER_LEN - idx_len;
            self.file.seek(SeekFrom::Start(idx_off)).map_err(|e| GccError::io(e, &self.path))?;
            let mut idx_z = vec![0u8; idx_len as usize];
            self.file.read_exact(&mut idx_z).map_err(|e| GccError::io(e, &self.path))?;
            if crc32(&idx_z) != idx_crc {
                return Err(GccError::HashMismatch("GCA index CRC mismatch".into()));
            }
            let mut dec = ZlibDecoder::new(&idx_z[..]);
            let mut idx_raw = Vec::new();
            dec.read_to_end(&mut idx_raw).map_err(|e| GccError::io(e, &self.path))?;

            let mut entries = Vec::new();
            for line in idx_raw.split(|&b| b == b'\n') {
                if line.is_empty() {
                    continue;
                }
                let v: Value = serde_json::from_slice(line)?;
                entries.push(v);
            }
            self.index_raw = Some(idx_raw);
            self.index = Some(entries);
        }
        Ok(self.index.as_deref().unwrap())
    }

    /// The decompressed JSONL index bytes (entries + trailer record).
    pub fn index_raw(&mut self) -> GccResult<&[u8]> {
        self.load_index()?;
        Ok(self.index_raw.as_deref().unwrap_or(&[]))
    }

    /// The parsed trailer record (last JSONL line), if present.
    pub fn index_trailer(&mut self) -> GccResult<Option<Value>> {
        let idx = self.load_index()?;
        Ok(idx.last().filter(|v| v.get("kind").and_then(Value::as_str) == Some("trailer")).cloned())
    }

    pub fn iter_index(&mut self) -> GccResult<impl Iterator<Item = &Value>> {
        Ok(self.load_index()?.iter())
    }

    /// Load bucket-level shared resources: name -> (blob, meta).
    pub fn load_resources(&mut self) -> GccResult<std::collections::HashMap<String, ResourceEntry>> {
        self.load_index()?;
        let entries = self.index.clone().unwrap_or_default();
        let mut res = std::collections::HashMap::new();
        for e in &entries {
            let Some(obj) = e.as_object() else { continue };
            let rel = obj.get("rel").and_then(Value::as_str).unwrap_or("");
            let kind = obj.get("kind").and_then(Value::as_str).unwrap_or("");
            let mut name = obj.get("res_name").and_then(Value::as_str).unwrap_or("").to_string();
            if name.is_empty() {
                if let Some(stripped) = rel.strip_prefix("__res__/") {
                    name = stripped.to_string();
                }
            }
            if kind != "resource" && !rel.starts_with("__res__/") {
                continue;
            }
            let off = obj.get("offset").and_then(Value::as_u64).unwrap_or(0);
            let ln = obj.get("length").and_then(Value::as_u64).unwrap_or(0);
            if ln == 0 {
                continue;
            }
            let Ok(blob) = self.read_blob(off, ln) else { continue };
            let mut meta = obj.clone();
            meta.remove("offset");
            meta.remove("length");
            res.insert(name, ResourceEntry { blob, meta });
        }
        Ok(res)
    }

    pub fn read_blob(&mut self, offset: u64, length: u64) -> GccResult<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset)).map_err(|e| GccError::io(e, &self.path))?;
        let mut buf = vec![0u8; length as usize];
        self.file.read_exact(&mut buf).map_err(|_| {
            GccError::CorruptPayload(format!("GCA blob troncato: {}", self.path.display()))
        })?;
        Ok(buf)
    }

    /// Streaming sha256 over a blob segment, without loading it all at once.
    pub fn sha256_blob(&mut self, offset: u64, length: u64, chunk_size: usize) -> GccResult<String> {
        Ok(self.sha256_crc32_blob(offset, length, chunk_size)?.0)
    }

    /// Streaming sha256+crc32 over a blob segment in a single pass.
    pub fn sha256_crc32_blob(&mut self, offset: u64, length: u64, chunk_size: usize) -> GccResult<(String, u32)> {
        let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
        self.file.seek(SeekFrom::Start(offset)).map_err(|e| GccError::io(e, &self.path))?;
        let mut hasher = Sha256::new();
        let mut crc = crc32fast::Hasher::new();
        let mut remaining = length as usize;
        let mut buf = vec![0u8; chunk_size];
        while remaining > 0 {
            let n = chunk_size.min(remaining);
            let got = self.file.read(&mut buf[..n]).map_err(|e| GccError::io(e, &self.path))?;
            if got == 0 {
                break;
            }
            hasher.update(&buf[..got]);
            crc.update(&buf[..got]);
            remaining -= got;
        }
        if remaining != 0 {
            return Err(GccError::CorruptPayload(format!("GCA blob troncato: {}", self.path.display())));
        }
        Ok((hex_encode(&hasher.finalize()), crc.finalize()))
    }
}

/// Compute sha256 of an in-memory buffer (hex-encoded), used throughout
/// the verify/manifest paths.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(data);
    hex_encode(&h.finalize())
}

/// Streaming sha256 of a file on disk.
pub fn sha256_file(path: &Path, chunk_size: usize) -> GccResult<String> {
    let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
    let mut f = File::open(path).map_err(|e| GccError::io(e, path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = f.read(&mut buf).map_err(|e| GccError::io(e, path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_single_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket_00.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        let blob = b"hello world".to_vec();
        w.append("a.txt", &blob, Map::new()).unwrap();
        w.close().unwrap();

        let mut r = GcaReader::open(&path).unwrap();
        let idx: Vec<Value> = r.iter_index().unwrap().cloned().collect();
        assert_eq!(idx.len(), 2); // entry + trailer
        let entry = &idx[0];
        let off = entry["offset"].as_u64().unwrap();
        let len = entry["length"].as_u64().unwrap();
        assert_eq!(r.read_blob(off, len).unwrap(), blob);
        let trailer = r.index_trailer().unwrap().unwrap();
        assert_eq!(trailer["kind"], "trailer");
    }

    #[test]
    fn resource_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket_00.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        w.append_resource("num_dict_v1", b"dict-bytes", Map::new()).unwrap();
        w.append("a.txt", b"payload", Map::new()).unwrap();
        w.close().unwrap();

        let mut r = GcaReader::open(&path).unwrap();
        let res = r.load_resources().unwrap();
        assert_eq!(res.get("num_dict_v1").unwrap().blob, b"dict-bytes");
    }

    #[test]
    fn tampering_with_index_is_detected_via_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket_00.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        w.append("a.txt", b"hello", Map::new()).unwrap();
        w.close().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let flip_at = bytes.len() - TRAILER_LEN as usize - 1;
        bytes[flip_at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut r = GcaReader::open(&path).unwrap();
        assert!(matches!(r.load_index(), Err(GccError::HashMismatch(_))));
    }

    #[test]
    fn sha256_crc32_blob_matches_written_entry_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket_00.gca");
        let mut w = GcaWriter::create(&path).unwrap();
        let blob = b"some payload bytes".to_vec();
        let entry = w.append("a.txt", &blob, Map::new()).unwrap();
        w.close().unwrap();

        let expected_sha = entry.meta["blob_sha256"].as_str().unwrap().to_string();
        let expected_crc = entry.meta["blob_crc32"].as_u64().unwrap() as u32;

        let mut r = GcaReader::open(&path).unwrap();
        let (got_sha, got_crc) = r.sha256_crc32_blob(entry.offset, entry.length, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(got_sha, expected_sha);
        assert_eq!(got_crc, expected_crc);
    }
}
