//! Aggregated mini-report for classic `dir pack` (manifest.jsonl + bucket_*.gca).
//!
//! Determinism note: this report is part of the classic output directory,
//! so it must serialize identically across runs given the same input
//! content. We deliberately omit timestamps and absolute paths.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

fn norm_ext(rel: &str) -> String {
    Path::new(rel).extension().map(|e| format!(".{}", e.to_string_lossy().to_lowercase())).unwrap_or_else(|| "(none)".into())
}

fn plan_key(layer_id: &str, codec_text: &str, stream_codecs: &BTreeMap<String, String>, note: &str) -> String {
    let mut key = format!("{layer_id}+{codec_text}");
    if !stream_codecs.is_empty() {
        let parts: Vec<String> = stream_codecs.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        key.push_str(";streams=");
        key.push_str(&parts.join(","));
    }
    if !note.is_empty() {
        key.push_str(&format!(";note={note}"));
    }
    key
}

fn bytes_h(n: i64) -> String {
    if n < 0 {
        return n.to_string();
    }
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut f = n as f64;
    let mut u = 0usize;
    while f >= 1024.0 && u < UNITS.len() - 1 {
        f /= 1024.0;
        u += 1;
    }
    if u == 0 {
        format!("{} {}", f as i64, UNITS[u])
    } else {
        format!("{:.2} {}", f, UNITS[u])
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileRow {
    pub rel: String,
    pub bucket: u32,
    pub in_size: u64,
    pub out_size: u64,
    pub layer_id: String,
    pub codec_text: String,
    pub stream_codecs: BTreeMap<String, String>,
    pub note: String,
}

#[derive(Debug, Clone, Default)]
pub struct BucketSummaryRow {
    pub bucket_type: String,
    pub chosen: Option<Value>,
}

#[derive(Serialize, Debug, Clone)]
struct TopRow {
    key: String,
    files: u64,
    #[serde(rename = "in")]
    in_bytes: i64,
    out: i64,
    saved: i64,
    ratio: f64,
}

#[derive(Serialize, Debug, Clone)]
struct BucketDetail {
    bucket: u32,
    bucket_type: String,
    files: u64,
    #[serde(rename = "in")]
    in_bytes: i64,
    out: i64,
    saved: i64,
    ratio: f64,
    chosen: Option<Value>,
}

#[derive(Serialize, Debug, Clone)]
pub struct DirPackReport {
    pub schema: String,
    pub mode: String,
    pub buckets: u32,
    pub files_ok: u64,
    pub files_fail: u64,
    pub total_in: i64,
    pub total_out: i64,
    pub ratio: f64,
    pub top_buckets: Vec<BucketDetail>,
    pub top_extensions: Vec<TopRow>,
    pub top_plans: Vec<TopRow>,
    pub buckets_detail: BTreeMap<String, BucketDetail>,
    pub errors: Vec<Value>,
}

struct Agg {
    files: u64,
    in_bytes: i64,
    out_bytes: i64,
}

fn top_rows(stats: &BTreeMap<String, Agg>, k: usize) -> Vec<TopRow> {
    let mut rows: Vec<TopRow> = stats
        .iter()
        .map(|(key, v)| {
            let saved = v.in_bytes - v.out_bytes;
            let ratio = if v.in_bytes != 0 { v.out_bytes as f64 / v.in_bytes as f64 } else { 0.0 };
            TopRow { key: key.clone(), files: v.files, in_bytes: v.in_bytes, out: v.out_bytes, saved, ratio }
        })
        .collect();
    rows.sort_by(|a, b| (-a.saved, a.out, a.key.clone()).cmp(&(-b.saved, b.out, b.key.clone())));
    rows.truncate(k);
    rows
}

pub fn build_dir_pack_report(
    buckets: u32,
    files_ok: u64,
    files_fail: u64,
    file_rows: &[FileRow],
    bucket_summaries: &BTreeMap<u32, BucketSummaryRow>,
    error_rows: Vec<Value>,
) -> DirPackReport {
    let mut ext_stats: BTreeMap<String, Agg> = BTreeMap::new();
    let mut plan_stats: BTreeMap<String, Agg> = BTreeMap::new();
    let mut bucket_stats: BTreeMap<u32, Agg> = BTreeMap::new();

    let mut total_in = 0i64;
    let mut total_out = 0i64;

    for r in file_rows {
        if r.rel.is_empty() {
            continue;
        }
        let in_sz = r.in_size as i64;
        let out_sz = r.out_size as i64;
        total_in += in_sz;
        total_out += out_sz;

        let ext = norm_ext(&r.rel);
        let es = ext_stats.entry(ext).or_insert(Agg { files: 0, in_bytes: 0, out_bytes: 0 });
        es.files += 1;
        es.in_bytes += in_sz;
        es.out_bytes += out_sz;

        let pk = plan_key(&r.layer_id, &r.codec_text, &r.stream_codecs, &r.note);
        let ps = plan_stats.entry(pk).or_insert(Agg { files: 0, in_bytes: 0, out_bytes: 0 });
        ps.files += 1;
        ps.in_bytes += in_sz;
        ps.out_bytes += out_sz;

        let bs = bucket_stats.entry(r.bucket).or_insert(Agg { files: 0, in_bytes: 0, out_bytes: 0 });
        bs.files += 1;
        bs.in_bytes += in_sz;
        bs.out_bytes += out_sz;
    }

    let top_extensions = top_rows(&ext_stats, 10);
    let top_plans = top_rows(&plan_stats, 10);

    let mut all_bucket_ids: std::collections::BTreeSet<u32> = bucket_stats.keys().copied().collect();
    all_bucket_ids.extend(bucket_summaries.keys().copied());

    let mut buckets_detail = BTreeMap::new();
    let mut top_buckets_all: Vec<BucketDetail> = Vec::new();

    for &b in &all_bucket_ids {
        let default_agg = Agg { files: 0, in_bytes: 0, out_bytes: 0 };
        let bs = bucket_stats.get(&b).unwrap_or(&default_agg);
        let summ = bucket_summaries.get(&b);
        let btype = summ.map(|s| s.bucket_type.clone()).unwrap_or_default();
        let chosen = summ.and_then(|s| s.chosen.clone());

        let saved = bs.in_bytes - bs.out_bytes;
        let ratio = if bs.in_bytes != 0 { bs.out_bytes as f64 / bs.in_bytes as f64 } else { 0.0 };

        let detail = BucketDetail {
            bucket: b,
            bucket_type: btype,
            files: bs.files,
            in_bytes: bs.in_bytes,
            out: bs.out_bytes,
            saved,
            ratio,
            chosen,
        };
        buckets_detail.insert(format!("{b:02}"), detail.clone());
        top_buckets_all.push(detail);
    }

    top_buckets_all.sort_by(|a, b| (-a.saved, a.out, a.bucket).cmp(&(-b.saved, b.out, b.bucket)));
    top_buckets_all.truncate(5);

    let overall_ratio = if total_in != 0 { total_out as f64 / total_in as f64 } else { 0.0 };

    DirPackReport {
        schema: "gcc-ocf.dir_pack_report.v1".into(),
        mode: "classic_gca1".into(),
        buckets,
        files_ok,
        files_fail,
        total_in,
        total_out,
        ratio: overall_ratio,
        top_buckets: top_buckets_all,
        top_extensions,
        top_plans,
        buckets_detail,
        errors: error_rows.into_iter().take(200).collect(),
    }
}

pub fn render_dir_pack_report_text(rep: &DirPackReport) -> String {
    let mut out = String::new();
    out.push_str("GCC-OCF dir pack -- mini-report (classic mode)\n");
    out.push_str(&format!("files_ok={} files_fail={} buckets={}\n", rep.files_ok, rep.files_fail, rep.buckets));
    out.push_str(&format!(
        "total_in={} total_out={} ratio={:.3}\n\n",
        bytes_h(rep.total_in),
        bytes_h(rep.total_out),
        rep.ratio
    ));

    out.push_str("Top bucket (per risparmio)\n");
    if rep.top_buckets.is_empty() {
        out.push_str("  (nessun dato)\n\n");
    } else {
        for r in &rep.top_buckets {
            out.push_str(&format!("  bucket[{:02}] {:10} saved={} ratio={:.3}\n", r.bucket, r.bucket_type, bytes_h(r.saved), r.ratio));
        }
        out.push('\n');
    }

    out.push_str("Top estensioni (per risparmio)\n");
    if rep.top_extensions.is_empty() {
        out.push_str("  (nessun dato)\n\n");
    } else {
        for r in rep.top_extensions.iter().take(10) {
            out.push_str(&format!("  {:10} files={:4} saved={} ratio={:.3}\n", r.key, r.files, bytes_h(r.saved), r.ratio));
        }
        out.push('\n');
    }

    out.push_str("Saving per plan (top)\n");
    if rep.top_plans.is_empty() {
        out.push_str("  (nessun dato)\n\n");
    } else {
        for r in rep.top_plans.iter().take(10) {
            out.push_str(&format!("  {}\n    files={} saved={} ratio={:.3}\n", r.key, r.files, bytes_h(r.saved), r.ratio));
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_has_zero_totals() {
        let rep = build_dir_pack_report(4, 0, 0, &[], &BTreeMap::new(), Vec::new());
        assert_eq!(rep.total_in, 0);
        assert_eq!(rep.total_out, 0);
        assert_eq!(rep.ratio, 0.0);
    }

    #[test]
    fn report_aggregates_by_extension_and_plan() {
        let rows = vec![
            FileRow { rel: "a.txt".into(), bucket: 0, in_size: 100, out_size: 40, layer_id: "bytes".into(), codec_text: "zstd".into(), ..Default::default() },
            FileRow { rel: "b.txt".into(), bucket: 0, in_size: 200, out_size: 80, layer_id: "bytes".into(), codec_text: "zstd".into(), ..Default::default() },
        ];
        let rep = build_dir_pack_report(1, 2, 0, &rows, &BTreeMap::new(), Vec::new());
        assert_eq!(rep.total_in, 300);
        assert_eq!(rep.total_out, 120);
        assert_eq!(rep.top_extensions.len(), 1);
        assert_eq!(rep.top_extensions[0].key, ".txt");
        assert_eq!(rep.top_plans.len(), 1);
    }

    #[test]
    fn render_text_is_deterministic() {
        let rep = build_dir_pack_report(2, 1, 0, &[], &BTreeMap::new(), Vec::new());
        let a = render_dir_pack_report_text(&rep);
        let b = render_dir_pack_report_text(&rep);
        assert_eq!(a, b);
    }
}
