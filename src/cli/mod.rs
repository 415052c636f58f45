//! Command-line surface: `gcc-ocf file ...` / `gcc-ocf dir ...`.
//!
//! Mirrors the reference tool's UX policy: the default CLI is semantic
//! (layer/codec/options, no legacy c6/c7/d7 names), `verify` supports
//! `--json` for machine-readable output, and directory packing supports the
//! classic manifest+GCA1 mode as well as the two single-container modes.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use crate::dirpipeline::spec::{load_dir_pipeline_spec, DirPipelineSpec};
use crate::error::GccError;
use crate::extract_numbers;
use crate::fileops;
use crate::pipeline_spec::load_pipeline_spec;
use crate::single_container;
use crate::verify;

const VERIFY_SCHEMA: &str = "gcc-ocf.verify.v1";

#[derive(Parser, Debug)]
#[command(name = "gcc-ocf", author, version, about = "GCC Onion Compressor Framework (GCC-OCF)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: TopCommand,

    /// Show full error detail on failure instead of a one-line message.
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum TopCommand {
    /// File operations (lossless compress/decompress/verify + lossy extract).
    File {
        #[command(subcommand)]
        command: FileCommand,
    },
    /// Directory workflow (pack/unpack, GCA1 buckets, single-container modes).
    Dir {
        #[command(subcommand)]
        command: DirCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum FileCommand {
    /// Lossless compress (semantic).
    Compress {
        input: PathBuf,
        output: PathBuf,
        /// Pipeline spec JSON (@file.json or inline). Overrides --layer/--codec/--stream-codecs/--mbn.
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long, default_value = "bytes")]
        layer: String,
        #[arg(long, default_value = "zlib")]
        codec: String,
        /// Per-stream codec map, e.g. "TEXT:zlib,NUMS:num_v1". Implies MBN.
        #[arg(long = "stream-codecs")]
        stream_codecs: Option<String>,
        /// Force a v6+MBN payload even for single-stream layers.
        #[arg(long)]
        mbn: bool,
    },
    /// Validate a file pipeline spec (v1).
    #[command(name = "pipeline-validate")]
    PipelineValidate { pipeline: String },
    /// Verify a compressed container file.
    Verify {
        input: PathBuf,
        #[arg(long)]
        full: bool,
        #[arg(long)]
        json: bool,
    },
    /// Lossless decompress (universal: container v6 + MBN).
    Decompress { input: PathBuf, output: PathBuf },
    /// LOSSY extract (semantic).
    Extract {
        #[arg(value_enum)]
        kind: ExtractKind,
        input: PathBuf,
        output: PathBuf,
    },
    /// Show an EXTRACT container.
    #[command(name = "extract-show")]
    ExtractShow { input: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
#[value(rename_all = "snake_case")]
pub enum ExtractKind {
    NumbersOnly,
}

#[derive(Subcommand, Debug)]
pub enum DirCommand {
    /// Validate a directory pipeline spec (v1).
    #[command(name = "pipeline-validate")]
    PipelineValidate { pipeline: String },
    /// Pack a directory (manifest + per-bucket .gca, or a single-container mode).
    Pack {
        input_dir: PathBuf,
        output_dir: PathBuf,
        /// Directory pipeline spec JSON (@file.json or inline).
        #[arg(long)]
        pipeline: Option<String>,
        /// Override bucket count (default: spec.buckets or 16).
        #[arg(long)]
        buckets: Option<u32>,
        /// Parallel jobs for compression.
        #[arg(long, default_value_t = 1)]
        jobs: usize,
        /// Pack as ONE container (bundle.gcc): concat + split_text_nums + MBN. Rejects non-UTF-8 input.
        #[arg(long, conflicts_with = "single_container_mixed")]
        single_container: bool,
        /// Pack as TWO bundles: TEXT (split_text_nums+MBN) and BIN (bytes+zstd).
        #[arg(long = "single-container-mixed", conflicts_with = "single_container")]
        single_container_mixed: bool,
        /// Keep the intermediate bundle*.concat file(s).
        #[arg(long)]
        keep_concat: bool,
    },
    /// Unpack a directory previously packed by `dir pack`.
    Unpack { input_dir: PathBuf, restore_dir: PathBuf },
    /// Verify a packed directory output (classic, single-container, or mixed).
    Verify {
        input_dir: PathBuf,
        #[arg(long)]
        full: bool,
        #[arg(long)]
        json: bool,
    },
}

fn print_verify_json_ok(kind: &str, target: &Path, full: bool) {
    let obj = json!({
        "schema": VERIFY_SCHEMA,
        "ok": true,
        "kind": kind,
        "target": target.display().to_string(),
        "full": full,
        "version": env!("CARGO_PKG_VERSION"),
    });
    println!("{}", serde_json::to_string(&obj).expect("verify json is always serializable"));
}

fn print_verify_json_err(kind: &str, target: &Path, full: bool, err_type: &str, message: &str) {
    // serde_json's default (non-`preserve_order`) `Map` is a `BTreeMap`, so
    // this already serializes with sorted keys, matching the reference
    // tool's `sort_keys=True` on its error payload.
    let obj = json!({
        "schema": VERIFY_SCHEMA,
        "ok": false,
        "kind": kind,
        "target": target.display().to_string(),
        "full": full,
        "version": env!("CARGO_PKG_VERSION"),
        "error": { "type": err_type, "message": message },
    });
    eprintln!("{}", serde_json::to_string(&obj).expect("verify json is always serializable"));
}

/// Error-type tag used in `--json` verify error output, matching the
/// reference tool's `type(e).__name__` convention for our own taxonomy.
fn err_type_tag(err: &GccError) -> &'static str {
    match err {
        GccError::Usage(_) => "Usage",
        GccError::CorruptPayload(_) => "CorruptPayload",
        GccError::BadMagic(_) => "BadMagic",
        GccError::UnsupportedVersion(_) => "UnsupportedVersion",
        GccError::MissingResource(_) => "MissingResource",
        GccError::HashMismatch(_) => "HashMismatch",
        GccError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => "FileNotFound",
        GccError::Io { .. } => "Io",
        GccError::Json(_) => "Json",
        GccError::Other(_) => "Other",
    }
}

/// Verify-only dispatch that, when `json` is set, prints the stable
/// `gcc-ocf.verify.v1` schema and returns the reference tool's fixed 2/10
/// exit codes instead of [`GccError::exit_code`]'s full taxonomy. This
/// matches the original `--json` verify path exactly; the non-JSON path
/// below still surfaces the full per-variant exit code.
fn run_verify_json(kind: &str, target: &Path, full: bool, json_out: bool, result: Result<(), GccError>) -> i32 {
    match result {
        Ok(()) => {
            if json_out {
                print_verify_json_ok(kind, target, full);
            } else {
                println!("OK");
            }
            0
        }
        Err(e) => {
            if json_out {
                let exit = if err_type_tag(&e) == "FileNotFound" { 2 } else { 10 };
                print_verify_json_err(kind, target, full, err_type_tag(&e), &e.to_string());
                exit
            } else {
                eprintln!("[gcc-ocf] {e}");
                e.exit_code()
            }
        }
    }
}

fn dispatch_file(cmd: FileCommand) -> i32 {
    match cmd {
        FileCommand::Compress { input, output, pipeline, layer, codec, stream_codecs, mbn } => {
            let result = match pipeline {
                Some(p) => load_pipeline_spec(&p).and_then(|spec| fileops::compress_file_with_pipeline(&input, &output, &spec)),
                None => fileops::compress_file(&input, &output, &layer, &codec, stream_codecs.as_deref(), mbn),
            };
            run_plain(result)
        }
        FileCommand::PipelineValidate { pipeline } => run_plain(load_pipeline_spec(&pipeline).map(|_| ())),
        FileCommand::Verify { input, full, json } => {
            run_verify_json("file", &input, full, json, verify::verify_container_file(&input, full))
        }
        FileCommand::Decompress { input, output } => run_plain(fileops::decompress_file(&input, &output)),
        FileCommand::Extract { kind: ExtractKind::NumbersOnly, input, output } => {
            run_plain(extract_numbers::extract_numbers_only(&input, &output).map(|_| ()))
        }
        FileCommand::ExtractShow { input } => match extract_numbers::extract_show(&input) {
            Ok(v) => {
                println!("{}", serde_json::to_string_pretty(&v).expect("extract-show json is always serializable"));
                0
            }
            Err(e) => {
                eprintln!("[gcc-ocf] {e}");
                e.exit_code()
            }
        },
    }
}

fn load_dir_spec(pipeline: &Option<String>) -> Result<DirPipelineSpec, GccError> {
    match pipeline {
        Some(p) => load_dir_pipeline_spec(p),
        None => Ok(DirPipelineSpec::default()),
    }
}

fn dispatch_dir(cmd: DirCommand) -> i32 {
    match cmd {
        DirCommand::PipelineValidate { pipeline } => run_plain(load_dir_pipeline_spec(&pipeline).map(|_| ())),
        DirCommand::Pack { input_dir, output_dir, pipeline, buckets, jobs, single_container, single_container_mixed, keep_concat } => {
            if single_container_mixed {
                return run_plain(single_container::pack_single_container_mixed_dir(&input_dir, &output_dir, keep_concat));
            }
            if single_container {
                return run_plain(single_container::pack_single_container_dir(&input_dir, &output_dir, keep_concat));
            }
            let result = load_dir_spec(&pipeline).and_then(|mut spec| {
                if let Some(b) = buckets {
                    spec.buckets = Some(b);
                }
                crate::dirpipeline::pack_dir(&input_dir, &output_dir, &spec, jobs).map(|_report| ())
            });
            run_plain(result)
        }
        DirCommand::Unpack { input_dir, restore_dir } => {
            let result = if single_container::is_single_container_mixed_dir(&input_dir) {
                single_container::unpack_single_container_mixed_dir(&input_dir, &restore_dir)
            } else if single_container::is_single_container_dir(&input_dir) {
                single_container::unpack_single_container_dir(&input_dir, &restore_dir)
            } else {
                crate::dirpipeline::unpack_dir(&input_dir, &restore_dir).map(|_| ())
            };
            run_plain(result)
        }
        DirCommand::Verify { input_dir, full, json } => {
            let (kind, result) = if single_container::is_single_container_mixed_dir(&input_dir) {
                ("dir-mixed", single_container::verify_single_container_mixed_dir(&input_dir, full))
            } else if single_container::is_single_container_dir(&input_dir) {
                ("dir-single", single_container::verify_single_container_dir(&input_dir, full))
            } else {
                ("dir", verify::verify_packed_dir(&input_dir, full, 0))
            };
            run_verify_json(kind, &input_dir, full, json, result)
        }
    }
}

fn run_plain(result: Result<(), GccError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("[gcc-ocf] {e}");
            e.exit_code()
        }
    }
}

/// Parse `std::env::args()` and run the selected command, returning the
/// process exit code.
pub fn run() -> i32 {
    let args = Args::parse();
    tracing::debug!(debug = args.debug, "dispatching gcc-ocf command");
    match args.command {
        TopCommand::File { command } => dispatch_file(command),
        TopCommand::Dir { command } => dispatch_dir(command),
    }
}
