use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn file_compress_decompress_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("hello.txt");
    fs::write(&input, b"HELLO 123\n")?;
    let compressed = dir.path().join("hello.gcc");
    let restored = dir.path().join("hello.out");

    Command::cargo_bin("gcc-ocf")?
        .args(["file", "compress"])
        .arg(&input)
        .arg(&compressed)
        .args(["--layer", "bytes", "--codec", "zlib"])
        .assert()
        .success();

    let bytes = fs::read(&compressed)?;
    assert_eq!(&bytes[0..4], b"GCC\x06");

    Command::cargo_bin("gcc-ocf")?
        .args(["file", "verify"])
        .arg(&compressed)
        .assert()
        .success();

    Command::cargo_bin("gcc-ocf")?
        .args(["file", "decompress"])
        .arg(&compressed)
        .arg(&restored)
        .assert()
        .success();

    assert_eq!(fs::read(&restored)?, fs::read(&input)?);
    Ok(())
}

#[test]
fn file_verify_json_reports_file_not_found() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let missing = dir.path().join("nope.gcc");

    Command::cargo_bin("gcc-ocf")?
        .args(["file", "verify", "--json"])
        .arg(&missing)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("FileNotFound"));
    Ok(())
}

#[test]
fn file_compress_with_pipeline_spec_roundtrips() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("invoice.txt");
    let mut f = fs::File::create(&input)?;
    write!(f, "FATTURA 1001\nRIGA ARTICOLO: vite M3 qty=10 prezzo=1.20\nTOTALE 12.00\n")?;
    let compressed = dir.path().join("invoice.gcc");
    let restored = dir.path().join("invoice.out");

    let pipeline = r#"{"spec":"gcc-ocf.pipeline.v1","name":"s","layer":"split_text_nums","codec":"zlib","mbn":true,"stream_codecs":{"TEXT":"zlib","NUMS":"num_v1"}}"#;

    Command::cargo_bin("gcc-ocf")?
        .args(["file", "compress"])
        .arg(&input)
        .arg(&compressed)
        .args(["--pipeline", pipeline])
        .assert()
        .success();

    Command::cargo_bin("gcc-ocf")?
        .args(["file", "decompress"])
        .arg(&compressed)
        .arg(&restored)
        .assert()
        .success();

    assert_eq!(fs::read(&restored)?, fs::read(&input)?);
    Ok(())
}

#[test]
fn dir_pack_verify_unpack_and_tamper_detection() -> Result<(), Box<dyn std::error::Error>> {
    let source = tempdir()?;
    fs::write(source.path().join("a.txt"), b"HELLO 123\n")?;
    fs::write(source.path().join("b.txt"), b"HELLO 124\n")?;

    let out = tempdir()?;
    let restore = tempdir()?;

    Command::cargo_bin("gcc-ocf")?
        .args(["dir", "pack"])
        .arg(source.path())
        .arg(out.path())
        .args(["--buckets", "4"])
        .assert()
        .success();

    Command::cargo_bin("gcc-ocf")?
        .args(["dir", "verify"])
        .arg(out.path())
        .assert()
        .success();

    Command::cargo_bin("gcc-ocf")?
        .args(["dir", "unpack"])
        .arg(out.path())
        .arg(restore.path())
        .assert()
        .success();

    assert_eq!(fs::read(restore.path().join("a.txt"))?, b"HELLO 123\n");
    assert_eq!(fs::read(restore.path().join("b.txt"))?, b"HELLO 124\n");

    // Tamper with a byte inside the first bucket archive's blob region and
    // confirm full verify flags it as a hash mismatch (exit 13).
    let bucket = fs::read_dir(out.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().map(|e| e == "gca").unwrap_or(false))
        .expect("at least one bucket archive");

    let mut bytes = fs::read(&bucket)?;
    assert!(!bytes.is_empty());
    bytes[0] ^= 0xFF;
    fs::write(&bucket, &bytes)?;

    Command::cargo_bin("gcc-ocf")?
        .args(["dir", "verify", "--full"])
        .arg(out.path())
        .assert()
        .failure()
        .code(13);

    Ok(())
}

#[test]
fn dir_single_container_pack_verify_unpack_roundtrips() -> Result<(), Box<dyn std::error::Error>> {
    let source = tempdir()?;
    fs::write(source.path().join("a.txt"), "line one\nline two 42\n")?;
    fs::write(source.path().join("b.txt"), "another file, number 7\n")?;

    let out = tempdir()?;
    let restore = tempdir()?;

    Command::cargo_bin("gcc-ocf")?
        .args(["dir", "pack"])
        .arg(source.path())
        .arg(out.path())
        .arg("--single-container")
        .assert()
        .success();

    assert!(out.path().join("bundle.gcc").exists());
    assert!(out.path().join("bundle_index.json").exists());

    Command::cargo_bin("gcc-ocf")?
        .args(["dir", "verify", "--full"])
        .arg(out.path())
        .assert()
        .success();

    Command::cargo_bin("gcc-ocf")?
        .args(["dir", "unpack"])
        .arg(out.path())
        .arg(restore.path())
        .assert()
        .success();

    assert_eq!(fs::read(restore.path().join("a.txt"))?, fs::read(source.path().join("a.txt"))?);
    assert_eq!(fs::read(restore.path().join("b.txt"))?, fs::read(source.path().join("b.txt"))?);
    Ok(())
}
