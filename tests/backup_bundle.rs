#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::ZipWriter;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("tuitiond-backup-src");
    let workspace2 = temp_dir("tuitiond-backup-dst");
    let out_dir = temp_dir("tuitiond-backup-out");

    let db_src = workspace.join("tuition.sqlite3");
    let bytes = b"sqlite-test-payload";
    std::fs::write(&db_src, bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.tuition.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/tuition.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    let restored = std::fs::read(workspace2.join("tuition.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_database_entry_fails_checksum() {
    let workspace = temp_dir("tuitiond-tamper-src");
    let restore_to = temp_dir("tuitiond-tamper-dst");
    let out_dir = temp_dir("tuitiond-tamper-out");

    std::fs::write(workspace.join("tuition.sqlite3"), b"honest-bytes").expect("write source db");
    let bundle_path = out_dir.join("workspace.tuition.zip");
    backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");

    // Rebuild the bundle with the original manifest but a swapped
    // database entry.
    let mut manifest = String::new();
    {
        let f = File::open(&bundle_path).expect("open bundle");
        let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
        archive
            .by_name("manifest.json")
            .expect("manifest entry")
            .read_to_string(&mut manifest)
            .expect("read manifest");
    }
    let tampered_path = out_dir.join("tampered.tuition.zip");
    let out = File::create(&tampered_path).expect("create tampered bundle");
    let mut zip = ZipWriter::new(out);
    let opts: FileOptions = FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(manifest.as_bytes()).expect("write manifest");
    zip.start_file("db/tuition.sqlite3", opts).expect("db entry");
    zip.write_all(b"forged-bytes").expect("write forged db");
    zip.finish().expect("finish tampered bundle");

    let err = backup::import_workspace_bundle(&tampered_path, &restore_to)
        .expect_err("tampered bundle must not import");
    assert!(
        err.to_string().contains("checksum mismatch"),
        "unexpected error: {}",
        err
    );
    assert!(!restore_to.join("tuition.sqlite3").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restore_to);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_requires_a_database() {
    let workspace = temp_dir("tuitiond-backup-empty");
    let out_dir = temp_dir("tuitiond-backup-empty-out");

    let err = backup::export_workspace_bundle(&workspace, &out_dir.join("never.zip"))
        .expect_err("export without a database must fail");
    assert!(err.to_string().contains("workspace database not found"));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
