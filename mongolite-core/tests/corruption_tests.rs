// Data corruption tests: inject damage into the store file and verify that
// the engine never panics, reports meaningful errors, and recovers from the
// secondary meta page when only one is damaged.
use bson::doc;
use mongolite_core::{Database, DatabaseConfig, MongoliteError, StoreError};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;

const PAGE_SIZE: u64 = 4096;

fn small_config() -> DatabaseConfig {
    DatabaseConfig {
        max_bytes: 4 << 20,
        ..DatabaseConfig::default()
    }
}

fn corrupt_bytes_at(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

/// Build a small database and close it, returning the data file path.
fn seeded_db(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("corrupt.mglt");
    let db = Database::open(&path, small_config()).unwrap();
    db.create_collection("users", None).unwrap();
    for i in 0..20 {
        db.insert_one("users", doc! {"i": i}).unwrap();
    }
    db.close().unwrap();
    path
}

#[test]
fn test_one_damaged_meta_page_recovers_from_the_other() {
    let dir = TempDir::new().unwrap();
    let path = seeded_db(&dir);

    // Smash the checksum area of meta page 0.
    corrupt_bytes_at(&path, 0, &[0xFF; 64]);

    let db = Database::open(&path, small_config()).unwrap();
    assert_eq!(db.count("users", None).unwrap(), 20);
}

#[test]
fn test_both_meta_pages_damaged_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = seeded_db(&dir);

    corrupt_bytes_at(&path, 0, &[0xFF; 64]);
    corrupt_bytes_at(&path, PAGE_SIZE, &[0xFF; 64]);

    let result = Database::open(&path, small_config());
    match result {
        Err(MongoliteError::Backend(StoreError::Corrupt(msg))) => {
            assert!(msg.contains("meta"), "error should mention meta: {}", msg);
        }
        Err(other) => panic!("expected a corruption error, got {}", other),
        Ok(_) => panic!("open must fail when both meta pages are damaged"),
    }
}

#[test]
fn test_damaged_data_pages_error_without_panic() {
    let dir = TempDir::new().unwrap();
    let path = seeded_db(&dir);

    // Zero out every data page; only the meta pages survive.
    let len = std::fs::metadata(&path).unwrap().len();
    let zeros = vec![0u8; (len - PAGE_SIZE * 2) as usize];
    corrupt_bytes_at(&path, PAGE_SIZE * 2, &zeros);

    let db = Database::open(&path, small_config()).unwrap();
    let result = db.list_collections();
    assert!(result.is_err(), "reads over smashed pages must error");
    // The error is a store-level corruption report, not a panic.
    match result {
        Err(MongoliteError::Backend(StoreError::Corrupt(_))) => {}
        Err(other) => panic!("expected backend corruption, got {}", other),
        Ok(_) => unreachable!(),
    }
}

#[test]
fn test_flipped_node_bytes_surface_an_error() {
    let dir = TempDir::new().unwrap();
    let path = seeded_db(&dir);

    // Flip bytes across the data area without touching the metas. Any read
    // may fail, but nothing may panic and the error must be typed.
    for page in 2..40u64 {
        corrupt_bytes_at(&path, page * PAGE_SIZE + 100, &[0xAA; 16]);
    }

    let db = Database::open(&path, small_config()).unwrap();
    match db.count("users", None) {
        Ok(_) => {}
        Err(MongoliteError::Backend(_)) | Err(MongoliteError::Schema(_)) => {}
        Err(other) => panic!("unexpected error kind: {}", other),
    }
    match db.find_one("users", &doc! {"i": 3}, None) {
        Ok(_) => {}
        Err(MongoliteError::Backend(_)) | Err(MongoliteError::Schema(_)) => {}
        Err(other) => panic!("unexpected error kind: {}", other),
    }
}

#[test]
fn test_committed_state_survives_unsynced_tail_garbage() {
    let dir = TempDir::new().unwrap();
    let path = seeded_db(&dir);

    // Garbage written past the committed area (as a torn post-crash write
    // would leave) must not affect recovery.
    let len = std::fs::metadata(&path).unwrap().len();
    corrupt_bytes_at(&path, len - PAGE_SIZE * 4, &[0x5A; (PAGE_SIZE * 4) as usize]);

    let db = Database::open(&path, small_config()).unwrap();
    assert_eq!(db.count("users", None).unwrap(), 20);
    assert!(db
        .find_one("users", &doc! {"i": 19}, None)
        .unwrap()
        .is_some());
}
