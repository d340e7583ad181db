//! Envelope codec properties: round-trip, key stability, tamper detection.

use darkroom_store::{EncryptionKey, Store, StoreError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AlbumList {
    albums: Vec<String>,
}

fn new_store(dir: &std::path::Path) -> Store {
    Store::new(dir, EncryptionKey::from_bytes([42u8; 32])).unwrap()
}

#[test]
fn create_and_read_album_list() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    let albums = AlbumList { albums: vec![] };
    store.save_data_file(None, "album-list", &albums).unwrap();

    assert!(dir.path().join("album-list").is_file());

    let (read, key) = store.read_data_file::<AlbumList>("album-list").unwrap();
    assert_eq!(read, albums);
    assert_ne!(key.as_bytes(), &[0u8; 32]);
}

#[test]
fn roundtrip_nested_name() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    let obj = AlbumList {
        albums: vec!["vacation".into(), "pets".into()],
    };
    store.save_data_file(None, "file-set/7", &obj).unwrap();
    let (read, _) = store.read_data_file::<AlbumList>("file-set/7").unwrap();
    assert_eq!(read, obj);
}

#[test]
fn key_reuse_keeps_envelope_key_stable() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    store
        .save_data_file(None, "album-list", &AlbumList::default())
        .unwrap();
    let (mut obj, k1) = store.read_data_file::<AlbumList>("album-list").unwrap();

    obj.albums.push("new".into());
    store.save_data_file(Some(&k1), "album-list", &obj).unwrap();

    let (read, k2) = store.read_data_file::<AlbumList>("album-list").unwrap();
    assert_eq!(read, obj);
    assert_eq!(k1.as_bytes(), k2.as_bytes(), "rewrite must preserve the object key");
}

#[test]
fn saving_without_key_rotates_it() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    store
        .save_data_file(None, "album-list", &AlbumList::default())
        .unwrap();
    let (_, k1) = store.read_data_file::<AlbumList>("album-list").unwrap();

    store
        .save_data_file(None, "album-list", &AlbumList::default())
        .unwrap();
    let (_, k2) = store.read_data_file::<AlbumList>("album-list").unwrap();

    assert_ne!(k1.as_bytes(), k2.as_bytes(), "a nil key mints a replacement");
}

#[test]
fn missing_envelope_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());
    assert!(matches!(
        store.read_data_file::<AlbumList>("nope"),
        Err(StoreError::NotFound)
    ));
}

#[test]
fn flipping_any_byte_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    let obj = AlbumList {
        albums: vec!["a".into(), "b".into(), "c".into()],
    };
    store.save_data_file(None, "album-list", &obj).unwrap();

    let path = dir.path().join("album-list");
    let original = std::fs::read(&path).unwrap();

    // Header (wrapped key), stream nonce, frame header, and body offsets.
    for offset in [0usize, 35, 71, 72, 80, 91, 95, original.len() - 1] {
        let mut tampered = original.clone();
        tampered[offset] ^= 0x01;
        std::fs::write(&path, &tampered).unwrap();

        let result = store.read_data_file::<AlbumList>("album-list");
        assert!(
            matches!(result, Err(StoreError::Corrupt)),
            "byte {offset} flip should be corrupt, got {result:?}"
        );
    }

    // Undamaged bytes still read back fine.
    std::fs::write(&path, &original).unwrap();
    let (read, _) = store.read_data_file::<AlbumList>("album-list").unwrap();
    assert_eq!(read, obj);
}

#[test]
fn truncated_envelope_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    store
        .save_data_file(None, "album-list", &AlbumList { albums: vec!["x".into()] })
        .unwrap();

    let path = dir.path().join("album-list");
    let full = std::fs::read(&path).unwrap();
    for cut in [10, 71, 72, 85, full.len() - 1] {
        std::fs::write(&path, &full[..cut]).unwrap();
        assert!(
            matches!(
                store.read_data_file::<AlbumList>("album-list"),
                Err(StoreError::Corrupt)
            ),
            "torn tail at {cut} must be corrupt"
        );
    }
}

#[test]
fn type_mismatch_is_decode_error() {
    #[derive(Debug, Serialize, Deserialize)]
    struct Counter {
        n: u64,
    }

    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    store
        .save_data_file(None, "album-list", &AlbumList::default())
        .unwrap();
    assert!(matches!(
        store.read_data_file::<Counter>("album-list"),
        Err(StoreError::Decode(_))
    ));
}

#[test]
fn dump_file_yields_pretty_json() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    let obj = AlbumList {
        albums: vec!["vacation".into()],
    };
    store.save_data_file(None, "album-list", &obj).unwrap();

    let mut out = Vec::new();
    let n = store.dump_file("album-list", &mut out).unwrap();
    assert_eq!(n as usize, out.len());

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("\"albums\""));
    assert!(text.contains("  \"albums\""), "objects are written with 2-space indent");

    let parsed: AlbumList = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, obj);
}

#[test]
fn save_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(dir.path());

    store
        .save_data_file(None, "album-list", &AlbumList::default())
        .unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
        .collect();
    assert!(leftovers.is_empty(), "no temp files after a clean save");
}

#[test]
fn sweep_reclaims_abandoned_temp_files() {
    use darkroom_store::LockConfig;

    let dir = tempfile::tempdir().unwrap();
    let cfg = LockConfig {
        stale_after: std::time::Duration::ZERO,
        ..LockConfig::default()
    };
    let store =
        Store::with_lock_config(dir.path(), EncryptionKey::from_bytes([42u8; 32]), cfg).unwrap();

    store
        .save_data_file(None, "album-list", &AlbumList::default())
        .unwrap();
    // A writer died between temp-write and rename.
    std::fs::write(dir.path().join("album-list.tmp-123456"), b"partial").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));

    let removed = store.sweep_temp_files().unwrap();
    assert_eq!(removed, 1);
    assert!(!dir.path().join("album-list.tmp-123456").exists());

    // The committed envelope was untouched.
    let (read, _) = store.read_data_file::<AlbumList>("album-list").unwrap();
    assert_eq!(read, AlbumList::default());
}
