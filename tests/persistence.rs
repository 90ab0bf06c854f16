//! Reopen behavior: payload and counters surviving a clean shutdown, typed
//! keys round-tripping through the on-disk format, and the format-version
//! gate.

use std::io::{Seek, SeekFrom, Write};

use tangle::{PodCodec, Tangle, TangleError, TangleKey, Utf8Codec};
use tempfile::tempdir;

fn open_strings(dir: &std::path::Path) -> Tangle<String, Utf8Codec> {
    Tangle::builder()
        .directory(dir)
        .name("store")
        .codec(Utf8Codec)
        .open()
        .unwrap()
}

#[test]
fn values_survive_reopen() {
    let dir = tempdir().unwrap();

    {
        let tangle = open_strings(dir.path());
        for i in 0..500 {
            tangle
                .set(format!("key{:04}", i).as_str(), format!("value{:04}", i))
                .wait()
                .unwrap();
        }
    }

    let tangle = open_strings(dir.path());
    assert_eq!(tangle.count(), 500);
    for i in (0..500).step_by(25) {
        assert_eq!(
            tangle.get(format!("key{:04}", i).as_str()).wait().unwrap(),
            format!("value{:04}", i)
        );
    }

    let keys = tangle.keys().wait().unwrap();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn key_kinds_survive_reopen() {
    let dir = tempdir().unwrap();

    {
        let tangle: Tangle<u64, PodCodec<u64>> = Tangle::builder()
            .directory(dir.path())
            .codec(PodCodec::new())
            .open()
            .unwrap();
        tangle.set(TangleKey::from(1u32), 1).wait().unwrap();
        tangle.set(TangleKey::from(-2i64), 2).wait().unwrap();
        tangle.set("text", 3).wait().unwrap();
    }

    let tangle: Tangle<u64, PodCodec<u64>> = Tangle::builder()
        .directory(dir.path())
        .codec(PodCodec::new())
        .open()
        .unwrap();

    let kinds: Vec<tangle::KeyKind> = tangle
        .keys()
        .wait()
        .unwrap()
        .iter()
        .map(|k| k.kind())
        .collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&tangle::KeyKind::U32));
    assert!(kinds.contains(&tangle::KeyKind::I64));
    assert!(kinds.contains(&tangle::KeyKind::Text));
}

#[test]
fn wasted_bytes_are_recomputed_on_reopen() {
    let dir = tempdir().unwrap();

    {
        let tangle = open_strings(dir.path());
        let key = TangleKey::from(1u32);
        tangle.set(key.clone(), "abcd".to_string()).wait().unwrap();
        tangle.set(key, "abcdefgh".to_string()).wait().unwrap();
        assert_eq!(tangle.wasted_data_bytes(), 4);
    }

    let tangle = open_strings(dir.path());
    assert_eq!(tangle.wasted_data_bytes(), 4);
    assert_eq!(
        tangle.get(TangleKey::from(1u32)).wait().unwrap(),
        "abcdefgh"
    );
}

#[test]
fn splits_survive_reopen() {
    let dir = tempdir().unwrap();
    let n = 2000;

    {
        let tangle = open_strings(dir.path());
        for i in (0..n).rev() {
            tangle
                .set(format!("key{:05}", i).as_str(), "x".to_string())
                .wait()
                .unwrap();
        }
        assert!(tangle.node_count() > 1);
    }

    let tangle = open_strings(dir.path());
    assert_eq!(tangle.count(), n);
    assert!(tangle.node_count() > 1);
    for i in (0..n).step_by(97) {
        assert_eq!(
            tangle.get(format!("key{:05}", i).as_str()).wait().unwrap(),
            "x"
        );
    }
}

#[test]
fn unsupported_format_version_refuses_to_open() {
    let dir = tempdir().unwrap();

    {
        let tangle = open_strings(dir.path());
        tangle.set("k", "v".to_string()).wait().unwrap();
    }

    // Stamp a bogus format version into the index stream's header.
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("store.index"))
            .unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&7u32.to_le_bytes()).unwrap();
    }

    let err = Tangle::<String, Utf8Codec>::builder()
        .directory(dir.path())
        .name("store")
        .codec(Utf8Codec)
        .open()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TangleError>(),
        Some(TangleError::FormatMismatch { found: 7, .. })
    ));
}

#[test]
fn clear_survives_reopen() {
    let dir = tempdir().unwrap();

    {
        let tangle = open_strings(dir.path());
        for i in 0..100 {
            tangle
                .set(format!("k{}", i).as_str(), "v".to_string())
                .wait()
                .unwrap();
        }
        tangle.clear().wait().unwrap();
        tangle.set("only", "one".to_string()).wait().unwrap();
    }

    let tangle = open_strings(dir.path());
    assert_eq!(tangle.count(), 1);
    assert_eq!(tangle.get("only").wait().unwrap(), "one");
}
