use std::path::{Path, PathBuf};

use binpickle::format::host_page_size;
use binpickle::{BinPickleError, BinPickleReader, BinPickleWriter, CodecSpec};
use tempfile::TempDir;

fn mappable_file(dir: &Path) -> PathBuf {
    let path = dir.join("mappable.bpk");
    let mut writer = BinPickleWriter::create(&path).expect("create");
    writer
        .write_buffer(&[0xABu8; 4096], &[], None, true)
        .expect("write bulk");
    writer
        .write_buffer(b"primary object bytes", &[], None, true)
        .expect("write tail");
    writer.finalize().expect("finalize");
    writer.close().expect("close");
    path
}

#[test]
fn mapped_views_are_zero_copy_and_counted() {
    let tmp = TempDir::new().expect("tempdir");
    let path = mappable_file(tmp.path());

    let reader = BinPickleReader::open(&path, true).expect("open");
    assert!(reader.is_direct());
    assert!(reader.is_mappable());
    assert_eq!(reader.live_views(), 0);

    let bulk = reader.get_buffer(0).expect("get");
    assert!(bulk.is_mapped());
    assert_eq!(bulk.as_slice(), &[0xABu8; 4096][..]);
    assert_eq!(reader.live_views(), 1);

    let tail = reader.get_buffer(1).expect("get");
    assert_eq!(tail.as_slice(), b"primary object bytes");
    assert_eq!(reader.live_views(), 2);

    drop(bulk);
    drop(tail);
    assert_eq!(reader.live_views(), 0);
}

#[test]
fn close_refused_while_views_live() {
    let tmp = TempDir::new().expect("tempdir");
    let path = mappable_file(tmp.path());

    let mut reader = BinPickleReader::open(&path, true).expect("open");
    let view = reader.get_buffer(0).expect("get");

    match reader.close() {
        Err(BinPickleError::BuffersStillLive { live }) => assert_eq!(live, 1),
        other => panic!("expected BuffersStillLive, got {other:?}"),
    }

    // the refused close left the mapping intact
    assert_eq!(view.as_slice()[0], 0xAB);
    assert_eq!(reader.live_views(), 1);

    drop(view);
    reader.close().expect("close after drop");
}

#[test]
fn views_outlive_a_dropped_reader() {
    let tmp = TempDir::new().expect("tempdir");
    let path = mappable_file(tmp.path());

    let reader = BinPickleReader::open(&path, true).expect("open");
    let view = reader.get_buffer(0).expect("get");
    drop(reader);

    // the view holds the mapping alive on its own
    assert_eq!(view.len(), 4096);
    assert!(view.as_slice().iter().all(|&b| b == 0xAB));
}

#[test]
fn views_may_be_dropped_from_any_thread() {
    let tmp = TempDir::new().expect("tempdir");
    let path = mappable_file(tmp.path());

    let mut reader = BinPickleReader::open(&path, true).expect("open");
    let view = reader.get_buffer(0).expect("get");

    let handle = std::thread::spawn(move || {
        assert_eq!(view.as_slice().len(), 4096);
        drop(view);
    });
    handle.join().expect("join");

    assert_eq!(reader.live_views(), 0);
    reader.close().expect("close");
}

#[test]
fn encoded_buffers_degrade_to_owned_in_mapped_mode() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("mixed.bpk");
    let mut writer = BinPickleWriter::create(&path).expect("create");
    writer
        .write_buffer(&[7u8; 2048], &[], None, true)
        .expect("write raw");
    writer
        .write_buffer(&[9u8; 8192], &[CodecSpec::new("zstd")], None, true)
        .expect("write encoded");
    writer.finalize().expect("finalize");

    let mut reader = BinPickleReader::open(&path, true).expect("open");
    assert!(!reader.is_mappable());

    let raw = reader.get_buffer(0).expect("get raw");
    assert!(raw.is_mapped());

    let decoded = reader.get_buffer(1).expect("get encoded");
    assert!(!decoded.is_mapped());
    assert_eq!(decoded.as_slice(), &[9u8; 8192][..]);

    // only the raw view pins the mapping
    assert_eq!(reader.live_views(), 1);
    drop(raw);
    drop(decoded);
    reader.close().expect("close");
}

#[test]
fn aligned_offsets_are_page_multiples() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("aligned.bpk");
    let page = host_page_size();

    let mut writer = BinPickleWriter::create(&path).expect("create");
    for i in 0..4u8 {
        writer
            .write_buffer(&vec![i; 100 + i as usize], &[], None, true)
            .expect("write");
    }
    writer.finalize().expect("finalize");

    let reader = BinPickleReader::open(&path, true).expect("open");
    for entry in reader.entries() {
        assert_eq!(entry.offset % page, 0);
    }
}

#[test]
fn empty_buffer_in_mapped_mode() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("empty.bpk");
    let mut writer = BinPickleWriter::create(&path).expect("create");
    writer.write_buffer(b"", &[], None, true).expect("write");
    writer.finalize().expect("finalize");

    let mut reader = BinPickleReader::open(&path, true).expect("open");
    let view = reader.get_buffer(0).expect("get");
    assert!(view.is_empty());
    assert!(view.is_mapped());
    drop(view);
    reader.close().expect("close");
}

#[test]
fn eager_close_is_unconditional() {
    let tmp = TempDir::new().expect("tempdir");
    let path = mappable_file(tmp.path());

    let mut reader = BinPickleReader::open(&path, false).expect("open");
    let owned = reader.get_buffer(0).expect("get");
    assert!(!owned.is_mapped());
    reader.close().expect("owned buffers never block close");
    assert_eq!(owned.len(), 4096);
}
