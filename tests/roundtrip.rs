use std::collections::BTreeMap;

use binpickle::format::{host_page_size, FileTrailer, HEADER_SIZE, TRAILER_SIZE};
use binpickle::{hash_bytes, BinPickleReader, BinPickleWriter, CodecSpec};
use ciborium::Value;
use proptest::prelude::*;
use tempfile::TempDir;

fn write_file(path: &std::path::Path, buffers: &[(&[u8], Vec<CodecSpec>, bool)]) -> u64 {
    let mut writer = BinPickleWriter::create(path).expect("create");
    for (data, codecs, align) in buffers {
        writer
            .write_buffer(data, codecs, None, *align)
            .expect("write");
    }
    let total = writer.finalize().expect("finalize");
    writer.close().expect("close");
    total
}

#[test]
fn single_empty_buffer() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("empty.bpk");
    let total = write_file(&path, &[(b"", vec![], false)]);

    let reader = BinPickleReader::open(&path, false).expect("open");
    assert_eq!(reader.len(), 1);
    let entry = &reader.entries()[0];
    assert_eq!(entry.enc_length, 0);
    assert_eq!(entry.dec_length, 0);

    // header + empty payload + index + trailer, nothing else
    let index_length = total - (HEADER_SIZE + TRAILER_SIZE) as u64;
    assert!(index_length > 0);
    assert_eq!(std::fs::metadata(&path).expect("stat").len(), total);

    let view = reader.get_buffer(0).expect("get");
    assert!(view.is_empty());
}

#[test]
fn two_raw_buffers() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("two.bpk");
    write_file(&path, &[(b"hello", vec![], false), (b"world", vec![], false)]);

    let reader = BinPickleReader::open(&path, false).expect("open");
    assert_eq!(reader.get_buffer(0).expect("get").as_slice(), b"hello");
    assert_eq!(reader.get_buffer(1).expect("get").as_slice(), b"world");
    assert_eq!(reader.entries()[0].offset, HEADER_SIZE as u64);
    assert_eq!(reader.entries()[1].offset, HEADER_SIZE as u64 + 5);
}

#[test]
fn compressed_zeros_round_trip() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("zeros.bpk");
    let data = vec![0u8; 10_000];
    write_file(&path, &[(&data, vec![CodecSpec::new("gz")], false)]);

    let reader = BinPickleReader::open(&path, false).expect("open");
    let entry = &reader.entries()[0];
    assert!(entry.enc_length < 10_000);
    assert_eq!(entry.dec_length, 10_000);
    assert_eq!(reader.get_buffer(0).expect("get").as_slice(), &data[..]);
}

#[test]
fn aligned_buffer_lands_on_page_boundary() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("aligned.bpk");
    let data = vec![3u8; 4096];
    write_file(&path, &[(&data, vec![], true)]);

    let reader = BinPickleReader::open(&path, false).expect("open");
    let entry = &reader.entries()[0];
    // the header occupies the first 16 bytes, so padding pushes the buffer
    // to the next page
    assert_eq!(entry.offset, host_page_size());
    assert_eq!(entry.offset % host_page_size(), 0);
    assert_eq!(reader.get_buffer(0).expect("get").as_slice(), &data[..]);
}

#[test]
fn identical_inputs_produce_identical_files() {
    let tmp = TempDir::new().expect("tempdir");
    let first = tmp.path().join("first.bpk");
    let second = tmp.path().join("second.bpk");

    let mut info = BTreeMap::new();
    info.insert("kind".to_string(), Value::from("ndarray"));
    info.insert(
        "shape".to_string(),
        Value::Array(vec![Value::from(64), Value::from(16)]),
    );

    for path in [&first, &second] {
        let mut writer = BinPickleWriter::create(path).expect("create");
        writer
            .write_buffer(&[5u8; 1024], &[], Some(info.clone()), true)
            .expect("write");
        writer
            .write_buffer(&[6u8; 2048], &[CodecSpec::new("zstd")], None, false)
            .expect("write");
        writer.finalize().expect("finalize");
    }

    let first_bytes = std::fs::read(&first).expect("read");
    let second_bytes = std::fs::read(&second).expect("read");
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn stored_digests_match_file_contents() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("digests.bpk");
    write_file(
        &path,
        &[
            (&[1u8; 300], vec![], true),
            (&[2u8; 5000], vec![CodecSpec::new("gz")], false),
            (b"tail", vec![], false),
        ],
    );

    let raw = std::fs::read(&path).expect("read file");
    let reader = BinPickleReader::open(&path, false).expect("open");
    for entry in reader.entries() {
        let span = &raw[entry.offset as usize..(entry.offset + entry.enc_length) as usize];
        assert_eq!(hash_bytes(span), entry.hash);
    }

    let trailer = FileTrailer::decode(&raw[raw.len() - TRAILER_SIZE..]).expect("trailer");
    let blob = &raw
        [trailer.index_offset as usize..(trailer.index_offset + trailer.index_length as u64) as usize];
    assert_eq!(hash_bytes(blob), trailer.index_hash);
}

#[test]
fn info_maps_round_trip_verbatim() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("info.bpk");

    let mut info = BTreeMap::new();
    info.insert("dtype".to_string(), Value::from("f8"));
    info.insert(
        "shape".to_string(),
        Value::Array(vec![Value::from(10), Value::from(10)]),
    );

    let mut writer = BinPickleWriter::create(&path).expect("create");
    writer
        .write_buffer(&[0u8; 800], &[], Some(info.clone()), false)
        .expect("write");
    writer.finalize().expect("finalize");

    let reader = BinPickleReader::open(&path, false).expect("open");
    assert_eq!(reader.entries()[0].info.as_ref(), Some(&info));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn arbitrary_buffers_round_trip(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..2000), 1..8),
        codec_choice in prop::collection::vec(0u8..3, 8),
        align in any::<bool>(),
    ) {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("prop.bpk");

        let mut writer = BinPickleWriter::create(&path).expect("create");
        for (i, payload) in payloads.iter().enumerate() {
            let codecs = match codec_choice[i] {
                0 => vec![],
                1 => vec![CodecSpec::new("gz")],
                _ => vec![CodecSpec::new("zstd")],
            };
            writer.write_buffer(payload, &codecs, None, align).expect("write");
        }
        writer.finalize().expect("finalize");

        let reader = BinPickleReader::open(&path, false).expect("open");
        prop_assert_eq!(reader.len(), payloads.len());
        for (i, payload) in payloads.iter().enumerate() {
            let view = reader.get_buffer(i).expect("get");
            prop_assert_eq!(view.as_slice(), &payload[..]);
        }

        // spans are disjoint and monotonic
        let mut cursor = HEADER_SIZE as u64;
        for entry in reader.entries() {
            prop_assert!(entry.offset >= cursor);
            cursor = entry.offset + entry.enc_length;
        }
    }
}
