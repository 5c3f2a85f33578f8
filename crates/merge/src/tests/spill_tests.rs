use super::{file_input, memory_input};
use crate::comparison::Comparison;
use crate::input::OpenContext;
use crate::spill::{cleanup_stale_spills, run_pass, PassContext};
use crate::{spill_path, CompressionKind, Input, MergeError, StreamCompression};
use record::{RecordError, RecordReader};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn open_ctx() -> OpenContext {
    OpenContext {
        compression: Arc::new(StreamCompression),
        read_buffer: 4096,
        verify_checksums: true,
    }
}

fn read_back(input: Input<u64>) -> Result<Vec<u64>, MergeError> {
    let mut src = input.open(&open_ctx())?;
    let mut out = Vec::new();
    while let Some(v) = src.next_new()? {
        out.push(v);
    }
    Ok(out)
}

#[test]
fn spill_path_is_unique_per_attempt_partition_and_pass() {
    let p = spill_path(Path::new("/tmp/spill"), "stage1_task4_attempt0", 3, 12);
    assert_eq!(
        p,
        Path::new("/tmp/spill/stage1_task4_attempt0_partition3_pass12.mergeoutput.tmp")
    );
    assert_ne!(p, spill_path(Path::new("/tmp/spill"), "stage1_task4_attempt1", 3, 12));
}

#[test]
fn pass_merges_inputs_into_one_sorted_file() {
    let dir = tempdir().unwrap();
    let open = open_ctx();
    let comparison = Comparison::<u64>::select(None, true);
    let ctx = PassContext {
        comparison: &comparison,
        open: &open,
        compression_kind: CompressionKind::None,
        write_buffer: 1024,
    };
    let inputs = vec![
        file_input(dir.path(), "a", &[1u64, 4, 9]),
        file_input(dir.path(), "b", &[2u64, 3]),
        memory_input("c", &[0u64, 10]),
    ];
    let path = spill_path(dir.path(), "t", 0, 0);
    let out = run_pass(&ctx, path.clone(), inputs).unwrap();

    assert_eq!(out.records, 7);
    assert_eq!(out.weight, 3);
    assert_eq!(out.uncompressed_len, 56);
    assert_eq!(out.stored_len, 56);
    assert_eq!(out.crc32, crc32fast::hash(&fs::read(&path).unwrap()));

    let desc = out.into_descriptor(true);
    assert_eq!(desc.source_name, "t_partition0_pass0.mergeoutput.tmp");
    let values = read_back(Input::Deferred(desc)).unwrap();
    assert_eq!(values, vec![0, 1, 2, 3, 4, 9, 10]);
    assert!(!path.exists(), "exhausted pass output should be deleted");
}

#[test]
fn lz4_pass_output_round_trips() {
    let dir = tempdir().unwrap();
    let open = open_ctx();
    let comparison = Comparison::<u64>::select(None, true);
    let ctx = PassContext {
        comparison: &comparison,
        open: &open,
        compression_kind: CompressionKind::Lz4,
        write_buffer: 1024,
    };
    let evens: Vec<u64> = (0..2000).map(|i| i * 2).collect();
    let odds: Vec<u64> = (0..2000).map(|i| i * 2 + 1).collect();
    let inputs = vec![
        file_input(dir.path(), "evens", &evens),
        file_input(dir.path(), "odds", &odds),
    ];
    let out = run_pass(&ctx, spill_path(dir.path(), "t", 0, 0), inputs).unwrap();
    assert_eq!(out.uncompressed_len, 4000 * 8);
    assert!(out.stored_len < out.uncompressed_len);

    let values = read_back(Input::Deferred(out.into_descriptor(false))).unwrap();
    assert_eq!(values, (0..4000).collect::<Vec<u64>>());
}

#[test]
fn corrupted_pass_output_fails_checksum() {
    let dir = tempdir().unwrap();
    let open = open_ctx();
    let comparison = Comparison::<u64>::select(None, true);
    let ctx = PassContext {
        comparison: &comparison,
        open: &open,
        compression_kind: CompressionKind::None,
        write_buffer: 1024,
    };
    let inputs = vec![
        memory_input("a", &[1u64, 3]),
        memory_input("b", &[2u64, 4]),
    ];
    let path = spill_path(dir.path(), "t", 0, 0);
    let out = run_pass(&ctx, path.clone(), inputs).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[0] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    let err = read_back(Input::Deferred(out.into_descriptor(false))).unwrap_err();
    assert!(matches!(
        err,
        MergeError::Record(RecordError::ChecksumMismatch { .. })
    ));
}

#[test]
fn failed_pass_removes_partial_output() {
    let dir = tempdir().unwrap();
    let open = open_ctx();
    let comparison = Comparison::<u64>::select(None, true);
    let ctx = PassContext {
        comparison: &comparison,
        open: &open,
        compression_kind: CompressionKind::None,
        write_buffer: 1024,
    };
    let missing = Input::Deferred(crate::InputDescriptor::new(
        dir.path().join("missing"),
        "missing",
        16,
    ));
    let path = spill_path(dir.path(), "t", 0, 0);
    let err = run_pass(&ctx, path.clone(), vec![memory_input("a", &[1u64]), missing]).unwrap_err();
    assert!(matches!(err, MergeError::Io(_)));
    assert!(!path.exists());
}

#[test]
fn truncated_input_fails_the_pass() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short");
    fs::write(&path, [1u8, 0, 0]).unwrap();
    let input = Input::<u64>::Deferred(crate::InputDescriptor::new(&path, "short", 3));
    assert!(matches!(
        read_back(input),
        Err(MergeError::Record(RecordError::Truncated))
    ));
}

#[test]
fn discarding_a_deferred_input_honours_delete_flag() {
    let dir = tempdir().unwrap();
    let keep = file_input::<u64>(dir.path(), "keep", &[1]);
    let drop_me = match file_input::<u64>(dir.path(), "drop", &[1]) {
        Input::Deferred(desc) => Input::Deferred(desc.delete_after_read(true)),
        other => other,
    };
    keep.discard();
    drop_me.discard();
    assert!(dir.path().join("keep").exists());
    assert!(!dir.path().join("drop").exists());
}

#[test]
fn stale_spills_of_same_attempt_are_removed() {
    let dir = tempdir().unwrap();
    File::create(spill_path(dir.path(), "job_a", 0, 3)).unwrap();
    File::create(spill_path(dir.path(), "job_a", 5, 0)).unwrap();
    File::create(spill_path(dir.path(), "job_b", 0, 0)).unwrap();
    File::create(dir.path().join("job_a_notes.txt")).unwrap();

    assert_eq!(cleanup_stale_spills(dir.path(), "job_a"), 2);
    assert_eq!(
        super::spill_files(dir.path()),
        vec!["job_b_partition0_pass0.mergeoutput.tmp".to_string()]
    );
    assert!(dir.path().join("job_a_notes.txt").exists());
}

#[test]
fn reader_input_passes_through_open() {
    let mut bytes = Vec::new();
    for v in [5u64, 6] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    let src = record::StreamSource::new("stream", RecordReader::<u64, _>::new(std::io::Cursor::new(bytes)));
    let input = Input::reader(src);
    assert_eq!(input.name(), "stream");
    assert!(input.supports_raw());
    assert_eq!(read_back(input).unwrap(), vec![5, 6]);
}
