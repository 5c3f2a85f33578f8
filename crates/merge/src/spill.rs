//! Intermediate pass outputs.

use record::{Record, RecordSource, RecordWriter};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::comparison::Comparison;
use crate::input::{remove_quietly, OpenContext};
use crate::queue::MergeQueue;
use crate::{CompressionKind, Input, InputDescriptor, Result};

/// File name suffix shared by every spill file.
pub const SPILL_SUFFIX: &str = ".mergeoutput.tmp";

/// `<local_dir>/<task_attempt_id>_partition<N>_pass<P>.mergeoutput.tmp`.
///
/// Unique per task attempt, partition and pass, so concurrent tasks can
/// share one local directory.
pub fn spill_path(local_dir: &Path, task_attempt_id: &str, partition: usize, pass: usize) -> PathBuf {
    local_dir.join(format!(
        "{}_partition{}_pass{}{}",
        task_attempt_id, partition, pass, SPILL_SUFFIX
    ))
}

/// Describes one finished pass output.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutput {
    pub path: PathBuf,
    /// Encoded stream size before compression.
    pub uncompressed_len: u64,
    /// Size of the file on disk.
    pub stored_len: u64,
    pub records: u64,
    /// CRC32 of the uncompressed stream.
    pub crc32: u32,
    /// Number of original inputs merged into this file.
    pub weight: usize,
    pub compression: CompressionKind,
}

impl PassOutput {
    /// Turns the output into a disk input for the next pass.
    pub fn into_descriptor(self, delete_after_read: bool) -> InputDescriptor {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        InputDescriptor {
            path: self.path,
            source_name: name,
            compression: self.compression,
            uncompressed_len: self.uncompressed_len,
            delete_after_read,
            crc32: Some(self.crc32),
            weight: self.weight,
        }
    }
}

/// Everything a pass needs besides its inputs.
pub(crate) struct PassContext<'a, T> {
    pub comparison: &'a Comparison<T>,
    pub open: &'a OpenContext,
    pub compression_kind: CompressionKind,
    pub write_buffer: usize,
}

/// Merges `inputs` smallest-first into the spill file at `path`.
///
/// A failed pass removes its partial output. Inputs already handed to the
/// pass are consumed either way.
pub(crate) fn run_pass<T: Record>(
    ctx: &PassContext<'_, T>,
    path: PathBuf,
    inputs: Vec<Input<T>>,
) -> Result<PassOutput> {
    match write_pass(ctx, &path, inputs) {
        Ok(out) => Ok(out),
        Err(e) => {
            remove_quietly(&path);
            Err(e)
        }
    }
}

fn write_pass<T: Record>(
    ctx: &PassContext<'_, T>,
    path: &Path,
    inputs: Vec<Input<T>>,
) -> Result<PassOutput> {
    let weight = inputs.iter().map(|i| i.weight()).sum();
    let sources = open_all(inputs, ctx.open)?;
    let mut queue = MergeQueue::new(ctx.comparison.clone(), sources)?;

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let sink = ctx
        .open
        .compression
        .compressor(ctx.compression_kind, Box::new(file))?;
    let mut writer = RecordWriter::<T, _>::with_capacity(ctx.write_buffer, sink);
    queue.drain_into(&mut writer)?;
    let (sink, summary) = writer.finish()?;
    sink.finish()?;

    let stored_len = fs::metadata(path)?.len();
    Ok(PassOutput {
        path: path.to_path_buf(),
        uncompressed_len: summary.bytes,
        stored_len,
        records: summary.records,
        crc32: summary.crc32,
        weight,
        compression: ctx.compression_kind,
    })
}

/// Opens every input with its weight. On failure the inputs not yet opened
/// are discarded so their resources are released.
pub(crate) fn open_all<T: Record>(
    inputs: Vec<Input<T>>,
    ctx: &OpenContext,
) -> Result<Vec<(Box<dyn RecordSource<T>>, usize)>> {
    let mut sources = Vec::with_capacity(inputs.len());
    let mut rest = inputs.into_iter();
    while let Some(input) = rest.next() {
        let weight = input.weight();
        match input.open(ctx) {
            Ok(src) => sources.push((src, weight)),
            Err(e) => {
                rest.for_each(Input::discard);
                return Err(e);
            }
        }
    }
    Ok(sources)
}

/// Removes spill files left in `local_dir` by an earlier run of the same
/// task attempt. Returns how many were removed.
pub(crate) fn cleanup_stale_spills(local_dir: &Path, task_attempt_id: &str) -> usize {
    let prefix = format!("{}_partition", task_attempt_id);
    let entries = match fs::read_dir(local_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("cannot scan {} for stale spills: {}", local_dir.display(), e);
            return 0;
        }
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(SPILL_SUFFIX) && name.contains("_pass") {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    log::warn!("removed stale spill file {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => log::warn!("failed to remove stale spill {}: {}", entry.path().display(), e),
            }
        }
    }
    removed
}
