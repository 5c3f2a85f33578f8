mod planner_tests;
mod spill_tests;

use crate::{Input, InputDescriptor};
use record::{Record, RecordWriter};
use std::fs::File;
use std::path::Path;

/// Writes `records` to `dir/name` and returns a deferred input for it.
pub(crate) fn file_input<T: Record>(dir: &Path, name: &str, records: &[T]) -> Input<T> {
    let path = dir.join(name);
    let mut w = RecordWriter::<T, _>::new(File::create(&path).unwrap());
    for r in records {
        w.write(r).unwrap();
    }
    let (_, summary) = w.finish().unwrap();
    Input::Deferred(InputDescriptor::new(path, name, summary.bytes).with_crc32(summary.crc32))
}

pub(crate) fn memory_input<T: Record>(name: &str, records: &[T]) -> Input<T> {
    Input::Memory(record::MemorySource::from_records(name, records).unwrap())
}

/// Names of the spill files currently in `dir`.
pub(crate) fn spill_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(crate::SPILL_SUFFIX))
        .collect();
    names.sort();
    names
}
