//! REPL state and command handling, independent of stdin/stdout so it can be
//! driven from tests.

use anyhow::{bail, Context, Result};
use config::MergeConfig;
use merge::{Comparison, ExternalMerge, Input, InputDescriptor, MergeStats, RecordStream};
use record::{Line, Record, RecordReader, RecordSource, RecordWriter, StreamSource};
use std::fs::{self, File};
use std::io::{BufRead, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A record type the tool can merge and print.
pub trait Codec: Record + Ord {
    const NAME: &'static str;

    fn render(&self) -> String;
}

impl Codec for u64 {
    const NAME: &'static str = "u64";

    fn render(&self) -> String {
        self.to_string()
    }
}

impl Codec for Line {
    const NAME: &'static str = "line";

    fn render(&self) -> String {
        self.0.clone()
    }
}

/// Result of one `MERGE` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub inputs: usize,
    pub records: u64,
    pub stats: MergeStats,
}

/// Input files queued for the next merge, plus the outcome of the last one.
pub struct Session<T> {
    config: MergeConfig,
    inputs: Vec<PathBuf>,
    merges: usize,
    last: Option<MergeReport>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Codec> Session<T> {
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            inputs: Vec::new(),
            merges: 0,
            last: None,
            _marker: PhantomData,
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Queues a sorted record file. Returns the number of queued inputs.
    pub fn add_input(&mut self, path: &Path) -> Result<usize> {
        let meta = fs::metadata(path).with_context(|| format!("cannot stat {}", path.display()))?;
        if !meta.is_file() {
            bail!("{} is not a file", path.display());
        }
        self.inputs.push(path.to_path_buf());
        Ok(self.inputs.len())
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }

    pub fn queued(&self) -> usize {
        self.inputs.len()
    }

    /// Merges every queued input into `out` and empties the queue.
    pub fn merge_to(&mut self, out: &Path) -> Result<MergeReport> {
        let mut config = self.config.clone();
        // Spill names must not collide between merges of one session.
        config.task_attempt_id = format!("{}_merge{}", self.config.task_attempt_id, self.merges);
        self.merges += 1;

        let inputs = std::mem::take(&mut self.inputs);
        let mut merge = ExternalMerge::<T>::new(config, inputs.len(), Comparison::select(None, true))?;
        for path in &inputs {
            let len = fs::metadata(path)?.len();
            let name = path.display().to_string();
            merge.register_input(Input::Deferred(InputDescriptor::new(path, name, len)))?;
        }

        let file = File::create(out).with_context(|| format!("cannot create {}", out.display()))?;
        let mut writer = RecordWriter::<T, _>::with_capacity(self.config.write_buffer_bytes, file);
        let mut scratch: Option<T> = None;
        loop {
            let more = match scratch.as_mut() {
                Some(rec) => merge.read_next_into(rec)?,
                None => match merge.read_next()? {
                    Some(rec) => {
                        scratch = Some(rec);
                        true
                    }
                    None => false,
                },
            };
            if !more {
                break;
            }
            if let Some(rec) = scratch.as_ref() {
                writer.write(rec)?;
            }
        }
        let (file, summary) = writer.finish()?;
        file.sync_all()?;

        let stats = merge.stats();
        merge.close()?;
        let report = MergeReport {
            inputs: inputs.len(),
            records: summary.records,
            stats,
        };
        log::info!("merged {} inputs into {} ({:?})", inputs.len(), out.display(), stats);
        self.last = Some(report);
        Ok(report)
    }

    /// Decodes up to `limit` records of a file for display.
    pub fn cat(&self, path: &Path, limit: usize) -> Result<Vec<String>> {
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        let reader = RecordReader::<T, _>::with_capacity(self.config.read_buffer_bytes, file);
        let mut src = StreamSource::new(path.display().to_string(), reader);
        let mut out = Vec::new();
        while out.len() < limit {
            match src.next_new()? {
                Some(rec) => out.push(rec.render()),
                None => break,
            }
        }
        Ok(out)
    }

    pub fn stats_line(&self) -> String {
        let mut line = format!(
            "codec={} queued={} merges={} max_file_inputs={} compression={}",
            T::NAME,
            self.queued(),
            self.merges,
            self.config.max_file_inputs,
            self.config.compression
        );
        if let Some(last) = &self.last {
            line.push_str(&format!(
                " last_inputs={} last_records={} last_passes={} last_spill_bytes={}",
                last.inputs, last.records, last.stats.passes, last.stats.spill_bytes
            ));
        }
        line
    }
}

/// Runs the command loop until `EXIT`/`QUIT` or end of input.
///
/// Command errors are printed as `ERR ...` and the loop continues; only
/// failures writing to `out` end it.
pub fn run<T, R, W>(session: &mut Session<T>, input: R, mut out: W) -> Result<()>
where
    T: Codec,
    R: BufRead,
    W: Write,
{
    writeln!(
        out,
        "mergetool started (codec={}, local_dir={}, max_file_inputs={})",
        T::NAME,
        session.config().local_dir.display(),
        session.config().max_file_inputs
    )?;
    writeln!(out, "Commands: INPUT path | MERGE out | CAT path [limit] | CLEAR | STATS | EXIT")?;
    write!(out, "> ")?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "INPUT" => match parts.next() {
                    Some(path) => match session.add_input(Path::new(path)) {
                        Ok(n) => writeln!(out, "OK ({} inputs)", n)?,
                        Err(e) => writeln!(out, "ERR input failed: {:#}", e)?,
                    },
                    None => writeln!(out, "ERR usage: INPUT path")?,
                },
                "MERGE" => match parts.next() {
                    Some(path) => match session.merge_to(Path::new(path)) {
                        Ok(r) => writeln!(
                            out,
                            "OK merged {} records from {} inputs (passes={})",
                            r.records, r.inputs, r.stats.passes
                        )?,
                        Err(e) => writeln!(out, "ERR merge failed: {:#}", e)?,
                    },
                    None => writeln!(out, "ERR usage: MERGE out")?,
                },
                "CAT" => match parts.next() {
                    Some(path) => {
                        let limit = match parts.next().map(str::parse::<usize>) {
                            None => usize::MAX,
                            Some(Ok(n)) => n,
                            Some(Err(_)) => {
                                writeln!(out, "ERR usage: CAT path [limit]")?;
                                write!(out, "> ")?;
                                out.flush()?;
                                continue;
                            }
                        };
                        match session.cat(Path::new(path), limit) {
                            Ok(records) => {
                                for r in &records {
                                    writeln!(out, "{}", r)?;
                                }
                                writeln!(out, "({} records)", records.len())?;
                            }
                            Err(e) => writeln!(out, "ERR cat failed: {:#}", e)?,
                        }
                    }
                    None => writeln!(out, "ERR usage: CAT path [limit]")?,
                },
                "CLEAR" => {
                    session.clear();
                    writeln!(out, "OK")?;
                }
                "STATS" => writeln!(out, "{}", session.stats_line())?,
                "EXIT" | "QUIT" => {
                    writeln!(out, "bye")?;
                    break;
                }
                other => writeln!(out, "unknown command: {}", other)?,
            }
        }

        write!(out, "> ")?;
        out.flush()?;
    }

    Ok(())
}
