//! # mergetool - interactive external merge shell
//!
//! A REPL over the merge engine. Queue sorted record files, merge them into
//! one sorted output, and inspect files. Reads commands from stdin, so it can
//! be scripted by piping commands in.
//!
//! ## Commands
//!
//! ```text
//! INPUT path          Queue a sorted record file for the next merge
//! MERGE out           Merge every queued input into `out`
//! CAT path [limit]    Print the records of a file
//! CLEAR               Drop the queued inputs
//! STATS               Print session and last-merge counters
//! EXIT / QUIT         Quit
//! ```
//!
//! ## Configuration
//!
//! Engine settings come from the `MERGE_*` variables read by
//! [`config::MergeConfig::from_env`]. The record format is chosen with:
//!
//! ```text
//! MERGETOOL_CODEC     "u64" (8-byte little-endian integers) | "line" (text lines)   (default: "u64")
//! RUST_LOG            log filter                                               (default: "warn")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ MERGETOOL_CODEC=line MERGE_MAX_FILE_INPUTS=2 mergetool
//! mergetool started (codec=line, local_dir=/tmp, max_file_inputs=2)
//! > INPUT a.txt
//! OK (1 inputs)
//! > INPUT b.txt
//! OK (2 inputs)
//! > INPUT c.txt
//! OK (3 inputs)
//! > MERGE out.txt
//! OK merged 9 records from 3 inputs (passes=1)
//! > EXIT
//! bye
//! ```

mod session;

use anyhow::{bail, Context, Result};
use config::MergeConfig;
use record::Line;
use session::{run, Codec, Session};
use std::io::{self, BufRead, Write};

fn start<T: Codec, R: BufRead, W: Write>(config: MergeConfig, input: R, out: W) -> Result<()> {
    let mut session = Session::<T>::new(config);
    run(&mut session, input, out)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = MergeConfig::from_env().context("invalid MERGE_* configuration")?;
    let codec = std::env::var("MERGETOOL_CODEC").unwrap_or_else(|_| "u64".to_string());
    log::info!("starting mergetool with codec {}", codec);

    let stdin = io::stdin();
    let stdout = io::stdout();
    match codec.trim().to_ascii_lowercase().as_str() {
        "u64" => start::<u64, _, _>(config, stdin.lock(), stdout.lock()),
        "line" => start::<Line, _, _>(config, stdin.lock(), stdout.lock()),
        other => bail!("unknown MERGETOOL_CODEC: {}", other),
    }
}
