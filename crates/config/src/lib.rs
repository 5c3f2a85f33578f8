//! # Config - merge engine settings
//!
//! The configuration surface consumed by the merge engine. Values come from
//! code ([`MergeConfig::default`] plus the builder-style setters) or from the
//! environment via [`MergeConfig::from_env`]:
//!
//! ```text
//! MERGE_LOCAL_DIR            spill directory                  (default: system temp dir)
//! MERGE_TASK_ATTEMPT_ID      spill file name prefix           (default: "task")
//! MERGE_MAX_FILE_INPUTS      fan-in cap, >= 2                 (default: 100)
//! MERGE_MEMORY_TRIGGER       memory trigger level in [0, 1]   (default: 0.7, advisory)
//! MERGE_READ_BUFFER_KB       read buffer per input in KiB     (default: 64)
//! MERGE_WRITE_BUFFER_KB      spill write buffer in KiB        (default: 64)
//! MERGE_DELETE_INTERMEDIATE  delete pass outputs after use    (default: "true")
//! MERGE_MEMORY_IN_FINAL      merge memory inputs in final pass (default: "true")
//! MERGE_COMPRESSION          "none" | "lz4"                   (default: "none")
//! MERGE_VERIFY_CHECKSUMS     verify CRC32 of pass outputs     (default: "true")
//! ```
//!
//! Malformed values are rejected with [`ConfigError`] rather than silently
//! replaced by the default.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default cap on simultaneously open file inputs per merge pass.
pub const DEFAULT_MAX_FILE_INPUTS: usize = 100;

/// Default fraction of memory buffer usage that should trigger an early pass.
pub const DEFAULT_MEMORY_TRIGGER_LEVEL: f32 = 0.7;

/// Default buffer size for merge-stream reads and spill writes (64 KiB).
pub const DEFAULT_BUFFER_BYTES: usize = 64 * 1024;

/// Errors raised for invalid merge settings.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_file_inputs must be at least 2, got {0}")]
    MaxFileInputsTooSmall(usize),

    #[error("memory_storage_trigger_level must be within [0, 1], got {0}")]
    TriggerLevelOutOfRange(f32),

    #[error("buffer size must be non-zero ({0})")]
    ZeroBuffer(&'static str),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Compression applied to spill files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionKind {
    #[default]
    None,
    Lz4,
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionKind::None => write!(f, "none"),
            CompressionKind::Lz4 => write!(f, "lz4"),
        }
    }
}

impl FromStr for CompressionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(CompressionKind::None),
            "lz4" => Ok(CompressionKind::Lz4),
            other => Err(format!("unknown compression kind: {}", other)),
        }
    }
}

/// Settings for one merge engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    /// Directory where pass outputs are written.
    pub local_dir: PathBuf,
    /// Unique per task attempt; prefixes every spill file name.
    pub task_attempt_id: String,
    /// Maximum number of disk inputs merged in a single pass.
    pub max_file_inputs: usize,
    /// Fraction of memory buffer usage at which the owner should trigger an
    /// early pass. Advisory: the engine itself never enforces it.
    pub memory_storage_trigger_level: f32,
    /// Read buffer per open input.
    pub read_buffer_bytes: usize,
    /// Write buffer for pass outputs.
    pub write_buffer_bytes: usize,
    /// Delete pass outputs once fully consumed.
    pub delete_intermediate_files: bool,
    /// When `false`, memory inputs are spilled before the final pass so the
    /// final merge reads disk inputs only.
    pub memory_inputs_in_final_pass: bool,
    /// Compression applied to pass outputs.
    pub compression: CompressionKind,
    /// Verify the CRC32 of each pass output when it is read back.
    pub verify_checksums: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            local_dir: std::env::temp_dir(),
            task_attempt_id: "task".to_string(),
            max_file_inputs: DEFAULT_MAX_FILE_INPUTS,
            memory_storage_trigger_level: DEFAULT_MEMORY_TRIGGER_LEVEL,
            read_buffer_bytes: DEFAULT_BUFFER_BYTES,
            write_buffer_bytes: DEFAULT_BUFFER_BYTES,
            delete_intermediate_files: true,
            memory_inputs_in_final_pass: true,
            compression: CompressionKind::None,
            verify_checksums: true,
        }
    }
}

impl MergeConfig {
    pub fn new(local_dir: impl Into<PathBuf>, task_attempt_id: impl Into<String>) -> Self {
        Self {
            local_dir: local_dir.into(),
            task_attempt_id: task_attempt_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_file_inputs(mut self, max: usize) -> Self {
        self.max_file_inputs = max;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, kind: CompressionKind) -> Self {
        self.compression = kind;
        self
    }

    #[must_use]
    pub fn with_delete_intermediate_files(mut self, delete: bool) -> Self {
        self.delete_intermediate_files = delete;
        self
    }

    #[must_use]
    pub fn with_memory_inputs_in_final_pass(mut self, include: bool) -> Self {
        self.memory_inputs_in_final_pass = include;
        self
    }

    /// Checks the invariants the merge engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_inputs < 2 {
            return Err(ConfigError::MaxFileInputsTooSmall(self.max_file_inputs));
        }
        if !(0.0..=1.0).contains(&self.memory_storage_trigger_level) {
            return Err(ConfigError::TriggerLevelOutOfRange(
                self.memory_storage_trigger_level,
            ));
        }
        if self.read_buffer_bytes == 0 {
            return Err(ConfigError::ZeroBuffer("read_buffer_bytes"));
        }
        if self.write_buffer_bytes == 0 {
            return Err(ConfigError::ZeroBuffer("write_buffer_bytes"));
        }
        Ok(())
    }

    /// Builds a config from `MERGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, falling back to the
    /// defaults for missing keys. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let cfg = Self {
            local_dir: lookup("MERGE_LOCAL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_dir),
            task_attempt_id: lookup("MERGE_TASK_ATTEMPT_ID").unwrap_or(defaults.task_attempt_id),
            max_file_inputs: parse_or(&lookup, "MERGE_MAX_FILE_INPUTS", defaults.max_file_inputs)?,
            memory_storage_trigger_level: parse_or(
                &lookup,
                "MERGE_MEMORY_TRIGGER",
                defaults.memory_storage_trigger_level,
            )?,
            read_buffer_bytes: parse_or(&lookup, "MERGE_READ_BUFFER_KB", 64usize)? * 1024,
            write_buffer_bytes: parse_or(&lookup, "MERGE_WRITE_BUFFER_KB", 64usize)? * 1024,
            delete_intermediate_files: parse_or(
                &lookup,
                "MERGE_DELETE_INTERMEDIATE",
                defaults.delete_intermediate_files,
            )?,
            memory_inputs_in_final_pass: parse_or(
                &lookup,
                "MERGE_MEMORY_IN_FINAL",
                defaults.memory_inputs_in_final_pass,
            )?,
            compression: parse_or(&lookup, "MERGE_COMPRESSION", defaults.compression)?,
            verify_checksums: parse_or(
                &lookup,
                "MERGE_VERIFY_CHECKSUMS",
                defaults.verify_checksums,
            )?,
        };
        cfg.validate()?;
        log::debug!("merge config: {:?}", cfg);
        Ok(cfg)
    }
}

fn parse_or<F, V>(lookup: &F, key: &str, default: V) -> Result<V, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    V: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests;
