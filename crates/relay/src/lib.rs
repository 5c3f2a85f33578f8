//! # Relay - in-process record pipeline
//!
//! Lets a producing task feed records straight into a consuming task running
//! on the same worker, without a disk or network hop.
//!
//! ```text
//!  producer thread                         consumer thread
//!  RelayWriter::write ──► [ ring buffer ] ──► RelayReader::read
//!        (blocks when full)           (blocks when empty)
//! ```
//!
//! - [`RelayWriter::finish`] declares end of stream; a blocked reader wakes
//!   up, drains what is left and then sees `Ok(None)`.
//! - [`cancel`](RelayWriter::cancel) (from either side) is the abort path:
//!   both sides wake immediately and every further call fails with
//!   [`RelayError::Cancelled`]. Records still buffered are dropped.
//!
//! [`PipelinedTask`] runs a task body on its own thread, fed by a relay.
mod ring;
mod task;

use thiserror::Error;

pub use ring::{channel, RelayReader, RelayWriter};
pub use task::PipelinedTask;

/// Errors raised by the relay and pipelined tasks.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay was cancelled; buffered records may have been lost.
    #[error("relay cancelled")]
    Cancelled,

    /// A write was attempted after the producer declared end of stream.
    #[error("relay already finished")]
    Finished,

    /// The task thread could not be started.
    #[error("failed to spawn pipelined task: {0}")]
    Spawn(#[from] std::io::Error),

    /// The task body returned an error.
    #[error("pipelined task failed: {0}")]
    Task(anyhow::Error),

    /// The task body panicked.
    #[error("pipelined task panicked")]
    Panicked,
}

#[cfg(test)]
mod tests;
