use std::thread::{self, JoinHandle};

use crate::{channel, RelayError, RelayReader, RelayWriter};

/// A task body running on a dedicated thread, fed through a relay by the
/// caller's thread.
///
/// ```rust,no_run
/// use relay::PipelinedTask;
///
/// let mut task = PipelinedTask::spawn("sum", 64, |mut input| {
///     let mut total = 0u64;
///     while let Some(v) = input.read()? {
///         total += v;
///     }
///     Ok(total)
/// })
/// .unwrap();
/// for v in 1..=10u64 {
///     task.push(v).unwrap();
/// }
/// assert_eq!(task.finish().unwrap(), 55);
/// ```
pub struct PipelinedTask<T, R> {
    name: String,
    writer: RelayWriter<T>,
    handle: Option<JoinHandle<anyhow::Result<R>>>,
}

impl<T, R> PipelinedTask<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Starts `body` on a new thread named `name`, reading from a relay of
    /// the given capacity.
    pub fn spawn<F>(name: impl Into<String>, capacity: usize, body: F) -> Result<Self, RelayError>
    where
        F: FnOnce(RelayReader<T>) -> anyhow::Result<R> + Send + 'static,
    {
        let name = name.into();
        let (writer, reader) = channel(capacity);
        let reader = reader.named(name.clone());
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(reader))?;
        log::debug!("pipelined task {} started (capacity={})", name, capacity);
        Ok(Self {
            name,
            writer,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Feeds one record to the task, blocking while its buffer is full.
    ///
    /// Fails with [`RelayError::Cancelled`] if the task stopped reading
    /// (returned early or failed); [`finish`](Self::finish) then reports why.
    pub fn push(&mut self, record: T) -> Result<(), RelayError> {
        self.writer.write(record)
    }

    /// Declares end of input and waits for the task's result.
    pub fn finish(mut self) -> Result<R, RelayError> {
        self.writer.finish();
        self.join()
    }

    /// Cancels the relay and waits for the task to exit. Buffered records are
    /// dropped and the task's result is discarded.
    pub fn abort(mut self) {
        self.writer.cancel();
        if let Err(e) = self.join() {
            log::debug!("pipelined task {} aborted: {}", self.name, e);
        }
    }

    fn join(&mut self) -> Result<R, RelayError> {
        let handle = match self.handle.take() {
            Some(h) => h,
            None => return Err(RelayError::Finished),
        };
        match handle.join() {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(RelayError::Task(e)),
            Err(_) => Err(RelayError::Panicked),
        }
    }
}

/// A task dropped without `finish` or `abort` is aborted so its thread never
/// outlives the handle.
impl<T, R> Drop for PipelinedTask<T, R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.writer.cancel();
            let _ = handle.join();
        }
    }
}
