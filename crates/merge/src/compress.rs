//! Spill file compression as an injected capability.

use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::io::{self, Read, Write};

pub use config::CompressionKind;

/// A spill writer that must be explicitly finished so trailing frames and
/// buffers reach the underlying sink.
pub trait SpillWrite: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Creates compressing writers and decompressing readers for spill files.
///
/// The merge engine never inspects the kind itself; it only asks for a
/// stream transform.
pub trait Compression: Send + Sync {
    fn compressor(
        &self,
        kind: CompressionKind,
        sink: Box<dyn Write + Send>,
    ) -> io::Result<Box<dyn SpillWrite>>;

    fn decompressor(
        &self,
        kind: CompressionKind,
        source: Box<dyn Read + Send>,
        uncompressed_len: u64,
    ) -> io::Result<Box<dyn Read + Send>>;
}

/// The default [`Compression`]: passthrough or the lz4 frame format.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCompression;

struct Plain(Box<dyn Write + Send>);

impl Write for Plain {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl SpillWrite for Plain {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

struct Lz4(FrameEncoder<Box<dyn Write + Send>>);

impl Write for Lz4 {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl SpillWrite for Lz4 {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let mut inner = self
            .0
            .finish()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        inner.flush()
    }
}

impl Compression for StreamCompression {
    fn compressor(
        &self,
        kind: CompressionKind,
        sink: Box<dyn Write + Send>,
    ) -> io::Result<Box<dyn SpillWrite>> {
        Ok(match kind {
            CompressionKind::None => Box::new(Plain(sink)),
            CompressionKind::Lz4 => Box::new(Lz4(FrameEncoder::new(sink))),
        })
    }

    // lz4 frames carry their own end marker, so the declared size is only
    // needed by formats without one.
    fn decompressor(
        &self,
        kind: CompressionKind,
        source: Box<dyn Read + Send>,
        _uncompressed_len: u64,
    ) -> io::Result<Box<dyn Read + Send>> {
        Ok(match kind {
            CompressionKind::None => source,
            CompressionKind::Lz4 => Box::new(FrameDecoder::new(source)),
        })
    }
}
