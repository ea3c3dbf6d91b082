/// Display sinks: where finished images go.
/// The scheduler owns exactly one sink for the life of the process and talks
/// to it only through `DisplaySink`.
pub mod framebuffer;
pub mod png;
pub mod raw;

use thiserror::Error;
use tiny_skia::Pixmap;
use tracing::warn;

pub use framebuffer::FramebufferSink;
pub use png::PngSink;
pub use raw::RawSink;

#[derive(Debug, Error)]
pub enum PresentationError {
    #[error("{sink}: {source}")]
    Io {
        sink: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{sink}: failed to encode image: {reason}")]
    Encode { sink: &'static str, reason: String },
    #[error("{sink}: {reason}")]
    Geometry { sink: &'static str, reason: String },
    #[error("{failed} of {total} sinks failed")]
    Partial { failed: usize, total: usize },
}

pub trait DisplaySink: Send {
    /// Show a finished image
    fn present(&mut self, bitmap: &Pixmap) -> Result<(), PresentationError>;

    /// Give up any held device. Called once on shutdown.
    fn release(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Presents every image to several sinks in order
pub struct FanOutSink {
    sinks: Vec<Box<dyn DisplaySink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Box<dyn DisplaySink>>) -> Self {
        Self { sinks }
    }
}

impl DisplaySink for FanOutSink {
    fn present(&mut self, bitmap: &Pixmap) -> Result<(), PresentationError> {
        let total = self.sinks.len();
        let mut failed = 0;
        for sink in &mut self.sinks {
            if let Err(e) = sink.present(bitmap) {
                warn!("{} rejected image: {}", sink.name(), e);
                failed += 1;
            }
        }
        match failed {
            0 => Ok(()),
            _ => Err(PresentationError::Partial { failed, total }),
        }
    }

    fn release(&mut self) {
        for sink in &mut self.sinks {
            sink.release();
        }
    }

    fn name(&self) -> &'static str {
        "fan-out"
    }
}
