/// Raw RGBA frames on stdout, for piping into another program.
use std::io::Write;

use tiny_skia::Pixmap;

use super::{DisplaySink, PresentationError};

const NAME: &str = "raw";

pub struct RawSink<W: Write + Send> {
    out: W,
}

impl RawSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> RawSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> DisplaySink for RawSink<W> {
    fn present(&mut self, bitmap: &Pixmap) -> Result<(), PresentationError> {
        let io = |source| PresentationError::Io { sink: NAME, source };
        self.out.write_all(bitmap.data()).map_err(io)?;
        self.out.flush().map_err(io)
    }

    fn release(&mut self) {
        let _ = self.out.flush();
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_rgba_bytes() {
        let mut pixmap = Pixmap::new(3, 2).unwrap();
        pixmap.fill(tiny_skia::Color::from_rgba8(1, 2, 3, 255));
        let mut sink = RawSink::new(Vec::new());
        sink.present(&pixmap).unwrap();
        sink.present(&pixmap).unwrap();
        assert_eq!(sink.out.len(), 2 * 3 * 2 * 4);
        assert_eq!(&sink.out[..4], &[1, 2, 3, 255]);
    }
}
