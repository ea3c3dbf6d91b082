/// PNG file output. Each image replaces the previous file atomically.
use std::path::{Path, PathBuf};

use tiny_skia::Pixmap;
use tracing::debug;

use super::{DisplaySink, PresentationError};

const NAME: &str = "png";

pub struct PngSink {
    path: PathBuf,
}

impl PngSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DisplaySink for PngSink {
    fn present(&mut self, bitmap: &Pixmap) -> Result<(), PresentationError> {
        let data = bitmap.encode_png().map_err(|e| PresentationError::Encode {
            sink: NAME,
            reason: e.to_string(),
        })?;

        let io = |source| PresentationError::Io { sink: NAME, source };
        let tmp = self.temp_path();
        std::fs::write(&tmp, &data).map_err(io)?;
        std::fs::rename(&tmp, &self.path).map_err(io)?;

        debug!("Image saved as {} ({} bytes)", self.path.display(), data.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        NAME
    }
}
