/// Rendering engine: paints a wrapped quote onto a tiny-skia pixmap.
/// Output depends only on the layout, canvas and styles, so repeated renders
/// of the same minute are pixel-identical.
use thiserror::Error;
use tiny_skia::{Color, Pixmap};
use tracing::debug;

use crate::config::{CanvasSpec, LayoutTuning, RunStyles, StyleConfig};
use crate::quotes::model::QuoteRecord;
use crate::render::font::{FontBook, FontError};
use crate::render::layout::{Layout, LayoutEngine};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot allocate a {width}x{height} canvas")]
    Canvas { width: u32, height: u32 },
}

pub struct Renderer {
    styles: RunStyles,
    canvas: CanvasSpec,
    tuning: LayoutTuning,
    fonts: FontBook,
}

impl Renderer {
    /// Resolve fonts for every run. Fails only on an unreadable explicit font path.
    pub fn new(config: &StyleConfig) -> Result<Self, FontError> {
        let styles = config.run_styles();
        let fonts = FontBook::load(&styles)?;
        Ok(Self::with_fonts(config, fonts))
    }

    pub fn with_fonts(config: &StyleConfig, fonts: FontBook) -> Self {
        Self {
            styles: config.run_styles(),
            canvas: config.canvas.clone(),
            tuning: config.layout.clone(),
            fonts,
        }
    }

    pub fn canvas(&self) -> &CanvasSpec {
        &self.canvas
    }

    pub fn layout(&self, record: &QuoteRecord) -> Layout {
        LayoutEngine::new(&self.fonts, &self.tuning).wrap(record.runs(), &self.styles, &self.canvas)
    }

    /// Paint the background, then each fragment left to right on its baseline
    pub fn render(&self, layout: &Layout, canvas: &CanvasSpec) -> Result<Pixmap, RenderError> {
        let mut pixmap = Pixmap::new(canvas.width, canvas.height).ok_or(RenderError::Canvas {
            width: canvas.width,
            height: canvas.height,
        })?;
        let bg = canvas.background_color;
        pixmap.fill(Color::from_rgba8(bg.0, bg.1, bg.2, 255));

        for line in &layout.lines {
            for fragment in &line.fragments {
                let style = self.styles.get(fragment.run);
                self.fonts.face(fragment.run).draw(
                    &mut pixmap,
                    &fragment.text,
                    fragment.x,
                    line.baseline,
                    fragment.size,
                    style.color,
                );
            }
        }

        debug!(
            "Rendered {} line(s) at scale {:.2} onto {}x{}",
            layout.lines.len(),
            layout.scale,
            canvas.width,
            canvas.height
        );
        Ok(pixmap)
    }

    /// Layout and paint one record on the configured canvas
    pub fn compose(&self, record: &QuoteRecord) -> Result<Pixmap, RenderError> {
        let layout = self.layout(record);
        self.render(&layout, &self.canvas)
    }
}
