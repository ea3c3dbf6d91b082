/// Font faces for the three text runs.
/// A face is either a TrueType font rasterized with rusttype, or the built-in
/// embedded-graphics bitmap fonts used when no TrueType file is available.
use std::convert::Infallible;
use std::path::{Path, PathBuf};

use embedded_graphics::mono_font::ascii::{
    FONT_4X6, FONT_5X8, FONT_6X10, FONT_6X13, FONT_7X13_BOLD, FONT_7X14, FONT_9X15, FONT_9X15_BOLD,
    FONT_9X18, FONT_9X18_BOLD, FONT_10X20,
};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use thiserror::Error;
use tiny_skia::Pixmap;
use tracing::{debug, info, warn};

use crate::config::{Rgb, RunStyles, StyleSpec};
use crate::quotes::model::RunId;

/// Family name that selects the bitmap face directly
pub const BUILTIN_FAMILY: &str = "builtin";

#[derive(Debug, Error)]
pub enum FontError {
    #[error("failed to read font {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a usable TrueType/OpenType font")]
    Parse { path: PathBuf },
}

const SERIF_REGULAR: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSerif-Regular.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSerif.ttf",
];
const SERIF_BOLD: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSerif-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSerif-Bold.ttf",
];
const SERIF_ITALIC: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSerif-Italic.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSerif-Oblique.ttf",
];
const SERIF_BOLD_ITALIC: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSerif-BoldItalic.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSerif-BoldOblique.ttf",
];
const SANS_REGULAR: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
];
const SANS_BOLD: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
];
const SANS_ITALIC: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSans-Italic.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Oblique.ttf",
];
const SANS_BOLD_ITALIC: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSans-BoldItalic.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-BoldOblique.ttf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FamilyClass {
    Serif,
    Sans,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Weight {
    bold: bool,
    italic: bool,
}

impl Weight {
    fn parse(weight: &str) -> Self {
        let w = weight.to_lowercase().replace([' ', '_'], "-");
        let bold = ["bold", "black", "heavy"].iter().any(|b| w.contains(b));
        let italic = w.contains("italic") || w.contains("oblique");
        Self { bold, italic }
    }
}

fn family_class(family: &str) -> Option<FamilyClass> {
    match family.trim().to_lowercase().as_str() {
        "lora" | "serif" | "times" | "times new roman" | "liberation serif" | "dejavu serif" => {
            Some(FamilyClass::Serif)
        }
        "open sans" | "roboto" | "lato" | "montserrat" | "sans" | "sans-serif" | "arial"
        | "helvetica" | "liberation sans" | "dejavu sans" => Some(FamilyClass::Sans),
        _ => None,
    }
}

fn candidates(class: FamilyClass, weight: Weight) -> &'static [&'static str] {
    match (class, weight.bold, weight.italic) {
        (FamilyClass::Serif, false, false) => SERIF_REGULAR,
        (FamilyClass::Serif, true, false) => SERIF_BOLD,
        (FamilyClass::Serif, false, true) => SERIF_ITALIC,
        (FamilyClass::Serif, true, true) => SERIF_BOLD_ITALIC,
        (FamilyClass::Sans, false, false) => SANS_REGULAR,
        (FamilyClass::Sans, true, false) => SANS_BOLD,
        (FamilyClass::Sans, false, true) => SANS_ITALIC,
        (FamilyClass::Sans, true, true) => SANS_BOLD_ITALIC,
    }
}

fn looks_like_path(font: &str) -> bool {
    let p = Path::new(font);
    p.components().count() > 1
        || p
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"))
}

pub enum Face {
    TrueType {
        font: rusttype::Font<'static>,
        path: PathBuf,
    },
    Builtin {
        bold: bool,
    },
}

impl std::fmt::Debug for Face {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Face::TrueType { path, .. } => write!(f, "TrueType({})", path.display()),
            Face::Builtin { bold } => write!(f, "Builtin {{ bold: {bold} }}"),
        }
    }
}

impl Face {
    /// Resolve a style's font. An explicit path must load; an unknown family
    /// falls back to the built-in face.
    pub fn resolve(style: &StyleSpec) -> Result<Face, FontError> {
        let weight = Weight::parse(&style.weight);
        let family = style.font.trim();

        if family.eq_ignore_ascii_case(BUILTIN_FAMILY) {
            return Ok(Face::Builtin { bold: weight.bold });
        }

        if looks_like_path(family) {
            return Self::from_file(Path::new(family));
        }

        if let Some(class) = family_class(family) {
            for candidate in candidates(class, weight) {
                let path = Path::new(candidate);
                if !path.exists() {
                    continue;
                }
                match Self::from_file(path) {
                    Ok(face) => return Ok(face),
                    Err(e) => debug!("Skipping font candidate: {}", e),
                }
            }
        }

        warn!(
            "No system font found for '{}' ({}), using built-in bitmap font",
            family, style.weight
        );
        Ok(Face::Builtin { bold: weight.bold })
    }

    pub fn from_file(path: &Path) -> Result<Face, FontError> {
        let bytes = std::fs::read(path).map_err(|source| FontError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let font = rusttype::Font::try_from_vec(bytes).ok_or_else(|| FontError::Parse {
            path: path.to_path_buf(),
        })?;
        info!("Loaded font {}", path.display());
        Ok(Face::TrueType {
            font,
            path: path.to_path_buf(),
        })
    }

    /// Horizontal advance of `text` at `size` px
    pub fn width(&self, text: &str, size: f32) -> f32 {
        match self {
            Face::TrueType { font, .. } => {
                let scale = rusttype::Scale::uniform(size);
                font.layout(text, scale, rusttype::point(0.0, 0.0))
                    .last()
                    .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
                    .unwrap_or(0.0)
            }
            Face::Builtin { bold } => {
                let mono = mono_font(size, *bold);
                let advance = mono.character_size.width + mono.character_spacing;
                (text.chars().count() as u32 * advance) as f32
            }
        }
    }

    /// Pixel height this face occupies at `size`
    pub fn em_height(&self, size: f32) -> f32 {
        match self {
            Face::TrueType { .. } => size,
            Face::Builtin { bold } => mono_font(size, *bold).character_size.height as f32,
        }
    }

    /// Distance from line top to baseline at `size`
    pub fn ascent(&self, size: f32) -> f32 {
        match self {
            Face::TrueType { font, .. } => font.v_metrics(rusttype::Scale::uniform(size)).ascent,
            Face::Builtin { bold } => mono_font(size, *bold).baseline as f32,
        }
    }

    /// Paint `text` with its baseline origin at (`x`, `baseline`)
    pub fn draw(&self, target: &mut Pixmap, text: &str, x: f32, baseline: f32, size: f32, color: Rgb) {
        match self {
            Face::TrueType { font, .. } => draw_truetype(font, target, text, x, baseline, size, color),
            Face::Builtin { bold } => {
                let style = MonoTextStyle::new(mono_font(size, *bold), Rgb888::new(color.0, color.1, color.2));
                let origin = Point::new(x.round() as i32, baseline.round() as i32);
                let mut canvas = PixmapTarget(target);
                let Ok(_) = Text::with_baseline(text, origin, style, Baseline::Alphabetic).draw(&mut canvas);
            }
        }
    }
}

/// Largest bitmap font not taller than `size`
fn mono_font(size: f32, bold: bool) -> &'static MonoFont<'static> {
    let px = size.max(0.0).floor() as u32;
    if bold && px >= 13 {
        return match px {
            13..=14 => &FONT_7X13_BOLD,
            15..=17 => &FONT_9X15_BOLD,
            _ => &FONT_9X18_BOLD,
        };
    }
    match px {
        0..=7 => &FONT_4X6,
        8..=9 => &FONT_5X8,
        10..=12 => &FONT_6X10,
        13 => &FONT_6X13,
        14 => &FONT_7X14,
        15..=17 => &FONT_9X15,
        18..=19 => &FONT_9X18,
        _ => &FONT_10X20,
    }
}

fn draw_truetype(
    font: &rusttype::Font<'static>,
    target: &mut Pixmap,
    text: &str,
    x: f32,
    baseline: f32,
    size: f32,
    Rgb(r, g, b): Rgb,
) {
    let scale = rusttype::Scale::uniform(size);
    let glyphs: Vec<_> = font.layout(text, scale, rusttype::point(x, baseline)).collect();

    let tw = target.width() as i32;
    let th = target.height() as i32;
    let data = target.data_mut();

    for glyph in &glyphs {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, v| {
            let px = bb.min.x + gx as i32;
            let py = bb.min.y + gy as i32;
            if px < 0 || px >= tw || py < 0 || py >= th {
                return;
            }
            let alpha = (v * 255.0) as u8;
            if alpha == 0 {
                return;
            }
            let idx = ((py * tw + px) * 4) as usize;
            let a = alpha as f32 / 255.0;
            let dst_a = data[idx + 3] as f32 / 255.0;
            let out_a = a + dst_a * (1.0 - a);
            if out_a > 0.0 {
                data[idx] = ((r as f32 * a + data[idx] as f32 * dst_a * (1.0 - a)) / out_a) as u8;
                data[idx + 1] = ((g as f32 * a + data[idx + 1] as f32 * dst_a * (1.0 - a)) / out_a) as u8;
                data[idx + 2] = ((b as f32 * a + data[idx + 2] as f32 * dst_a * (1.0 - a)) / out_a) as u8;
                data[idx + 3] = (out_a * 255.0) as u8;
            }
        });
    }
}

/// embedded-graphics draw target over an opaque RGBA pixmap
struct PixmapTarget<'a>(&'a mut Pixmap);

impl OriginDimensions for PixmapTarget<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for PixmapTarget<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let w = self.0.width() as i32;
        let h = self.0.height() as i32;
        let data = self.0.data_mut();
        for Pixel(p, color) in pixels {
            if p.x < 0 || p.x >= w || p.y < 0 || p.y >= h {
                continue;
            }
            let idx = ((p.y * w + p.x) * 4) as usize;
            data[idx] = color.r();
            data[idx + 1] = color.g();
            data[idx + 2] = color.b();
            data[idx + 3] = 255;
        }
        Ok(())
    }
}

/// Faces for the three runs, resolved once at startup
#[derive(Debug)]
pub struct FontBook {
    faces: [Face; 3],
}

impl FontBook {
    pub fn load(styles: &RunStyles) -> Result<Self, FontError> {
        Ok(Self {
            faces: [
                Face::resolve(styles.get(RunId::Prefix))?,
                Face::resolve(styles.get(RunId::TimePhrase))?,
                Face::resolve(styles.get(RunId::Suffix))?,
            ],
        })
    }

    /// All runs on the bitmap face
    pub fn builtin(styles: &RunStyles) -> Self {
        let bold = |run| Weight::parse(&styles.get(run).weight).bold;
        Self {
            faces: [
                Face::Builtin { bold: bold(RunId::Prefix) },
                Face::Builtin { bold: bold(RunId::TimePhrase) },
                Face::Builtin { bold: bold(RunId::Suffix) },
            ],
        }
    }

    pub fn face(&self, run: RunId) -> &Face {
        &self.faces[run.index()]
    }
}
