use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::quotes::model::{RunId, TimeKey};
use crate::quotes::store::{ColumnOrder, DuplicatePolicy};

/// Top-level runtime configuration, assembled from CLI args
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub quotes_path: PathBuf,
    pub style_path: PathBuf,
    pub outputs: Vec<OutputMode>,
    pub output_path: PathBuf,
    pub fb_device: PathBuf,
    /// Keep running and refresh on a cadence instead of rendering once
    pub periodic: bool,
    /// Fixed refresh interval, replaces top-of-minute alignment
    pub interval_secs: Option<u64>,
    pub time_source: TimeSourceMode,
    pub duplicates: DuplicatePolicy,
    pub columns: ColumnOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Write each image as PNG
    #[default]
    Png,
    /// Fullscreen on a Linux framebuffer device
    Framebuffer,
    /// Raw RGBA pixels to stdout (for piping)
    Raw,
}

impl std::str::FromStr for OutputMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "png" => Ok(OutputMode::Png),
            "framebuffer" | "fb" | "fullscreen" => Ok(OutputMode::Framebuffer),
            "raw" | "stdout" => Ok(OutputMode::Raw),
            _ => Err(format!("Unknown output mode: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TimeSourceMode {
    Local,
    Ntp { server: Option<String> },
    Fixed(TimeKey),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 8-bit RGB color. Accepts `"#rrggbb"` or `[r, g, b]` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ColorValue", into = "ColorValue")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const RED: Rgb = Rgb(255, 0, 0);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ColorValue {
    Hex(String),
    Triple([u8; 3]),
}

impl TryFrom<ColorValue> for Rgb {
    type Error = String;
    fn try_from(value: ColorValue) -> Result<Self, Self::Error> {
        match value {
            ColorValue::Triple([r, g, b]) => Ok(Rgb(r, g, b)),
            ColorValue::Hex(s) => parse_hex_color(&s).ok_or_else(|| format!("invalid color `{s}`")),
        }
    }
}

impl From<Rgb> for ColorValue {
    fn from(c: Rgb) -> Self {
        ColorValue::Triple([c.0, c.1, c.2])
    }
}

pub fn parse_hex_color(color: &str) -> Option<Rgb> {
    let s = color.trim().trim_start_matches('#');
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&s[0..2], 16).ok()?;
    let g = u8::from_str_radix(&s[2..4], 16).ok()?;
    let b = u8::from_str_radix(&s[4..6], 16).ok()?;
    Some(Rgb(r, g, b))
}

/// Visual attributes of one text run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSpec {
    /// Family name, path to a TrueType file, or "builtin"
    pub font: String,
    pub size: f32,
    pub color: Rgb,
    pub weight: String,
}

impl Default for StyleSpec {
    fn default() -> Self {
        Self {
            font: "Lora".to_string(),
            size: 38.0,
            color: Rgb::BLACK,
            weight: "regular".to_string(),
        }
    }
}

impl StyleSpec {
    fn highlight() -> Self {
        Self {
            color: Rgb::RED,
            weight: "extra-bold".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
    pub margin: u32,
    pub background_color: Rgb,
}

impl Default for CanvasSpec {
    fn default() -> Self {
        Self {
            width: 640,
            height: 400,
            margin: 20,
            background_color: Rgb::WHITE,
        }
    }
}

impl CanvasSpec {
    pub fn usable_width(&self) -> f32 {
        self.width.saturating_sub(self.margin.saturating_mul(2)) as f32
    }

    pub fn usable_height(&self) -> f32 {
        self.height.saturating_sub(self.margin.saturating_mul(2)) as f32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// Line spacing and shrink-to-fit behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutTuning {
    pub line_gap: f32,
    /// Scale reduction per re-wrap when the text is too tall
    pub shrink_step: f32,
    pub max_shrink_attempts: u32,
    pub align: Align,
}

impl Default for LayoutTuning {
    fn default() -> Self {
        Self {
            line_gap: 8.0,
            shrink_step: 0.1,
            max_shrink_attempts: 6,
            align: Align::Left,
        }
    }
}

/// One style per run, in reading order
#[derive(Debug, Clone, PartialEq)]
pub struct RunStyles([StyleSpec; 3]);

impl RunStyles {
    pub fn new(prefix: StyleSpec, time_phrase: StyleSpec, suffix: StyleSpec) -> Self {
        Self([prefix, time_phrase, suffix])
    }

    pub fn get(&self, run: RunId) -> &StyleSpec {
        &self.0[run.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (RunId, &StyleSpec)> {
        RunId::ALL.into_iter().zip(self.0.iter())
    }
}

/// Style document (config.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub prefix: StyleSpec,
    pub time_phrase: StyleSpec,
    pub suffix: StyleSpec,
    pub canvas: CanvasSpec,
    pub layout: LayoutTuning,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            prefix: StyleSpec::default(),
            time_phrase: StyleSpec::highlight(),
            suffix: StyleSpec::default(),
            canvas: CanvasSpec::default(),
            layout: LayoutTuning::default(),
        }
    }
}

impl StyleConfig {
    /// Load the style document. A missing file yields the defaults and a
    /// sample config written in its place.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config {} not found, using defaults", path.display());
                let config = Self::default();
                if let Err(e) = config.write_sample(path) {
                    warn!("Could not write sample config {}: {}", path.display(), e);
                }
                return Ok(config);
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config = Self::from_json(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: StyleConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_sample(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Sample configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.canvas;
        if c.width == 0 || c.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "canvas must be non-empty, got {}x{}",
                c.width, c.height
            )));
        }
        let margins = 2 * u64::from(c.margin);
        if margins >= u64::from(c.width) || margins >= u64::from(c.height) {
            return Err(ConfigError::Invalid(format!(
                "margin {} leaves no room on a {}x{} canvas",
                c.margin, c.width, c.height
            )));
        }
        for (run, style) in self.run_styles().iter() {
            if !(style.size.is_finite() && style.size > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{run:?} font size must be positive, got {}",
                    style.size
                )));
            }
        }
        let step = self.layout.shrink_step;
        if !(step > 0.0 && step < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "layout.shrink_step must be between 0 and 1, got {step}"
            )));
        }
        if !(self.layout.line_gap.is_finite() && self.layout.line_gap >= 0.0) {
            return Err(ConfigError::Invalid("layout.line_gap must be >= 0".into()));
        }
        Ok(())
    }

    pub fn run_styles(&self) -> RunStyles {
        RunStyles::new(
            self.prefix.clone(),
            self.time_phrase.clone(),
            self.suffix.clone(),
        )
    }
}
