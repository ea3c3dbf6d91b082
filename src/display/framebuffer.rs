/// Fullscreen output on a Linux framebuffer device (/dev/fbN).
/// The image is scaled to fit the screen, preserving aspect, and centred on
/// a white field.
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tiny_skia::Pixmap;
use tracing::{debug, info};

use super::{DisplaySink, PresentationError};

const NAME: &str = "framebuffer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    /// Bytes per row, including padding
    pub stride: u32,
}

impl Geometry {
    /// Read from /sys/class/graphics/<fb>/
    pub fn from_sysfs(device: &Path) -> Result<Self, PresentationError> {
        let fb = device
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| geometry_err(format!("bad device path {}", device.display())))?;
        let sys = Path::new("/sys/class/graphics").join(fb);
        let read = |attr: &str| {
            std::fs::read_to_string(sys.join(attr))
                .map_err(|source| PresentationError::Io { sink: NAME, source })
        };

        let (width, height) = parse_virtual_size(&read("virtual_size")?)
            .ok_or_else(|| geometry_err(format!("unreadable virtual_size for {fb}")))?;
        let bits_per_pixel: u32 = read("bits_per_pixel")?
            .trim()
            .parse()
            .map_err(|_| geometry_err(format!("unreadable bits_per_pixel for {fb}")))?;
        let stride = read("stride")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(width * bits_per_pixel / 8);

        Ok(Self {
            width,
            height,
            bits_per_pixel,
            stride,
        })
    }
}

fn geometry_err(reason: String) -> PresentationError {
    PresentationError::Geometry { sink: NAME, reason }
}

fn parse_virtual_size(input: &str) -> Option<(u32, u32)> {
    let (w, h) = input.trim().split_once(',')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

pub struct FramebufferSink {
    device: PathBuf,
    file: Option<File>,
    geometry: Geometry,
}

impl FramebufferSink {
    /// Open the device and query its geometry; the handle is held until release
    pub fn open(device: &Path) -> Result<Self, PresentationError> {
        let geometry = Geometry::from_sysfs(device)?;
        Self::with_geometry(device, geometry)
    }

    pub fn with_geometry(device: &Path, geometry: Geometry) -> Result<Self, PresentationError> {
        match geometry.bits_per_pixel {
            16 | 32 => {}
            other => return Err(geometry_err(format!("unsupported depth {other} bpp"))),
        }
        let file = OpenOptions::new()
            .write(true)
            .open(device)
            .map_err(|source| PresentationError::Io { sink: NAME, source })?;
        info!(
            "Opened framebuffer {}: {}x{} @ {}bpp",
            device.display(),
            geometry.width,
            geometry.height,
            geometry.bits_per_pixel
        );
        Ok(Self {
            device: device.to_path_buf(),
            file: Some(file),
            geometry,
        })
    }
}

impl DisplaySink for FramebufferSink {
    fn present(&mut self, bitmap: &Pixmap) -> Result<(), PresentationError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| geometry_err("device already released".into()))?;

        let screen = compose_fullscreen(bitmap, self.geometry.width, self.geometry.height)?;
        let bytes = encode(&screen, &self.geometry);

        let io = |source| PresentationError::Io { sink: NAME, source };
        file.seek(SeekFrom::Start(0)).map_err(io)?;
        file.write_all(&bytes).map_err(io)?;
        file.flush().map_err(io)?;

        debug!("Image displayed on {} ({} bytes)", self.device.display(), bytes.len());
        Ok(())
    }

    fn release(&mut self) {
        if self.file.take().is_some() {
            info!("Closed framebuffer {}", self.device.display());
        }
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

/// Scale `bitmap` to fit a `width`x`height` screen and centre it on white
pub fn compose_fullscreen(bitmap: &Pixmap, width: u32, height: u32) -> Result<RgbaImage, PresentationError> {
    let (iw, ih) = (bitmap.width(), bitmap.height());
    let source = RgbaImage::from_raw(iw, ih, bitmap.data().to_vec())
        .ok_or_else(|| geometry_err("pixmap buffer size mismatch".into()))?;

    let scale = f64::min(width as f64 / iw as f64, height as f64 / ih as f64);
    let nw = ((iw as f64 * scale) as u32).clamp(1, width.max(1));
    let nh = ((ih as f64 * scale) as u32).clamp(1, height.max(1));

    let scaled = if (nw, nh) == (iw, ih) {
        source
    } else {
        imageops::resize(&source, nw, nh, FilterType::Lanczos3)
    };

    let mut screen = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let x = (width - nw) / 2;
    let y = (height - nh) / 2;
    imageops::overlay(&mut screen, &scaled, x as i64, y as i64);
    Ok(screen)
}

/// Pack pixels in the device's native format (BGRX8888 or RGB565)
fn encode(screen: &RgbaImage, geometry: &Geometry) -> Vec<u8> {
    let row_bytes = (geometry.width * geometry.bits_per_pixel / 8) as usize;
    let stride = (geometry.stride as usize).max(row_bytes);
    let mut out = Vec::with_capacity(stride * geometry.height as usize);

    for row in screen.rows() {
        let start = out.len();
        for px in row {
            let [r, g, b, _] = px.0;
            if geometry.bits_per_pixel == 16 {
                let v = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
                // Writing into a Vec cannot fail
                let _ = out.write_u16::<LittleEndian>(v);
            } else {
                out.extend_from_slice(&[b, g, r, 0xFF]);
            }
        }
        out.resize(start + stride, 0);
    }
    out
}
