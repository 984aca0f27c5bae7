//! Cover thumbnail rendering.
//!
//! Each imported document gets two PNG thumbnails in the cover store: a
//! `normal` preview and a `miniatura` list icon. The image comes from the
//! document itself when the format carries one, otherwise a gradient cover is
//! generated from the title.

use crate::error::{AppError, Result};
use crate::formats::{DocumentFormat, ThumbnailRenderer, get_handler};
use crate::store::{CoverSize, CoverStore};
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// Default width of the normal thumbnail in pixels.
pub const DEFAULT_NORMAL_WIDTH: u32 = 600;

/// Default width of the mini thumbnail in pixels.
pub const DEFAULT_MINI_WIDTH: u32 = 120;

const GENERATED_WIDTH: u32 = 400;
const GENERATED_HEIGHT: u32 = 600;

/// Renders thumbnails into a [`CoverStore`].
#[derive(Debug, Clone)]
pub struct CoverRenderer {
    covers: CoverStore,
    normal_width: u32,
    mini_width: u32,
}

impl CoverRenderer {
    /// Create a renderer with the given thumbnail widths.
    pub fn new(covers: CoverStore, normal_width: u32, mini_width: u32) -> Self {
        Self {
            covers,
            normal_width: normal_width.max(1),
            mini_width: mini_width.max(1),
        }
    }

    /// Source image for a document: embedded cover or a generated one.
    fn source_image(source: &Path, title: &str) -> DynamicImage {
        let handler = get_handler(DocumentFormat::from_path(source));
        match handler.extract_cover(source) {
            Ok(Some(data)) => match decode(&data) {
                Ok(img) => return img,
                Err(e) => {
                    tracing::debug!(path = %source.display(), error = %e, "Embedded cover unreadable")
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(path = %source.display(), error = %e, "Failed to extract cover")
            }
        }
        DynamicImage::ImageRgba8(generate_default_cover(title))
    }

    fn write_size(&self, img: &DynamicImage, id: i64, size: CoverSize, width: u32) -> Result<()> {
        let resized = resize_to_width(img, width);
        let path = self.covers.prepare_path(id, size)?;
        resized.save_with_format(&path, image::ImageFormat::Png)?;
        Ok(())
    }
}

impl ThumbnailRenderer for CoverRenderer {
    fn render(&self, source: &Path, id: i64, title: &str) -> Result<()> {
        let img = Self::source_image(source, title);

        self.write_size(&img, id, CoverSize::Normal, self.normal_width)?;
        if let Err(e) = self.write_size(&img, id, CoverSize::Mini, self.mini_width) {
            self.covers.remove(id);
            return Err(e);
        }

        tracing::debug!(id, "Rendered thumbnails");
        Ok(())
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AppError::Internal(format!("Failed to read image: {}", e)))?
        .decode()
        .map_err(AppError::from)
}

/// Resize to a target width, keeping the aspect ratio.
fn resize_to_width(img: &DynamicImage, target_width: u32) -> DynamicImage {
    let scale = target_width as f32 / img.width().max(1) as f32;
    let new_height = ((img.height() as f32 * scale) as u32).max(1);
    img.resize_exact(
        target_width,
        new_height,
        image::imageops::FilterType::Lanczos3,
    )
}

/// Gradient cover coloured from the title.
fn generate_default_cover(title: &str) -> RgbaImage {
    let hash = title
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_add(b as u32));
    let hue = (hash % 360) as f32;
    let (r, g, b) = hsv_to_rgb(hue, 0.4, 0.5);

    RgbaImage::from_fn(GENERATED_WIDTH, GENERATED_HEIGHT, |_, y| {
        let factor = 1.0 - (y as f32 / GENERATED_HEIGHT as f32) * 0.3;
        Rgba([
            (r as f32 * factor) as u8,
            (g as f32 * factor) as u8,
            (b as f32 * factor) as u8,
            255,
        ])
    })
}

/// Convert HSV to RGB.
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
