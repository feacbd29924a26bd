//! Reference image loading.
//!
//! Two optional images shape the look of the wallpaper: a foreground
//! "paint" pattern that seeds the mask and colors the paint, and a
//! background "glass" pattern faintly visible everywhere. Both are loaded
//! once, best-effort; a missing or unreadable foreground is replaced by a
//! procedural gradient and a missing background is simply absent.

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::config::AssetParameters;

/// Size of the procedural foreground fallback.
pub const FALLBACK_SIZE: u32 = 256;

/// Static images sampled by the simulation and the composite.
#[derive(Debug, Clone)]
pub struct ReferenceImages {
    /// Foreground pattern (always present)
    pub paint: RgbaImage,
    /// Background pattern, if one was found
    pub glass: Option<RgbaImage>,
    /// Whether `paint` is the procedural fallback
    pub paint_is_fallback: bool,
}

impl ReferenceImages {
    /// Load both images from the configured directory.
    pub fn load(params: &AssetParameters) -> Self {
        let paint = load_image(&params.directory.join(&params.paint_image));
        let glass = load_image(&params.directory.join(&params.glass_image));

        let paint_is_fallback = paint.is_none();
        if paint_is_fallback {
            log::warn!(
                "Foreground reference '{}' unavailable, using procedural gradient",
                params.paint_image
            );
        }
        if glass.is_none() {
            log::info!("No background reference '{}'", params.glass_image);
        }

        Self {
            paint: paint.unwrap_or_else(|| gradient_image(FALLBACK_SIZE, FALLBACK_SIZE)),
            glass,
            paint_is_fallback,
        }
    }

    /// Procedural foreground and no background.
    pub fn fallback() -> Self {
        Self {
            paint: gradient_image(FALLBACK_SIZE, FALLBACK_SIZE),
            glass: None,
            paint_is_fallback: true,
        }
    }

    /// Use explicit images.
    pub fn from_images(paint: RgbaImage, glass: Option<RgbaImage>) -> Self {
        Self {
            paint,
            glass,
            paint_is_fallback: false,
        }
    }

    pub fn has_glass(&self) -> bool {
        self.glass.is_some()
    }
}

fn load_image(path: &Path) -> Option<RgbaImage> {
    match image::open(path) {
        Ok(decoded) => {
            let rgba = decoded.to_rgba8();
            log::debug!(
                "Loaded reference image {} ({}x{})",
                path.display(),
                rgba.width(),
                rgba.height()
            );
            Some(rgba)
        }
        Err(error) => {
            log::debug!("Could not load {}: {}", path.display(), error);
            None
        }
    }
}

/// Opaque diagonal color gradient used when no foreground image exists.
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    let span = |n: u32| (n.max(2) - 1) as f32;
    RgbaImage::from_fn(width, height, |x, y| {
        let fx = x as f32 / span(width);
        let fy = y as f32 / span(height);
        let r = (1.2 * (1.0 - fx) + 0.2 * fy).min(1.0);
        let g = (0.4 + 0.6 * fx).min(1.0);
        let b = (0.8 * fx + 0.2 * (1.0 - fy)).min(1.0);
        Rgba([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8, 255])
    })
}

/// Single-color image.
pub fn solid_image(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}
