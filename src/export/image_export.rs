//! PNG export of composited frames.
//!
//! The composite produces premultiplied alpha; PNG stores straight alpha,
//! so frames are unpremultiplied before saving.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbaImage;

/// Errors that can occur during export
#[derive(Debug)]
pub enum ExportError {
    /// Pixel data does not match the stated dimensions
    BufferSize { expected: usize, actual: usize },
    /// Zero-sized frame
    InvalidDimensions { width: u32, height: u32 },
    /// Output directory could not be created
    Directory { path: PathBuf, error: std::io::Error },
    /// Encoding or writing the PNG failed
    Save { path: PathBuf, error: image::ImageError },
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::BufferSize { expected, actual } => {
                write!(f, "Frame data is {} bytes, expected {}", actual, expected)
            }
            ExportError::InvalidDimensions { width, height } => {
                write!(f, "Invalid dimensions: {}x{}", width, height)
            }
            ExportError::Directory { path, error } => {
                write!(f, "Failed to create '{}': {}", path.display(), error)
            }
            ExportError::Save { path, error } => {
                write!(f, "Failed to save '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Directory { error, .. } => Some(error),
            ExportError::Save { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Export premultiplied RGBA pixel data to a PNG file.
///
/// # Arguments
/// * `path` - Output file path
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
/// * `data` - RGBA u8 pixel data, row 0 at the top (length `width * height * 4`)
pub fn export_frame<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    data: &[u8],
) -> Result<(), ExportError> {
    if width == 0 || height == 0 {
        return Err(ExportError::InvalidDimensions { width, height });
    }

    let expected = width as usize * height as usize * 4;
    if data.len() != expected {
        return Err(ExportError::BufferSize {
            expected,
            actual: data.len(),
        });
    }

    let frame = RgbaImage::from_raw(width, height, data.to_vec()).ok_or(
        ExportError::BufferSize {
            expected,
            actual: data.len(),
        },
    )?;
    export_image(path, &frame)
}

/// Export a premultiplied frame to a PNG file.
pub fn export_image<P: AsRef<Path>>(path: P, frame: &RgbaImage) -> Result<(), ExportError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(ExportError::InvalidDimensions { width, height });
    }
    let mut straight = frame.clone();
    unpremultiply(&mut straight);
    straight.save(path.as_ref()).map_err(|error| ExportError::Save {
        path: path.as_ref().to_path_buf(),
        error,
    })
}

/// Convert premultiplied RGBA to straight alpha in place.
pub fn unpremultiply(frame: &mut RgbaImage) {
    for pixel in frame.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        if a == 0 || a == 255 {
            continue;
        }
        let scale = |c: u8| ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
        pixel.0 = [scale(r), scale(g), scale(b), a];
    }
}

/// Numbered PNG frames in one directory: `<prefix>_0000.png`, ...
pub struct FrameSequence {
    directory: PathBuf,
    prefix: String,
    next: u32,
}

impl FrameSequence {
    /// Create the directory if needed.
    pub fn new<P: AsRef<Path>>(directory: P, prefix: &str) -> Result<Self, ExportError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|error| ExportError::Directory {
            path: directory.clone(),
            error,
        })?;
        Ok(Self {
            directory,
            prefix: prefix.to_string(),
            next: 0,
        })
    }

    /// Path the next frame will be written to.
    pub fn next_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}_{:04}.png", self.prefix, self.next))
    }

    /// Write `frame` and advance the counter.
    pub fn write(&mut self, frame: &RgbaImage) -> Result<PathBuf, ExportError> {
        let path = self.next_path();
        export_image(&path, frame)?;
        log::debug!("Wrote {}", path.display());
        self.next += 1;
        Ok(path)
    }

    /// Number of frames written so far.
    pub fn written(&self) -> u32 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_export_frame() {
        let red_pixel = [255u8, 0, 0, 255];
        let data: Vec<u8> = red_pixel.iter().cycle().take(16).copied().collect();

        let path = std::env::temp_dir().join("paint_wallpaper_export_test.png");
        export_frame(&path, 2, 2, &data).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(1, 1).0, red_pixel);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_dimensions() {
        let result = export_frame("/tmp/paint_wallpaper_zero.png", 0, 100, &[]);
        assert!(matches!(result, Err(ExportError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_wrong_data_length() {
        let result = export_frame("/tmp/paint_wallpaper_short.png", 10, 10, &[0u8; 100]);
        assert!(matches!(
            result,
            Err(ExportError::BufferSize { expected: 400, actual: 100 })
        ));
    }

    #[test]
    fn test_unpremultiply() {
        let mut frame = RgbaImage::new(3, 1);
        frame.put_pixel(0, 0, Rgba([64, 32, 0, 128]));
        frame.put_pixel(1, 0, Rgba([5, 5, 5, 0]));
        frame.put_pixel(2, 0, Rgba([10, 20, 30, 255]));
        unpremultiply(&mut frame);
        assert_eq!(frame.get_pixel(0, 0).0, [128, 64, 0, 128]);
        assert_eq!(frame.get_pixel(1, 0).0, [5, 5, 5, 0]);
        assert_eq!(frame.get_pixel(2, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_frame_sequence_numbering() {
        let dir = std::env::temp_dir().join("paint_wallpaper_sequence_test");
        let _ = fs::remove_dir_all(&dir);
        let mut sequence = FrameSequence::new(&dir, "frame").unwrap();
        let frame = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));

        let first = sequence.write(&frame).unwrap();
        let second = sequence.write(&frame).unwrap();
        assert!(first.ends_with("frame_0000.png"));
        assert!(second.ends_with("frame_0001.png"));
        assert!(second.exists());
        assert_eq!(sequence.written(), 2);

        let _ = fs::remove_dir_all(&dir);
    }
}
