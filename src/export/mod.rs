//! Export modules
//!
//! Handles frame export:
//! - Image: PNG export of composited frames and numbered sequences

pub mod image_export;

pub use image_export::{export_frame, export_image, ExportError, FrameSequence};
