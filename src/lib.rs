//! Paint Wallpaper Library
//!
//! Touch-reactive paint simulation rendered as a live background:
//! - Double-buffered velocity and mask fields
//! - Splat, advection and composite passes on the GPU or CPU
//! - A render worker thread that owns every GPU resource

pub mod assets;
pub mod config;
pub mod export;
pub mod physics;
pub mod render;
pub mod scheduler;

pub use config::WallpaperConfig;
