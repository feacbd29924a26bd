//! GPU rendering modules
//!
//! wgpu implementation of the paint simulation:
//! - Context: adapter, device and queue
//! - Targets: double-buffered field textures with format fallback
//! - Passes: WGSL programs, uniform arena and the shared quad
//! - GPU Engine: per-tick pass planning and compositing
//! - Headless: offscreen targets and texture readback

pub mod context;
pub mod targets;
pub mod passes;
pub mod gpu_engine;
pub mod headless;

pub use context::GpuContext;
pub use gpu_engine::GpuPaintEngine;
pub use headless::OffscreenTarget;
pub use targets::FieldPrecision;
