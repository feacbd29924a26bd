//! Render scheduling
//!
//! Everything that decides when frames happen:
//! - Clock: clamped frame-to-frame steps
//! - Vsync: frame timers and one-shot frame callbacks
//! - Host: GPU and software render hosts
//! - Thread: the render worker and its lifecycle handle

pub mod clock;
pub mod vsync;
pub mod host;
pub mod thread;

pub use clock::FrameClock;
pub use host::{FrameSink, RenderHost, SoftwareHost, WgpuHost};
pub use thread::{RenderThread, SchedulerState};
pub use vsync::{FrameCallback, FrameDriver, FrameTimer, HostFrameTimer, VsyncTimer};
