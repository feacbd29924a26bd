//! Simulation modules
//!
//! Backend-independent parts of the paint simulation:
//! - Field: double-buffered fields and simulation resolution
//! - Touch: pointer events and the cross-thread touch queue
//! - Drops: recycled falling drops
//! - Engine: per-tick sequencing and the engine trait
//! - Kernels: splat, hash and shading helpers
//! - Software: CPU implementation of every pass

pub mod field;
pub mod touch;
pub mod drops;
pub mod engine;
pub mod kernels;
pub mod software;

pub use engine::{EngineError, SimulationCore, SimulationEngine, SplatOp};
pub use field::{Field, ResolutionTracker, SimResolution};
pub use software::SoftwareEngine;
pub use touch::{TouchEvent, TouchQueue, TouchTracker};
