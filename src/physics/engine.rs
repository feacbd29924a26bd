//! Simulation engine abstraction and the per-tick sequencing shared by
//! every engine implementation.
//!
//! An engine owns the two fields and knows how to run the passes on its
//! backend. What happens in which order (touch splats, drips, advection,
//! drops) is decided here by [`SimulationCore`], so the GPU engine and the
//! software engine produce the same sequence of writes for the same seed
//! and input.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::SimulationParameters;
use crate::physics::drops::DropPool;
use crate::physics::field::SimResolution;
use crate::physics::touch::TouchEvent;

/// One additive Gaussian update of a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplatOp {
    /// Add `force * exp(-d²/r²)` to the velocity field.
    Velocity {
        point: [f32; 2],
        force: [f32; 2],
        radius: f32,
    },
    /// Add `amount * exp(-d²/r²)` to the mask, clamped to [0, 1].
    Mask {
        point: [f32; 2],
        radius: f32,
        amount: f32,
    },
}

/// Randomness, drops and clock of a running simulation.
pub struct SimulationCore {
    params: SimulationParameters,
    rng: ChaCha8Rng,
    drops: DropPool,
    time: f32,
}

impl SimulationCore {
    pub fn new(params: SimulationParameters) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let drops = DropPool::new(params.drop_count as usize, &mut rng);
        Self {
            params,
            rng,
            drops,
            time: 0.0,
        }
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    /// Accumulated simulation time in seconds.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn drops(&self) -> &DropPool {
        &self.drops
    }

    /// Start a tick: advance the clock and return the splats that precede
    /// advection (touch splats, then an occasional drip).
    pub fn begin_tick(&mut self, dt: f32, touches: &[TouchEvent]) -> Vec<SplatOp> {
        self.time += dt;

        let p = &self.params;
        let mut ops = Vec::with_capacity(touches.len() * 2 + 2);
        for touch in touches {
            ops.push(SplatOp::Velocity {
                point: [touch.x, touch.y],
                force: [touch.dx * p.touch_force, touch.dy * p.touch_force],
                radius: p.touch_velocity_radius,
            });
            ops.push(SplatOp::Mask {
                point: [touch.x, touch.y],
                radius: p.touch_mask_radius,
                amount: p.touch_mask_amount,
            });
        }

        if self.rng.r#gen::<f32>() < p.drip_probability {
            let x = self.rng.gen_range(0.1..0.9);
            let y = self.rng.gen_range(0.92..0.97);
            let radius = self.rng.gen_range(0.07..0.13);
            let jitter = (self.rng.r#gen::<f32>() - 0.5) * p.drip_jitter;
            ops.push(SplatOp::Mask {
                point: [x, y],
                radius,
                amount: p.drip_mask_amount,
            });
            ops.push(SplatOp::Velocity {
                point: [x, y],
                force: [jitter, p.drip_fall_speed],
                radius,
            });
        }

        ops
    }

    /// Advance the drops and return the splats they leave behind.
    pub fn update_drops(&mut self, dt: f32) -> Vec<SplatOp> {
        self.drops.update(dt, &mut self.rng);

        let p = &self.params;
        let mut ops = Vec::with_capacity(self.drops.len() * 2);
        for drop in self.drops.drops() {
            ops.push(SplatOp::Mask {
                point: [drop.x, drop.y],
                radius: drop.radius,
                amount: p.drop_mask_amount,
            });
            ops.push(SplatOp::Velocity {
                point: [drop.x, drop.y],
                force: [0.0, p.drop_fall_speed],
                radius: drop.radius * p.drop_velocity_radius_scale,
            });
        }
        ops
    }
}

/// A field simulation that composites into targets of type `T`.
///
/// Implementations are selected at construction; the render scheduler only
/// sees this trait.
pub trait SimulationEngine<T: ?Sized> {
    /// Record a new surface size. Returns `true` when the simulation grid
    /// was reallocated (and the mask reseeded).
    fn on_resize(&mut self, width: u32, height: u32) -> Result<bool, EngineError>;

    /// Advance the simulation by `dt` seconds, applying `touches`, and
    /// composite the result into `target`.
    fn tick(&mut self, dt: f32, touches: &[TouchEvent], target: &mut T) -> Result<(), EngineError>;

    /// Drop every resource held by the engine. Further ticks are no-ops.
    fn release(&mut self);

    /// Current simulation grid size, if a surface size is known.
    fn resolution(&self) -> Option<SimResolution>;
}

/// Errors raised by engines and hosts.
#[derive(Debug)]
pub enum EngineError {
    /// No GPU adapter satisfies the request
    NoAdapter,
    /// Device request failed
    Device(String),
    /// A shader program failed to compile or link
    ShaderCompile { program: &'static str, message: String },
    /// Field targets could not be allocated in any format
    TargetAllocation(String),
    /// The presentable surface could not be created or used
    Surface(String),
    /// The GPU ran out of memory
    OutOfMemory,
    /// The render worker could not be started or died
    Worker(String),
}

impl EngineError {
    /// Whether the scheduler must stop rendering after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Surface(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NoAdapter => write!(f, "No suitable GPU adapter found"),
            EngineError::Device(msg) => write!(f, "Failed to create GPU device: {}", msg),
            EngineError::ShaderCompile { program, message } => {
                write!(f, "Shader program '{}' failed to build: {}", program, message)
            }
            EngineError::TargetAllocation(msg) => {
                write!(f, "Failed to allocate field targets: {}", msg)
            }
            EngineError::Surface(msg) => write!(f, "Surface error: {}", msg),
            EngineError::OutOfMemory => write!(f, "GPU out of memory"),
            EngineError::Worker(msg) => write!(f, "Render worker failed: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}
