//! Recycled falling drops.
//!
//! Drops fall at their own speed and re-enter above the top edge once they
//! leave the bottom; they are never destroyed.

use rand::Rng;

/// Drops below this height are recycled.
pub const RECYCLE_BELOW: f32 = -0.05;
/// Re-entry height range.
pub const REENTRY_Y: (f32, f32) = (1.02, 1.22);
/// Fall speed range (UV units per second).
pub const FALL_SPEED: (f32, f32) = (0.08, 0.36);
/// Radius range (UV units).
pub const RADIUS: (f32, f32) = (0.01, 0.035);
/// Height range of freshly seeded drops.
pub const INITIAL_Y: (f32, f32) = (0.1, 0.95);

/// A single falling drop in simulation UV space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drop {
    pub x: f32,
    pub y: f32,
    pub vy: f32,
    pub radius: f32,
}

fn in_range<R: Rng + ?Sized>(rng: &mut R, range: (f32, f32)) -> f32 {
    rng.gen_range(range.0..range.1)
}

impl Drop {
    /// A drop somewhere on screen.
    pub fn seeded<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let x = rng.r#gen::<f32>();
        let y = in_range(rng, INITIAL_Y);
        let vy = in_range(rng, FALL_SPEED);
        let radius = in_range(rng, RADIUS);
        Self { x, y, vy, radius }
    }

    /// Move the drop above the top edge with fresh randomized properties.
    pub fn recycle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.y = in_range(rng, REENTRY_Y);
        self.x = rng.r#gen::<f32>();
        self.vy = in_range(rng, FALL_SPEED);
        self.radius = in_range(rng, RADIUS);
    }

    /// Integrate one step; recycles the drop once it fell off the bottom.
    pub fn advance<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) {
        self.y -= self.vy * dt;
        if self.y < RECYCLE_BELOW {
            self.recycle(rng);
        }
    }
}

/// Fixed-size pool of drops.
#[derive(Debug, Clone, Default)]
pub struct DropPool {
    drops: Vec<Drop>,
}

impl DropPool {
    /// Seed `count` drops.
    pub fn new<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Self {
        let drops = (0..count).map(|_| Drop::seeded(rng)).collect();
        Self { drops }
    }

    /// Advance every drop.
    pub fn update<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) {
        for drop in &mut self.drops {
            drop.advance(dt, rng);
        }
    }

    pub fn drops(&self) -> &[Drop] {
        &self.drops
    }

    pub fn len(&self) -> usize {
        self.drops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drops.is_empty()
    }
}
