//! Software implementation of the field simulation.
//!
//! Runs the same passes as the GPU engine on plain `Vec` grids and
//! composites into an `RgbaImage`. Used for headless rendering and as the
//! reference the GPU passes are checked against.

use glam::{Vec2, Vec3};
use image::{Rgba, RgbaImage};
use std::ops::{Add, Mul};

use crate::assets::ReferenceImages;
use crate::config::{CompositeParameters, WallpaperConfig};
use crate::physics::engine::{EngineError, SimulationCore, SimulationEngine, SplatOp};
use crate::physics::field::{Field, ResolutionTracker, SimResolution};
use crate::physics::kernels::{
    gaussian, hash, mask_from_color, reflect, sample_rgba, smoothstep, to_tex,
};
use crate::physics::touch::TouchEvent;

/// Splats skip texels farther than this many radii (weight below 1e-7).
const SPLAT_CUTOFF: f32 = 4.0;

/// Row-major grid with row 0 at the bottom (simulation UV space).
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T> Grid<T>
where
    T: Copy + Default + Add<Output = T> + Mul<f32, Output = T>,
{
    pub fn new(res: SimResolution) -> Self {
        Self {
            width: res.width,
            height: res.height,
            data: vec![T::default(); res.cells()],
        }
    }

    pub fn resolution(&self) -> SimResolution {
        SimResolution {
            width: self.width,
            height: self.height,
        }
    }

    #[inline]
    fn index(&self, i: u32, j: u32) -> usize {
        j as usize * self.width as usize + i as usize
    }

    /// Value of texel `(i, j)`, `j` counted from the bottom.
    #[inline]
    pub fn get(&self, i: u32, j: u32) -> T {
        self.data[self.index(i, j)]
    }

    #[inline]
    pub fn set(&mut self, i: u32, j: u32, value: T) {
        let index = self.index(i, j);
        self.data[index] = value;
    }

    /// Center of texel `(i, j)` in UV space.
    #[inline]
    pub fn texel_center(&self, i: u32, j: u32) -> Vec2 {
        Vec2::new(
            (i as f32 + 0.5) / self.width as f32,
            (j as f32 + 0.5) / self.height as f32,
        )
    }

    /// Bilinear, clamp-to-edge sample at UV coordinates.
    pub fn sample(&self, uv: Vec2) -> T {
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let max_i = self.width as i64 - 1;
        let max_j = self.height as i64 - 1;
        let fetch = |i: i64, j: i64| self.get(i.clamp(0, max_i) as u32, j.clamp(0, max_j) as u32);
        let (i0, j0) = (x0 as i64, y0 as i64);

        let lower = fetch(i0, j0) * (1.0 - fx) + fetch(i0 + 1, j0) * fx;
        let upper = fetch(i0, j0 + 1) * (1.0 - fx) + fetch(i0 + 1, j0 + 1) * fx;
        lower * (1.0 - fy) + upper * fy
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    fn copy_from(&mut self, other: &Self) {
        self.data.copy_from_slice(&other.data);
    }

    /// Texel index range covering `center ± extent` along one axis.
    fn span(center: f32, extent: f32, size: u32) -> std::ops::Range<u32> {
        let lo = ((center - extent) * size as f32 - 0.5).floor().max(0.0) as u32;
        let hi = ((center + extent) * size as f32 + 0.5).ceil().max(0.0) as u32;
        lo.min(size)..hi.min(size)
    }
}

/// The simulation running on the CPU.
pub struct SoftwareEngine {
    core: SimulationCore,
    composite: CompositeParameters,
    references: ReferenceImages,
    tracker: ResolutionTracker,
    sim_scale: f32,
    velocity: Option<Field<Grid<Vec2>>>,
    mask: Option<Field<Grid<f32>>>,
    released: bool,
}

impl SoftwareEngine {
    pub fn new(config: &WallpaperConfig, references: ReferenceImages) -> Self {
        Self {
            core: SimulationCore::new(config.simulation.clone()),
            composite: config.composite.clone(),
            references,
            tracker: ResolutionTracker::default(),
            sim_scale: config.simulation.sim_scale,
            velocity: None,
            mask: None,
            released: false,
        }
    }

    pub fn core(&self) -> &SimulationCore {
        &self.core
    }

    pub fn velocity(&self) -> Option<&Field<Grid<Vec2>>> {
        self.velocity.as_ref()
    }

    pub fn mask(&self) -> Option<&Field<Grid<f32>>> {
        self.mask.as_ref()
    }

    /// Surface size last passed to `on_resize`.
    pub fn surface_size(&self) -> (u32, u32) {
        self.tracker.surface()
    }

    fn allocate(&mut self, res: SimResolution) {
        log::debug!("Allocating software fields at {}x{}", res.width, res.height);
        self.velocity = Some(Field::new(Grid::new(res), Grid::new(res)));

        let mut seeded = Grid::<f32>::new(res);
        for j in 0..res.height {
            for i in 0..res.width {
                let uv = seeded.texel_center(i, j);
                let color = sample_rgba(&self.references.paint, to_tex(uv)).truncate();
                seeded.set(i, j, mask_from_color(color));
            }
        }
        self.mask = Some(Field::new(seeded.clone(), seeded));
    }

    /// Apply one splat to its field.
    pub fn splat(&mut self, op: SplatOp) {
        match op {
            SplatOp::Velocity { point, force, radius } => {
                if let Some(field) = self.velocity.as_mut() {
                    let force = Vec2::from(force);
                    splat_field(field, Vec2::from(point), radius, |value, w| value + force * w);
                }
            }
            SplatOp::Mask { point, radius, amount } => {
                if let Some(field) = self.mask.as_mut() {
                    splat_field(field, Vec2::from(point), radius, |value, w| {
                        (value + amount * w).clamp(0.0, 1.0)
                    });
                }
            }
        }
    }

    /// Semi-Lagrangian advection of velocity along itself, with damping,
    /// mask-weighted noise and gravity.
    pub fn advect_velocity(&mut self, dt: f32) {
        let (Some(velocity), Some(mask)) = (self.velocity.as_mut(), self.mask.as_ref()) else {
            return;
        };
        let params = self.core.params();
        let time = self.core.time();
        let mask = mask.current();

        let (src, dst) = velocity.split();
        let res = src.resolution();
        for j in 0..res.height {
            for i in 0..res.width {
                let uv = src.texel_center(i, j);
                let prev = (uv - src.get(i, j) * dt).clamp(Vec2::ZERO, Vec2::ONE);
                let mut advected = src.sample(prev) * params.velocity_dissipation;

                let m = mask.get(i, j);
                let noise = hash(uv * 8.0 + time * 0.2) - 0.5;
                advected.x += noise * params.noise_strength * (0.2 + m);
                advected.y += params.gravity * dt * (0.2 + m);
                dst.set(i, j, advected);
            }
        }
        velocity.flip();
    }

    /// Advect the mask along the current velocity, snapping faint values
    /// to zero.
    pub fn advect_mask(&mut self, dt: f32) {
        let (Some(velocity), Some(mask)) = (self.velocity.as_ref(), self.mask.as_mut()) else {
            return;
        };
        let params = self.core.params();
        let velocity = velocity.current();

        let (src, dst) = mask.split();
        let res = src.resolution();
        for j in 0..res.height {
            for i in 0..res.width {
                let uv = src.texel_center(i, j);
                let prev = (uv - velocity.get(i, j) * dt).clamp(Vec2::ZERO, Vec2::ONE);
                dst.set(i, j, advect_mask_value(src.sample(prev), params.mask_dissipation, params.mask_threshold));
            }
        }
        mask.flip();
    }

    /// Composite the current mask into `target` at the target's size.
    pub fn composite(&self, target: &mut RgbaImage) {
        let Some(mask) = self.mask.as_ref() else {
            return;
        };
        let mask = mask.current();
        let texel = Vec2::from(mask.resolution().texel());
        let p = &self.composite;
        let time = self.core.time();
        let light = Vec3::from(p.light_direction).normalize_or_zero();
        let (width, height) = target.dimensions();

        for row in 0..height {
            for col in 0..width {
                let uv = Vec2::new(
                    (col as f32 + 0.5) / width as f32,
                    1.0 - (row as f32 + 0.5) / height as f32,
                );
                let glass = self
                    .references
                    .glass
                    .as_ref()
                    .map(|glass| sample_rgba(glass, to_tex(uv)).truncate() * p.glass_strength)
                    .unwrap_or(Vec3::ZERO);

                let m = mask.sample(uv);
                let (color, alpha) = if m < p.dry_epsilon {
                    let grain = hash(uv * 512.0 + time * 0.05) * p.grain;
                    (glass + Vec3::splat(grain), 0.0)
                } else {
                    let dx = Vec2::new(texel.x, 0.0);
                    let dy = Vec2::new(0.0, texel.y);
                    let mx = mask.sample(uv + dx) - mask.sample(uv - dx);
                    let my = mask.sample(uv + dy) - mask.sample(uv - dy);

                    let refracted = (uv + Vec2::new(mx, my) * p.refraction).clamp(Vec2::ZERO, Vec2::ONE);
                    let paint = sample_rgba(&self.references.paint, to_tex(refracted));
                    let alpha = smoothstep(p.alpha_range[0], p.alpha_range[1], m);
                    let base = paint.truncate() * alpha;

                    let normal = Vec3::new(-mx * p.normal_strength, -my * p.normal_strength, 1.0).normalize();
                    let spec = reflect(-light, normal).dot(Vec3::Z).max(0.0).powf(p.specular_power);
                    let highlight = Vec3::splat(spec * p.specular_strength * alpha);

                    (base + highlight + glass, alpha)
                };

                target.put_pixel(col, row, to_rgba8(color, alpha));
            }
        }
    }
}

/// Resampled mask after dissipation, with values under `threshold`
/// snapped to exactly zero.
#[inline]
pub fn advect_mask_value(sampled: f32, dissipation: f32, threshold: f32) -> f32 {
    let m = sampled * dissipation;
    if m < threshold { 0.0 } else { m }
}

fn splat_field<T, F>(field: &mut Field<Grid<T>>, point: Vec2, radius: f32, apply: F)
where
    T: Copy + Default + Add<Output = T> + Mul<f32, Output = T>,
    F: Fn(T, f32) -> T,
{
    let (src, dst) = field.split();
    dst.copy_from(src);
    let res = src.resolution();
    let extent = radius.abs() * SPLAT_CUTOFF;
    for j in Grid::<T>::span(point.y, extent, res.height) {
        for i in Grid::<T>::span(point.x, extent, res.width) {
            let uv = src.texel_center(i, j);
            let w = gaussian(uv.distance_squared(point), radius);
            dst.set(i, j, apply(src.get(i, j), w));
        }
    }
    field.flip();
}

fn to_rgba8(color: Vec3, alpha: f32) -> Rgba<u8> {
    let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([quantize(color.x), quantize(color.y), quantize(color.z), quantize(alpha)])
}

impl SimulationEngine<RgbaImage> for SoftwareEngine {
    fn on_resize(&mut self, width: u32, height: u32) -> Result<bool, EngineError> {
        if self.released {
            return Ok(false);
        }
        match self.tracker.update(width, height, self.sim_scale) {
            Some(res) => {
                self.allocate(res);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn tick(&mut self, dt: f32, touches: &[TouchEvent], target: &mut RgbaImage) -> Result<(), EngineError> {
        if self.released || self.mask.is_none() {
            return Ok(());
        }

        for op in self.core.begin_tick(dt, touches) {
            self.splat(op);
        }
        self.advect_velocity(dt);
        self.advect_mask(dt);
        for op in self.core.update_drops(dt) {
            self.splat(op);
        }
        self.composite(target);
        Ok(())
    }

    fn release(&mut self) {
        self.velocity = None;
        self.mask = None;
        self.tracker.invalidate();
        self.released = true;
    }

    fn resolution(&self) -> Option<SimResolution> {
        self.tracker.sim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::solid_image;
    use crate::config::SimulationParameters;

    fn quiet_config() -> WallpaperConfig {
        WallpaperConfig {
            simulation: SimulationParameters {
                drip_probability: 0.0,
                drop_count: 0,
                ..SimulationParameters::default()
            },
            ..WallpaperConfig::default()
        }
    }

    fn blank_engine(width: u32, height: u32) -> SoftwareEngine {
        let refs = ReferenceImages::from_images(solid_image(1, 1, [0, 0, 0, 255]), None);
        let mut engine = SoftwareEngine::new(&quiet_config(), refs);
        engine.on_resize(width, height).unwrap();
        engine
    }

    #[test]
    fn test_grid_sample_reproduces_texel_centers() {
        let res = SimResolution { width: 4, height: 3 };
        let mut grid = Grid::<f32>::new(res);
        for j in 0..3 {
            for i in 0..4 {
                grid.set(i, j, (i + 10 * j) as f32);
            }
        }
        for j in 0..3 {
            for i in 0..4 {
                let sampled = grid.sample(grid.texel_center(i, j));
                assert!((sampled - (i + 10 * j) as f32).abs() < 1e-4);
            }
        }
        // x halfway between columns 0 and 1, y exactly on row 1
        let mid = grid.sample(Vec2::new(0.25, 0.5));
        assert!((mid - 10.5).abs() < 1e-4);
    }

    #[test]
    fn test_resize_reallocates_only_on_change() {
        let mut engine = blank_engine(100, 80);
        assert_eq!(engine.resolution(), Some(SimResolution { width: 50, height: 40 }));
        assert!(!engine.on_resize(101, 81).unwrap());
        assert!(engine.on_resize(0, 0).unwrap());
        assert_eq!(engine.resolution(), Some(SimResolution { width: 1, height: 1 }));
    }

    #[test]
    fn test_mask_seeded_from_reference() {
        let refs = ReferenceImages::from_images(solid_image(2, 2, [255, 255, 255, 255]), None);
        let mut engine = SoftwareEngine::new(&quiet_config(), refs);
        engine.on_resize(20, 20).unwrap();
        let mask = engine.mask().unwrap();
        assert_eq!(mask.src(), 0);
        assert!(mask.current().data().iter().all(|&m| (m - 1.0).abs() < 1e-5));
        assert_eq!(mask.slots()[0], mask.slots()[1]);
    }

    #[test]
    fn test_splat_flips_src() {
        let mut engine = blank_engine(64, 64);
        let before = engine.velocity().unwrap().src();
        engine.splat(SplatOp::Velocity { point: [0.5, 0.5], force: [1.0, 0.0], radius: 0.1 });
        assert_eq!(engine.velocity().unwrap().src(), 1 - before);

        let before = engine.mask().unwrap().src();
        engine.splat(SplatOp::Mask { point: [0.5, 0.5], radius: 0.1, amount: 0.5 });
        assert_eq!(engine.mask().unwrap().src(), 1 - before);

        let vel_before = engine.velocity().unwrap().src();
        engine.advect_velocity(0.016);
        assert_eq!(engine.velocity().unwrap().src(), 1 - vel_before);

        let mask_before = engine.mask().unwrap().src();
        engine.advect_mask(0.016);
        assert_eq!(engine.mask().unwrap().src(), 1 - mask_before);
    }

    #[test]
    fn test_mask_splat_clamps() {
        let mut engine = blank_engine(32, 32);
        for _ in 0..10 {
            engine.splat(SplatOp::Mask { point: [0.5, 0.5], radius: 0.2, amount: 0.5 });
        }
        let mask = engine.mask().unwrap().current();
        assert!(mask.data().iter().all(|&m| (0.0..=1.0).contains(&m)));
        assert!((mask.sample(Vec2::splat(0.5)) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_threshold_snaps_to_zero() {
        for sampled in [0.0, 0.001, 0.003, 0.004, 0.0040039, 0.01, 0.5] {
            let out = advect_mask_value(sampled, 0.999, 0.004);
            if sampled * 0.999 < 0.004 {
                assert_eq!(out, 0.0, "sampled {}", sampled);
            } else {
                assert!((out - sampled * 0.999).abs() < 1e-7);
            }
        }
    }

    #[test]
    fn test_faint_mask_vanishes_after_advection() {
        let mut engine = blank_engine(16, 16);
        engine.splat(SplatOp::Mask { point: [0.5, 0.5], radius: 10.0, amount: 0.004 });
        engine.advect_mask(0.016);
        assert!(engine.mask().unwrap().current().data().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_gravity_pulls_down() {
        let mut engine = blank_engine(16, 16);
        engine.advect_velocity(0.1);
        let velocity = engine.velocity().unwrap().current();
        // gravity * dt * 0.2 on an empty mask
        for v in velocity.data() {
            assert!((v.y - (-1.2 * 0.1 * 0.2)).abs() < 1e-5);
            assert!(v.x.abs() <= 0.5 * 0.08 * 0.2 + 1e-6);
        }
    }

    #[test]
    fn test_composite_dry_is_transparent() {
        let engine = blank_engine(8, 8);
        let mut frame = RgbaImage::new(8, 8);
        engine.composite(&mut frame);
        assert!(frame.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_composite_wet_is_opaque_paint() {
        let refs = ReferenceImages::from_images(solid_image(1, 1, [200, 100, 50, 255]), None);
        let mut engine = SoftwareEngine::new(&quiet_config(), refs);
        engine.on_resize(8, 8).unwrap();
        let mut frame = RgbaImage::new(8, 8);
        engine.composite(&mut frame);
        let pixel = frame.get_pixel(4, 4).0;
        assert_eq!(pixel[3], 255);
        // flat mask: no gradient, spec = (l.z reflected)^48, tiny
        assert!((pixel[0] as i32 - 200).abs() <= 2);
        assert!((pixel[1] as i32 - 100).abs() <= 2);
    }

    #[test]
    fn test_release_stops_ticks() {
        let mut engine = blank_engine(16, 16);
        engine.release();
        let mut frame = RgbaImage::new(4, 4);
        engine.tick(0.016, &[TouchEvent::new(0.5, 0.5, 0.1, 0.1)], &mut frame).unwrap();
        assert!(engine.mask().is_none());
        assert_eq!(engine.resolution(), None);
        assert!(!engine.on_resize(100, 100).unwrap());
    }
}
