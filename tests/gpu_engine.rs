//! GPU engine tests against an offscreen target.
//!
//! Each test skips when no adapter is available (e.g. CI without a GPU).

use image::RgbaImage;

use paint_wallpaper::assets::{ReferenceImages, solid_image};
use paint_wallpaper::config::{SimulationParameters, WallpaperConfig};
use paint_wallpaper::physics::{SimResolution, SimulationEngine, SoftwareEngine, TouchEvent};
use paint_wallpaper::render::{FieldPrecision, GpuContext, GpuPaintEngine, OffscreenTarget};

const DT: f32 = 0.016;

fn quiet_config() -> WallpaperConfig {
    WallpaperConfig {
        simulation: SimulationParameters {
            drip_probability: 0.0,
            drop_count: 0,
            noise_strength: 0.0,
            ..SimulationParameters::default()
        },
        ..WallpaperConfig::default()
    }
}

/// GPU engine plus an offscreen target of the surface size.
struct GpuHarness {
    context: GpuContext,
    engine: GpuPaintEngine,
    target: OffscreenTarget,
    resolution: SimResolution,
}

impl GpuHarness {
    /// `None` when no adapter is available.
    async fn new(width: u32, height: u32, references: ReferenceImages) -> Option<Self> {
        let context = match GpuContext::headless().await {
            Ok(context) => context,
            Err(e) => {
                eprintln!("Skipping GPU test: {}", e);
                return None;
            }
        };
        let mut engine =
            GpuPaintEngine::new(&context, &quiet_config(), &references, OffscreenTarget::FORMAT)
                .ok()?;
        engine.on_resize(width, height).ok()?;
        let resolution = engine.resolution()?;
        let target = OffscreenTarget::new(&context.device, width, height);
        Some(Self {
            context,
            engine,
            target,
            resolution,
        })
    }

    fn tick(&mut self, touches: &[TouchEvent]) {
        self.engine
            .tick(DT, touches, self.target.view_mut())
            .unwrap();
    }

    fn frame(&self) -> RgbaImage {
        self.target
            .read(&self.context.device, &self.context.queue)
            .unwrap()
    }

    /// Readback index of the texel containing simulation point `(x, y)`.
    fn index(&self, x: f32, y: f32) -> usize {
        let SimResolution { width, height } = self.resolution;
        let col = ((x * width as f32) as u32).min(width - 1);
        // textures are stored top row first
        let row = (((1.0 - y) * height as f32) as u32).min(height - 1);
        (row * width + col) as usize
    }

    fn mask_at(&self, x: f32, y: f32) -> f32 {
        self.engine.read_mask().unwrap()[self.index(x, y)]
    }

    fn velocity_at(&self, x: f32, y: f32) -> [f32; 2] {
        self.engine.read_velocity().unwrap()[self.index(x, y)]
    }

    /// Readback tolerance of the allocated field precision.
    fn tolerance(&self) -> f32 {
        match self.engine.precision() {
            Some(FieldPrecision::Half) => 2e-3,
            _ => 2.0 / 255.0 * 16.0,
        }
    }
}

fn black() -> ReferenceImages {
    ReferenceImages::from_images(solid_image(4, 4, [0, 0, 0, 255]), None)
}

#[tokio::test]
async fn test_mask_initialized_from_reference() {
    let white = ReferenceImages::from_images(solid_image(4, 4, [255, 255, 255, 255]), None);
    let Some(harness) = GpuHarness::new(128, 256, white).await else {
        return;
    };
    assert_eq!(
        harness.resolution,
        SimResolution {
            width: 64,
            height: 128
        }
    );
    let mask = harness.engine.read_mask().unwrap();
    assert_eq!(mask.len(), 64 * 128);
    assert!(mask.iter().all(|&m| (m - 1.0).abs() < 0.01));

    let velocity = harness.engine.read_velocity().unwrap();
    let tolerance = harness.tolerance();
    assert!(velocity.iter().all(|v| v[0].abs() < tolerance && v[1].abs() < tolerance));
}

#[tokio::test]
async fn test_touch_splat_reaches_fields() {
    let Some(mut harness) = GpuHarness::new(256, 256, black()).await else {
        return;
    };
    let p = quiet_config().simulation;
    harness.tick(&[TouchEvent::new(0.5, 0.5, 0.01, -0.02)]);

    let tolerance = harness.tolerance();
    let [vx, vy] = harness.velocity_at(0.5, 0.5);
    let expected_x = 0.01 * p.touch_force * p.velocity_dissipation;
    let expected_y =
        -0.02 * p.touch_force * p.velocity_dissipation + p.gravity * DT * (0.2 + p.touch_mask_amount);
    assert!((vx - expected_x).abs() < tolerance, "vx {} expected {}", vx, expected_x);
    assert!((vy - expected_y).abs() < tolerance, "vy {} expected {}", vy, expected_y);

    let m = harness.mask_at(0.5, 0.5);
    assert!((m - p.touch_mask_amount * p.mask_dissipation).abs() < 0.01, "mask {}", m);
    assert_eq!(harness.mask_at(0.05, 0.05), 0.0);
}

#[tokio::test]
async fn test_passes_alternate_sources() {
    let Some(mut harness) = GpuHarness::new(64, 64, black()).await else {
        return;
    };
    assert_eq!(harness.engine.sources(), Some((0, 0)));
    harness.tick(&[]);
    assert_eq!(harness.engine.sources(), Some((1, 1)));
    harness.tick(&[TouchEvent::new(0.5, 0.5, 0.0, 0.0)]);
    assert_eq!(harness.engine.sources(), Some((1, 1)));
}

#[tokio::test]
async fn test_composite_shows_paint_only_where_wet() {
    let Some(mut harness) = GpuHarness::new(128, 128, black()).await else {
        return;
    };
    harness.tick(&[TouchEvent::new(0.5, 0.5, 0.0, 0.0)]);
    let frame = harness.frame();
    assert_eq!(frame.dimensions(), (128, 128));
    assert!(frame.get_pixel(64, 64).0[3] > 0);
    assert_eq!(frame.get_pixel(2, 2).0[3], 0);
    assert_eq!(frame.get_pixel(125, 125).0[3], 0);
}

#[tokio::test]
async fn test_gpu_matches_software_mask() {
    let Some(mut harness) = GpuHarness::new(128, 128, black()).await else {
        return;
    };
    let mut software = SoftwareEngine::new(&quiet_config(), black());
    software.on_resize(128, 128).unwrap();
    let mut frame = RgbaImage::new(16, 16);

    let strokes = [
        TouchEvent::new(0.4, 0.6, 0.02, 0.0),
        TouchEvent::new(0.45, 0.6, 0.02, -0.01),
        TouchEvent::new(0.5, 0.58, 0.02, -0.01),
    ];
    for touch in strokes {
        harness.tick(&[touch]);
        software.tick(DT, &[touch], &mut frame).unwrap();
    }

    let gpu = harness.engine.read_mask().unwrap();
    let cpu = software.mask().unwrap().current();
    let SimResolution { width, height } = harness.resolution;
    let mut worst = 0.0f32;
    for j in 0..height {
        for i in 0..width {
            // readback rows are top first, grid rows bottom first
            let g = gpu[((height - 1 - j) * width + i) as usize];
            worst = worst.max((g - cpu.get(i, j)).abs());
        }
    }
    assert!(worst < 0.03, "largest mask difference {}", worst);
}

#[tokio::test]
async fn test_output_format_change_keeps_simulation() {
    let Some(mut harness) = GpuHarness::new(64, 64, black()).await else {
        return;
    };
    harness.tick(&[TouchEvent::new(0.5, 0.5, 0.0, 0.0)]);
    let time = harness.engine.core().time();
    let sources = harness.engine.sources();
    let painted = harness.mask_at(0.5, 0.5);

    harness
        .engine
        .set_output_format(wgpu::TextureFormat::Bgra8Unorm)
        .unwrap();
    assert_eq!(harness.engine.output_format(), wgpu::TextureFormat::Bgra8Unorm);
    assert_eq!(harness.engine.core().time(), time);
    assert_eq!(harness.engine.sources(), sources);
    assert_eq!(harness.mask_at(0.5, 0.5), painted);

    // Back to the offscreen format: ticking continues from the same state.
    harness
        .engine
        .set_output_format(OffscreenTarget::FORMAT)
        .unwrap();
    harness.tick(&[]);
    assert!((harness.engine.core().time() - (time + DT)).abs() < 1e-6);
    assert!(harness.mask_at(0.5, 0.5) > 0.0);
    assert!(harness.frame().get_pixel(32, 32).0[3] > 0);
}
