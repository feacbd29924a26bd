//! Render hosts: what the scheduler drives on its worker thread.
//!
//! A host owns the GPU context (or its software stand-in), the presentable
//! surface and the simulation engine. The scheduler decides *when* each
//! resource is created, resized, drawn or released; the host knows *how*.

use std::sync::Arc;

use image::RgbaImage;
use winit::window::Window;

use crate::assets::ReferenceImages;
use crate::config::WallpaperConfig;
use crate::physics::engine::{EngineError, SimulationEngine};
use crate::physics::software::SoftwareEngine;
use crate::physics::touch::TouchEvent;
use crate::render::context::GpuContext;
use crate::render::gpu_engine::GpuPaintEngine;
use crate::render::headless::OffscreenTarget;

/// Resources driven by the render scheduler. Every method runs on the
/// worker thread.
pub trait RenderHost: Send + 'static {
    /// Handle from which a presentable surface is created.
    type Surface: Send + 'static;

    /// Create the rendering context if it does not exist yet.
    fn ensure_context(&mut self) -> Result<(), EngineError>;

    /// Create a presentable surface, releasing any previous one first.
    fn attach_surface(&mut self, surface: Self::Surface) -> Result<(), EngineError>;

    fn release_surface(&mut self);

    fn has_surface(&self) -> bool;

    /// Construct the simulation engine if it does not exist yet.
    fn ensure_engine(&mut self) -> Result<(), EngineError>;

    fn has_engine(&self) -> bool;

    /// New surface dimensions in pixels.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError>;

    /// Advance the simulation by `dt` and present the result.
    fn draw_frame(&mut self, dt: f32, touches: &[TouchEvent]) -> Result<(), EngineError>;

    fn release_engine(&mut self);

    fn release_context(&mut self);
}

/// Presentable surface of a window.
struct WindowSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    _window: Arc<Window>,
}

/// Host presenting into a winit window through wgpu.
pub struct WgpuHost {
    config: WallpaperConfig,
    references: ReferenceImages,
    instance: Option<wgpu::Instance>,
    context: Option<GpuContext>,
    surface: Option<WindowSurface>,
    engine: Option<GpuPaintEngine>,
    size: Option<(u32, u32)>,
}

impl WgpuHost {
    pub fn new(config: WallpaperConfig, references: ReferenceImages) -> Self {
        Self {
            config,
            references,
            instance: None,
            context: None,
            surface: None,
            engine: None,
            size: None,
        }
    }

    fn choose_format(
        caps: &wgpu::SurfaceCapabilities,
        engine_format: Option<wgpu::TextureFormat>,
    ) -> Option<wgpu::TextureFormat> {
        if let Some(format) = engine_format.filter(|f| caps.formats.contains(f)) {
            return Some(format);
        }
        // The composite writes display values directly; avoid a second
        // sRGB encode.
        caps.formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
    }

    fn choose_alpha_mode(caps: &wgpu::SurfaceCapabilities) -> wgpu::CompositeAlphaMode {
        if caps
            .alpha_modes
            .contains(&wgpu::CompositeAlphaMode::PreMultiplied)
        {
            wgpu::CompositeAlphaMode::PreMultiplied
        } else {
            caps.alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto)
        }
    }
}

impl RenderHost for WgpuHost {
    type Surface = Arc<Window>;

    fn ensure_context(&mut self) -> Result<(), EngineError> {
        if self.context.is_none() && self.instance.is_none() {
            self.instance = Some(GpuContext::create_instance());
        }
        Ok(())
    }

    fn attach_surface(&mut self, window: Arc<Window>) -> Result<(), EngineError> {
        self.release_surface();

        let instance = match (&self.context, &self.instance) {
            (Some(context), _) => &context.instance,
            (None, Some(instance)) => instance,
            (None, None) => return Err(EngineError::Device("no GPU instance".into())),
        };
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| EngineError::Surface(e.to_string()))?;

        if self.context.is_none() {
            let instance = self
                .instance
                .take()
                .ok_or_else(|| EngineError::Device("no GPU instance".into()))?;
            self.context = Some(pollster::block_on(GpuContext::new(instance, Some(&surface)))?);
        }
        let Some(context) = self.context.as_ref() else {
            return Err(EngineError::NoAdapter);
        };

        let caps = surface.get_capabilities(&context.adapter);
        let engine_format = self.engine.as_ref().map(|engine| engine.output_format());
        let format = Self::choose_format(&caps, engine_format)
            .ok_or_else(|| EngineError::Surface("surface reports no formats".into()))?;
        if let Some(engine) = self.engine.as_mut() {
            engine.set_output_format(format)?;
        }

        let inner = window.inner_size();
        let (width, height) = *self.size.get_or_insert((inner.width, inner.height));
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: Self::choose_alpha_mode(&caps),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&context.device, &config);
        log::info!(
            "Surface attached ({}x{}, {:?}, {:?})",
            config.width,
            config.height,
            config.format,
            config.alpha_mode
        );

        self.surface = Some(WindowSurface {
            surface,
            config,
            _window: window,
        });
        Ok(())
    }

    fn release_surface(&mut self) {
        if self.surface.take().is_some() {
            log::info!("Surface released");
        }
    }

    fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    fn ensure_engine(&mut self) -> Result<(), EngineError> {
        if self.engine.is_some() {
            return Ok(());
        }
        let Some(context) = self.context.as_ref() else {
            return Err(EngineError::NoAdapter);
        };
        let format = self
            .surface
            .as_ref()
            .map(|s| s.config.format)
            .unwrap_or(OffscreenTarget::FORMAT);
        let mut engine = GpuPaintEngine::new(context, &self.config, &self.references, format)?;
        if let Some((width, height)) = self.size {
            engine.on_resize(width, height)?;
        }
        self.engine = Some(engine);
        Ok(())
    }

    fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        self.size = Some((width, height));
        if let (Some(surface), Some(context)) = (self.surface.as_mut(), self.context.as_ref()) {
            surface.config.width = width.max(1);
            surface.config.height = height.max(1);
            surface.surface.configure(&context.device, &surface.config);
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.on_resize(width, height)?;
        }
        Ok(())
    }

    fn draw_frame(&mut self, dt: f32, touches: &[TouchEvent]) -> Result<(), EngineError> {
        let (Some(surface), Some(engine), Some(context)) =
            (self.surface.as_ref(), self.engine.as_mut(), self.context.as_ref())
        else {
            return Ok(());
        };

        match surface.surface.get_current_texture() {
            Ok(frame) => {
                let mut view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                engine.tick(dt, touches, &mut view)?;
                frame.present();
                Ok(())
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated, reconfiguring");
                surface.surface.configure(&context.device, &surface.config);
                Ok(())
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::debug!("Surface acquire timed out, skipping frame");
                Ok(())
            }
            Err(wgpu::SurfaceError::OutOfMemory) => Err(EngineError::OutOfMemory),
            Err(other) => Err(EngineError::Surface(other.to_string())),
        }
    }

    fn release_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.release();
        }
    }

    fn release_context(&mut self) {
        self.surface = None;
        self.context = None;
        self.instance = None;
        log::info!("GPU context released");
    }
}

/// Receives every composited frame of a [`SoftwareHost`].
pub type FrameSink = Box<dyn FnMut(&RgbaImage) + Send>;

/// Host running the software engine; frames go to a sink.
pub struct SoftwareHost {
    config: WallpaperConfig,
    references: ReferenceImages,
    context_ready: bool,
    sink: Option<FrameSink>,
    engine: Option<SoftwareEngine>,
    frame: RgbaImage,
    size: Option<(u32, u32)>,
}

impl SoftwareHost {
    pub fn new(config: WallpaperConfig, references: ReferenceImages) -> Self {
        Self {
            config,
            references,
            context_ready: false,
            sink: None,
            engine: None,
            frame: RgbaImage::new(1, 1),
            size: None,
        }
    }
}

impl RenderHost for SoftwareHost {
    type Surface = FrameSink;

    fn ensure_context(&mut self) -> Result<(), EngineError> {
        self.context_ready = true;
        Ok(())
    }

    fn attach_surface(&mut self, sink: FrameSink) -> Result<(), EngineError> {
        self.release_surface();
        self.sink = Some(sink);
        Ok(())
    }

    fn release_surface(&mut self) {
        self.sink = None;
    }

    fn has_surface(&self) -> bool {
        self.sink.is_some()
    }

    fn ensure_engine(&mut self) -> Result<(), EngineError> {
        if self.engine.is_some() {
            return Ok(());
        }
        if !self.context_ready {
            return Err(EngineError::Device("software context not created".into()));
        }
        let mut engine = SoftwareEngine::new(&self.config, self.references.clone());
        if let Some((width, height)) = self.size {
            engine.on_resize(width, height)?;
        }
        self.engine = Some(engine);
        Ok(())
    }

    fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        self.size = Some((width, height));
        if (width, height) != self.frame.dimensions() {
            self.frame = RgbaImage::new(width.max(1), height.max(1));
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.on_resize(width, height)?;
        }
        Ok(())
    }

    fn draw_frame(&mut self, dt: f32, touches: &[TouchEvent]) -> Result<(), EngineError> {
        let (Some(sink), Some(engine)) = (self.sink.as_mut(), self.engine.as_mut()) else {
            return Ok(());
        };
        engine.tick(dt, touches, &mut self.frame)?;
        sink(&self.frame);
        Ok(())
    }

    fn release_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.release();
        }
    }

    fn release_context(&mut self) {
        self.context_ready = false;
    }
}
