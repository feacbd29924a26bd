//! Paint Wallpaper
//!
//! Touch-reactive paint simulation. Runs in a window, or headless with the
//! software engine writing numbered PNG frames.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use image::RgbaImage;
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition},
    event::{ElementState, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use paint_wallpaper::assets::ReferenceImages;
use paint_wallpaper::config::{Preset, WallpaperConfig};
use paint_wallpaper::export::FrameSequence;
use paint_wallpaper::physics::TouchTracker;
use paint_wallpaper::scheduler::{
    FrameSink, HostFrameTimer, RenderThread, SoftwareHost, VsyncTimer, WgpuHost,
};

/// Touch-reactive paint wallpaper
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulation preset used when no config file is given
    #[arg(long, default_value = "canonical")]
    preset: Preset,

    /// Override reference image directory
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Override simulation grid scale (0, 1]
    #[arg(long)]
    scale: Option<f32>,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Render with the software engine and write PNG frames
    #[arg(long)]
    headless: bool,

    /// Number of frames to write in headless mode
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Headless frame size, e.g. 360x640
    #[arg(long, default_value = "360x640", value_parser = parse_size)]
    size: (u32, u32),

    /// Headless output directory
    #[arg(short, long, default_value = "frames")]
    output: PathBuf,

    /// Drag a scripted stroke across the first half of a headless run
    #[arg(long)]
    stroke: bool,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width: u32 = w.trim().parse().map_err(|e| format!("bad width: {}", e))?;
    let height: u32 = h.trim().parse().map_err(|e| format!("bad height: {}", e))?;
    if width == 0 || height == 0 {
        return Err("size must be non-zero".into());
    }
    Ok((width, height))
}

/// Windowed application state
struct App {
    config: WallpaperConfig,
    references: ReferenceImages,
    window: Option<Arc<Window>>,
    render: Option<RenderThread<Arc<Window>>>,
    tracker: TouchTracker,
    cursor: Option<PhysicalPosition<f64>>,
    mouse_pressed: bool,
}

impl App {
    fn new(config: WallpaperConfig, references: ReferenceImages) -> Self {
        Self {
            config,
            references,
            window: None,
            render: None,
            tracker: TouchTracker::new(),
            cursor: None,
            mouse_pressed: false,
        }
    }

    fn start_render(&mut self, window: &Window) -> Option<RenderThread<Arc<Window>>> {
        // Pace frames at the monitor refresh when it is known.
        let interval = window
            .current_monitor()
            .and_then(|monitor| monitor.refresh_rate_millihertz())
            .filter(|&mhz| mhz > 0)
            .map(|mhz| Duration::from_secs_f64(1000.0 / mhz as f64))
            .unwrap_or_else(|| self.config.frame_interval());
        log::info!("Frame interval {:.2} ms", interval.as_secs_f64() * 1000.0);

        let timer = match VsyncTimer::new(interval) {
            Ok(timer) => timer,
            Err(e) => {
                log::error!("Failed to start frame timer: {}", e);
                return None;
            }
        };
        let host = WgpuHost::new(self.config.clone(), self.references.clone());
        match RenderThread::spawn(host, Box::new(timer), self.config.timing.max_dt) {
            Ok(render) => Some(render),
            Err(e) => {
                log::error!("Failed to start render thread: {}", e);
                None
            }
        }
    }

    fn touch_moved(&mut self, position: PhysicalPosition<f64>) {
        let (Some(window), Some(render)) = (&self.window, &self.render) else {
            return;
        };
        let size = window.inner_size();
        if let Some(touch) =
            self.tracker
                .moved(position.x as f32, position.y as f32, size.width, size.height)
        {
            render.enqueue_touch(touch.x, touch.y, touch.dx, touch.dy);
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(render) = self.render.take()
            && let Err(e) = render.shutdown()
        {
            log::error!("Render thread stopped with error: {}", e);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let window = match &self.window {
            Some(window) => window.clone(),
            None => {
                let attributes = Window::default_attributes()
                    .with_title("Paint Wallpaper")
                    .with_inner_size(LogicalSize::new(540, 960));
                match event_loop.create_window(attributes) {
                    Ok(window) => {
                        let window = Arc::new(window);
                        self.window = Some(window.clone());
                        window
                    }
                    Err(e) => {
                        log::error!("Failed to create window: {}", e);
                        event_loop.exit();
                        return;
                    }
                }
            }
        };

        if self.render.is_none() {
            self.render = self.start_render(&window);
        }
        let Some(render) = &self.render else {
            event_loop.exit();
            return;
        };

        let size = window.inner_size();
        render.resize(size.width, size.height);
        render.bind_surface(window);
        render.set_visible(true);
        log::info!("Window resumed, rendering started");
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(render) = &self.render {
            render.set_visible(false);
            render.surface_lost();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Some(render) = &self.render {
                    render.resize(size.width, size.height);
                }
            }
            WindowEvent::Occluded(occluded) => {
                if let Some(render) = &self.render {
                    render.set_visible(!occluded);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.mouse_pressed = state == ElementState::Pressed;
                match (self.mouse_pressed, self.cursor) {
                    (true, Some(position)) => self.tracker.down(position.x as f32, position.y as f32),
                    _ => self.tracker.up(),
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = Some(position);
                if self.mouse_pressed {
                    self.touch_moved(position);
                }
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                self.tracker.up();
            }
            WindowEvent::Touch(touch) => match touch.phase {
                TouchPhase::Started => self
                    .tracker
                    .down(touch.location.x as f32, touch.location.y as f32),
                TouchPhase::Moved => self.touch_moved(touch.location),
                TouchPhase::Ended | TouchPhase::Cancelled => self.tracker.up(),
            },
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.logical_key == Key::Named(NamedKey::Escape) =>
            {
                self.shutdown(event_loop);
            }
            _ => {}
        }
    }
}

fn run_windowed(config: WallpaperConfig, references: ReferenceImages) -> Result<(), Box<dyn Error>> {
    let event_loop = EventLoop::new()?;
    // Frames are paced by the render thread.
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(config, references);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Position of the scripted stroke at `progress` in [0, 1]: a slow S-curve
/// down the middle of the screen.
fn stroke_point(progress: f32) -> (f32, f32) {
    let y = 0.8 - 0.6 * progress;
    let x = 0.5 + 0.25 * (progress * std::f32::consts::TAU).sin();
    (x, y)
}

fn run_headless(
    args: &Args,
    config: WallpaperConfig,
    references: ReferenceImages,
) -> Result<(), Box<dyn Error>> {
    let (width, height) = args.size;
    let interval = config.frame_interval();
    let mut sequence = FrameSequence::new(&args.output, "frame")?;

    let (frame_tx, frame_rx) = mpsc::channel::<RgbaImage>();
    let sink: FrameSink = Box::new(move |frame: &RgbaImage| {
        let _ = frame_tx.send(frame.clone());
    });

    // The host timer lets this loop hand out exact timestamps, so runs are
    // reproducible.
    let (timer, driver) = HostFrameTimer::new();
    let host = SoftwareHost::new(config.clone(), references);
    let render = RenderThread::spawn(host, Box::new(timer), config.timing.max_dt)?;
    render.resize(width, height);
    render.bind_surface(sink);
    render.set_visible(true);

    log::info!(
        "Rendering {} frames at {}x{} into {}",
        args.frames,
        width,
        height,
        args.output.display()
    );

    let stroke_frames = args.frames / 2;
    let mut last = None;
    for k in 0..args.frames {
        render.sync();

        if args.stroke && k < stroke_frames {
            let (x, y) = stroke_point(k as f32 / stroke_frames.max(1) as f32);
            if let Some((last_x, last_y)) = last {
                render.enqueue_touch(x, y, x - last_x, y - last_y);
            }
            last = Some((x, y));
        }

        if !driver.fire(interval * k) {
            render.shutdown()?;
            return Err("render thread stopped requesting frames".into());
        }
        let frame = frame_rx.recv_timeout(Duration::from_secs(10))?;
        sequence.write(&frame)?;
    }

    render.shutdown()?;
    log::info!("Wrote {} frames", sequence.written());
    Ok(())
}

fn load_config(args: &Args) -> WallpaperConfig {
    let mut config = match &args.config {
        Some(path) => match WallpaperConfig::from_file(path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Failed to load config: {}, using {:?} preset", e, args.preset);
                WallpaperConfig::with_preset(args.preset)
            }
        },
        None => WallpaperConfig::with_preset(args.preset),
    };

    if let Some(directory) = &args.assets {
        config.assets.directory = directory.clone();
    }
    if let Some(scale) = args.scale {
        config.simulation.sim_scale = scale.clamp(0.05, 1.0);
    }
    config
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args);

    if let Some(path) = &args.save_config {
        match config.to_file(path) {
            Ok(()) => log::info!("Saved config to {}", path.display()),
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let references = ReferenceImages::load(&config.assets);
    let result = if args.headless {
        run_headless(&args, config, references)
    } else {
        run_windowed(config, references)
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
