//! Lifecycle tests for the render thread, driven through a host-fired
//! frame timer so every frame timestamp is chosen by the test.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use paint_wallpaper::physics::{EngineError, TouchEvent};
use paint_wallpaper::scheduler::{
    FrameDriver, HostFrameTimer, RenderHost, RenderThread, SchedulerState,
};

const MAX_DT: f32 = 0.1;

/// Everything the host saw, in order.
#[derive(Default)]
struct Recording {
    calls: Vec<String>,
    dts: Vec<f32>,
    touches: Vec<Vec<TouchEvent>>,
    /// Error returned by the next `draw_frame`
    fail_next_draw: Option<EngineError>,
}

#[derive(Default)]
struct RecordingHost {
    log: Arc<Mutex<Recording>>,
    context: bool,
    surface: bool,
    engine: bool,
}

impl RecordingHost {
    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().calls.push(call.into());
    }
}

impl RenderHost for RecordingHost {
    type Surface = &'static str;

    fn ensure_context(&mut self) -> Result<(), EngineError> {
        if !self.context {
            self.context = true;
            self.record("create_context");
        }
        Ok(())
    }

    fn attach_surface(&mut self, surface: &'static str) -> Result<(), EngineError> {
        self.surface = true;
        self.record(format!("attach_surface {}", surface));
        Ok(())
    }

    fn release_surface(&mut self) {
        if self.surface {
            self.surface = false;
            self.record("release_surface");
        }
    }

    fn has_surface(&self) -> bool {
        self.surface
    }

    fn ensure_engine(&mut self) -> Result<(), EngineError> {
        if !self.engine {
            self.engine = true;
            self.record("create_engine");
        }
        Ok(())
    }

    fn has_engine(&self) -> bool {
        self.engine
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        self.record(format!("resize {}x{}", width, height));
        Ok(())
    }

    fn draw_frame(&mut self, dt: f32, touches: &[TouchEvent]) -> Result<(), EngineError> {
        let mut log = self.log.lock().unwrap();
        if let Some(error) = log.fail_next_draw.take() {
            return Err(error);
        }
        log.dts.push(dt);
        log.touches.push(touches.to_vec());
        Ok(())
    }

    fn release_engine(&mut self) {
        if self.engine {
            self.engine = false;
            self.record("release_engine");
        }
    }

    fn release_context(&mut self) {
        if self.context {
            self.context = false;
            self.record("release_context");
        }
    }
}

struct Harness {
    thread: RenderThread<&'static str>,
    driver: FrameDriver,
    log: Arc<Mutex<Recording>>,
}

impl Harness {
    fn new() -> Self {
        let host = RecordingHost::default();
        let log = host.log.clone();
        let (timer, driver) = HostFrameTimer::new();
        let thread = RenderThread::spawn(host, Box::new(timer), MAX_DT).unwrap();
        Self { thread, driver, log }
    }

    /// Bound, visible and waiting for the first frame.
    fn running() -> Self {
        let harness = Self::new();
        harness.thread.resize(1080, 1920);
        harness.thread.bind_surface("window");
        harness.thread.set_visible(true);
        assert_eq!(harness.thread.sync(), SchedulerState::Scheduled);
        harness
    }

    /// Fire the pending frame at `ms` and wait for it to be handled.
    fn frame(&self, ms: u64) -> bool {
        let fired = self.driver.fire(Duration::from_millis(ms));
        self.thread.sync();
        fired
    }

    fn dts(&self) -> Vec<f32> {
        self.log.lock().unwrap().dts.clone()
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }
}

fn assert_dts(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "dts {:?}", actual);
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-4, "dts {:?}, expected {:?}", actual, expected);
    }
}

#[test]
fn first_frame_after_resume_has_zero_step() {
    let harness = Harness::running();
    assert!(harness.frame(1_000));
    assert!(harness.frame(1_016));
    assert!(harness.frame(1_033));
    assert_dts(&harness.dts(), &[0.0, 0.016, 0.017]);
    assert_eq!(harness.thread.sync(), SchedulerState::Scheduled);
    harness.thread.shutdown().unwrap();
}

#[test]
fn hidden_wallpaper_draws_nothing() {
    let harness = Harness::running();
    assert!(harness.frame(0));
    assert!(harness.frame(16));

    harness.thread.set_visible(false);
    assert_eq!(harness.thread.sync(), SchedulerState::Bound);
    assert!(!harness.driver.is_pending());
    assert!(!harness.frame(32));
    assert!(!harness.frame(48));
    assert_eq!(harness.dts().len(), 2);

    // Five seconds later the wallpaper comes back: no catch-up step.
    harness.thread.set_visible(true);
    assert_eq!(harness.thread.sync(), SchedulerState::Scheduled);
    assert!(harness.frame(5_016));
    assert!(harness.frame(5_032));
    assert_dts(&harness.dts(), &[0.0, 0.016, 0.0, 0.016]);
    harness.thread.shutdown().unwrap();
}

#[test]
fn stalled_frame_is_clamped() {
    let harness = Harness::running();
    assert!(harness.frame(0));
    assert!(harness.frame(500));
    assert!(harness.frame(516));
    assert_dts(&harness.dts(), &[0.0, MAX_DT, 0.016]);
    harness.thread.shutdown().unwrap();
}

#[test]
fn touches_arrive_in_order_on_the_next_frame() {
    let harness = Harness::running();
    assert!(harness.thread.is_engine_ready());
    harness.thread.enqueue_touch(0.1, 0.9, 0.0, 0.0);
    harness.thread.enqueue_touch(0.2, 0.8, 0.1, -0.1);
    harness.thread.enqueue_touch(0.3, 0.7, 0.1, -0.1);

    assert!(harness.frame(0));
    assert!(harness.frame(16));

    let touches = harness.log.lock().unwrap().touches.clone();
    assert_eq!(
        touches[0],
        vec![
            TouchEvent::new(0.1, 0.9, 0.0, 0.0),
            TouchEvent::new(0.2, 0.8, 0.1, -0.1),
            TouchEvent::new(0.3, 0.7, 0.1, -0.1),
        ]
    );
    assert!(touches[1].is_empty());
    harness.thread.shutdown().unwrap();
}

#[test]
fn touches_before_engine_exists_are_dropped() {
    let harness = Harness::new();
    assert!(!harness.thread.is_engine_ready());
    harness.thread.enqueue_touch(0.5, 0.5, 0.01, 0.01);

    harness.thread.bind_surface("window");
    harness.thread.set_visible(true);
    harness.thread.sync();
    assert!(harness.thread.is_engine_ready());
    assert!(harness.frame(0));

    let touches = harness.log.lock().unwrap().touches.clone();
    assert_eq!(touches.len(), 1);
    assert!(touches[0].is_empty());
    harness.thread.shutdown().unwrap();
}

#[test]
fn shutdown_releases_engine_surface_context() {
    let harness = Harness::running();
    assert!(harness.frame(0));
    let Harness { thread, log, .. } = harness;
    thread.shutdown().unwrap();

    let calls = log.lock().unwrap().calls.clone();
    assert_eq!(
        calls,
        vec![
            "create_context",
            "attach_surface window",
            "create_engine",
            "resize 1080x1920",
            "release_engine",
            "release_surface",
            "release_context",
        ]
    );
}

#[test]
fn surface_error_skips_frame_but_keeps_running() {
    let harness = Harness::running();
    assert!(harness.frame(0));
    harness.log.lock().unwrap().fail_next_draw = Some(EngineError::Surface("timeout".into()));
    assert!(harness.frame(16));
    assert_eq!(harness.thread.sync(), SchedulerState::Scheduled);
    assert!(harness.frame(32));
    assert_eq!(harness.dts().len(), 2);
    harness.thread.shutdown().unwrap();
}

#[test]
fn fatal_error_fails_the_scheduler() {
    let harness = Harness::running();
    assert!(harness.frame(0));
    harness.log.lock().unwrap().fail_next_draw = Some(EngineError::OutOfMemory);
    assert!(harness.frame(16));

    assert_eq!(harness.thread.sync(), SchedulerState::Failed);
    assert!(!harness.thread.is_engine_ready());
    assert!(!harness.driver.is_pending());

    // Lifecycle calls after failure change nothing.
    harness.thread.bind_surface("again");
    harness.thread.set_visible(true);
    assert_eq!(harness.thread.sync(), SchedulerState::Failed);
    assert!(!harness.calls().iter().any(|c| c == "attach_surface again"));

    let result = harness.thread.shutdown();
    assert!(matches!(result, Err(EngineError::OutOfMemory)));
}

#[test]
fn lost_surface_returns_to_created_and_rebinds() {
    let harness = Harness::running();
    assert!(harness.frame(0));

    harness.thread.surface_lost();
    assert_eq!(harness.thread.sync(), SchedulerState::Created);
    assert!(!harness.driver.is_pending());

    // Resized while no surface exists; the size is applied on rebind.
    harness.thread.resize(720, 1280);
    harness.thread.bind_surface("window2");
    assert_eq!(harness.thread.sync(), SchedulerState::Scheduled);
    assert!(harness.frame(10_000));
    assert!(harness.frame(10_016));
    assert_dts(&harness.dts(), &[0.0, 0.0, 0.016]);

    let calls = harness.calls();
    let rebind = calls
        .iter()
        .position(|c| c == "attach_surface window2")
        .unwrap();
    assert_eq!(calls[rebind + 1..].first().map(String::as_str), Some("resize 720x1280"));
    // the engine survives a lost surface
    assert_eq!(calls.iter().filter(|c| *c == "create_engine").count(), 1);
    harness.thread.shutdown().unwrap();
}

#[test]
fn rebinding_while_visible_stays_scheduled() {
    let harness = Harness::running();
    assert!(harness.frame(0));
    assert!(harness.frame(16));

    // The frame callback registered after the last frame is still pending.
    harness.thread.bind_surface("window2");
    assert_eq!(harness.thread.sync(), SchedulerState::Scheduled);
    assert!(harness.driver.is_pending());

    // The new binding restarts frame timing.
    assert!(harness.frame(1_000));
    assert!(harness.frame(1_016));
    assert_dts(&harness.dts(), &[0.0, 0.016, 0.0, 0.016]);
    assert!(harness.calls().iter().any(|c| c == "attach_surface window2"));
    harness.thread.shutdown().unwrap();
}
