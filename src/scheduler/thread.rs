//! The render worker thread.
//!
//! One dedicated thread owns every rendering resource. Lifecycle calls made
//! on [`RenderThread`] from any thread are posted as tasks to that worker
//! and run strictly in arrival order; frame callbacks from the
//! [`FrameTimer`] are posted to the same queue, so a frame in progress
//! always completes before the next lifecycle command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::physics::engine::EngineError;
use crate::physics::touch::TouchQueue;
use crate::scheduler::clock::FrameClock;
use crate::scheduler::host::RenderHost;
use crate::scheduler::vsync::{FrameCallback, FrameTimer};

/// Lifecycle state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No presentable surface
    Created,
    /// Surface and engine ready, not drawing
    Bound,
    /// Visible; a frame callback is registered
    Scheduled,
    /// Shut down
    Terminated,
    /// Stopped by a fatal error
    Failed,
}

enum Task<S> {
    BindSurface(S),
    Resize(u32, u32),
    SetVisible(bool),
    SurfaceLost,
    Frame { timestamp: Duration, token: u64 },
    Sync(Sender<SchedulerState>),
    Shutdown,
}

/// Worker-side scheduling state.
struct Worker<H: RenderHost> {
    host: H,
    timer: Box<dyn FrameTimer>,
    tasks: Sender<Task<H::Surface>>,
    touches: TouchQueue,
    engine_ready: Arc<AtomicBool>,
    clock: FrameClock,
    state: SchedulerState,
    visible: bool,
    size: Option<(u32, u32)>,
    /// Identifies the registered frame callback; bumped on cancel.
    token: u64,
    pending: bool,
    error: Option<EngineError>,
}

impl<H: RenderHost> Worker<H> {
    fn run(mut self, receiver: Receiver<Task<H::Surface>>) -> Result<(), EngineError> {
        log::info!("Render worker started");
        while let Ok(task) = receiver.recv() {
            match task {
                Task::Shutdown => break,
                Task::Sync(reply) => {
                    let _ = reply.send(self.state);
                }
                _ if self.state == SchedulerState::Failed => {}
                Task::BindSurface(surface) => {
                    let result = self.bind_surface(surface);
                    self.check(result);
                }
                Task::Resize(width, height) => {
                    let result = self.resize(width, height);
                    self.check(result);
                }
                Task::SetVisible(visible) => self.set_visible(visible),
                Task::SurfaceLost => self.surface_lost(),
                Task::Frame { timestamp, token } => {
                    let result = self.on_frame_tick(timestamp, token);
                    self.check(result);
                }
            }
        }
        self.teardown();
        log::info!("Render worker stopped");
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Route an operation's error: fatal ones stop the worker.
    fn check(&mut self, result: Result<(), EngineError>) {
        match result {
            Ok(()) => {}
            Err(error) if error.is_fatal() => {
                log::error!("Fatal render error: {}", error);
                self.cancel_frame();
                self.release_all();
                self.state = SchedulerState::Failed;
                self.error = Some(error);
            }
            Err(error) => log::warn!("Render error: {}", error),
        }
    }

    fn bind_surface(&mut self, surface: H::Surface) -> Result<(), EngineError> {
        self.host.ensure_context()?;
        self.host.attach_surface(surface)?;
        self.host.ensure_engine()?;
        self.engine_ready.store(true, Ordering::Release);
        if let Some((width, height)) = self.size {
            self.host.resize(width, height)?;
        }
        self.clock.reset();
        self.state = SchedulerState::Bound;
        log::info!("Surface bound");
        if self.visible {
            self.schedule_frame();
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        log::debug!("Resize to {}x{}", width, height);
        self.size = Some((width, height));
        if self.host.has_surface() || self.host.has_engine() {
            self.host.resize(width, height)?;
        }
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if visible {
            if self.state == SchedulerState::Bound {
                self.schedule_frame();
            }
        } else {
            self.cancel_frame();
            self.clock.reset();
            if self.state == SchedulerState::Scheduled {
                self.state = SchedulerState::Bound;
            }
        }
        log::info!("Visibility changed: {}", visible);
    }

    fn surface_lost(&mut self) {
        self.cancel_frame();
        self.clock.reset();
        self.host.release_surface();
        if matches!(self.state, SchedulerState::Bound | SchedulerState::Scheduled) {
            self.state = SchedulerState::Created;
        }
        log::info!("Surface lost");
    }

    fn schedule_frame(&mut self) {
        if self.pending {
            // the registered callback still counts for the new binding
            self.state = SchedulerState::Scheduled;
            return;
        }
        self.token = self.token.wrapping_add(1);
        self.pending = true;
        let token = self.token;
        let tasks = self.tasks.clone();
        self.timer
            .post_frame_callback(FrameCallback::new(move |timestamp| {
                let _ = tasks.send(Task::Frame { timestamp, token });
            }));
        self.state = SchedulerState::Scheduled;
    }

    fn cancel_frame(&mut self) {
        if self.pending {
            self.timer.remove_frame_callback();
            self.pending = false;
        }
        // a callback that already fired carries the old token
        self.token = self.token.wrapping_add(1);
    }

    fn on_frame_tick(&mut self, timestamp: Duration, token: u64) -> Result<(), EngineError> {
        if token != self.token || !self.pending {
            return Ok(());
        }
        self.pending = false;
        if !self.visible || !self.host.has_surface() || !self.host.has_engine() {
            return Ok(());
        }

        let dt = self.clock.tick(timestamp);
        let touches = self.touches.drain_all();
        let drawn = self.host.draw_frame(dt, &touches);

        // a skipped frame keeps the loop alive; a fatal error cancels it
        if self.visible {
            self.schedule_frame();
        }
        drawn
    }

    fn release_all(&mut self) {
        self.engine_ready.store(false, Ordering::Release);
        self.host.release_engine();
        self.host.release_surface();
        self.host.release_context();
    }

    fn teardown(&mut self) {
        self.cancel_frame();
        self.release_all();
        if self.state != SchedulerState::Failed {
            self.state = SchedulerState::Terminated;
        }
    }
}

/// Worker sender published once the worker is running.
type Handshake<S> = Arc<(Mutex<Option<Sender<Task<S>>>>, Condvar)>;

/// Handle to the render worker. Every method may be called from any
/// thread; calls after shutdown are ignored.
pub struct RenderThread<S: Send + 'static> {
    tasks: Sender<Task<S>>,
    touches: TouchQueue,
    engine_ready: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), EngineError>>>,
}

impl<S: Send + 'static> RenderThread<S> {
    /// Start the worker. Returns once the worker is ready to take tasks.
    ///
    /// `host` and `timer` are moved to the worker; no rendering resource
    /// is created before the first `bind_surface`.
    pub fn spawn<H>(host: H, timer: Box<dyn FrameTimer>, max_dt: f32) -> Result<Self, EngineError>
    where
        H: RenderHost<Surface = S>,
    {
        let touches = TouchQueue::new();
        let engine_ready = Arc::new(AtomicBool::new(false));
        let handshake: Handshake<S> = Arc::new((Mutex::new(None), Condvar::new()));

        let worker_touches = touches.clone();
        let worker_ready = engine_ready.clone();
        let worker_handshake = handshake.clone();
        let thread = thread::Builder::new()
            .name("render".into())
            .spawn(move || {
                let (sender, receiver) = mpsc::channel();
                let worker = Worker {
                    host,
                    timer,
                    tasks: sender.clone(),
                    touches: worker_touches,
                    engine_ready: worker_ready,
                    clock: FrameClock::new(max_dt),
                    state: SchedulerState::Created,
                    visible: false,
                    size: None,
                    token: 0,
                    pending: false,
                    error: None,
                };
                {
                    let (slot, ready) = &*worker_handshake;
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
                    ready.notify_all();
                }
                worker.run(receiver)
            })
            .map_err(|e| EngineError::Worker(e.to_string()))?;

        let tasks = {
            let (slot, ready) = &*handshake;
            let mut published = slot.lock().unwrap_or_else(PoisonError::into_inner);
            while published.is_none() {
                published = ready.wait(published).unwrap_or_else(PoisonError::into_inner);
            }
            published.take()
        };
        let Some(tasks) = tasks else {
            return Err(EngineError::Worker("worker did not start".into()));
        };

        Ok(Self {
            tasks,
            touches,
            engine_ready,
            thread: Some(thread),
        })
    }

    fn post(&self, task: Task<S>) {
        let _ = self.tasks.send(task);
    }

    /// Bind a new presentable surface.
    pub fn bind_surface(&self, surface: S) {
        self.post(Task::BindSurface(surface));
    }

    /// Surface dimensions changed.
    pub fn resize(&self, width: u32, height: u32) {
        self.post(Task::Resize(width, height));
    }

    /// Start or stop drawing.
    pub fn set_visible(&self, visible: bool) {
        self.post(Task::SetVisible(visible));
    }

    /// The presentable surface was destroyed by the host.
    pub fn surface_lost(&self) {
        self.post(Task::SurfaceLost);
    }

    /// Queue a touch for the next frame. Dropped while no engine is ready.
    pub fn enqueue_touch(&self, x: f32, y: f32, dx: f32, dy: f32) {
        if self.engine_ready.load(Ordering::Acquire) {
            self.touches.enqueue(x, y, dx, dy);
        }
    }

    /// Whether touches are currently accepted.
    pub fn is_engine_ready(&self) -> bool {
        self.engine_ready.load(Ordering::Acquire)
    }

    /// Wait until every previously posted task has run and return the
    /// resulting state.
    pub fn sync(&self) -> SchedulerState {
        let (reply, response) = mpsc::channel();
        if self.tasks.send(Task::Sync(reply)).is_err() {
            return SchedulerState::Terminated;
        }
        response.recv().unwrap_or(SchedulerState::Terminated)
    }

    /// Release every resource, stop the worker and return the fatal error
    /// that stopped it, if any.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.post(Task::Shutdown);
        thread
            .join()
            .map_err(|_| EngineError::Worker("render worker panicked".into()))?
    }
}

impl<S: Send + 'static> Drop for RenderThread<S> {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            log::error!("Render worker stopped with error: {}", error);
        }
    }
}
