//! Frame timing sources.
//!
//! A [`FrameTimer`] holds at most one pending [`FrameCallback`] and fires
//! it once, with a monotonic timestamp, at the next display refresh. The
//! render worker re-registers after every drawn frame.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One-shot callback receiving the frame timestamp.
pub struct FrameCallback(Box<dyn FnOnce(Duration) + Send>);

impl FrameCallback {
    pub fn new<F: FnOnce(Duration) + Send + 'static>(callback: F) -> Self {
        Self(Box::new(callback))
    }

    pub fn fire(self, timestamp: Duration) {
        (self.0)(timestamp)
    }
}

impl std::fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FrameCallback")
    }
}

/// Source of display-refresh callbacks.
pub trait FrameTimer: Send {
    /// Register `callback` for the next refresh, replacing any pending one.
    fn post_frame_callback(&mut self, callback: FrameCallback);

    /// Drop the pending callback, if any.
    fn remove_frame_callback(&mut self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct TimerSlot {
    callback: Option<FrameCallback>,
    stopped: bool,
}

#[derive(Default)]
struct TimerShared {
    slot: Mutex<TimerSlot>,
    wake: Condvar,
}

/// Fixed-rate timer running on its own pacing thread.
///
/// Callbacks fire on refresh boundaries `origin + k * interval`;
/// timestamps are measured from the timer's creation.
pub struct VsyncTimer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl VsyncTimer {
    pub fn new(interval: Duration) -> std::io::Result<Self> {
        let interval = interval.max(Duration::from_millis(1));
        let shared = Arc::new(TimerShared::default());
        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("vsync".into())
            .spawn(move || pace(&thread_shared, interval))?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }
}

/// First refresh boundary strictly after `now`.
fn next_boundary(origin: Instant, interval: Duration, now: Instant) -> Instant {
    let elapsed = now.saturating_duration_since(origin).as_nanos();
    let periods = elapsed / interval.as_nanos() + 1;
    origin + Duration::from_nanos((periods * interval.as_nanos()) as u64)
}

fn pace(shared: &TimerShared, interval: Duration) {
    let origin = Instant::now();
    let mut slot = lock(&shared.slot);
    loop {
        while slot.callback.is_none() && !slot.stopped {
            slot = shared.wake.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
        if slot.stopped {
            return;
        }

        let deadline = next_boundary(origin, interval, Instant::now());
        loop {
            let now = Instant::now();
            if now >= deadline || slot.stopped {
                break;
            }
            slot = shared
                .wake
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if slot.stopped {
            return;
        }

        if let Some(callback) = slot.callback.take() {
            drop(slot);
            callback.fire(deadline - origin);
            slot = lock(&shared.slot);
        }
    }
}

impl FrameTimer for VsyncTimer {
    fn post_frame_callback(&mut self, callback: FrameCallback) {
        lock(&self.shared.slot).callback = Some(callback);
        self.shared.wake.notify_all();
    }

    fn remove_frame_callback(&mut self) {
        lock(&self.shared.slot).callback = None;
    }
}

impl Drop for VsyncTimer {
    fn drop(&mut self) {
        lock(&self.shared.slot).stopped = true;
        self.shared.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Timer fired by the host itself, e.g. from a window redraw.
///
/// The worker owns the timer; the host keeps a [`FrameDriver`] to fire
/// the pending callback.
pub struct HostFrameTimer {
    pending: Arc<Mutex<Option<FrameCallback>>>,
}

/// Host-side handle of a [`HostFrameTimer`].
#[derive(Clone)]
pub struct FrameDriver {
    pending: Arc<Mutex<Option<FrameCallback>>>,
}

impl HostFrameTimer {
    pub fn new() -> (Self, FrameDriver) {
        let pending = Arc::new(Mutex::new(None));
        let driver = FrameDriver {
            pending: pending.clone(),
        };
        (Self { pending }, driver)
    }
}

impl FrameTimer for HostFrameTimer {
    fn post_frame_callback(&mut self, callback: FrameCallback) {
        *lock(&self.pending) = Some(callback);
    }

    fn remove_frame_callback(&mut self) {
        lock(&self.pending).take();
    }
}

impl FrameDriver {
    /// Fire the pending callback with `timestamp`. Returns whether one was
    /// pending.
    pub fn fire(&self, timestamp: Duration) -> bool {
        let callback = lock(&self.pending).take();
        match callback {
            Some(callback) => {
                callback.fire(timestamp);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_host_timer_fires_once() {
        let (mut timer, driver) = HostFrameTimer::new();
        let (tx, rx) = mpsc::channel();
        timer.post_frame_callback(FrameCallback::new(move |ts| {
            let _ = tx.send(ts);
        }));
        assert!(driver.is_pending());
        assert!(driver.fire(Duration::from_millis(16)));
        assert_eq!(rx.try_recv(), Ok(Duration::from_millis(16)));
        assert!(!driver.fire(Duration::from_millis(32)));
    }

    #[test]
    fn test_host_timer_remove() {
        let (mut timer, driver) = HostFrameTimer::new();
        timer.post_frame_callback(FrameCallback::new(|_| panic!("removed callback fired")));
        timer.remove_frame_callback();
        assert!(!driver.is_pending());
        assert!(!driver.fire(Duration::ZERO));
    }

    #[test]
    fn test_next_boundary() {
        let origin = Instant::now();
        let interval = Duration::from_millis(10);
        let next = next_boundary(origin, interval, origin + Duration::from_millis(25));
        assert_eq!(next - origin, Duration::from_millis(30));
        let next = next_boundary(origin, interval, origin);
        assert_eq!(next - origin, Duration::from_millis(10));
    }

    #[test]
    fn test_vsync_timer_paces_callbacks() {
        let mut timer = VsyncTimer::new(Duration::from_millis(5)).unwrap();
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            timer.post_frame_callback(FrameCallback::new(move |ts| {
                let _ = tx.send(ts);
            }));
            let ts = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(ts.as_nanos() % Duration::from_millis(5).as_nanos(), 0);
        }
    }

    #[test]
    fn test_vsync_timer_removed_callback_never_fires() {
        let mut timer = VsyncTimer::new(Duration::from_millis(50)).unwrap();
        let (tx, rx) = mpsc::channel::<Duration>();
        timer.post_frame_callback(FrameCallback::new(move |ts| {
            let _ = tx.send(ts);
        }));
        timer.remove_frame_callback();
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }
}
