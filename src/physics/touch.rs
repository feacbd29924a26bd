//! Pointer input hand-off between the input thread and the render thread.

use std::sync::{Arc, Mutex, PoisonError};

/// A single pointer displacement in normalized surface coordinates.
///
/// `x`, `y` are in [0, 1] with `y` growing upward; `dx`, `dy` are the
/// displacement since the previous event in the same convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEvent {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
}

impl TouchEvent {
    pub fn new(x: f32, y: f32, dx: f32, dy: f32) -> Self {
        Self { x, y, dx, dy }
    }
}

/// Mutex-guarded FIFO of touch events.
///
/// Cloning shares the same queue. Producers append with [`enqueue`];
/// the render thread takes the whole backlog with [`drain_all`].
///
/// [`enqueue`]: TouchQueue::enqueue
/// [`drain_all`]: TouchQueue::drain_all
#[derive(Debug, Clone, Default)]
pub struct TouchQueue {
    pending: Arc<Mutex<Vec<TouchEvent>>>,
}

impl TouchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn enqueue(&self, x: f32, y: f32, dx: f32, dy: f32) {
        self.push(TouchEvent::new(x, y, dx, dy));
    }

    /// Append an already built event.
    pub fn push(&self, event: TouchEvent) {
        // A panicking producer cannot leave the Vec half-written, so a
        // poisoned lock still guards consistent data.
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.push(event);
    }

    /// Take every pending event in insertion order, leaving the queue empty.
    pub fn drain_all(&self) -> Vec<TouchEvent> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending)
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns raw pointer positions (pixels, y down) into normalized touch events.
#[derive(Debug, Clone, Default)]
pub struct TouchTracker {
    last: Option<(f32, f32)>,
}

impl TouchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer pressed at pixel position `(px, py)`.
    pub fn down(&mut self, px: f32, py: f32) {
        self.last = Some((px, py));
    }

    /// Pointer moved while pressed. Returns `None` for an empty surface.
    ///
    /// A move without a preceding `down` starts a new stroke with zero delta.
    pub fn moved(&mut self, px: f32, py: f32, width: u32, height: u32) -> Option<TouchEvent> {
        if width == 0 || height == 0 {
            return None;
        }
        let (w, h) = (width as f32, height as f32);
        let (last_x, last_y) = self.last.unwrap_or((px, py));
        self.last = Some((px, py));

        Some(TouchEvent {
            x: px / w,
            y: 1.0 - py / h,
            dx: (px - last_x) / w,
            dy: (last_y - py) / h,
        })
    }

    /// Pointer released or cancelled.
    pub fn up(&mut self) {
        self.last = None;
    }

    pub fn is_pressed(&self) -> bool {
        self.last.is_some()
    }
}
