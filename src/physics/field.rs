//! Double-buffered simulation fields.
//!
//! A field is two same-sized slots plus the index of the slot that
//! currently holds valid data. Passes read `current()` and write
//! `target_mut()`, then `flip()` so the freshly written slot becomes
//! current.

/// Two slots with an explicit source index.
#[derive(Debug, Clone)]
pub struct Field<T> {
    slots: [T; 2],
    src: usize,
}

impl<T> Field<T> {
    /// Create a field from its two slots; slot 0 starts as current.
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            src: 0,
        }
    }

    /// Index of the slot holding valid data (0 or 1).
    pub fn src(&self) -> usize {
        self.src
    }

    /// Index of the slot the next write goes to.
    pub fn dst(&self) -> usize {
        1 - self.src
    }

    /// The valid slot.
    pub fn current(&self) -> &T {
        &self.slots[self.src]
    }

    /// The slot the next write goes to.
    pub fn target(&self) -> &T {
        &self.slots[1 - self.src]
    }

    /// Read the current slot while writing the other one.
    pub fn split(&mut self) -> (&T, &mut T) {
        let [a, b] = &mut self.slots;
        if self.src == 0 { (&*a, b) } else { (&*b, a) }
    }

    /// Make the last written slot current.
    pub fn flip(&mut self) {
        self.src = 1 - self.src;
    }

    /// Force slot 0 to be current.
    pub fn reset(&mut self) {
        self.src = 0;
    }

    /// Both slots, in slot order.
    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }
}

/// Simulation grid size derived from the surface size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimResolution {
    pub width: u32,
    pub height: u32,
}

impl SimResolution {
    /// `max(1, floor(dim * scale))` per axis.
    pub fn from_surface(width: u32, height: u32, scale: f32) -> Self {
        let scaled = |dim: u32| -> u32 {
            let value = (dim as f32 * scale).floor();
            if value.is_finite() && value >= 1.0 {
                value as u32
            } else {
                1
            }
        };
        Self {
            width: scaled(width),
            height: scaled(height),
        }
    }

    /// Number of cells.
    pub fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of one texel in UV units.
    pub fn texel(&self) -> [f32; 2] {
        [1.0 / self.width as f32, 1.0 / self.height as f32]
    }
}

/// Tracks the surface size and decides when the simulation grid must be
/// reallocated.
#[derive(Debug, Clone, Default)]
pub struct ResolutionTracker {
    surface: (u32, u32),
    sim: Option<SimResolution>,
}

impl ResolutionTracker {
    /// Record a new surface size. Returns the new simulation resolution
    /// when it differs from the previous one.
    pub fn update(&mut self, width: u32, height: u32, scale: f32) -> Option<SimResolution> {
        self.surface = (width, height);
        let next = SimResolution::from_surface(width, height, scale);
        if self.sim == Some(next) {
            return None;
        }
        self.sim = Some(next);
        Some(next)
    }

    /// Last recorded surface size.
    pub fn surface(&self) -> (u32, u32) {
        self.surface
    }

    /// Current simulation resolution, if any surface size was recorded.
    pub fn sim(&self) -> Option<SimResolution> {
        self.sim
    }

    /// Forget the current resolution so the next update reallocates.
    pub fn invalidate(&mut self) {
        self.sim = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_alternates() {
        let mut field = Field::new(vec![0.0f32; 4], vec![0.0f32; 4]);
        assert_eq!(field.src(), 0);
        for step in 0..6 {
            let before = field.src();
            let (src, dst) = field.split();
            dst[0] = src[0] + 1.0;
            field.flip();
            assert_eq!(field.src(), 1 - before, "step {}", step);
        }
        assert!((field.current()[0] - 6.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_split_writes_other_slot() {
        let mut field = Field::new(1u32, 2u32);
        {
            let (src, dst) = field.split();
            assert_eq!(*src, 1);
            *dst = 10;
        }
        assert_eq!(*field.current(), 1);
        assert_eq!(*field.target(), 10);
        field.flip();
        assert_eq!(*field.current(), 10);
        assert_eq!(field.dst(), 0);
    }

    #[test]
    fn test_resolution_formula() {
        let res = SimResolution::from_surface(1080, 1920, 0.5);
        assert_eq!(res, SimResolution { width: 540, height: 960 });

        let res = SimResolution::from_surface(1081, 3, 0.5);
        assert_eq!(res, SimResolution { width: 540, height: 1 });
    }

    #[test]
    fn test_degenerate_surface_clamps_to_one() {
        assert_eq!(
            SimResolution::from_surface(0, 0, 0.5),
            SimResolution { width: 1, height: 1 }
        );
        assert_eq!(
            SimResolution::from_surface(1, 1, 0.5),
            SimResolution { width: 1, height: 1 }
        );
        assert_eq!(
            SimResolution::from_surface(100, 100, f32::NAN),
            SimResolution { width: 1, height: 1 }
        );
    }

    #[test]
    fn test_tracker_reallocates_only_on_change() {
        let mut tracker = ResolutionTracker::default();
        let sizes = [(1080, 1920), (1080, 1920), (1081, 1921), (1082, 1920), (0, 0), (1, 1)];
        let mut previous: Option<SimResolution> = None;
        for &(w, h) in &sizes {
            let expected = SimResolution::from_surface(w, h, 0.5);
            let changed = tracker.update(w, h, 0.5);
            if previous == Some(expected) {
                assert_eq!(changed, None, "{}x{}", w, h);
            } else {
                assert_eq!(changed, Some(expected), "{}x{}", w, h);
            }
            assert_eq!(tracker.surface(), (w, h));
            previous = Some(expected);
        }
    }

    #[test]
    fn test_tracker_invalidate() {
        let mut tracker = ResolutionTracker::default();
        assert!(tracker.update(200, 100, 0.5).is_some());
        assert!(tracker.update(200, 100, 0.5).is_none());
        tracker.invalidate();
        assert!(tracker.update(200, 100, 0.5).is_some());
    }
}
