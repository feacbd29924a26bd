//! Frame-to-frame time step.

use std::time::Duration;

/// Turns frame timestamps into clamped simulation steps.
///
/// The first timestamp after creation or [`reset`](FrameClock::reset) only
/// seeds the baseline and yields a zero step, so a long pause never turns
/// into one huge step.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Option<Duration>,
    max_dt: f32,
}

impl FrameClock {
    pub fn new(max_dt: f32) -> Self {
        Self {
            last: None,
            max_dt: max_dt.max(0.0),
        }
    }

    /// Step in seconds for a frame at `timestamp`, in `[0, max_dt]`.
    pub fn tick(&mut self, timestamp: Duration) -> f32 {
        let dt = match self.last {
            Some(last) => timestamp.saturating_sub(last).as_secs_f32().min(self.max_dt),
            None => 0.0,
        };
        self.last = Some(timestamp);
        dt
    }

    /// Forget the baseline.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.last.is_some()
    }

    pub fn max_dt(&self) -> f32 {
        self.max_dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_first_tick_is_zero() {
        let mut clock = FrameClock::new(0.1);
        assert!(!clock.is_seeded());
        assert_eq!(clock.tick(ms(12_345)), 0.0);
        assert!(clock.is_seeded());
        assert!((clock.tick(ms(12_361)) - 0.016).abs() < 1e-6);
    }

    #[test]
    fn test_step_is_clamped() {
        let mut clock = FrameClock::new(0.1);
        clock.tick(ms(0));
        assert!((clock.tick(ms(5_000)) - 0.1).abs() < f32::EPSILON);
        // timestamps going backwards give a zero step
        assert_eq!(clock.tick(ms(4_000)), 0.0);
    }

    #[test]
    fn test_reset_reseeds() {
        let mut clock = FrameClock::new(0.1);
        clock.tick(ms(0));
        clock.tick(ms(16));
        clock.reset();
        assert_eq!(clock.tick(ms(5_016)), 0.0);
        assert!((clock.tick(ms(5_032)) - 0.016).abs() < 1e-6);
    }

    #[test]
    fn test_steps_stay_in_range() {
        let mut clock = FrameClock::new(0.1);
        let mut t = 0u64;
        for i in 0..500u64 {
            t += (i * 7919) % 250;
            let dt = clock.tick(ms(t));
            assert!((0.0..=0.1).contains(&dt));
        }
    }
}
