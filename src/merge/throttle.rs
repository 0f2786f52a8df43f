//! Fixed-schedule pacing for merges.

use std::time::Duration;

use log::debug;

/// Sleeps for a fixed delay after every `batch_size` units of work.
///
/// The schedule does not adapt to load: a merge of N units pauses exactly
/// `N / batch_size` times.
#[derive(Debug, Clone)]
pub struct Throttle {
    label: &'static str,
    delay: Duration,
    batch_size: usize,
    in_batch: usize,
    pauses: u64,
}

impl Throttle {
    pub fn new(label: &'static str, delay: Duration, batch_size: usize) -> Self {
        Throttle {
            label,
            delay,
            batch_size: batch_size.max(1),
            in_batch: 0,
            pauses: 0,
        }
    }

    /// Record one unit of work. Returns true if a batch boundary was reached
    /// and the throttle paused.
    pub fn tick(&mut self) -> bool {
        self.in_batch += 1;
        if self.in_batch < self.batch_size {
            return false;
        }
        self.in_batch = 0;
        self.pause();
        true
    }

    /// Pause unconditionally.
    pub fn pause(&mut self) {
        self.pauses += 1;
        if !self.delay.is_zero() {
            debug!(
                "Throttling {} merge for {:?} (pause {})",
                self.label, self.delay, self.pauses
            );
            std::thread::sleep(self.delay);
        }
    }

    /// Number of pauses taken so far, including zero-length ones.
    pub fn pauses(&self) -> u64 {
        self.pauses
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_pauses_on_batch_boundaries() {
        let mut throttle = Throttle::new("terms", Duration::ZERO, 3);
        let paused: Vec<bool> = (0..7).map(|_| throttle.tick()).collect();
        assert_eq!(paused, vec![false, false, true, false, false, true, false]);
        assert_eq!(throttle.pauses(), 2);
    }

    #[test]
    fn test_zero_batch_is_clamped() {
        let mut throttle = Throttle::new("docs", Duration::ZERO, 0);
        assert_eq!(throttle.batch_size(), 1);
        assert!(throttle.tick());
    }

    #[test]
    fn test_unbounded_batch_never_pauses() {
        let mut throttle = Throttle::new("terms", Duration::from_secs(60), usize::MAX);
        for _ in 0..10_000 {
            assert!(!throttle.tick());
        }
        assert_eq!(throttle.pauses(), 0);
    }

    #[test]
    fn test_pause_sleeps_for_delay() {
        let mut throttle = Throttle::new("sort-maps", Duration::from_millis(20), 1);
        let started = Instant::now();
        throttle.tick();
        throttle.tick();
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(throttle.pauses(), 2);
    }
}
