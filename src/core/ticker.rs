//! Frame ticker: one cancellable scheduled task for playback cadence.
//!
//! A playback driver needs two timers: one that fires when the current frame's
//! delay has elapsed and one that polls buffering while under-running. Both are
//! the same thing (fire once after a delay, cancellable, reschedulable), so
//! one ticker serves both.
//!
//! # Usage
//! ```ignore
//! ticker.schedule_at(now, source.delay_time(index));
//!
//! // In update loop:
//! if ticker.tick_at(Instant::now()) {
//!     show_next_frame();
//! }
//! ```

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct FrameTicker {
    /// When the pending task fires
    due: Option<Instant>,
    /// Bumped on every schedule/cancel so stale deadlines can be told apart
    generation: u64,
}

impl FrameTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a tick `delay` after `now`. Replaces any pending tick.
    pub fn schedule_at(&mut self, now: Instant, delay: Duration) -> u64 {
        self.generation += 1;
        self.due = Some(now + delay);
        log::trace!("FrameTicker: scheduled in {}ms (gen {})", delay.as_millis(), self.generation);
        self.generation
    }

    pub fn schedule(&mut self, delay: Duration) -> u64 {
        self.schedule_at(Instant::now(), delay)
    }

    /// Cancel the pending tick, if any.
    pub fn cancel(&mut self) {
        if self.due.take().is_some() {
            self.generation += 1;
            log::trace!("FrameTicker: cancelled");
        }
    }

    /// True once when the pending tick is due; clears it.
    pub fn tick_at(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    /// Time left until the pending tick, zero if already due.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.due.map(|due| due.saturating_duration_since(now))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_due_immediately() {
        let now = Instant::now();
        let mut ticker = FrameTicker::new();
        ticker.schedule_at(now, Duration::from_millis(100));
        assert!(ticker.is_pending());
        assert!(!ticker.tick_at(now));
        assert_eq!(ticker.remaining(now), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_fires_once() {
        let now = Instant::now();
        let mut ticker = FrameTicker::new();
        ticker.schedule_at(now, Duration::from_millis(10));

        let later = now + Duration::from_millis(15);
        assert!(ticker.tick_at(later));
        assert!(!ticker.tick_at(later));
        assert!(!ticker.is_pending());
    }

    #[test]
    fn test_reschedule_replaces() {
        let now = Instant::now();
        let mut ticker = FrameTicker::new();
        let first = ticker.schedule_at(now, Duration::from_millis(10));
        let second = ticker.schedule_at(now, Duration::from_millis(50));
        assert!(second > first);

        assert!(!ticker.tick_at(now + Duration::from_millis(20)));
        assert!(ticker.tick_at(now + Duration::from_millis(50)));
    }

    #[test]
    fn test_cancel() {
        let now = Instant::now();
        let mut ticker = FrameTicker::new();
        ticker.schedule_at(now, Duration::ZERO);
        ticker.cancel();
        assert!(!ticker.tick_at(now + Duration::from_secs(1)));
        // Idempotent
        let generation = ticker.generation();
        ticker.cancel();
        assert_eq!(ticker.generation(), generation);
    }

    #[test]
    fn test_schedule_from_now() {
        let mut ticker = FrameTicker::new();
        ticker.schedule(Duration::from_secs(60));
        assert!(!ticker.tick_at(Instant::now()));
        assert!(ticker.remaining(Instant::now()).is_some_and(|left| left > Duration::from_secs(50)));
    }
}
