//! Playback driver: pulls frames from a [`BufferingController`] on the
//! animation's own cadence.
//!
//! **Why**: the controller only buffers; something has to decide when the
//! next frame is due and what to do when it isn't ready.
//!
//! # Timing Model
//!
//! Each frame is shown for `FrameSource::delay_time(index)`. The next tick is
//! scheduled from the time the current frame was taken, not from wall-clock
//! frame numbers, so a stall shifts the animation rather than dropping frames
//! (unless the policy is `Skip`).
//!
//! # Under-run
//!
//! - `Wait`: hold the playhead, poll again after a short retry delay. The
//!   caller keeps showing its last frame. A frame the controller gave up on
//!   is stepped over.
//! - `Skip`: advance the playhead as if the frame had been shown.

use log::{debug, error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::UnderRunPolicy;
use crate::core::buffering::BufferingController;
use crate::core::error::BufferError;
use crate::core::source::FrameSource;
use crate::core::ticker::FrameTicker;

/// Poll interval while waiting for a frame to arrive
const UNDER_RUN_RETRY: Duration = Duration::from_millis(5);

/// Result of one [`Player::tick_at`] call.
#[derive(Debug)]
pub enum TickOutcome<F> {
    /// Nothing due yet (or not playing)
    Idle,
    /// Show this frame
    Frame { index: usize, frame: F },
    /// Frame not ready, playhead held
    UnderRun { index: usize },
    /// Frame not ready, playhead moved on
    Skipped { index: usize },
}

impl<F> TickOutcome<F> {
    pub fn is_frame(&self) -> bool {
        matches!(self, TickOutcome::Frame { .. })
    }
}

pub struct Player<S: FrameSource> {
    controller: Arc<BufferingController<S>>,
    ticker: FrameTicker,
    policy: UnderRunPolicy,
    playhead: usize,
    playing: bool,
    /// Frames shown since `play()`
    shown: u64,
}

impl<S: FrameSource> Player<S> {
    pub fn new(controller: Arc<BufferingController<S>>, policy: UnderRunPolicy) -> Self {
        Self {
            controller,
            ticker: FrameTicker::new(),
            policy,
            playhead: 0,
            playing: false,
            shown: 0,
        }
    }

    pub fn controller(&self) -> &Arc<BufferingController<S>> {
        &self.controller
    }

    pub fn playhead(&self) -> usize {
        self.playhead
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }

    pub fn policy(&self) -> UnderRunPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: UnderRunPolicy) {
        self.policy = policy;
    }

    /// Start buffering at `from`; the first frame is due immediately.
    pub fn play_at(&mut self, from: usize, now: Instant) -> Result<(), BufferError> {
        self.controller.start_buffering_from_index(from)?;
        self.playhead = from;
        self.playing = true;
        self.shown = 0;
        self.ticker.schedule_at(now, Duration::ZERO);
        info!("Playback started at frame {}", from);
        Ok(())
    }

    pub fn play(&mut self, from: usize) -> Result<(), BufferError> {
        self.play_at(from, Instant::now())
    }

    /// Stop playback and release buffered frames.
    pub fn stop(&mut self) {
        if self.playing {
            info!("Playback stopped at frame {} ({} shown)", self.playhead, self.shown);
        }
        self.playing = false;
        self.ticker.cancel();
        self.controller.stop_buffering();
    }

    /// Time until the next tick is due, for sleeping between ticks.
    pub fn next_tick_in(&self, now: Instant) -> Option<Duration> {
        self.ticker.remaining(now)
    }

    pub fn tick(&mut self) -> TickOutcome<S::Frame> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> TickOutcome<S::Frame> {
        if !self.playing || !self.ticker.tick_at(now) {
            return TickOutcome::Idle;
        }

        let index = self.playhead;
        match self.controller.pop_cached_object_at(index) {
            Ok(frame) => {
                self.shown += 1;
                self.advance(index, now);
                TickOutcome::Frame { index, frame }
            }
            Err(BufferError::UnderRun { .. }) => match self.policy {
                UnderRunPolicy::Wait if self.controller.is_abandoned(index) => {
                    debug!("Frame {} could not be loaded, stepping over", index);
                    self.advance(index, now);
                    TickOutcome::Skipped { index }
                }
                UnderRunPolicy::Wait => {
                    debug!("Under-run at frame {}, waiting", index);
                    self.ticker.schedule_at(now, UNDER_RUN_RETRY);
                    TickOutcome::UnderRun { index }
                }
                UnderRunPolicy::Skip => {
                    debug!("Under-run at frame {}, skipping", index);
                    self.advance(index, now);
                    TickOutcome::Skipped { index }
                }
            },
            Err(e) => {
                error!("Playback halted: {}", e);
                self.stop();
                TickOutcome::Idle
            }
        }
    }

    fn advance(&mut self, index: usize, now: Instant) {
        let total = self.controller.total_image_count().max(1);
        self.playhead = (index + 1) % total;
        let delay = self.controller.source().delay_time(index);
        self.ticker.schedule_at(now, delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_man::MemoryBudget;
    use crate::core::source::NullListener;
    use crate::synthetic::SyntheticSource;
    use crate::core::workers::{Job, WorkerPool};

    /// Runs fetches inline: every frame is buffered as soon as it is requested.
    struct InlinePool;

    impl WorkerPool for InlinePool {
        fn execute(&self, job: Job) {
            job();
        }
    }

    /// Never runs fetches: every pop under-runs.
    struct StalledPool;

    impl WorkerPool for StalledPool {
        fn execute(&self, _job: Job) {}
    }

    struct Numbers(usize);

    impl FrameSource for Numbers {
        type Frame = Vec<u8>;

        fn load_object_at_index(&self, index: usize) -> Result<Vec<u8>, BufferError> {
            Ok(vec![index as u8; 4])
        }

        fn count_of_objects_to_buffer(&self) -> usize {
            self.0
        }

        fn animation_duration(&self) -> Duration {
            Duration::from_millis(self.0 as u64 * 100)
        }
    }

    fn player(pool: Arc<dyn WorkerPool>, policy: UnderRunPolicy) -> Player<Numbers> {
        let controller = BufferingController::from_parts(
            Arc::new(Numbers(4)),
            Arc::new(NullListener),
            pool,
            3,
            MemoryBudget::unbounded(),
        );
        Player::new(Arc::new(controller), policy)
    }

    #[test]
    fn test_plays_frames_at_delay_cadence() {
        let mut player = player(Arc::new(InlinePool), UnderRunPolicy::Wait);
        let t0 = Instant::now();
        player.play_at(0, t0).unwrap();

        match player.tick_at(t0) {
            TickOutcome::Frame { index, frame } => {
                assert_eq!(index, 0);
                assert_eq!(frame, vec![0u8; 4]);
            }
            other => panic!("expected frame, got {:?}", other),
        }
        // 100ms per frame
        assert!(matches!(player.tick_at(t0 + Duration::from_millis(50)), TickOutcome::Idle));
        assert!(player.tick_at(t0 + Duration::from_millis(100)).is_frame());
        assert_eq!(player.playhead(), 2);
    }

    #[test]
    fn test_loops_around() {
        let mut player = player(Arc::new(InlinePool), UnderRunPolicy::Wait);
        let mut now = Instant::now();
        player.play_at(2, now).unwrap();

        let mut seen = Vec::new();
        for _ in 0..5 {
            if let TickOutcome::Frame { index, .. } = player.tick_at(now) {
                seen.push(index);
            }
            now += Duration::from_millis(100);
        }
        assert_eq!(seen, vec![2, 3, 0, 1, 2]);
        assert_eq!(player.frames_shown(), 5);
    }

    #[test]
    fn test_wait_policy_holds_playhead() {
        let mut player = player(Arc::new(StalledPool), UnderRunPolicy::Wait);
        let t0 = Instant::now();
        player.play_at(1, t0).unwrap();

        assert!(matches!(player.tick_at(t0), TickOutcome::UnderRun { index: 1 }));
        assert_eq!(player.playhead(), 1);
        assert_eq!(player.next_tick_in(t0), Some(UNDER_RUN_RETRY));
    }

    #[test]
    fn test_skip_policy_advances() {
        let mut player = player(Arc::new(StalledPool), UnderRunPolicy::Skip);
        let t0 = Instant::now();
        player.play_at(1, t0).unwrap();

        assert!(matches!(player.tick_at(t0), TickOutcome::Skipped { index: 1 }));
        assert_eq!(player.playhead(), 2);
    }

    #[test]
    fn test_wait_policy_steps_over_unloadable_frame() {
        // Every second frame fails to decode
        let source = SyntheticSource::new(4, Duration::from_millis(10))
            .with_fail_every(2)
            .with_frame_bytes(4);
        let controller = BufferingController::from_parts(
            Arc::new(source),
            Arc::new(NullListener),
            Arc::new(InlinePool),
            3,
            MemoryBudget::unbounded(),
        );
        let mut player = Player::new(Arc::new(controller), UnderRunPolicy::Wait);
        let mut now = Instant::now();
        player.play_at(0, now).unwrap();

        assert!(player.tick_at(now).is_frame());
        now += Duration::from_millis(10);
        assert!(matches!(player.tick_at(now), TickOutcome::Skipped { index: 1 }));
        assert_eq!(player.playhead(), 2);

        now += Duration::from_millis(10);
        match player.tick_at(now) {
            TickOutcome::Frame { index, .. } => assert_eq!(index, 2),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_goes_idle() {
        let mut player = player(Arc::new(InlinePool), UnderRunPolicy::Wait);
        let t0 = Instant::now();
        player.play_at(0, t0).unwrap();
        player.stop();

        assert!(!player.is_playing());
        assert!(matches!(player.tick_at(t0), TickOutcome::Idle));
        assert_eq!(player.controller().buffered_object_count(), 0);
    }

    #[test]
    fn test_play_invalid_index() {
        let mut player = player(Arc::new(InlinePool), UnderRunPolicy::Wait);
        assert!(matches!(
            player.play(9),
            Err(BufferError::InvalidIndex { index: 9, total: 4 })
        ));
        assert!(!player.is_playing());
    }
}
