//! Look-ahead frame buffering controller.
//!
//! **Why**: decoding an animation frame is slower than displaying it. The
//! controller keeps a bounded window of decoded frames ahead of the playback
//! cursor so the playback tick never waits on a decode.
//!
//! **Used by**: Player (or any driver that pulls frames on a timer)
//!
//! # Window
//!
//! The window covers `min(effective_window, total)` indices starting at the
//! cursor and wrapping at `total`. Frames outside it are never kept: they are
//! dropped when the cursor moves past them and discarded if a fetch for them
//! completes late.
//!
//! # Concurrency
//!
//! All mutable state sits behind one mutex. Fetches run on a [`WorkerPool`]
//! and funnel their results back through that mutex. Fetch jobs are issued
//! after the lock is released, so an inline pool cannot deadlock.
//!
//! # Cancellation
//!
//! `stop_buffering()` advances the controller [`Epoch`]: queued fetches are
//! skipped by the pool, and completions from the old epoch are discarded.
//! Restarting from another index keeps the epoch; in-flight fetches for
//! indices that left the window are discarded on completion instead.
//! An index whose load is still running after a stop is not fetched again
//! until that load returns, so the source never sees two concurrent loads of
//! one index.

use log::{debug, info, trace, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::cache_man::MemoryBudget;
use super::error::BufferError;
use super::notify::Notifier;
use super::source::{AnimationState, BufferEvent, BufferListener, FrameMemory, FrameSource};
use super::window::{forward_distance, FrameWindow};
use super::workers::{Epoch, WorkerPool, Workers};
use crate::config::BufferConfig;

/// Failed fetches allowed per index before the slot is left empty.
const MAX_FETCH_ATTEMPTS: u8 = 2;

/// Counters for monitoring buffer health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BufferStats {
    /// Pops that returned a frame
    pub hits: u64,
    /// Pops that returned `UnderRun`
    pub under_runs: u64,
    pub fetches_issued: u64,
    pub fetch_failures: u64,
    /// Completions dropped as stale or out of window
    pub discarded: u64,
    /// Frames dropped by memory pressure or window shrink
    pub evictions: u64,
    pub bytes_buffered: usize,
    pub memory_limit: usize,
}

impl BufferStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.under_runs;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

struct Inner<F> {
    state: AnimationState,
    total: usize,
    cursor: usize,
    max_buffer_count: usize,
    /// Effective window; below `max_buffer_count` after memory pressure
    window: usize,
    frames: FrameWindow<F>,
    in_flight: HashSet<usize>,
    /// Indices currently inside `load_object_at_index`, whatever their epoch
    loading: HashSet<usize>,
    failures: HashMap<usize, u8>,
    abandoned: HashSet<usize>,
    last_progress: Option<f32>,
    stats: BufferStats,
}

impl<F: FrameMemory> Inner<F> {
    fn is_running(&self) -> bool {
        self.state == AnimationState::Running
    }

    fn window_len(&self) -> usize {
        self.window.min(self.total)
    }

    fn distance(&self, index: usize) -> usize {
        forward_distance(index, self.cursor, self.total)
    }

    fn is_desired(&self, index: usize) -> bool {
        self.is_running() && self.total > 0 && self.distance(index) < self.window_len()
    }

    fn advance_cursor(&mut self) {
        self.cursor = (self.cursor + 1) % self.total;
    }

    /// Forget failures for the `steps` slots starting at the cursor.
    fn forget_passed(&mut self, steps: usize) {
        let (cursor, total) = (self.cursor, self.total);
        self.abandoned
            .retain(|&index| forward_distance(index, cursor, total) >= steps);
        self.failures
            .retain(|&index, _| forward_distance(index, cursor, total) >= steps);
    }

    /// One more frame of window per consumed frame, up to the configured max.
    fn recover_window(&mut self) {
        if self.window < self.max_buffer_count {
            self.window += 1;
            trace!("Window recovering: {}/{}", self.window, self.max_buffer_count);
        }
    }

    /// Drop buffered frames that fell out of the window.
    fn prune(&mut self) -> usize {
        let (cursor, total, len) = (self.cursor, self.total, self.window_len());
        let dropped = self
            .frames
            .retain(|index| forward_distance(index, cursor, total) < len);
        if dropped > 0 {
            debug!("Pruned {} frames outside window (cursor {})", dropped, cursor);
        }
        dropped
    }

    /// Mark the next batch of missing indices as in flight and return them.
    fn plan_fetches(&mut self) -> Vec<usize> {
        if !self.is_running() || self.total == 0 {
            return Vec::new();
        }
        let len = self.window_len();
        let desired_in_flight = self
            .in_flight
            .iter()
            .filter(|&&index| self.distance(index) < len)
            .count();
        let mut room = len.saturating_sub(self.frames.len() + desired_in_flight);

        let mut planned = Vec::new();
        for offset in 0..len {
            if room == 0 {
                break;
            }
            let index = (self.cursor + offset) % self.total;
            if self.frames.contains(index)
                || self.in_flight.contains(&index)
                || self.loading.contains(&index)
                || self.abandoned.contains(&index)
            {
                continue;
            }
            self.in_flight.insert(index);
            planned.push(index);
            room -= 1;
        }
        self.stats.fetches_issued += planned.len() as u64;
        planned
    }

    /// Insert a completed frame, making room by distance if the window is full.
    fn accept(&mut self, index: usize, frame: F) -> bool {
        if self.frames.len() >= self.window_len() {
            let furthest = self
                .frames
                .indices()
                .max_by_key(|&buffered| self.distance(buffered));
            match furthest {
                Some(furthest) if self.distance(furthest) > self.distance(index) => {
                    self.frames.take(furthest);
                    self.stats.evictions += 1;
                }
                _ => return false,
            }
        }
        self.frames.insert(index, frame);
        true
    }

    /// Shed frames furthest from the cursor until under the byte ceiling.
    fn enforce_memory_limit(&mut self) {
        if !self.frames.budget().is_over_limit() {
            return;
        }
        let mut evicted = 0;
        while self.frames.budget().is_over_limit() {
            match self.frames.evict_furthest(self.cursor, self.total) {
                Some(_) => evicted += 1,
                None => break,
            }
        }
        self.stats.evictions += evicted;
        self.window = self.frames.len().max(1);
        let (usage, limit) = self.frames.budget().mem();
        info!(
            "Memory ceiling hit: evicted {} frames, window now {} ({} / {} bytes)",
            evicted, self.window, usage, limit
        );
    }

    fn progress(&self) -> f32 {
        (self.frames.len() as f32 / self.max_buffer_count as f32).min(1.0)
    }

    fn push_progress(&mut self, notifier: &Notifier) {
        let percent = self.progress();
        if self.last_progress != Some(percent) {
            self.last_progress = Some(percent);
            notifier.push(BufferEvent::Progress(percent));
        }
    }

    fn set_state(&mut self, state: AnimationState, notifier: &Notifier) {
        if self.state != state {
            self.state = state;
            notifier.push(BufferEvent::StateChanged(state));
        }
    }
}

struct Shared<S: FrameSource> {
    source: Arc<S>,
    pool: Arc<dyn WorkerPool>,
    epoch: Epoch,
    notifier: Notifier,
    inner: Mutex<Inner<S::Frame>>,
}

impl<S: FrameSource> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Inner<S::Frame>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issue fetches (lock must be released) and deliver queued events.
    fn dispatch(self: &Arc<Self>, fetches: Vec<usize>) {
        for index in fetches {
            self.spawn_fetch(index);
        }
        self.notifier.flush();
    }

    fn spawn_fetch(self: &Arc<Self>, index: usize) {
        let token = self.epoch.token();
        let epoch = token.epoch();
        let source = Arc::clone(&self.source);
        let weak: Weak<Self> = Arc::downgrade(self);

        trace!("Fetch issued: frame {} (epoch {})", index, epoch);
        self.pool.execute_with_epoch(
            token,
            Box::new(move || {
                // No strong handle is held across the load itself
                let admitted = weak.upgrade().is_some_and(|shared| shared.begin_load(epoch, index));
                if !admitted {
                    return;
                }
                let result = source.load_object_at_index(index);
                if let Some(shared) = weak.upgrade() {
                    shared.complete(epoch, index, result);
                }
            }),
        );
    }

    /// Claim `index` for loading. False if the job went stale while queued.
    fn begin_load(&self, epoch: u64, index: usize) -> bool {
        let mut inner = self.lock();
        if epoch != self.epoch.current() || !inner.is_running() {
            trace!("Skipped stale fetch for frame {} (epoch {})", index, epoch);
            return false;
        }
        inner.loading.insert(index);
        true
    }

    fn complete(self: &Arc<Self>, epoch: u64, index: usize, result: Result<S::Frame, BufferError>) {
        let fetches = {
            let mut inner = self.lock();
            inner.loading.remove(&index);

            if epoch != self.epoch.current() || !inner.is_running() {
                // in_flight belongs to a newer session now; the index may be wanted again
                inner.stats.discarded += 1;
                trace!("Discarded frame {} from stale epoch {}", index, epoch);
                let fetches = inner.plan_fetches();
                drop(inner);
                self.dispatch(fetches);
                return;
            }
            inner.in_flight.remove(&index);

            match result {
                Err(e) => {
                    inner.stats.fetch_failures += 1;
                    let attempts = {
                        let entry = inner.failures.entry(index).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    if attempts >= MAX_FETCH_ATTEMPTS {
                        warn!("Giving up on frame {} after {} attempts: {}", index, attempts, e);
                        inner.abandoned.insert(index);
                    } else {
                        warn!("Fetch failed, will retry: {}", e);
                    }
                }
                Ok(frame) => {
                    inner.failures.remove(&index);
                    if inner.is_desired(index) && inner.accept(index, frame) {
                        trace!("Buffered frame {} ({} buffered)", index, inner.frames.len());
                        inner.enforce_memory_limit();
                        inner.push_progress(&self.notifier);
                    } else {
                        inner.stats.discarded += 1;
                        debug!("Discarded frame {} outside window (cursor {})", index, inner.cursor);
                    }
                }
            }
            inner.plan_fetches()
        };
        self.dispatch(fetches);
    }
}

/// Bounded look-ahead cache of decoded frames.
///
/// # Example
/// ```ignore
/// let controller = BufferingController::with_workers(source, listener, &BufferConfig::default());
/// controller.start_buffering_from_index(0)?;
///
/// // on every display tick:
/// match controller.pop_cached_object() {
///     Ok(frame) => show(frame),
///     Err(BufferError::UnderRun { .. }) => {} // keep last frame
///     Err(e) => log::error!("{}", e),
/// }
/// ```
pub struct BufferingController<S: FrameSource> {
    shared: Arc<Shared<S>>,
}

impl<S: FrameSource> BufferingController<S> {
    /// Controller fetching on `pool`, sized and budgeted from `config`.
    pub fn new(
        source: Arc<S>,
        listener: Arc<dyn BufferListener>,
        pool: Arc<dyn WorkerPool>,
        config: &BufferConfig,
    ) -> Self {
        Self::from_parts(source, listener, pool, config.max_buffer_count, config.memory_budget())
    }

    /// Controller with its own worker pool of `config.worker_threads`.
    pub fn with_workers(source: Arc<S>, listener: Arc<dyn BufferListener>, config: &BufferConfig) -> Self {
        let pool: Arc<dyn WorkerPool> = Arc::new(Workers::new(config.worker_threads));
        Self::new(source, listener, pool, config)
    }

    pub fn from_parts(
        source: Arc<S>,
        listener: Arc<dyn BufferListener>,
        pool: Arc<dyn WorkerPool>,
        max_buffer_count: usize,
        budget: MemoryBudget,
    ) -> Self {
        let max_buffer_count = max_buffer_count.max(1);
        debug!(
            "BufferingController created: max_buffer_count={}, memory limit={} bytes",
            max_buffer_count,
            budget.limit()
        );
        let inner = Inner {
            state: AnimationState::Stopped,
            total: 0,
            cursor: 0,
            max_buffer_count,
            window: max_buffer_count,
            frames: FrameWindow::new(budget),
            in_flight: HashSet::new(),
            loading: HashSet::new(),
            failures: HashMap::new(),
            abandoned: HashSet::new(),
            last_progress: None,
            stats: BufferStats::default(),
        };
        Self {
            shared: Arc::new(Shared {
                source,
                pool,
                epoch: Epoch::new(),
                notifier: Notifier::new(listener),
                inner: Mutex::new(inner),
            }),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.shared.source
    }

    fn check_index(&self, index: usize) -> Result<usize, BufferError> {
        let total = self.shared.source.count_of_objects_to_buffer();
        if index >= total {
            return Err(BufferError::InvalidIndex { index, total });
        }
        Ok(total)
    }

    /// Start (or retarget) buffering with the cursor at `index`.
    pub fn start_buffering_from_index(&self, index: usize) -> Result<(), BufferError> {
        let total = self.check_index(index)?;
        let fetches = {
            let mut inner = self.shared.lock();
            let same_target = inner.is_running() && inner.cursor == index && inner.total == total;
            if !same_target {
                if !inner.is_running() {
                    info!("Buffering started at frame {} of {}", index, total);
                } else {
                    info!("Buffering retargeted: frame {} -> {}", inner.cursor, index);
                }
                inner.set_state(AnimationState::Running, &self.shared.notifier);
                inner.total = total;
                inner.cursor = index;
                inner.failures.clear();
                inner.abandoned.clear();
                let dropped = inner.prune() as u64;
                inner.stats.evictions += dropped;
                inner.push_progress(&self.shared.notifier);
            }
            inner.plan_fetches()
        };
        self.shared.dispatch(fetches);
        Ok(())
    }

    /// Stop buffering, cancel outstanding fetches and clear the window.
    ///
    /// Safe from any state.
    pub fn stop_buffering(&self) {
        {
            let mut inner = self.shared.lock();
            if !inner.is_running() && inner.frames.is_empty() && inner.in_flight.is_empty() {
                return;
            }
            self.shared.epoch.advance();
            inner.frames.clear();
            inner.in_flight.clear();
            inner.failures.clear();
            inner.abandoned.clear();
            inner.window = inner.max_buffer_count;
            inner.set_state(AnimationState::Stopped, &self.shared.notifier);
            inner.push_progress(&self.shared.notifier);
            info!("Buffering stopped at frame {}", inner.cursor);
        }
        self.shared.notifier.flush();
    }

    /// Take the frame at the cursor and advance the cursor.
    ///
    /// Never blocks: a missing frame is `UnderRun` and the cursor stays put,
    /// except for a slot whose fetch was given up on, which is stepped over.
    pub fn pop_cached_object(&self) -> Result<S::Frame, BufferError> {
        let (result, fetches) = {
            let mut inner = self.shared.lock();
            if !inner.is_running() || inner.total == 0 {
                inner.stats.under_runs += 1;
                return Err(BufferError::UnderRun { index: inner.cursor });
            }
            let index = inner.cursor;
            let result = match inner.frames.take(index) {
                Some(frame) => {
                    inner.stats.hits += 1;
                    inner.advance_cursor();
                    inner.recover_window();
                    Ok(frame)
                }
                None => {
                    inner.stats.under_runs += 1;
                    if inner.abandoned.remove(&index) {
                        inner.failures.remove(&index);
                        inner.advance_cursor();
                        debug!("Skipped unloadable frame {}", index);
                    }
                    Err(BufferError::UnderRun { index })
                }
            };
            inner.prune();
            inner.push_progress(&self.shared.notifier);
            (result, inner.plan_fetches())
        };
        self.shared.dispatch(fetches);
        result
    }

    /// Take the frame at `index`; the cursor moves to the frame after it.
    ///
    /// A miss outside the current window is treated as a seek: the cursor
    /// jumps to `index` and buffering restarts there.
    pub fn pop_cached_object_at(&self, index: usize) -> Result<S::Frame, BufferError> {
        self.check_index(index)?;
        let (result, fetches) = {
            let mut inner = self.shared.lock();
            if !inner.is_running() {
                inner.stats.under_runs += 1;
                return Err(BufferError::UnderRun { index });
            }
            let result = match inner.frames.take(index) {
                Some(frame) => {
                    inner.stats.hits += 1;
                    let passed = inner.distance(index) + 1;
                    inner.forget_passed(passed);
                    inner.cursor = index;
                    inner.advance_cursor();
                    inner.recover_window();
                    Ok(frame)
                }
                None => {
                    inner.stats.under_runs += 1;
                    // A given-up slot stays empty until the cursor passes it
                    if inner.distance(index) >= inner.window_len() {
                        debug!("Seek: cursor {} -> {}", inner.cursor, index);
                        inner.cursor = index;
                        inner.failures.clear();
                        inner.abandoned.clear();
                    }
                    Err(BufferError::UnderRun { index })
                }
            };
            let dropped = inner.prune() as u64;
            inner.stats.evictions += dropped;
            inner.push_progress(&self.shared.notifier);
            (result, inner.plan_fetches())
        };
        self.shared.dispatch(fetches);
        result
    }

    /// Drop everything except the frame at the cursor and shrink the window
    /// to one frame. The window grows back by one per consumed frame.
    pub fn did_receive_memory_warning(&self) {
        let fetches = {
            let mut inner = self.shared.lock();
            if !inner.is_running() {
                debug!("Memory warning while stopped, nothing buffered");
                return;
            }
            let cursor = inner.cursor;
            let evicted = inner.frames.retain(|index| index == cursor) as u64;
            inner.stats.evictions += evicted;
            inner.window = 1;
            info!(
                "Memory warning: evicted {} frames, kept {} (cursor {})",
                evicted,
                inner.frames.len(),
                cursor
            );
            inner.push_progress(&self.shared.notifier);
            inner.plan_fetches()
        };
        self.shared.dispatch(fetches);
    }

    /// True if fetching `index` failed twice and the slot is left empty.
    pub fn is_abandoned(&self, index: usize) -> bool {
        self.shared.lock().abandoned.contains(&index)
    }

    pub fn max_buffer_count(&self) -> usize {
        self.shared.lock().max_buffer_count
    }

    /// Resize the window. Shrinking evicts the frames furthest from the
    /// cursor; growing fetches more. Clamped to at least one frame.
    pub fn set_max_buffer_count(&self, count: usize) {
        let count = count.max(1);
        let fetches = {
            let mut inner = self.shared.lock();
            let old = inner.max_buffer_count;
            if old == count {
                return;
            }
            inner.max_buffer_count = count;
            // A degraded window keeps recovering toward the new max
            if inner.window >= old || inner.window > count {
                inner.window = count;
            }
            let dropped = inner.prune() as u64;
            inner.stats.evictions += dropped;
            debug!("max_buffer_count {} -> {} (evicted {})", old, count, dropped);
            inner.push_progress(&self.shared.notifier);
            inner.plan_fetches()
        };
        self.shared.dispatch(fetches);
    }

    pub fn buffered_object_count(&self) -> usize {
        self.shared.lock().frames.len()
    }

    pub fn current_image_index(&self) -> usize {
        self.shared.lock().cursor
    }

    pub fn total_image_count(&self) -> usize {
        self.shared.source.count_of_objects_to_buffer()
    }

    pub fn animation_state(&self) -> AnimationState {
        self.shared.lock().state
    }

    /// Current window size; below `max_buffer_count` while recovering from
    /// memory pressure.
    pub fn effective_window(&self) -> usize {
        self.shared.lock().window
    }

    /// `buffered / max_buffer_count`, 0.0-1.0
    pub fn percent_buffered(&self) -> f32 {
        self.shared.lock().progress()
    }

    pub fn is_buffered(&self, index: usize) -> bool {
        self.shared.lock().frames.contains(index)
    }

    /// Buffered indices ordered by distance from the cursor.
    pub fn buffered_indices(&self) -> Vec<usize> {
        let inner = self.shared.lock();
        let mut indices: Vec<usize> = inner.frames.indices().collect();
        indices.sort_by_key(|&index| inner.distance(index));
        indices
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.shared.lock();
        let (usage, limit) = inner.frames.budget().mem();
        BufferStats {
            bytes_buffered: usage,
            memory_limit: limit,
            ..inner.stats
        }
    }
}

impl<S: FrameSource> Drop for BufferingController<S> {
    fn drop(&mut self) {
        self.stop_buffering();
    }
}
