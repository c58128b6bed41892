//! Collaborator contracts: where frames come from and who hears about it.
//!
//! The controller depends only on these traits. Decoding, rendering and
//! timer wiring live behind them.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::error::BufferError;

/// Whether a buffering/playback cycle is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnimationState {
    #[default]
    Stopped,
    Running,
}

/// Bytes held by a decoded frame, for the memory ceiling.
pub trait FrameMemory {
    fn mem(&self) -> usize;
}

impl FrameMemory for Vec<u8> {
    fn mem(&self) -> usize {
        self.len()
    }
}

impl FrameMemory for Box<[u8]> {
    fn mem(&self) -> usize {
        self.len()
    }
}

impl<T: FrameMemory + ?Sized> FrameMemory for Arc<T> {
    fn mem(&self) -> usize {
        (**self).mem()
    }
}

/// Supplies decoded frames on demand.
///
/// Called from worker threads, possibly concurrently for distinct indices.
pub trait FrameSource: Send + Sync + 'static {
    type Frame: FrameMemory + Send + 'static;

    /// Decode frame `index`. Failures are retried once by the controller.
    fn load_object_at_index(&self, index: usize) -> Result<Self::Frame, BufferError>;

    /// Total number of frames; fixed for the lifetime of the source.
    fn count_of_objects_to_buffer(&self) -> usize;

    /// Duration of one full loop of the animation.
    fn animation_duration(&self) -> Duration;

    /// Display time of frame `index`. Defaults to an even split of
    /// `animation_duration()`.
    fn delay_time(&self, index: usize) -> Duration {
        let _ = index;
        let count = self.count_of_objects_to_buffer().max(1) as u32;
        self.animation_duration() / count
    }
}

impl<S: FrameSource> FrameSource for Arc<S> {
    type Frame = S::Frame;

    fn load_object_at_index(&self, index: usize) -> Result<Self::Frame, BufferError> {
        (**self).load_object_at_index(index)
    }

    fn count_of_objects_to_buffer(&self) -> usize {
        (**self).count_of_objects_to_buffer()
    }

    fn animation_duration(&self) -> Duration {
        (**self).animation_duration()
    }

    fn delay_time(&self, index: usize) -> Duration {
        (**self).delay_time(index)
    }
}

/// Receives buffering notifications.
///
/// State changes arrive exactly once per transition and in order. Progress
/// updates with an unchanged value are coalesced.
pub trait BufferListener: Send + Sync {
    fn on_state_change(&self, state: AnimationState);
    fn on_progress(&self, percent: f32);
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl BufferListener for NullListener {
    fn on_state_change(&self, _state: AnimationState) {}
    fn on_progress(&self, _percent: f32) {}
}

/// Notification payload, used by [`ChannelListener`] and the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferEvent {
    StateChanged(AnimationState),
    Progress(f32),
}

impl BufferEvent {
    pub fn deliver(self, listener: &dyn BufferListener) {
        match self {
            BufferEvent::StateChanged(state) => listener.on_state_change(state),
            BufferEvent::Progress(percent) => listener.on_progress(percent),
        }
    }
}

/// Forwards notifications into a channel for a polling consumer.
///
/// # Example
/// ```ignore
/// let (listener, events) = ChannelListener::new();
/// // ... hand `Arc::new(listener)` to the controller ...
/// for event in events.try_iter() {
///     // update UI
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: Sender<BufferEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<BufferEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl BufferListener for ChannelListener {
    fn on_state_change(&self, state: AnimationState) {
        let _ = self.tx.send(BufferEvent::StateChanged(state));
    }

    fn on_progress(&self, percent: f32) {
        let _ = self.tx.send(BufferEvent::Progress(percent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl FrameSource for Fixed {
        type Frame = Vec<u8>;

        fn load_object_at_index(&self, index: usize) -> Result<Vec<u8>, BufferError> {
            Ok(vec![index as u8])
        }

        fn count_of_objects_to_buffer(&self) -> usize {
            4
        }

        fn animation_duration(&self) -> Duration {
            Duration::from_millis(400)
        }
    }

    #[test]
    fn test_default_delay_splits_duration() {
        assert_eq!(Fixed.delay_time(0), Duration::from_millis(100));
        assert_eq!(Arc::new(Fixed).delay_time(3), Duration::from_millis(100));
    }

    #[test]
    fn test_channel_listener_forwards_in_order() {
        let (listener, rx) = ChannelListener::new();
        BufferEvent::StateChanged(AnimationState::Running).deliver(&listener);
        BufferEvent::Progress(0.5).deliver(&listener);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                BufferEvent::StateChanged(AnimationState::Running),
                BufferEvent::Progress(0.5)
            ]
        );
    }

    #[test]
    fn test_frame_memory_impls() {
        assert_eq!(vec![0u8; 16].mem(), 16);
        assert_eq!(Arc::new(vec![0u8; 8]).mem(), 8);
    }
}
