//! framebuf - progressive, memory-bounded frame buffering for animated
//! image sequences.
//!
//! A [`BufferingController`] keeps a bounded window of decoded frames ahead of
//! the playback cursor, fetching them on background workers from a
//! [`FrameSource`]. A [`Player`](player::Player) pulls frames from it on the
//! animation's cadence.

// Core engine (controller, window, workers)
pub mod core;

pub mod cli;
pub mod config;
pub mod paths;
pub mod player;
pub mod synthetic;

// Re-export commonly used types from core
pub use crate::core::buffering::{BufferStats, BufferingController};
pub use crate::core::error::BufferError;
pub use crate::core::source::{
    AnimationState, BufferEvent, BufferListener, ChannelListener, FrameMemory, FrameSource,
    NullListener,
};
pub use config::{BufferConfig, UnderRunPolicy};
