//! Core buffering engine - controller, window, memory budget, workers
//!
//! These modules are independent of any playback driver or UI.

pub mod buffering;
pub mod cache_man;
pub mod error;
pub mod notify;
pub mod source;
pub mod ticker;
pub mod window;
pub mod workers;

// Re-exports for convenience
pub use buffering::{BufferStats, BufferingController};
pub use cache_man::MemoryBudget;
pub use error::BufferError;
pub use source::{
    AnimationState, BufferEvent, BufferListener, ChannelListener, FrameMemory, FrameSource,
    NullListener,
};
pub use ticker::FrameTicker;
pub use workers::{Epoch, EpochToken, WorkerPool, Workers};
