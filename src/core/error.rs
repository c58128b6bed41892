//! Buffering errors (thiserror-based).

use thiserror::Error;

/// Errors observed at the buffering API boundary.
///
/// Only `UnderRun` and `InvalidIndex` are ever returned by the controller.
/// `FetchFailed` is what a [`FrameSource`](super::FrameSource) reports; the
/// controller retries it and surfaces it only as later under-runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("frame {index} is not buffered yet")]
    UnderRun { index: usize },

    #[error("frame index {index} out of range (total {total})")]
    InvalidIndex { index: usize, total: usize },

    #[error("failed to load frame {index}: {reason}")]
    FetchFailed { index: usize, reason: String },

    #[error("config error: {0}")]
    Config(String),
}

impl BufferError {
    pub fn fetch(index: usize, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            index,
            reason: reason.into(),
        }
    }

    pub fn is_under_run(&self) -> bool {
        matches!(self, Self::UnderRun { .. })
    }
}

pub type Result<T> = std::result::Result<T, BufferError>;
