//! Synthetic frame source: fixed-size byte frames with a simulated decode
//! cost. Used by the demo binary and the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::error::BufferError;
use crate::core::source::FrameSource;

#[derive(Debug)]
pub struct SyntheticSource {
    frames: usize,
    delay: Duration,
    decode_time: Duration,
    frame_bytes: usize,
    /// Fail every Nth frame index (index % n == n - 1)
    fail_every: Option<usize>,
    loads: AtomicUsize,
}

impl SyntheticSource {
    pub fn new(frames: usize, delay: Duration) -> Self {
        Self {
            frames,
            delay,
            decode_time: Duration::ZERO,
            frame_bytes: 1024,
            fail_every: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_decode_time(mut self, decode_time: Duration) -> Self {
        self.decode_time = decode_time;
        self
    }

    pub fn with_frame_bytes(mut self, frame_bytes: usize) -> Self {
        self.frame_bytes = frame_bytes.max(1);
        self
    }

    pub fn with_fail_every(mut self, n: usize) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Total `load_object_at_index` calls so far
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl FrameSource for SyntheticSource {
    type Frame = Vec<u8>;

    fn load_object_at_index(&self, index: usize) -> Result<Vec<u8>, BufferError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if index >= self.frames {
            return Err(BufferError::fetch(index, "index past end of sequence"));
        }
        if !self.decode_time.is_zero() {
            std::thread::sleep(self.decode_time);
        }
        if let Some(n) = self.fail_every {
            if index % n == n - 1 {
                return Err(BufferError::fetch(index, "synthetic decode failure"));
            }
        }
        Ok(vec![(index % 256) as u8; self.frame_bytes])
    }

    fn count_of_objects_to_buffer(&self) -> usize {
        self.frames
    }

    fn animation_duration(&self) -> Duration {
        self.delay * self.frames as u32
    }

    fn delay_time(&self, _index: usize) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_carry_index() {
        let source = SyntheticSource::new(300, Duration::from_millis(10)).with_frame_bytes(4);
        assert_eq!(source.load_object_at_index(3).unwrap(), vec![3u8; 4]);
        assert_eq!(source.load_object_at_index(257).unwrap(), vec![1u8; 4]);
        assert_eq!(source.loads(), 2);
    }

    #[test]
    fn test_fail_every() {
        let source = SyntheticSource::new(10, Duration::from_millis(10)).with_fail_every(3);
        assert!(source.load_object_at_index(1).is_ok());
        assert!(matches!(
            source.load_object_at_index(2),
            Err(BufferError::FetchFailed { index: 2, .. })
        ));
        assert!(source.load_object_at_index(10).is_err());
    }

    #[test]
    fn test_duration() {
        let source = SyntheticSource::new(5, Duration::from_millis(20));
        assert_eq!(source.animation_duration(), Duration::from_millis(100));
        assert_eq!(source.delay_time(4), Duration::from_millis(20));
    }
}
