//! Look-ahead window storage.
//!
//! Structure: IndexMap<usize, Frame>
//! - key: frame index
//! - order: fetch completion order (completions may arrive out of index order)
//!
//! Ordering by distance from the playback cursor is computed on demand from
//! the cursor and total count; the window never holds more than a handful of
//! frames so a linear scan is cheaper than a second index.

use indexmap::IndexMap;
use log::debug;

use super::cache_man::MemoryBudget;
use super::source::FrameMemory;

/// Forward distance from `cursor` to `index` on a loop of `total` frames.
pub fn forward_distance(index: usize, cursor: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    (index + total - cursor % total) % total
}

/// Buffered frames keyed by index, with byte accounting.
#[derive(Debug)]
pub struct FrameWindow<F> {
    frames: IndexMap<usize, F>,
    budget: MemoryBudget,
}

impl<F: FrameMemory> FrameWindow<F> {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            frames: IndexMap::new(),
            budget,
        }
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.frames.contains_key(&index)
    }

    /// Buffered indices in insertion (fetch completion) order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames.keys().copied()
    }

    /// Insert a frame; an existing frame at `index` is replaced and freed.
    pub fn insert(&mut self, index: usize, frame: F) {
        let size = frame.mem();
        if let Some(old) = self.frames.shift_remove(&index) {
            self.budget.free(old.mem());
            debug!("Replaced buffered frame {}", index);
        }
        self.frames.insert(index, frame);
        self.budget.add(size);
    }

    /// Remove and return the frame at `index`.
    pub fn take(&mut self, index: usize) -> Option<F> {
        let frame = self.frames.shift_remove(&index)?;
        self.budget.free(frame.mem());
        Some(frame)
    }

    /// Drop every frame for which `keep` returns false. Returns the count dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) -> usize {
        let before = self.frames.len();
        let budget = &self.budget;
        self.frames.retain(|&index, frame| {
            let kept = keep(index);
            if !kept {
                budget.free(frame.mem());
            }
            kept
        });
        before - self.frames.len()
    }

    /// Evict the frame furthest ahead of `cursor`, never the cursor frame itself.
    ///
    /// Returns the evicted index, or None if nothing but the cursor frame is left.
    pub fn evict_furthest(&mut self, cursor: usize, total: usize) -> Option<usize> {
        let furthest = self
            .frames
            .keys()
            .copied()
            .filter(|&index| index != cursor)
            .max_by_key(|&index| forward_distance(index, cursor, total))?;
        let frame = self.frames.shift_remove(&furthest)?;
        let size = frame.mem();
        self.budget.free(size);
        debug!("Evicted frame {} ({} bytes)", furthest, size);
        Some(furthest)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.budget.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> FrameWindow<Vec<u8>> {
        FrameWindow::new(MemoryBudget::unbounded())
    }

    #[test]
    fn test_forward_distance_wraps() {
        assert_eq!(forward_distance(5, 3, 10), 2);
        assert_eq!(forward_distance(1, 8, 10), 3);
        assert_eq!(forward_distance(8, 8, 10), 0);
        assert_eq!(forward_distance(0, 0, 0), 0);
    }

    #[test]
    fn test_insert_take_tracks_memory() {
        let mut w = window();
        w.insert(2, vec![0; 100]);
        w.insert(1, vec![0; 50]);
        assert_eq!(w.len(), 2);
        assert_eq!(w.budget().usage(), 150);
        // Insertion order, not index order
        assert_eq!(w.indices().collect::<Vec<_>>(), vec![2, 1]);

        assert_eq!(w.take(2).map(|f| f.len()), Some(100));
        assert!(w.take(2).is_none());
        assert_eq!(w.budget().usage(), 50);
    }

    #[test]
    fn test_replace_frees_old() {
        let mut w = window();
        w.insert(0, vec![0; 100]);
        w.insert(0, vec![0; 10]);
        assert_eq!(w.len(), 1);
        assert_eq!(w.budget().usage(), 10);
    }

    #[test]
    fn test_evict_furthest_respects_wrap() {
        let mut w = window();
        // cursor 8 of 10: forward order is 8, 9, 0, 1
        for index in [8, 9, 0, 1] {
            w.insert(index, vec![0; 1]);
        }
        assert_eq!(w.evict_furthest(8, 10), Some(1));
        assert_eq!(w.evict_furthest(8, 10), Some(0));
        assert_eq!(w.evict_furthest(8, 10), Some(9));
        assert_eq!(w.evict_furthest(8, 10), None);
        assert!(w.contains(8));
    }

    #[test]
    fn test_retain_frees_dropped() {
        let mut w = window();
        for index in 0..5 {
            w.insert(index, vec![0; 10]);
        }
        assert_eq!(w.retain(|index| index >= 3), 3);
        assert_eq!(w.budget().usage(), 20);
        w.clear();
        assert!(w.is_empty());
        assert_eq!(w.budget().usage(), 0);
    }
}
