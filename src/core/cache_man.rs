//! Memory ceiling for buffered frames.
//!
//! **Why**: decoded frames are large; a look-ahead window sized in frames can
//! still blow past what the device can hold. The budget tracks bytes held by
//! the window and tells the controller when to shed frames.
//!
//! **Used by**: BufferingController (one budget per controller)

use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use sysinfo::System;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Byte budget for one buffering controller.
#[derive(Debug)]
pub struct MemoryBudget {
    usage: AtomicUsize,
    limit: AtomicUsize,
}

impl MemoryBudget {
    /// Budget derived from currently available system memory.
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0)
    /// * `reserve_gb` - Memory left for the rest of the system (GB)
    pub fn from_system(mem_fraction: f64, reserve_gb: f64) -> Self {
        let limit = system_limit(mem_fraction, reserve_gb);
        info!(
            "MemoryBudget init: limit={} MB ({}% of available after {} GB reserve)",
            limit / BYTES_PER_MB,
            (mem_fraction * 100.0) as u32,
            reserve_gb
        );
        Self::with_limit(limit)
    }

    /// Budget with an explicit byte limit. `usize::MAX` means unbounded.
    pub fn with_limit(limit_bytes: usize) -> Self {
        Self {
            usage: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit_bytes),
        }
    }

    pub fn unbounded() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// (usage, limit) in bytes
    pub fn mem(&self) -> (usize, usize) {
        (
            self.usage.load(Ordering::Relaxed),
            self.limit.load(Ordering::Relaxed),
        )
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Usage as a fraction of the limit (0.0-1.0+)
    pub fn usage_fraction(&self) -> f64 {
        let (usage, limit) = self.mem();
        if limit == 0 {
            0.0
        } else {
            usage as f64 / limit as f64
        }
    }

    pub fn is_over_limit(&self) -> bool {
        let (usage, limit) = self.mem();
        usage > limit
    }

    /// Whether `bytes` more would still fit.
    pub fn fits(&self, bytes: usize) -> bool {
        let (usage, limit) = self.mem();
        usage.saturating_add(bytes) <= limit
    }

    pub fn add(&self, bytes: usize) {
        let new_usage = self.usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.limit();
        if new_usage > limit {
            debug!(
                "Memory limit exceeded: {} MB / {} MB",
                new_usage / BYTES_PER_MB,
                limit / BYTES_PER_MB
            );
        }
    }

    /// Saturating release
    pub fn free(&self, bytes: usize) {
        let _ = self
            .usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn reset(&self) {
        self.usage.store(0, Ordering::Relaxed);
    }
}

fn system_limit(mem_fraction: f64, reserve_gb: f64) -> usize {
    let mut sys = System::new();
    sys.refresh_memory();

    let available = sys.available_memory() as usize;
    let reserve = (reserve_gb * 1024.0 * 1024.0 * 1024.0) as usize;
    let usable = available.saturating_sub(reserve);
    (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_tracking() {
        let budget = MemoryBudget::with_limit(4 * BYTES_PER_MB);

        budget.add(BYTES_PER_MB);
        assert_eq!(budget.usage(), BYTES_PER_MB);
        assert!(budget.fits(3 * BYTES_PER_MB));
        assert!(!budget.fits(3 * BYTES_PER_MB + 1));

        budget.free(BYTES_PER_MB / 2);
        assert_eq!(budget.usage(), BYTES_PER_MB / 2);
    }

    #[test]
    fn test_free_saturates() {
        let budget = MemoryBudget::with_limit(100);
        budget.add(10);
        budget.free(50);
        assert_eq!(budget.usage(), 0);
    }

    #[test]
    fn test_over_limit() {
        let budget = MemoryBudget::with_limit(100);
        budget.add(100);
        assert!(!budget.is_over_limit());
        budget.add(1);
        assert!(budget.is_over_limit());
        assert!(budget.usage_fraction() > 1.0);
    }

    #[test]
    fn test_from_system_has_limit() {
        let budget = MemoryBudget::from_system(0.5, 0.0);
        assert_eq!(budget.usage(), 0);
        let unbounded = MemoryBudget::unbounded();
        assert!(unbounded.fits(usize::MAX / 2));
    }
}
