//! Buffering configuration, persisted as JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::cache_man::MemoryBudget;
use crate::core::error::BufferError;

/// What the playback driver does when the next frame is not buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnderRunPolicy {
    /// Hold the playhead and keep showing the last frame
    #[default]
    Wait,
    /// Advance the playhead anyway to keep wall-clock timing
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Look-ahead window size in frames
    pub max_buffer_count: usize,
    /// Background fetch threads
    pub worker_threads: usize,
    /// Fraction of available memory the window may use (0.0-1.0)
    pub mem_fraction: f64,
    /// Memory reserved for the rest of the system (GB)
    pub reserve_gb: f64,
    /// Explicit ceiling in MB, overrides `mem_fraction`/`reserve_gb`
    pub memory_limit_mb: Option<usize>,
    pub under_run_policy: UnderRunPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_count: 8,
            worker_threads: default_worker_threads(),
            mem_fraction: 0.25,
            reserve_gb: 1.0,
            memory_limit_mb: None,
            under_run_policy: UnderRunPolicy::Wait,
        }
    }
}

/// 3/4 of the cores, leaving the rest to the playback thread.
fn default_worker_threads() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

impl BufferConfig {
    pub fn from_json(json: &str) -> Result<Self, BufferError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BufferError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, BufferError> {
        serde_json::to_string_pretty(self).map_err(|e| BufferError::Config(e.to_string()))
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, BufferError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(BufferError::Config(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), BufferError> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .map_err(|e| BufferError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<(), BufferError> {
        if self.max_buffer_count == 0 {
            return Err(BufferError::Config("max_buffer_count must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.mem_fraction) {
            return Err(BufferError::Config(format!(
                "mem_fraction {} outside 0.0-1.0",
                self.mem_fraction
            )));
        }
        if self.reserve_gb < 0.0 {
            return Err(BufferError::Config("reserve_gb must be >= 0".into()));
        }
        Ok(())
    }

    /// Memory budget described by this config.
    pub fn memory_budget(&self) -> MemoryBudget {
        match self.memory_limit_mb {
            Some(mb) => MemoryBudget::with_limit(mb.saturating_mul(1024 * 1024)),
            None => MemoryBudget::from_system(self.mem_fraction, self.reserve_gb),
        }
    }
}
