//! Engine configuration loaded from environment variables.

/// Default number of source documents recomputed per bulk write.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DENORM_SYNC_BATCH_SIZE`: documents per sync batch (default: `500`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    batch_size: usize,
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_batch_size(std::env::var("DENORM_SYNC_BATCH_SIZE").ok().as_deref())
    }

    /// Overrides the sync batch size. Zero falls back to the default.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        self
    }

    /// Documents per sync batch. Always at least one.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn from_batch_size(raw: Option<&str>) -> Self {
        let batch_size = raw
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        Self { batch_size }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
