//! Execution options for a market, separate from its trading configuration.

/// Execution configuration.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Log every event payload at debug level.
    pub verbose: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            verbose: false,
        }
    }
}
