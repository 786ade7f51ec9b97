//! Agent configuration.
//!
//! All structs deserialize with defaults for missing fields, so a partial
//! document (or an empty one) produces a usable configuration. Loading the
//! document from disk is left to the embedding application.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::llm::SamplingParams;
use crate::session::CompressionTrigger;

/// Bounds and eviction policy for the tiered memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum conversational items kept before the oldest is evicted
    pub max_short_term_items: usize,
    /// Maximum working-set items (file contents and similar)
    pub max_working_items: usize,
    /// Maximum durable items (decisions, compression summaries)
    pub max_long_term_items: usize,
    /// How many of the oldest conversational items one compression pass folds
    pub compression_window: usize,
    /// Most recent conversational items never handed to compression
    pub keep_recent: usize,
    /// Working items whose relevance drops below this are removed
    pub eviction_floor: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_short_term_items: 100,
            max_working_items: 20,
            max_long_term_items: 200,
            compression_window: 10,
            keep_recent: 4,
            eviction_floor: 0.1,
        }
    }
}

impl MemoryConfig {
    pub fn with_max_short_term_items(mut self, max: usize) -> Self {
        self.max_short_term_items = max;
        self
    }

    pub fn with_max_working_items(mut self, max: usize) -> Self {
        self.max_working_items = max;
        self
    }

    pub fn with_max_long_term_items(mut self, max: usize) -> Self {
        self.max_long_term_items = max;
        self
    }

    pub fn with_compression_window(mut self, window: usize) -> Self {
        self.compression_window = window;
        self
    }

    pub fn with_keep_recent(mut self, keep: usize) -> Self {
        self.keep_recent = keep;
        self
    }

    pub fn with_eviction_floor(mut self, floor: f64) -> Self {
        self.eviction_floor = floor.clamp(0.0, 1.0);
        self
    }
}

/// Action dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum chained action rounds in a single turn
    pub max_depth: u32,
    /// Tool names whose successful output is fed into working memory
    pub file_read_tools: Vec<String>,
    /// Argument carrying the file path for those tools
    pub path_argument: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            file_read_tools: vec!["read_file".to_string(), "view_file".to_string()],
            path_argument: "path".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Whether `tool_name` is treated as a file read.
    pub fn is_file_read(&self, tool_name: &str) -> bool {
        self.file_read_tools.iter().any(|t| t == tool_name)
    }
}

/// Background insight extraction cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Run extraction whenever the history length is a multiple of this (0 disables)
    pub interval_messages: usize,
    /// Number of trailing messages shown to the model
    pub window_messages: usize,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            interval_messages: 6,
            window_messages: 4,
            temperature: 0.2,
            max_tokens: 150,
        }
    }
}

/// Top-level configuration for a conversation orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub memory: MemoryConfig,
    pub compression: CompressionTrigger,
    pub dispatch: DispatchConfig,
    pub insight: InsightConfig,
    pub sampling: SamplingParams,
    /// Working-memory decay applied at the start of each turn
    pub decay_rate: f64,
    /// Sampling temperature for compression summaries
    pub summary_temperature: f64,
    /// Token cap for compression summaries
    pub summary_max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            compression: CompressionTrigger::default(),
            dispatch: DispatchConfig::default(),
            insight: InsightConfig::default(),
            sampling: SamplingParams::default(),
            decay_rate: 0.05,
            summary_temperature: 0.3,
            summary_max_tokens: 300,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_compression(mut self, compression: CompressionTrigger) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.dispatch.max_depth = depth;
        self
    }

    pub fn with_insight_interval(mut self, interval: usize) -> Self {
        self.insight.interval_messages = interval;
        self
    }

    pub fn with_decay_rate(mut self, rate: f64) -> Self {
        self.decay_rate = rate;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Check the configuration for values the orchestrator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(Error::Config(format!(
                "decay_rate must be within [0, 1], got {}",
                self.decay_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.memory.eviction_floor) {
            return Err(Error::Config(format!(
                "eviction_floor must be within [0, 1], got {}",
                self.memory.eviction_floor
            )));
        }
        if self.memory.max_short_term_items == 0
            || self.memory.max_working_items == 0
            || self.memory.max_long_term_items == 0
        {
            return Err(Error::Config(
                "memory tier capacities must be non-zero".to_string(),
            ));
        }
        if self.memory.keep_recent >= self.memory.max_short_term_items {
            return Err(Error::Config(format!(
                "keep_recent ({}) must be smaller than max_short_term_items ({})",
                self.memory.keep_recent, self.memory.max_short_term_items
            )));
        }
        if self.dispatch.max_depth == 0 {
            return Err(Error::Config("max_depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.max_depth, 10);
        assert_eq!(config.decay_rate, 0.05);
        assert_eq!(config.insight.interval_messages, 6);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"memory": {"max_working_items": 2}, "decay_rate": 0.2}"#)
                .unwrap();

        assert_eq!(config.memory.max_working_items, 2);
        assert_eq!(config.memory.max_short_term_items, 100);
        assert_eq!(config.decay_rate, 0.2);
        assert_eq!(config.dispatch, DispatchConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(AgentConfig::default().with_decay_rate(1.5).validate().is_err());
        assert!(AgentConfig::default().with_max_depth(0).validate().is_err());

        let zero_tier = AgentConfig::default()
            .with_memory(MemoryConfig::default().with_max_working_items(0));
        assert!(matches!(zero_tier.validate(), Err(Error::Config(_))));

        let keep_all = AgentConfig::default().with_memory(
            MemoryConfig::default()
                .with_max_short_term_items(4)
                .with_keep_recent(4),
        );
        assert!(keep_all.validate().is_err());
    }

    #[test]
    fn test_file_read_detection() {
        let dispatch = DispatchConfig::default();
        assert!(dispatch.is_file_read("read_file"));
        assert!(dispatch.is_file_read("view_file"));
        assert!(!dispatch.is_file_read("write_file"));
    }
}
