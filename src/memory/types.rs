//! Core types for the tiered memory store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Tag attached to items produced by a compression pass.
pub const COMPRESSION_TAG: &str = "compression-summary";

/// Unique identifier for a memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Memory partition with its own retention policy.
///
/// - `ShortTerm`: raw conversational turns, pruned only by compression and capacity
/// - `Working`: task-relevant material (file contents) that decays each turn
/// - `LongTerm`: durable decisions and compression summaries, never decays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    Working,
    LongTerm,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 3] = [Self::ShortTerm, Self::Working, Self::LongTerm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::Working => "working",
            Self::LongTerm => "long_term",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "short_term" | "shortterm" | "short" => Some(Self::ShortTerm),
            "working" | "work" => Some(Self::Working),
            "long_term" | "longterm" | "long" => Some(Self::LongTerm),
            _ => None,
        }
    }

    /// Whether items in this tier lose relevance over time.
    pub fn decays(&self) -> bool {
        matches!(self, Self::Working)
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    User,
    Assistant,
    /// Derived by the agent itself (file reads, decisions, summaries)
    System,
}

impl MemoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: MemoryId,
    pub content: String,
    pub role: MemoryRole,
    pub tier: MemoryTier,
    /// Always within [0, 1]
    pub relevance: f64,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    /// File path for working-set entries created from file reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Monotonic insertion counter, breaks `created_at` ties
    #[serde(default)]
    pub seq: u64,
}

impl MemoryItem {
    pub fn new(tier: MemoryTier, role: MemoryRole, content: impl Into<String>) -> Self {
        Self {
            id: MemoryId::new(),
            content: content.into(),
            role,
            tier,
            relevance: 1.0,
            tags: BTreeSet::new(),
            created_at: Utc::now(),
            source: None,
            seq: 0,
        }
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = clamp_relevance(relevance);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_compression_summary(&self) -> bool {
        self.has_tag(COMPRESSION_TAG)
    }
}

/// Clamp a relevance value into [0, 1], mapping NaN to 0.
pub fn clamp_relevance(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Per-tier item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub short_term: usize,
    pub working: usize,
    pub long_term: usize,
}

impl MemoryStats {
    pub fn total(&self) -> usize {
        self.short_term + self.working + self.long_term
    }

    pub fn count(&self, tier: MemoryTier) -> usize {
        match tier {
            MemoryTier::ShortTerm => self.short_term,
            MemoryTier::Working => self.working,
            MemoryTier::LongTerm => self.long_term,
        }
    }
}
