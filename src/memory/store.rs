//! In-process tiered memory store.

use crate::config::MemoryConfig;
use crate::memory::types::*;
use std::cmp::Ordering;
use tracing::{debug, trace};

/// Bounded, decaying conversational memory across three tiers.
///
/// The store is plain data: callers that share it between tasks wrap it in a
/// lock (the orchestrator uses `tokio::sync::RwLock`).
#[derive(Debug, Clone)]
pub struct TieredMemoryStore {
    config: MemoryConfig,
    short_term: Vec<MemoryItem>,
    working: Vec<MemoryItem>,
    long_term: Vec<MemoryItem>,
    next_seq: u64,
}

impl Default for TieredMemoryStore {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl TieredMemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            short_term: Vec::new(),
            working: Vec::new(),
            long_term: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // ==================== Insertion ====================

    /// Append a conversational message to the history.
    pub fn add_message(&mut self, role: MemoryRole, content: impl Into<String>) -> MemoryId {
        let item = MemoryItem::new(MemoryTier::ShortTerm, role, content);
        self.insert(item)
    }

    /// Put file content into the working set.
    ///
    /// A second add for the same path replaces the earlier entry, which
    /// restores its relevance.
    pub fn add_file(
        &mut self,
        path: impl Into<String>,
        content: impl Into<String>,
        initial_relevance: f64,
    ) -> MemoryId {
        let path = path.into();
        let before = self.working.len();
        self.working.retain(|item| item.source.as_deref() != Some(path.as_str()));
        if self.working.len() != before {
            trace!(path = %path, "Replacing working-set entry");
        }

        let item = MemoryItem::new(MemoryTier::Working, MemoryRole::System, content)
            .with_relevance(initial_relevance)
            .with_tags(["file"])
            .with_source(path);
        self.insert(item)
    }

    /// Record a durable decision. Decisions never decay.
    pub fn add_decision<I, S>(&mut self, text: impl Into<String>, tags: I) -> MemoryId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let item = MemoryItem::new(MemoryTier::LongTerm, MemoryRole::System, text)
            .with_relevance(1.0)
            .with_tags(tags);
        self.insert(item)
    }

    fn insert(&mut self, mut item: MemoryItem) -> MemoryId {
        item.seq = self.next_seq;
        self.next_seq += 1;
        item.relevance = clamp_relevance(item.relevance);

        let id = item.id;
        let tier = item.tier;
        let max = self.capacity(tier);
        let items = self.tier_mut(tier);
        items.push(item);

        while items.len() > max {
            match eviction_victim(items) {
                Some(index) => {
                    let evicted = items.remove(index);
                    debug!(
                        tier = %tier,
                        id = %evicted.id,
                        relevance = evicted.relevance,
                        "Evicted memory item"
                    );
                }
                None => break,
            }
        }

        id
    }

    // ==================== Decay ====================

    /// Multiply every working-set relevance by `1 - decay_rate` and drop items
    /// that fall below the eviction floor.
    ///
    /// Returns the number of items removed.
    pub fn age_working_memory(&mut self, decay_rate: f64) -> usize {
        let factor = 1.0 - clamp_relevance(decay_rate);
        for item in &mut self.working {
            item.relevance = clamp_relevance(item.relevance * factor);
        }

        let floor = self.config.eviction_floor;
        let before = self.working.len();
        self.working.retain(|item| item.relevance >= floor);
        let removed = before - self.working.len();

        if removed > 0 {
            debug!(removed, floor, "Working memory items decayed out");
        }
        removed
    }

    // ==================== Reads ====================

    /// Conversational history in insertion order.
    pub fn messages(&self) -> &[MemoryItem] {
        &self.short_term
    }

    /// All items currently held in `tier`.
    pub fn items(&self, tier: MemoryTier) -> &[MemoryItem] {
        match tier {
            MemoryTier::ShortTerm => &self.short_term,
            MemoryTier::Working => &self.working,
            MemoryTier::LongTerm => &self.long_term,
        }
    }

    /// Render durable knowledge for the context block.
    ///
    /// Returns an empty string when the long-term tier is empty.
    pub fn context(&self) -> String {
        if self.long_term.is_empty() {
            return String::new();
        }

        let mut summaries = Vec::new();
        let mut decisions = Vec::new();
        for item in &self.long_term {
            if item.is_compression_summary() {
                summaries.push(item);
            } else {
                decisions.push(item);
            }
        }

        let mut out = String::new();
        if !summaries.is_empty() {
            out.push_str("### Earlier Conversation\n");
            for item in summaries {
                out.push_str(item.content.trim());
                out.push('\n');
            }
        }
        if !decisions.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("### Decisions\n");
            for item in decisions {
                out.push_str("- ");
                out.push_str(item.content.trim());
                if !item.tags.is_empty() {
                    let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
                    out.push_str(&format!(" [{}]", tags.join(", ")));
                }
                out.push('\n');
            }
        }
        out
    }

    /// The oldest conversational items eligible for summarization.
    ///
    /// The most recent `keep_recent` messages are never returned.
    pub fn items_to_compress(&self) -> Vec<MemoryItem> {
        let eligible = self.short_term.len().saturating_sub(self.config.keep_recent);
        let count = eligible.min(self.config.compression_window);
        self.short_term[..count].to_vec()
    }

    // ==================== Mutation ====================

    /// Replace the given conversational items with one long-term summary.
    ///
    /// Ids that are no longer in the history are ignored. Returns `None` when
    /// none of them were found, in which case nothing changes.
    pub fn compress_items(&mut self, ids: &[MemoryId], summary: impl Into<String>) -> Option<MemoryId> {
        let before = self.short_term.len();
        self.short_term.retain(|item| !ids.contains(&item.id));
        let removed = before - self.short_term.len();
        if removed == 0 {
            return None;
        }

        let item = MemoryItem::new(MemoryTier::LongTerm, MemoryRole::System, summary)
            .with_relevance(1.0)
            .with_tags([COMPRESSION_TAG]);
        let id = self.insert(item);
        debug!(removed, summary_id = %id, "Compressed conversation history");
        Some(id)
    }

    /// Remove every item in `tier`. Returns the number removed.
    pub fn clear(&mut self, tier: MemoryTier) -> usize {
        let items = self.tier_mut(tier);
        let removed = items.len();
        items.clear();
        debug!(tier = %tier, removed, "Cleared memory tier");
        removed
    }

    /// Load previously persisted long-term items, keeping their ids and
    /// timestamps. Existing long-term items are kept; capacity still applies.
    pub fn restore_long_term(&mut self, items: impl IntoIterator<Item = MemoryItem>) -> usize {
        let mut restored = 0;
        for mut item in items {
            item.tier = MemoryTier::LongTerm;
            self.insert(item);
            restored += 1;
        }
        restored
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            short_term: self.short_term.len(),
            working: self.working.len(),
            long_term: self.long_term.len(),
        }
    }

    fn capacity(&self, tier: MemoryTier) -> usize {
        match tier {
            MemoryTier::ShortTerm => self.config.max_short_term_items,
            MemoryTier::Working => self.config.max_working_items,
            MemoryTier::LongTerm => self.config.max_long_term_items,
        }
    }

    fn tier_mut(&mut self, tier: MemoryTier) -> &mut Vec<MemoryItem> {
        match tier {
            MemoryTier::ShortTerm => &mut self.short_term,
            MemoryTier::Working => &mut self.working,
            MemoryTier::LongTerm => &mut self.long_term,
        }
    }
}

/// Lowest relevance first, then oldest, then earliest inserted.
fn eviction_order(a: &MemoryItem, b: &MemoryItem) -> Ordering {
    a.relevance
        .total_cmp(&b.relevance)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.seq.cmp(&b.seq))
}

fn eviction_victim(items: &[MemoryItem]) -> Option<usize> {
    items
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| eviction_order(a, b))
        .map(|(index, _)| index)
}
