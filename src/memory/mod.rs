//! Tiered conversational memory.
//!
//! Three tiers with distinct retention policies:
//!
//! - **ShortTerm**: raw conversational turns, in insertion order
//! - **Working**: task-relevant file contents whose relevance decays each turn
//! - **LongTerm**: durable decisions and compression summaries
//!
//! Only the long-term tier is persisted across restarts, through a
//! [`LongTermStore`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use agi_core::memory::{MemoryRole, TieredMemoryStore};
//!
//! let mut memory = TieredMemoryStore::default();
//! memory.add_message(MemoryRole::User, "Refactor the parser");
//! memory.add_file("src/parser.rs", contents, 1.0);
//! memory.add_decision("Keep the public API stable", ["api"]);
//!
//! // Once per turn
//! memory.age_working_memory(0.05);
//! ```

mod persistence;
mod proptest;
mod schema;
mod store;
mod types;

pub use persistence::{LongTermStore, SqliteLongTermStore};
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::TieredMemoryStore;
pub use types::{
    clamp_relevance, MemoryId, MemoryItem, MemoryRole, MemoryStats, MemoryTier, COMPRESSION_TAG,
};
