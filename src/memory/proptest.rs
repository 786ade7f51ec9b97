//! Property-based tests for the tiered memory store.
//!
//! - Decay is multiplicative, never negative, and respects the eviction floor
//! - Tier capacities are never exceeded
//! - Conversational history keeps insertion order
//! - Compression candidates never include the most recent messages
