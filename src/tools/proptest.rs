//! Property-based tests for action dispatch.
//!
//! - A batch of N calls yields N results, result[i] answering call[i]
//! - Sensitive calls reach the approval gate in increasing index order
