//! Session context cache.
//!
//! Tracks which context block the model has already seen so unchanged
//! instructions are not re-sent every turn, and accumulates the token spend
//! that decides when history should be compressed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

/// Content-derived identity of a context block.
///
/// Equal iff the system block, rules and project summary are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextFingerprint(pub String);

impl ContextFingerprint {
    pub fn compute(system_prompt: &str, rules: &str, project_info: &str) -> Self {
        let mut hasher = Sha256::new();

        // Length prefixes keep ("ab", "c") distinct from ("a", "bc")
        for part in [system_prompt, rules, project_info] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }

        let hash = hasher.finalize();
        ContextFingerprint(format!("{:x}", hash))
    }
}

impl std::fmt::Display for ContextFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get(..12).unwrap_or(&self.0))
    }
}

/// Thresholds that trigger history compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionTrigger {
    /// Prompt tokens accumulated since the last reset
    pub max_tokens: u64,
    /// Model calls recorded since the last reset
    pub max_messages: u64,
}

impl Default for CompressionTrigger {
    fn default() -> Self {
        Self {
            max_tokens: 60_000,
            max_messages: 20,
        }
    }
}

impl CompressionTrigger {
    pub fn new(max_tokens: u64, max_messages: u64) -> Self {
        Self {
            max_tokens,
            max_messages,
        }
    }
}

/// Counters since the last session reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub tokens_since_reset: u64,
    pub messages_since_reset: u64,
    /// Whether a context block has been sent since the last reset
    pub context_sent: bool,
}

impl ContextStats {
    pub fn should_compress(&self, trigger: &CompressionTrigger) -> bool {
        self.tokens_since_reset >= trigger.max_tokens
            || self.messages_since_reset >= trigger.max_messages
    }
}

/// Decides whether the context block must be (re)sent.
#[derive(Debug, Clone, Default)]
pub struct SessionContextCache {
    last_sent: Option<ContextFingerprint>,
    tokens_since_reset: u64,
    messages_since_reset: u64,
    last_sent_at: Option<DateTime<Utc>>,
}

impl SessionContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing was sent yet or the inputs changed since the last send.
    pub fn needs_context_refresh(&self, system_prompt: &str, rules: &str, project_info: &str) -> bool {
        let current = ContextFingerprint::compute(system_prompt, rules, project_info);
        match &self.last_sent {
            Some(sent) if *sent == current => {
                trace!(fingerprint = %current, "Context unchanged");
                false
            }
            _ => true,
        }
    }

    pub fn mark_context_sent(&mut self, system_prompt: &str, rules: &str, project_info: &str) {
        let fingerprint = ContextFingerprint::compute(system_prompt, rules, project_info);
        debug!(fingerprint = %fingerprint, "Context block sent");
        self.last_sent = Some(fingerprint);
        self.last_sent_at = Some(Utc::now());
    }

    /// Record one model call and the prompt tokens it consumed.
    pub fn update_token_usage(&mut self, prompt_tokens: u64) {
        self.tokens_since_reset = self.tokens_since_reset.saturating_add(prompt_tokens);
        self.messages_since_reset = self.messages_since_reset.saturating_add(1);
    }

    pub fn context_stats(&self) -> ContextStats {
        ContextStats {
            tokens_since_reset: self.tokens_since_reset,
            messages_since_reset: self.messages_since_reset,
            context_sent: self.last_sent.is_some(),
        }
    }

    pub fn should_compress(&self, trigger: &CompressionTrigger) -> bool {
        self.context_stats().should_compress(trigger)
    }

    /// Forget the sent fingerprint and zero the counters.
    pub fn reset_session(&mut self) {
        debug!(
            tokens = self.tokens_since_reset,
            messages = self.messages_since_reset,
            "Session context reset"
        );
        self.last_sent = None;
        self.last_sent_at = None;
        self.tokens_since_reset = 0;
        self.messages_since_reset = 0;
    }

    pub fn last_fingerprint(&self) -> Option<&ContextFingerprint> {
        self.last_sent.as_ref()
    }

    pub fn last_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_sent_at
    }
}
