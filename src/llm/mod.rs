//! Model transport abstraction.
//!
//! The orchestrator only depends on the [`LLMClient`] trait. An
//! OpenAI-compatible HTTP client is provided for hosts that talk to an
//! OpenAI-style endpoint (OpenAI, OpenRouter, local servers).
//!
//! ## Example
//!
//! ```rust,ignore
//! use agi_core::llm::{ChatMessage, ClientConfig, CompletionRequest, LLMClient, OpenAICompatClient};
//!
//! let client = OpenAICompatClient::new(
//!     ClientConfig::new("your-api-key").with_default_model("gpt-4o"),
//! )?;
//!
//! let request = CompletionRequest::new().with_message(ChatMessage::user("Hello"));
//! let response = client.complete(request).await?;
//!
//! // Summaries and insights use the history-free mode
//! let summary = client.simple_query("Summarize: ...", 0.3, 300).await?;
//! ```

mod client;
mod types;

pub use client::{ClientConfig, LLMClient, OpenAICompatClient};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, RateLimitInfo, SamplingParams,
    StopReason, TokenUsage, ToolCallRequest, ToolDefinition, UsageTracker,
};
