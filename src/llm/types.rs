//! Model transport types: messages, tool calls, requests, responses and usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{MemoryItem, MemoryRole};

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// Result of a tool call, correlated by `tool_call_id`
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// An action requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back with the result
    pub id: String,
    pub name: String,
    /// Raw JSON argument payload as sent by the model
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Actions requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on `Tool` messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::Assistant, content)
    }

    /// Assistant message that requested actions.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(ChatRole::Assistant, content)
        }
    }

    /// Result of the tool call `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(ChatRole::Tool, content)
        }
    }
}

impl From<&MemoryItem> for ChatMessage {
    fn from(item: &MemoryItem) -> Self {
        let role = match item.role {
            MemoryRole::User => ChatRole::User,
            MemoryRole::Assistant => ChatRole::Assistant,
            MemoryRole::System => ChatRole::System,
        };
        Self::with_role(role, item.content.clone())
    }
}

/// Function definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the parameters
    pub parameters: serde_json::Value,
}

/// Sampling parameters for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: None,
            max_tokens: None,
        }
    }
}

impl SamplingParams {
    pub fn new(temperature: f64) -> Self {
        Self {
            temperature,
            ..Self::default()
        }
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model override; the client's default is used when unset
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Actions the model may request
    pub tools: Vec<ToolDefinition>,
    pub sampling: SamplingParams,
}

impl CompletionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.sampling.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.sampling.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Provider rate-limit snapshot, taken from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit_requests: Option<u64>,
    pub remaining_requests: Option<u64>,
    pub limit_tokens: Option<u64>,
    pub remaining_tokens: Option<u64>,
    /// Provider-formatted reset interval (e.g. "6m0s")
    pub reset_requests: Option<String>,
    pub reset_tokens: Option<String>,
}

impl RateLimitInfo {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

/// Completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    /// Text content; may be empty when only tool calls were returned
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: Option<StopReason>,
    pub usage: TokenUsage,
    pub rate_limits: Option<RateLimitInfo>,
    pub timestamp: DateTime<Utc>,
}

impl CompletionResponse {
    /// Plain text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: Some(StopReason::EndTurn),
            usage: TokenUsage::default(),
            rate_limits: None,
            timestamp: Utc::now(),
        }
    }

    /// Response that requests actions.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        if !tool_calls.is_empty() {
            self.stop_reason = Some(StopReason::ToolUse);
        }
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Cumulative usage across a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTracker {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub request_count: u64,
    /// Most recent rate-limit snapshot reported by the provider
    pub last_rate_limits: Option<RateLimitInfo>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage from a completion response.
    pub fn record(&mut self, response: &CompletionResponse) {
        self.total_prompt_tokens += response.usage.prompt_tokens;
        self.total_completion_tokens += response.usage.completion_tokens;
        self.total_tokens += response.usage.total_tokens;
        self.request_count += 1;

        if let Some(limits) = &response.rate_limits {
            self.last_rate_limits = Some(limits.clone());
        }
    }

    /// Merge another tracker into this one.
    pub fn merge(&mut self, other: &UsageTracker) {
        self.total_prompt_tokens += other.total_prompt_tokens;
        self.total_completion_tokens += other.total_completion_tokens;
        self.total_tokens += other.total_tokens;
        self.request_count += other.request_count;
        if other.last_rate_limits.is_some() {
            self.last_rate_limits = other.last_rate_limits.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTier;

    #[test]
    fn test_chat_message_constructors() {
        let msg = ChatMessage::tool_result("call_1", "ok");
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));

        let calls = vec![ToolCallRequest::new("call_1", "read_file", r#"{"path":"a"}"#)];
        let msg = ChatMessage::assistant_tool_calls("", calls.clone());
        assert_eq!(msg.role, ChatRole::Assistant);
        assert_eq!(msg.tool_calls, calls);
    }

    #[test]
    fn test_message_from_memory_item() {
        let item = MemoryItem::new(MemoryTier::ShortTerm, MemoryRole::Assistant, "done");
        let msg = ChatMessage::from(&item);
        assert_eq!(msg.role, ChatRole::Assistant);
        assert_eq!(msg.content, "done");
    }

    #[test]
    fn test_completion_request_builder() {
        let req = CompletionRequest::new()
            .with_model("gpt-4o")
            .with_message(ChatMessage::user("Hi"))
            .with_temperature(0.3)
            .with_max_tokens(300);

        assert_eq!(req.model.as_deref(), Some("gpt-4o"));
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.sampling.temperature, 0.3);
        assert_eq!(req.sampling.max_tokens, Some(300));
        assert!(req.tools.is_empty());
    }

    #[test]
    fn test_response_tool_call_detection() {
        let plain = CompletionResponse::text("hello");
        assert!(!plain.has_tool_calls());

        let calls = CompletionResponse::text("")
            .with_tool_calls(vec![ToolCallRequest::new("1", "list_files", "{}")]);
        assert!(calls.has_tool_calls());
        assert_eq!(calls.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();

        tracker.record(&CompletionResponse::text("a").with_usage(TokenUsage::new(1000, 200)));

        let mut limited = CompletionResponse::text("b").with_usage(TokenUsage::new(500, 100));
        limited.rate_limits = Some(RateLimitInfo {
            remaining_requests: Some(42),
            ..RateLimitInfo::default()
        });
        tracker.record(&limited);

        assert_eq!(tracker.total_prompt_tokens, 1500);
        assert_eq!(tracker.total_completion_tokens, 300);
        assert_eq!(tracker.total_tokens, 1800);
        assert_eq!(tracker.request_count, 2);
        assert_eq!(
            tracker.last_rate_limits.as_ref().and_then(|r| r.remaining_requests),
            Some(42)
        );

        // A response without headers keeps the last snapshot
        tracker.record(&CompletionResponse::text("c"));
        assert!(tracker.last_rate_limits.is_some());
    }
}
