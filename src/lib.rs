//! # agi-core
//!
//! Conversation orchestration core for tool-using coding agents.
//!
//! ## Core Components
//!
//! - **Memory**: tiered conversational memory with decay, eviction and compression
//! - **Session**: context fingerprinting so unchanged context is not resent
//! - **Tools**: validated, approval-gated batch execution of model-requested actions
//! - **Orchestrator**: one user turn end to end, plus background maintenance
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agi_core::{
//!     AgentConfig, ClientConfig, ConversationOrchestrator, OpenAICompatClient, StaticContext,
//!     ToolRegistry,
//! };
//!
//! let client = OpenAICompatClient::new(ClientConfig::new(api_key))?;
//! let orchestrator = ConversationOrchestrator::new(
//!     AgentConfig::default(),
//!     Arc::new(client),
//!     Arc::new(ToolRegistry::new()),
//!     Arc::new(StaticContext::new("You are a careful coding agent.")),
//! )?;
//!
//! let reply = orchestrator.process_turn("Explain src/main.rs").await?;
//! orchestrator.shutdown().await?;
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod telemetry;
pub mod tools;

// Re-exports for convenience
pub use config::{AgentConfig, DispatchConfig, InsightConfig, MemoryConfig};
pub use error::{Error, Result};
pub use llm::{
    ChatMessage, ChatRole, ClientConfig, CompletionRequest, CompletionResponse, LLMClient,
    OpenAICompatClient, RateLimitInfo, SamplingParams, TokenUsage, ToolCallRequest,
    ToolDefinition, UsageTracker,
};
pub use memory::{
    LongTermStore, MemoryId, MemoryItem, MemoryRole, MemoryStats, MemoryTier,
    SqliteLongTermStore, TieredMemoryStore,
};
pub use orchestrator::{ContextProvider, ConversationOrchestrator, StaticContext, StatusCallback};
pub use prompt::{tools_summary, ContextBlock};
pub use session::{CompressionTrigger, ContextFingerprint, ContextStats, SessionContextCache};
pub use telemetry::{init_default_tracing, init_tracing};
pub use tools::{
    ActionFailure, ApprovalBroker, ApprovalGate, ApprovalNotifier, ApprovalOutcome,
    ApprovalRequest, AutoApprove, ParamSpec, ParamType, PermissionPolicy,
    StaticPermissionPolicy, ToolArguments, ToolCatalog, ToolDispatchEngine, ToolExecutionRequest,
    ToolExecutionResult, ToolRegistry, ToolSpec,
};
