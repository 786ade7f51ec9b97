//! Conversation orchestrator: runs one user turn end to end.
//!
//! A turn:
//! 1. AGE: decay working memory, record the user message
//! 2. CONTEXT: build the context block, send it only when it changed
//! 3. CALL: send context and history to the model with the action catalog
//! 4. ACT: dispatch requested actions, feed results back, repeat (bounded)
//! 5. MAINTAIN: compress old history when the session grows too large, and
//!    periodically extract durable insights in the background

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::config::{AgentConfig, InsightConfig};
use crate::error::{Error, Result};
use crate::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, LLMClient, ToolDefinition, UsageTracker,
};
use crate::memory::{
    LongTermStore, MemoryId, MemoryItem, MemoryRole, MemoryStats, MemoryTier, TieredMemoryStore,
};
use crate::prompt::{
    compression_prompt, insight_prompt, parse_insight, tools_summary, ContextBlock, INSIGHT_TAG,
};
use crate::session::{ContextStats, SessionContextCache};
use crate::tools::{
    ApprovalGate, FollowUp, PermissionPolicy, ToolCatalog, ToolDispatchEngine, ToolExecutionResult,
};

/// Callback for short human-readable progress notes.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Supplies the inputs of the context block.
///
/// Called once per turn; the returned text is fingerprinted, so unchanged
/// inputs do not cause a resend.
pub trait ContextProvider: Send + Sync {
    /// Base instructions for the model.
    fn system_prompt(&self) -> String;

    /// Project rules, already formatted.
    fn rules(&self) -> String {
        String::new()
    }

    /// Short description of the project being worked on.
    fn project_summary(&self) -> String {
        String::new()
    }
}

/// Fixed context inputs.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    pub system_prompt: String,
    pub rules: String,
    pub project_summary: String,
}

impl StaticContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_rules(mut self, rules: impl Into<String>) -> Self {
        self.rules = rules.into();
        self
    }

    pub fn with_project_summary(mut self, summary: impl Into<String>) -> Self {
        self.project_summary = summary.into();
        self
    }
}

impl ContextProvider for StaticContext {
    fn system_prompt(&self) -> String {
        self.system_prompt.clone()
    }

    fn rules(&self) -> String {
        self.rules.clone()
    }

    fn project_summary(&self) -> String {
        self.project_summary.clone()
    }
}

/// Runs conversation turns against a model transport.
pub struct ConversationOrchestrator {
    config: AgentConfig,
    client: Arc<dyn LLMClient>,
    context: Arc<dyn ContextProvider>,
    engine: ToolDispatchEngine,
    memory: Arc<RwLock<TieredMemoryStore>>,
    session: Mutex<SessionContextCache>,
    usage: Mutex<UsageTracker>,
    long_term: Option<Arc<dyn LongTermStore>>,
    status: Option<StatusCallback>,
    /// One turn at a time
    turn_lock: tokio::sync::Mutex<()>,
    background: TaskTracker,
    cancel: CancellationToken,
}

impl ConversationOrchestrator {
    /// Create an orchestrator. Fails when `config` does not validate.
    pub fn new(
        config: AgentConfig,
        client: Arc<dyn LLMClient>,
        catalog: Arc<dyn ToolCatalog>,
        context: Arc<dyn ContextProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(RwLock::new(TieredMemoryStore::new(config.memory.clone())));
        let cancel = CancellationToken::new();
        let engine = ToolDispatchEngine::new(catalog, Arc::clone(&memory), config.dispatch.clone())
            .with_cancellation(cancel.child_token());

        Ok(Self {
            config,
            client,
            context,
            engine,
            memory,
            session: Mutex::new(SessionContextCache::new()),
            usage: Mutex::new(UsageTracker::new()),
            long_term: None,
            status: None,
            turn_lock: tokio::sync::Mutex::new(()),
            background: TaskTracker::new(),
            cancel,
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn PermissionPolicy>) -> Self {
        self.engine = self.engine.with_policy(policy);
        self
    }

    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.engine = self.engine.with_approval_gate(gate);
        self
    }

    /// Persist the long-term tier through `store`. Call
    /// [`load_long_term`](Self::load_long_term) before the first turn.
    pub fn with_long_term_store(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.long_term = Some(store);
        self
    }

    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.status = Some(callback);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Token that ends the session when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ==================== Turn ====================

    /// Run one user turn and return the model's final reply.
    ///
    /// Transport failures and depth violations abort the turn; the user
    /// message stays recorded either way.
    #[instrument(skip(self, user_message), fields(message_len = user_message.len()))]
    pub async fn process_turn(&self, user_message: &str) -> Result<String> {
        let _turn = self.turn_lock.lock().await;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (history, durable) = {
            let mut memory = self.memory.write().await;
            let aged_out = memory.age_working_memory(self.config.decay_rate);
            if aged_out > 0 {
                debug!(aged_out, "Working memory aged");
            }
            memory.add_message(MemoryRole::User, user_message);
            (memory.messages().to_vec(), memory.context())
        };

        let catalog = self.engine.catalog().list();
        let tools: Vec<ToolDefinition> = catalog.iter().map(|t| t.to_definition()).collect();
        let rules = self.context.rules();
        let project = self.context.project_summary();
        let block = ContextBlock::new(self.context.system_prompt())
            .with_project_info(project.clone())
            .with_tools_summary(tools_summary(&catalog))
            .with_memory(durable)
            .with_rules(rules.clone())
            .render();

        let send_context = self.session().needs_context_refresh(&block, &rules, &project);
        let mut messages = Vec::with_capacity(history.len() + 1);
        if send_context {
            info!("Refreshing context block");
            self.notify("Refreshing context...");
            messages.push(ChatMessage::system(block.clone()));
        } else {
            debug!("Relying on previously sent context");
        }
        messages.extend(history.iter().map(ChatMessage::from));

        let request = CompletionRequest::new()
            .with_messages(messages.clone())
            .with_tools(tools.clone())
            .with_sampling(self.config.sampling.clone());
        let response = self.client.complete(request).await?;
        self.record_usage(&response);
        if send_context {
            self.session().mark_context_sent(&block, &rules, &project);
        }

        let reply = if response.has_tool_calls() {
            let mut follow_up = TurnFollowUp {
                orchestrator: self,
                messages,
                tools,
            };
            let outcome = self.engine.run_chain(response, &mut follow_up).await?;
            debug!(rounds = outcome.rounds, "Action chain finished");
            outcome.response.content
        } else {
            response.content
        };

        self.memory
            .write()
            .await
            .add_message(MemoryRole::Assistant, reply.clone());

        self.maintain().await;
        Ok(reply)
    }

    fn record_usage(&self, response: &CompletionResponse) {
        self.usage().record(response);
        self.session().update_token_usage(response.usage.prompt_tokens);
    }

    // ==================== Maintenance ====================

    async fn maintain(&self) {
        if self.session().should_compress(&self.config.compression) {
            self.notify("Compressing context...");
            self.compress_context().await;
            self.session().reset_session();
            self.notify("Context compressed and session reset");
        }

        let interval = self.config.insight.interval_messages;
        let history_len = self.memory.read().await.messages().len();
        if interval > 0 && history_len > 0 && history_len % interval == 0 {
            self.spawn_insight_extraction();
        }
    }

    /// Fold the oldest history into one long-term summary. Failures are
    /// logged and leave the history untouched.
    async fn compress_context(&self) {
        let items = self.memory.read().await.items_to_compress();
        if items.is_empty() {
            debug!("Nothing eligible for compression");
            return;
        }

        let prompt = compression_prompt(&items);
        let summary = match self
            .client
            .simple_query(&prompt, self.config.summary_temperature, self.config.summary_max_tokens)
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                warn!("Context compression returned an empty summary");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Context compression failed");
                return;
            }
        };

        let ids: Vec<MemoryId> = items.iter().map(|item| item.id).collect();
        match self.memory.write().await.compress_items(&ids, summary.trim()) {
            Some(id) => info!(summary_id = %id, folded = ids.len(), "Context compressed"),
            None => warn!("Compression candidates disappeared before the summary was stored"),
        }
    }

    fn spawn_insight_extraction(&self) {
        let memory = Arc::clone(&self.memory);
        let client = Arc::clone(&self.client);
        let config = self.config.insight.clone();
        let cancel = self.cancel.child_token();

        let task = async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!("Insight extraction cancelled"),
                _ = extract_insight(&memory, client.as_ref(), &config) => {}
            }
        };
        self.background
            .spawn(task.instrument(info_span!("insight_extraction")));
    }

    // ==================== Queries ====================

    pub async fn memory_stats(&self) -> MemoryStats {
        self.memory.read().await.stats()
    }

    pub fn context_stats(&self) -> ContextStats {
        self.session().context_stats()
    }

    /// Cumulative token usage and the last rate-limit snapshot.
    pub fn usage_stats(&self) -> UsageTracker {
        self.usage().clone()
    }

    /// Conversational history, oldest first.
    pub async fn history(&self) -> Vec<MemoryItem> {
        self.memory.read().await.messages().to_vec()
    }

    // ==================== Commands ====================

    /// Empty one memory tier. Returns the number of items removed.
    pub async fn clear_memory(&self, tier: MemoryTier) -> usize {
        let removed = self.memory.write().await.clear(tier);
        info!(tier = %tier, removed, "Memory tier cleared");
        removed
    }

    /// Record a durable decision.
    pub async fn record_decision<I, S>(&self, text: impl Into<String>, tags: I) -> MemoryId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.memory.write().await.add_decision(text, tags)
    }

    /// Restore the persisted long-term tier. Returns the number of items loaded.
    pub async fn load_long_term(&self) -> Result<usize> {
        let Some(store) = &self.long_term else {
            return Ok(0);
        };
        let items = store.load()?;
        let restored = self.memory.write().await.restore_long_term(items);
        info!(restored, "Long-term memory loaded");
        Ok(restored)
    }

    /// Persist the long-term tier.
    pub async fn save(&self) -> Result<()> {
        let Some(store) = &self.long_term else {
            return Ok(());
        };
        let items = self.memory.read().await.items(MemoryTier::LongTerm).to_vec();
        store.save(&items)?;
        debug!(items = items.len(), "Long-term memory saved");
        Ok(())
    }

    /// Wait for in-flight background maintenance to finish.
    pub async fn flush_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// End the session: release pending approvals, stop background work and
    /// persist the long-term tier.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down conversation");
        self.cancel.cancel();
        self.background.close();
        self.background.wait().await;
        self.save().await
    }

    // ==================== Helpers ====================

    fn session(&self) -> MutexGuard<'_, SessionContextCache> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn usage(&self) -> MutexGuard<'_, UsageTracker> {
        self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, message: &str) {
        if let Some(callback) = &self.status {
            callback(message);
        }
    }
}

/// Feeds action results back to the model within one turn.
struct TurnFollowUp<'a> {
    orchestrator: &'a ConversationOrchestrator,
    messages: Vec<ChatMessage>,
    tools: Vec<ToolDefinition>,
}

#[async_trait]
impl<'a> FollowUp for TurnFollowUp<'a> {
    async fn next_response(
        &mut self,
        requested: &CompletionResponse,
        results: &[ToolExecutionResult],
    ) -> Result<CompletionResponse> {
        self.messages.push(ChatMessage::assistant_tool_calls(
            requested.content.clone(),
            requested.tool_calls.clone(),
        ));
        for (call, result) in requested.tool_calls.iter().zip(results) {
            self.messages
                .push(ChatMessage::tool_result(call.id.clone(), result.to_model_content()));
        }

        let request = CompletionRequest::new()
            .with_messages(self.messages.clone())
            .with_tools(self.tools.clone())
            .with_sampling(self.orchestrator.config.sampling.clone());
        let response = self.orchestrator.client.complete(request).await?;
        self.orchestrator.record_usage(&response);
        Ok(response)
    }
}

/// Ask the model whether the latest exchange settled a decision or pattern.
async fn extract_insight(
    memory: &RwLock<TieredMemoryStore>,
    client: &dyn LLMClient,
    config: &InsightConfig,
) {
    let recent: Vec<MemoryItem> = {
        let memory = memory.read().await;
        let messages = memory.messages();
        if config.window_messages == 0 || messages.len() < config.window_messages {
            return;
        }
        messages[messages.len() - config.window_messages..].to_vec()
    };

    let answer = match client
        .simple_query(&insight_prompt(&recent), config.temperature, config.max_tokens)
        .await
    {
        Ok(answer) => answer,
        Err(e) => {
            warn!(error = %e, "Insight extraction failed");
            return;
        }
    };

    match parse_insight(&answer) {
        Some(insight) => {
            info!(insight = %insight, "Captured insight");
            memory.write().await.add_decision(insight, [INSIGHT_TAG]);
        }
        None => debug!("No insight in recent exchange"),
    }
}
