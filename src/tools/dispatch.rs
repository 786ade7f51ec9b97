//! Batch execution of model-requested actions.
//!
//! One model response may request several actions. Non-sensitive actions run
//! concurrently, sensitive ones run one at a time behind an approval gate, and
//! the results always come back in request order. When the model answers the
//! results with further actions, [`ToolDispatchEngine::run_chain`] repeats the
//! process up to the configured depth.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::llm::{CompletionResponse, ToolCallRequest};
use crate::memory::TieredMemoryStore;

use super::approval::{
    ApprovalGate, ApprovalOutcome, ApprovalRequest, AutoApprove, PermissionPolicy,
    StaticPermissionPolicy,
};
use super::schema::{describe_errors, parse_arguments};
use super::types::{ActionFailure, ToolCatalog, ToolExecutionRequest, ToolExecutionResult};

/// Relevance given to file contents read by an action.
const FILE_READ_RELEVANCE: f64 = 1.0;

type ResultSlots = Arc<Mutex<Vec<Option<ToolExecutionResult>>>>;

/// Produces the model's next response once a round of results is available.
///
/// The orchestrator implements this by appending the assistant and tool
/// messages to the conversation and calling the transport again.
#[async_trait]
pub trait FollowUp: Send {
    /// `requested` is the response whose actions produced `results`.
    async fn next_response(
        &mut self,
        requested: &CompletionResponse,
        results: &[ToolExecutionResult],
    ) -> Result<CompletionResponse>;
}

/// Final response of an action chain.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// First response without action requests
    pub response: CompletionResponse,
    /// Number of action rounds dispatched
    pub rounds: u32,
}

struct PreparedCall {
    request: ToolExecutionRequest,
    raw_arguments: String,
    /// Path to feed into working memory on success
    file_path: Option<String>,
}

/// Executes action batches requested by the model.
pub struct ToolDispatchEngine {
    catalog: Arc<dyn ToolCatalog>,
    policy: Arc<dyn PermissionPolicy>,
    gate: Arc<dyn ApprovalGate>,
    memory: Arc<RwLock<TieredMemoryStore>>,
    config: DispatchConfig,
    cancel: CancellationToken,
}

impl ToolDispatchEngine {
    /// Create an engine where no action needs approval.
    pub fn new(
        catalog: Arc<dyn ToolCatalog>,
        memory: Arc<RwLock<TieredMemoryStore>>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            catalog,
            policy: Arc::new(StaticPermissionPolicy::allow_all()),
            gate: Arc::new(AutoApprove),
            memory,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn PermissionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Tie pending approvals to a session lifetime.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn catalog(&self) -> &Arc<dyn ToolCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Execute one batch. The result list has one entry per call, in call order.
    #[instrument(skip(self, calls), fields(batch_size = calls.len()))]
    pub async fn dispatch_batch(&self, calls: &[ToolCallRequest]) -> Vec<ToolExecutionResult> {
        let slots: ResultSlots = Arc::new(Mutex::new(vec![None; calls.len()]));
        let mut file_paths: Vec<Option<String>> = vec![None; calls.len()];
        let mut sensitive = Vec::new();
        let mut concurrent = Vec::new();

        for (index, call) in calls.iter().enumerate() {
            match self.prepare(index, call) {
                Err(failed) => store_result(&slots, index, failed),
                Ok(prepared) => {
                    file_paths[index] = prepared.file_path.clone();
                    if self.policy.requires_approval(&prepared.request.name) {
                        sensitive.push(prepared);
                    } else {
                        concurrent.push(prepared);
                    }
                }
            }
        }

        debug!(
            concurrent = concurrent.len(),
            sensitive = sensitive.len(),
            "Dispatching action batch"
        );

        let (indices, handles): (Vec<usize>, Vec<_>) = concurrent
            .into_iter()
            .map(|prepared| {
                let index = prepared.request.index;
                let catalog = Arc::clone(&self.catalog);
                let slots = Arc::clone(&slots);
                let task = async move {
                    let result = catalog.execute(&prepared.request).await;
                    store_result(&slots, prepared.request.index, result);
                };
                (index, tokio::spawn(task.in_current_span()))
            })
            .unzip();

        for (index, joined) in indices.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                warn!(index, error = %e, "Action task failed");
                store_result(
                    &slots,
                    index,
                    ToolExecutionResult::failure(ActionFailure::Panicked, format!("Action panicked: {}", e)),
                );
            }
        }

        for prepared in sensitive {
            let index = prepared.request.index;
            let result = self.execute_sensitive(prepared).await;
            store_result(&slots, index, result);
        }

        let results = take_results(&slots);
        self.record_file_reads(&file_paths, &results).await;
        results
    }

    /// Dispatch action rounds until the model answers without requesting any.
    ///
    /// `first` is the response that started the chain. Each response carrying
    /// action requests is one round; the round after `max_depth` fails the
    /// turn with [`Error::MaxDepthExceeded`] before anything is dispatched.
    pub async fn run_chain(
        &self,
        first: CompletionResponse,
        follow_up: &mut dyn FollowUp,
    ) -> Result<ChainOutcome> {
        let mut response = first;
        let mut rounds = 0u32;

        while response.has_tool_calls() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if rounds >= self.config.max_depth {
                warn!(max_depth = self.config.max_depth, "Action chain exceeded maximum depth");
                return Err(Error::max_depth_exceeded(self.config.max_depth));
            }
            rounds += 1;

            debug!(round = rounds, actions = response.tool_calls.len(), "Action round");
            let results = self.dispatch_batch(&response.tool_calls).await;
            response = follow_up.next_response(&response, &results).await?;
        }

        Ok(ChainOutcome { response, rounds })
    }

    fn prepare(
        &self,
        index: usize,
        call: &ToolCallRequest,
    ) -> std::result::Result<PreparedCall, ToolExecutionResult> {
        let spec = self.catalog.get(&call.name).ok_or_else(|| {
            debug!(tool = %call.name, "Model requested unknown action");
            ToolExecutionResult::failure(
                ActionFailure::UnknownTool,
                format!("Unknown tool: {}", call.name),
            )
        })?;

        let arguments = parse_arguments(&call.arguments, &spec).map_err(|errors| {
            debug!(tool = %call.name, errors = errors.len(), "Rejected action arguments");
            ToolExecutionResult::failure(
                ActionFailure::InvalidArguments,
                format!("Invalid arguments for {}: {}", call.name, describe_errors(&errors)),
            )
        })?;

        let file_path = if self.config.is_file_read(&call.name) {
            arguments.get_str(&self.config.path_argument).map(str::to_string)
        } else {
            None
        };

        Ok(PreparedCall {
            request: ToolExecutionRequest {
                index,
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments,
            },
            raw_arguments: call.arguments.clone(),
            file_path,
        })
    }

    async fn execute_sensitive(&self, prepared: PreparedCall) -> ToolExecutionResult {
        let PreparedCall {
            request,
            raw_arguments,
            ..
        } = prepared;

        let approval = ApprovalRequest::new(request.name.clone(), &raw_arguments, request.index);
        let outcome = self
            .gate
            .request_approval(approval, self.policy.approval_timeout(), &self.cancel)
            .await;

        match outcome {
            ApprovalOutcome::Approved => {
                info!(tool = %request.name, index = request.index, "Sensitive action approved");
                let catalog = Arc::clone(&self.catalog);
                let name = request.name.clone();
                let task = async move { catalog.execute(&request).await };
                match tokio::spawn(task.in_current_span()).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "Action task failed");
                        ToolExecutionResult::failure(
                            ActionFailure::Panicked,
                            format!("Action panicked: {}", e),
                        )
                    }
                }
            }
            ApprovalOutcome::Denied => {
                info!(tool = %request.name, index = request.index, "Sensitive action denied");
                ToolExecutionResult::failure(ActionFailure::Denied, "Operation denied by user")
            }
            ApprovalOutcome::TimedOut => ToolExecutionResult::failure(
                ActionFailure::ApprovalTimeout,
                format!(
                    "Approval for {} timed out after {}s",
                    request.name,
                    self.policy.approval_timeout().as_secs()
                ),
            ),
            ApprovalOutcome::Cancelled => ToolExecutionResult::failure(
                ActionFailure::Cancelled,
                "Operation cancelled while awaiting approval",
            ),
        }
    }

    async fn record_file_reads(&self, paths: &[Option<String>], results: &[ToolExecutionResult]) {
        let reads: Vec<(&str, &str)> = paths
            .iter()
            .zip(results)
            .filter_map(|(path, result)| match path {
                Some(path) if result.success => Some((path.as_str(), result.output.as_str())),
                _ => None,
            })
            .collect();
        if reads.is_empty() {
            return;
        }

        let mut memory = self.memory.write().await;
        for (path, content) in reads {
            debug!(path, bytes = content.len(), "Feeding file read into working memory");
            memory.add_file(path, content, FILE_READ_RELEVANCE);
        }
    }
}

fn store_result(slots: &ResultSlots, index: usize, result: ToolExecutionResult) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    slots[index] = Some(result);
}

fn take_results(slots: &ResultSlots) -> Vec<ToolExecutionResult> {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    slots
        .drain(..)
        .map(|slot| {
            slot.unwrap_or_else(|| ToolExecutionResult::execution_error("action produced no result"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTier;
    use crate::tools::approval::{ApprovalBroker, ApprovalNotifier};
    use crate::tools::registry::ToolRegistry;
    use crate::tools::types::{ParamSpec, ParamType, ToolSpec};
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("read_file", "Read a file")
                    .with_param(ParamSpec::new("path", ParamType::String)),
                |args| async move {
                    ToolExecutionResult::success(format!(
                        "contents of {}",
                        args.get_str("path").unwrap_or_default()
                    ))
                },
            )
            .unwrap();
        registry
            .register(
                ToolSpec::new("sleep", "Sleep then echo")
                    .with_param(ParamSpec::new("ms", ParamType::Integer)),
                |args| async move {
                    let ms = args.get_i64("ms").unwrap_or(0) as u64;
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    ToolExecutionResult::success(format!("slept {}", ms))
                },
            )
            .unwrap();
        registry
            .register(
                ToolSpec::new("write_file", "Write a file")
                    .with_param(ParamSpec::new("path", ParamType::String)),
                |args| async move {
                    ToolExecutionResult::success(format!(
                        "wrote {}",
                        args.get_str("path").unwrap_or_default()
                    ))
                },
            )
            .unwrap();
        registry
            .register(ToolSpec::new("git_push", "Push"), |_| async {
                ToolExecutionResult::success("pushed")
            })
            .unwrap();
        registry
            .register(ToolSpec::new("explode", "Panics"), |args| async move {
                if args.get_bool("defuse") != Some(true) {
                    panic!("boom");
                }
                ToolExecutionResult::success("defused")
            })
            .unwrap();
        registry
    }

    /// Records the order approvals are requested in and denies listed tools.
    #[derive(Default)]
    struct RecordingGate {
        deny: Vec<String>,
        seen: Mutex<Vec<(usize, String)>>,
    }

    impl RecordingGate {
        fn denying(names: &[&str]) -> Self {
            Self {
                deny: names.iter().map(|n| n.to_string()).collect(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<(usize, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ApprovalGate for RecordingGate {
        async fn request_approval(
            &self,
            request: ApprovalRequest,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> ApprovalOutcome {
            self.seen
                .lock()
                .unwrap()
                .push((request.index, request.tool_name.clone()));
            if self.deny.contains(&request.tool_name) {
                ApprovalOutcome::Denied
            } else {
                ApprovalOutcome::Approved
            }
        }
    }

    fn engine(gate: Arc<dyn ApprovalGate>) -> (ToolDispatchEngine, Arc<RwLock<TieredMemoryStore>>) {
        let memory = Arc::new(RwLock::new(TieredMemoryStore::default()));
        let engine = ToolDispatchEngine::new(
            Arc::new(registry()),
            Arc::clone(&memory),
            DispatchConfig::default(),
        )
        .with_policy(Arc::new(StaticPermissionPolicy::new(["write_file", "git_push"])))
        .with_approval_gate(gate);
        (engine, memory)
    }

    fn call(index: usize, name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest::new(format!("call_{}", index), name, args)
    }

    #[tokio::test]
    async fn test_denied_sensitive_action_is_local() {
        let (engine, _) = engine(Arc::new(RecordingGate::denying(&["write_file"])));
        let calls = vec![
            call(0, "read_file", r#"{"path": "a.rs"}"#),
            call(1, "write_file", r#"{"path": "b.rs"}"#),
            call(2, "read_file", r#"{"path": "c.rs"}"#),
        ];

        let results = engine.dispatch_batch(&calls).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].output, "contents of a.rs");
        assert!(results[1].is_failure(ActionFailure::Denied));
        assert_eq!(results[1].to_model_content(), "Error: Operation denied by user");
        assert_eq!(results[2].output, "contents of c.rs");
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let (engine, _) = engine(Arc::new(AutoApprove));
        let calls = vec![
            call(0, "sleep", r#"{"ms": 60}"#),
            call(1, "sleep", r#"{"ms": 1}"#),
            call(2, "sleep", r#"{"ms": 30}"#),
        ];

        let outputs: Vec<String> = engine
            .dispatch_batch(&calls)
            .await
            .into_iter()
            .map(|r| r.output)
            .collect();
        assert_eq!(outputs, vec!["slept 60", "slept 1", "slept 30"]);
    }

    #[tokio::test]
    async fn test_sensitive_actions_are_approved_in_order() {
        let gate = Arc::new(RecordingGate::default());
        let (engine, _) = engine(gate.clone());
        let calls = vec![
            call(0, "git_push", "{}"),
            call(1, "read_file", r#"{"path": "a.rs"}"#),
            call(2, "write_file", r#"{"path": "b.rs"}"#),
            call(3, "git_push", "{}"),
        ];

        let results = engine.dispatch_batch(&calls).await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(
            gate.seen(),
            vec![
                (0, "git_push".to_string()),
                (2, "write_file".to_string()),
                (3, "git_push".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_arguments_do_not_abort_batch() {
        let (engine, _) = engine(Arc::new(AutoApprove));
        let calls = vec![
            call(0, "read_file", "{not json"),
            call(1, "read_file", r#"{"file": "a.rs"}"#),
            call(2, "delete_everything", "{}"),
            call(3, "read_file", r#"{"path": "ok.rs"}"#),
        ];

        let results = engine.dispatch_batch(&calls).await;

        assert!(results[0].is_failure(ActionFailure::InvalidArguments));
        assert!(results[1].is_failure(ActionFailure::InvalidArguments));
        assert!(results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("Missing required field 'path'"));
        assert!(results[2].is_failure(ActionFailure::UnknownTool));
        assert!(results[3].success);
    }

    #[tokio::test]
    async fn test_panicking_action_is_contained() {
        let (engine, _) = engine(Arc::new(AutoApprove));
        let calls = vec![call(0, "explode", "{}"), call(1, "read_file", r#"{"path": "a"}"#)];

        let results = engine.dispatch_batch(&calls).await;

        assert!(results[0].is_failure(ActionFailure::Panicked));
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_file_reads_feed_working_memory() {
        let (engine, memory) = engine(Arc::new(AutoApprove));
        let calls = vec![
            call(0, "read_file", r#"{"path": "src/main.rs"}"#),
            call(1, "sleep", r#"{"ms": 0}"#),
        ];

        engine.dispatch_batch(&calls).await;

        let memory = memory.read().await;
        let working = memory.items(MemoryTier::Working);
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].source.as_deref(), Some("src/main.rs"));
        assert_eq!(working[0].content, "contents of src/main.rs");
        assert_eq!(working[0].relevance, 1.0);
    }

    struct SilentNotifier;

    #[async_trait]
    impl ApprovalNotifier for SilentNotifier {
        async fn notify(&self, _request: &ApprovalRequest) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancellation_releases_pending_approval() {
        let cancel = CancellationToken::new();
        let (engine, _) = engine(Arc::new(ApprovalBroker::new(Arc::new(SilentNotifier))));
        let engine = engine.with_cancellation(cancel.clone());
        cancel.cancel();

        let results = engine
            .dispatch_batch(&[call(0, "write_file", r#"{"path": "a"}"#)])
            .await;

        assert!(results[0].is_failure(ActionFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_denial_does_not_block_later_sensitive_action() {
        let gate = Arc::new(RecordingGate::denying(&["write_file"]));
        let (engine, _) = engine(gate.clone());
        let calls = vec![
            call(0, "write_file", r#"{"path": "a.rs"}"#),
            call(1, "read_file", r#"{"path": "b.rs"}"#),
            call(2, "git_push", "{}"),
        ];

        let results = engine.dispatch_batch(&calls).await;

        assert!(results[0].is_failure(ActionFailure::Denied));
        assert_eq!(results[1].output, "contents of b.rs");
        assert!(results[2].failure.is_none());
        assert_eq!(results[2].output, "pushed");
        assert_eq!(
            gate.seen(),
            vec![(0, "write_file".to_string()), (2, "git_push".to_string())]
        );
    }

    /// Hands each approval request to the test.
    struct ForwardingNotifier(tokio::sync::mpsc::UnboundedSender<ApprovalRequest>);

    #[async_trait]
    impl ApprovalNotifier for ForwardingNotifier {
        async fn notify(&self, request: &ApprovalRequest) -> Result<()> {
            self.0
                .send(request.clone())
                .map_err(|e| crate::error::Error::Internal(e.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_timeout_does_not_block_later_sensitive_action() {
        let (tx, mut requests) = tokio::sync::mpsc::unbounded_channel();
        let broker = Arc::new(ApprovalBroker::new(Arc::new(ForwardingNotifier(tx))));

        // Let the first request lapse, approve the second
        let approver = {
            let broker = broker.clone();
            tokio::spawn(async move {
                let ignored = requests.recv().await.unwrap();
                let answered = requests.recv().await.unwrap();
                assert!(broker.resolve(answered.id, true));
                (ignored.index, answered.index)
            })
        };

        let (engine, _) = engine(broker.clone());
        let calls = vec![
            call(0, "write_file", r#"{"path": "a.rs"}"#),
            call(1, "git_push", "{}"),
        ];

        let results = engine.dispatch_batch(&calls).await;

        assert!(results[0].is_failure(ActionFailure::ApprovalTimeout));
        assert_eq!(
            results[0].to_model_content(),
            "Error: Approval for write_file timed out after 300s"
        );
        assert!(results[1].failure.is_none());
        assert_eq!(results[1].output, "pushed");
        assert_eq!(broker.pending_count(), 0);

        assert_eq!(approver.await.unwrap(), (0, 1));
    }

    /// Answers with action requests for a fixed number of rounds, then text.
    struct ScriptedFollowUp {
        responses: VecDeque<CompletionResponse>,
        calls_seen: u32,
    }

    impl ScriptedFollowUp {
        fn with_rounds(total_rounds: u32) -> (CompletionResponse, Self) {
            let mut responses: VecDeque<_> = (1..total_rounds).map(read_round).collect();
            responses.push_back(CompletionResponse::text("done"));
            let follow_up = Self {
                responses,
                calls_seen: 0,
            };
            (read_round(0), follow_up)
        }
    }

    fn read_round(round: u32) -> CompletionResponse {
        CompletionResponse::text("").with_tool_calls(vec![call(
            round as usize,
            "read_file",
            &format!(r#"{{"path": "f{}.rs"}}"#, round),
        )])
    }

    #[async_trait]
    impl FollowUp for ScriptedFollowUp {
        async fn next_response(
            &mut self,
            requested: &CompletionResponse,
            results: &[ToolExecutionResult],
        ) -> Result<CompletionResponse> {
            assert_eq!(requested.tool_calls.len(), results.len());
            self.calls_seen += 1;
            Ok(self
                .responses
                .pop_front()
                .unwrap_or_else(|| CompletionResponse::text("done")))
        }
    }

    #[tokio::test]
    async fn test_chain_within_depth_completes() {
        let (engine, _) = engine(Arc::new(AutoApprove));
        let (first, mut follow_up) = ScriptedFollowUp::with_rounds(10);

        let outcome = engine.run_chain(first, &mut follow_up).await.unwrap();

        assert_eq!(outcome.rounds, 10);
        assert_eq!(outcome.response.content, "done");
        assert_eq!(follow_up.calls_seen, 10);
    }

    #[tokio::test]
    async fn test_chain_beyond_depth_is_fatal() {
        let (engine, _) = engine(Arc::new(AutoApprove));
        let (first, mut follow_up) = ScriptedFollowUp::with_rounds(11);

        let err = engine.run_chain(first, &mut follow_up).await.unwrap_err();

        assert!(matches!(err, Error::MaxDepthExceeded { max_depth: 10 }));
        assert!(err.is_turn_fatal());
        assert_eq!(follow_up.calls_seen, 10);
    }

    #[tokio::test]
    async fn test_chain_without_actions_is_passthrough() {
        let (engine, _) = engine(Arc::new(AutoApprove));
        let mut follow_up = ScriptedFollowUp {
            responses: VecDeque::new(),
            calls_seen: 0,
        };

        let outcome = engine
            .run_chain(CompletionResponse::text("hello"), &mut follow_up)
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 0);
        assert_eq!(outcome.response.content, "hello");
        assert_eq!(follow_up.calls_seen, 0);
    }
}
