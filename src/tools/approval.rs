//! Permission policy and the approval channel for sensitive actions.
//!
//! Each approval request gets its own correlation id and one-shot channel, so
//! a late answer for a request that already timed out can never be applied to
//! the next one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

use super::schema::truncate_preview;

/// Longest argument preview shown to an approver.
pub const MAX_PREVIEW_CHARS: usize = 500;

/// Classifies actions as sensitive.
pub trait PermissionPolicy: Send + Sync {
    /// Whether `tool_name` must be approved before it runs.
    fn requires_approval(&self, tool_name: &str) -> bool;

    /// How long to wait for an approver.
    fn approval_timeout(&self) -> Duration;
}

/// Fixed set of sensitive action names.
#[derive(Debug, Clone)]
pub struct StaticPermissionPolicy {
    sensitive: HashSet<String>,
    timeout: Duration,
}

impl StaticPermissionPolicy {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new<I, S>(sensitive: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sensitive: sensitive.into_iter().map(Into::into).collect(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Policy under which nothing needs approval.
    pub fn allow_all() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for StaticPermissionPolicy {
    fn default() -> Self {
        Self::new([
            "write_file",
            "edit_file",
            "delete_file",
            "execute_command",
            "git_commit",
            "git_push",
        ])
    }
}

impl PermissionPolicy for StaticPermissionPolicy {
    fn requires_approval(&self, tool_name: &str) -> bool {
        self.sensitive.contains(tool_name)
    }

    fn approval_timeout(&self) -> Duration {
        self.timeout
    }
}

/// A pending decision on one sensitive action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Correlation id the approver answers with
    pub id: Uuid,
    pub tool_name: String,
    /// Sanitized, truncated view of the raw arguments
    pub arguments_preview: String,
    /// Position of the action in its batch
    pub index: usize,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(tool_name: impl Into<String>, raw_arguments: &str, index: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            arguments_preview: sanitize_preview(raw_arguments),
            index,
            requested_at: Utc::now(),
        }
    }
}

/// Make raw arguments safe to show in a markdown chat message.
pub fn sanitize_preview(raw: &str) -> String {
    let escaped: String = raw
        .chars()
        .filter(|c| *c != '*' && *c != '_')
        .map(|c| if c == '`' { '\'' } else { c })
        .collect();
    truncate_preview(&escaped, MAX_PREVIEW_CHARS)
}

/// How an approval wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
    Cancelled,
}

/// Blocks until a sensitive action is approved or refused.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request_approval(
        &self,
        request: ApprovalRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalOutcome;
}

/// Gate that approves everything, for hosts without a remote approver.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn request_approval(
        &self,
        request: ApprovalRequest,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> ApprovalOutcome {
        debug!(tool = %request.tool_name, "Auto-approved sensitive action");
        ApprovalOutcome::Approved
    }
}

/// Delivers approval requests to a human (chat bot, UI prompt, ...).
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn notify(&self, request: &ApprovalRequest) -> Result<()>;
}

/// Correlates approver answers with waiting actions.
///
/// The approver side calls [`ApprovalBroker::resolve`] with the id it was
/// shown; the dispatch side waits through [`ApprovalGate`].
pub struct ApprovalBroker {
    notifier: Arc<dyn ApprovalNotifier>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
}

impl ApprovalBroker {
    pub fn new(notifier: Arc<dyn ApprovalNotifier>) -> Self {
        Self {
            notifier,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<bool>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver an answer. Returns false for unknown or already-settled ids.
    pub fn resolve(&self, id: Uuid, approved: bool) -> bool {
        let sender = self.pending().remove(&id);
        match sender {
            Some(tx) => {
                let delivered = tx.send(approved).is_ok();
                if !delivered {
                    warn!(%id, "Approval answer arrived after the wait ended");
                }
                delivered
            }
            None => {
                warn!(%id, approved, "Discarding answer for unknown approval request");
                false
            }
        }
    }

    /// Ids still waiting for an answer.
    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.pending().keys().copied().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

/// Drops a pending entry when the wait ends, even if the waiting future is dropped.
struct PendingGuard<'a> {
    broker: &'a ApprovalBroker,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.pending().remove(&self.id);
    }
}

impl ApprovalBroker {
    async fn await_answer(
        &self,
        request: &ApprovalRequest,
        answer: oneshot::Receiver<bool>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ApprovalOutcome {
        let id = request.id;

        // Delivery shares the deadline with the answer
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ApprovalOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => {
                warn!(%id, tool = %request.tool_name, "Approval request delivery timed out");
                return ApprovalOutcome::TimedOut;
            }
            sent = self.notifier.notify(request) => sent,
        };
        if let Err(e) = sent {
            warn!(%id, tool = %request.tool_name, error = %e, "Failed to send approval request");
            return ApprovalOutcome::Denied;
        }

        info!(
            %id,
            tool = %request.tool_name,
            remaining_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
            "Waiting for approval"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ApprovalOutcome::Cancelled,
            answer = answer => match answer {
                Ok(true) => ApprovalOutcome::Approved,
                Ok(false) | Err(_) => ApprovalOutcome::Denied,
            },
            _ = tokio::time::sleep_until(deadline) => ApprovalOutcome::TimedOut,
        }
    }
}

#[async_trait]
impl ApprovalGate for ApprovalBroker {
    async fn request_approval(
        &self,
        request: ApprovalRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalOutcome {
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        self.pending().insert(request.id, tx);
        // Settled or abandoned ids must not accept a late answer
        let _guard = PendingGuard {
            broker: self,
            id: request.id,
        };

        let outcome = self.await_answer(&request, rx, deadline, cancel).await;
        info!(id = %request.id, tool = %request.tool_name, ?outcome, "Approval settled");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::sync::mpsc;

    struct ChannelNotifier(mpsc::UnboundedSender<ApprovalRequest>);

    #[async_trait]
    impl ApprovalNotifier for ChannelNotifier {
        async fn notify(&self, request: &ApprovalRequest) -> Result<()> {
            self.0
                .send(request.clone())
                .map_err(|e| Error::Internal(e.to_string()))
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl ApprovalNotifier for FailingNotifier {
        async fn notify(&self, _request: &ApprovalRequest) -> Result<()> {
            Err(Error::Internal("bot offline".into()))
        }
    }

    fn broker() -> (Arc<ApprovalBroker>, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ApprovalBroker::new(Arc::new(ChannelNotifier(tx)))), rx)
    }

    #[test]
    fn test_static_policy() {
        let policy = StaticPermissionPolicy::new(["write_file"]).with_timeout(Duration::from_secs(5));
        assert!(policy.requires_approval("write_file"));
        assert!(!policy.requires_approval("read_file"));
        assert_eq!(policy.approval_timeout(), Duration::from_secs(5));
        assert!(!StaticPermissionPolicy::allow_all().requires_approval("write_file"));
    }

    #[test]
    fn test_sanitize_preview() {
        assert_eq!(sanitize_preview(r#"{"cmd": "`rm` *_x_*"}"#), r#"{"cmd": "'rm' x"}"#);

        let long = "a".repeat(600);
        let preview = sanitize_preview(&long);
        assert_eq!(preview.chars().count(), MAX_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn test_approved_by_id() {
        let (broker, mut requests) = broker();
        let cancel = CancellationToken::new();

        let waiter = {
            let broker = broker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                broker
                    .request_approval(
                        ApprovalRequest::new("write_file", "{}", 0),
                        Duration::from_secs(30),
                        &cancel,
                    )
                    .await
            })
        };

        let request = requests.recv().await.unwrap();
        assert!(broker.resolve(request.id, true));
        assert_eq!(waiter.await.unwrap(), ApprovalOutcome::Approved);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_by_id() {
        let (broker, mut requests) = broker();
        let cancel = CancellationToken::new();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .request_approval(
                        ApprovalRequest::new("git_push", "{}", 2),
                        Duration::from_secs(30),
                        &cancel,
                    )
                    .await
            })
        };

        let request = requests.recv().await.unwrap();
        assert_eq!(request.index, 2);
        assert!(broker.resolve(request.id, false));
        assert_eq!(waiter.await.unwrap(), ApprovalOutcome::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_answer_is_discarded() {
        let (broker, mut requests) = broker();
        let cancel = CancellationToken::new();

        let outcome = broker
            .request_approval(
                ApprovalRequest::new("write_file", "{}", 0),
                Duration::from_secs(60),
                &cancel,
            )
            .await;
        assert_eq!(outcome, ApprovalOutcome::TimedOut);

        let stale = requests.recv().await.unwrap();
        assert!(!broker.resolve(stale.id, true));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_wait() {
        let (broker, _requests) = broker();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = broker
            .request_approval(
                ApprovalRequest::new("write_file", "{}", 0),
                Duration::from_secs(3600),
                &cancel,
            )
            .await;
        assert_eq!(outcome, ApprovalOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_notifier_failure_denies() {
        let broker = ApprovalBroker::new(Arc::new(FailingNotifier));
        let outcome = broker
            .request_approval(
                ApprovalRequest::new("write_file", "{}", 0),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome, ApprovalOutcome::Denied);
        assert_eq!(broker.pending_count(), 0);
    }

    /// Never finishes delivering a request.
    struct StalledNotifier;

    #[async_trait]
    impl ApprovalNotifier for StalledNotifier {
        async fn notify(&self, _request: &ApprovalRequest) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_delivery_times_out() {
        let broker = ApprovalBroker::new(Arc::new(StalledNotifier));
        let outcome = tokio::time::timeout(
            Duration::from_secs(120),
            broker.request_approval(
                ApprovalRequest::new("write_file", "{}", 0),
                Duration::from_secs(60),
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("approval wait must end at its own deadline");
        assert_eq!(outcome, ApprovalOutcome::TimedOut);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_stalled_delivery() {
        let broker = Arc::new(ApprovalBroker::new(Arc::new(StalledNotifier)));
        let cancel = CancellationToken::new();

        let waiter = {
            let broker = broker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                broker
                    .request_approval(
                        ApprovalRequest::new("git_push", "{}", 0),
                        Duration::from_secs(3600),
                        &cancel,
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("cancellation must release the wait")
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::Cancelled);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_wait_clears_pending_entry() {
        let (broker, mut requests) = broker();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .request_approval(
                        ApprovalRequest::new("write_file", "{}", 0),
                        Duration::from_secs(3600),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        let request = requests.recv().await.unwrap();
        assert_eq!(broker.pending_ids(), vec![request.id]);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(broker.pending_count(), 0);
        assert!(!broker.resolve(request.id, true));
    }

    #[test]
    fn test_unknown_id_is_rejected() {
        let (broker, _requests) = broker();
        assert!(!broker.resolve(Uuid::new_v4(), true));
    }
}
