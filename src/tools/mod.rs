//! Model-requested actions.
//!
//! - [`ToolCatalog`] lists and executes actions; [`ToolRegistry`] is the in-process catalog
//! - [`parse_arguments`] validates raw argument payloads against a [`ToolSpec`]
//! - [`PermissionPolicy`] and [`ApprovalGate`] guard sensitive actions
//! - [`ToolDispatchEngine`] runs a batch and bounds chained rounds
//!
//! ## Example
//!
//! ```rust,ignore
//! use agi_core::tools::{ParamSpec, ParamType, ToolExecutionResult, ToolRegistry, ToolSpec};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(
//!     ToolSpec::new("read_file", "Read a file")
//!         .with_param(ParamSpec::new("path", ParamType::String)),
//!     |args| async move {
//!         match tokio::fs::read_to_string(args.get_str("path").unwrap_or_default()).await {
//!             Ok(text) => ToolExecutionResult::success(text),
//!             Err(e) => ToolExecutionResult::execution_error(e.to_string()),
//!         }
//!     },
//! )?;
//! ```

mod approval;
mod dispatch;
mod proptest;
mod registry;
mod schema;
mod types;

pub use approval::{
    sanitize_preview, ApprovalBroker, ApprovalGate, ApprovalNotifier, ApprovalOutcome,
    ApprovalRequest, AutoApprove, PermissionPolicy, StaticPermissionPolicy, MAX_PREVIEW_CHARS,
};
pub use dispatch::{ChainOutcome, FollowUp, ToolDispatchEngine};
pub use registry::ToolRegistry;
pub use schema::{describe_errors, parse_arguments, validate_arguments, validate_value, ValidationError};
pub use types::{
    ActionFailure, ParamSpec, ParamType, ToolArguments, ToolCatalog, ToolExecutionRequest,
    ToolExecutionResult, ToolSpec,
};
