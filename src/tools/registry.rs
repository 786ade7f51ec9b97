//! In-process action registry.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;

use super::types::{
    ActionFailure, ToolArguments, ToolCatalog, ToolExecutionRequest, ToolExecutionResult, ToolSpec,
};

type Handler = Arc<dyn Fn(ToolArguments) -> BoxFuture<'static, ToolExecutionResult> + Send + Sync>;

struct RegisteredTool {
    spec: ToolSpec,
    handler: Handler,
}

/// Catalog of actions backed by async closures.
///
/// Listing is sorted by name so the catalog sent to the model is stable
/// between turns.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. A later registration with the same name replaces
    /// the earlier one.
    pub fn register<F, Fut>(&mut self, spec: ToolSpec, handler: F) -> Result<()>
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolExecutionResult> + Send + 'static,
    {
        if spec.name.trim().is_empty() {
            return Err(Error::Config("tool name is required".to_string()));
        }

        let handler: Handler = Arc::new(move |args| -> BoxFuture<'static, ToolExecutionResult> {
            Box::pin(handler(args))
        });
        self.tools
            .insert(spec.name.clone(), RegisteredTool { spec, handler });
        Ok(())
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function definitions in the order of [`ToolCatalog::list`].
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.spec.to_definition()).collect()
    }
}

#[async_trait]
impl ToolCatalog for ToolRegistry {
    fn list(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    fn get(&self, name: &str) -> Option<ToolSpec> {
        self.tools.get(name).map(|t| t.spec.clone())
    }

    async fn execute(&self, request: &ToolExecutionRequest) -> ToolExecutionResult {
        match self.tools.get(&request.name) {
            Some(tool) => (tool.handler)(request.arguments.clone()).await,
            None => ToolExecutionResult::failure(
                ActionFailure::UnknownTool,
                format!("Unknown tool: {}", request.name),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::{ParamSpec, ParamType};

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
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
            .register(ToolSpec::new("git_status", "Show status"), |_| async {
                ToolExecutionResult::success("clean")
            })
            .unwrap();
        registry
    }

    fn request(name: &str, args: serde_json::Value) -> ToolExecutionRequest {
        ToolExecutionRequest {
            index: 0,
            call_id: "call_0".into(),
            name: name.into(),
            arguments: ToolArguments(args.as_object().cloned().unwrap_or_default()),
        }
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let mut registry = ToolRegistry::new();
        let result = registry.register(ToolSpec::new("  ", "nameless"), |_| async {
            ToolExecutionResult::success("")
        });
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_is_sorted() {
        let names: Vec<String> = registry().list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["git_status", "write_file"]);

        let defs = registry().definitions();
        assert_eq!(defs[1].name, "write_file");
        assert_eq!(defs[1].parameters["required"][0], "path");
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let result = registry()
            .execute(&request("write_file", serde_json::json!({"path": "a.txt"})))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "wrote a.txt");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let result = registry()
            .execute(&request("rm_rf", serde_json::json!({})))
            .await;
        assert!(result.is_failure(ActionFailure::UnknownTool));
    }
}
