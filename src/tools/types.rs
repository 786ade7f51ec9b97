//! Action catalog types.
//!
//! - **ToolSpec / ParamSpec / ParamType**: declared parameter schema of an action
//! - **ToolArguments**: validated argument mapping with typed accessors
//! - **ToolExecutionRequest / ToolExecutionResult**: one dispatched action
//! - **ToolCatalog**: the collaborator that lists and executes actions

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::llm::ToolDefinition;

/// Declared parameter of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    /// Human-readable description shown to the model
    pub description: String,
    pub required: bool,
    /// Applied when an optional parameter is omitted
    pub default: Option<Value>,
}

impl ParamSpec {
    /// Create a new required parameter.
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: true,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the parameter as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Set a default value; implies optional.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self.required = false;
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = self.param_type.to_json_schema();
        if let Value::Object(obj) = &mut schema {
            if !self.description.is_empty() {
                obj.insert("description".into(), Value::String(self.description.clone()));
            }
            if let Some(default) = &self.default {
                obj.insert("default".into(), default.clone());
            }
        }
        schema
    }
}

/// Type of an action parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    /// Any JSON number
    Number,
    Boolean,
    Array(Box<ParamType>),
    Object(Vec<ParamSpec>),
    /// String restricted to the listed values
    Enum(Vec<String>),
    /// Any JSON value, validated by the handler
    Any,
}

impl ParamType {
    pub fn array(inner: ParamType) -> Self {
        Self::Array(Box::new(inner))
    }

    pub fn enum_of(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Enum(values.into_iter().map(|v| v.into()).collect())
    }

    /// Short hint such as "string" or "array[integer]".
    pub fn hint(&self) -> String {
        match self {
            Self::String => "string".to_string(),
            Self::Integer => "integer".to_string(),
            Self::Number => "number".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Array(inner) => format!("array[{}]", inner.hint()),
            Self::Object(_) => "object".to_string(),
            Self::Enum(values) => values.join("|"),
            Self::Any => "any".to_string(),
        }
    }

    /// JSON Schema fragment for this type.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::String => serde_json::json!({ "type": "string" }),
            Self::Integer => serde_json::json!({ "type": "integer" }),
            Self::Number => serde_json::json!({ "type": "number" }),
            Self::Boolean => serde_json::json!({ "type": "boolean" }),
            Self::Array(inner) => serde_json::json!({
                "type": "array",
                "items": inner.to_json_schema()
            }),
            Self::Object(fields) => object_schema(fields),
            Self::Enum(values) => serde_json::json!({
                "type": "string",
                "enum": values
            }),
            Self::Any => serde_json::json!({}),
        }
    }
}

fn object_schema(fields: &[ParamSpec]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| (f.name.clone(), f.to_json_schema()))
        .collect();
    let required: Vec<&str> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name.as_str())
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

/// An action the model can request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema object for the parameters.
    pub fn parameters_schema(&self) -> Value {
        object_schema(&self.params)
    }

    /// Function definition advertised to the model.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Validated arguments for one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArguments(pub Map<String, Value>);

impl ToolArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    /// Deserialize into a handler-specific struct.
    pub fn parse<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One action ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRequest {
    /// Position in the model's batch
    pub index: usize,
    /// Provider call id the result is correlated with
    pub call_id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

/// Why an action did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFailure {
    /// Arguments were not valid JSON or did not match the schema
    InvalidArguments,
    /// No such action in the catalog
    UnknownTool,
    /// The approver refused
    Denied,
    /// No approval arrived in time
    ApprovalTimeout,
    /// The session was cancelled while waiting
    Cancelled,
    /// The action ran and reported an error
    Execution,
    /// The action task panicked
    Panicked,
}

impl ActionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArguments => "invalid_arguments",
            Self::UnknownTool => "unknown_tool",
            Self::Denied => "denied",
            Self::ApprovalTimeout => "approval_timeout",
            Self::Cancelled => "cancelled",
            Self::Execution => "execution",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ActionFailure>,
    /// Structured data for callers; never sent to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ToolExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            failure: None,
            payload: None,
        }
    }

    pub fn failure(kind: ActionFailure, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            failure: Some(kind),
            payload: None,
        }
    }

    /// Shorthand for an action that ran and failed.
    pub fn execution_error(error: impl Into<String>) -> Self {
        Self::failure(ActionFailure::Execution, error)
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_failure(&self, kind: ActionFailure) -> bool {
        self.failure == Some(kind)
    }

    /// Text fed back to the model as the tool message.
    pub fn to_model_content(&self) -> String {
        if self.success {
            return self.output.clone();
        }
        let error = self.error.as_deref().unwrap_or("action failed");
        if self.output.is_empty() {
            format!("Error: {}", error)
        } else {
            format!("{}\nError: {}", self.output, error)
        }
    }
}

/// Lists and executes actions.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Every available action.
    fn list(&self) -> Vec<ToolSpec>;

    /// Look up one action by name.
    fn get(&self, name: &str) -> Option<ToolSpec> {
        self.list().into_iter().find(|t| t.name == name)
    }

    /// Run a validated request.
    async fn execute(&self, request: &ToolExecutionRequest) -> ToolExecutionResult;
}
