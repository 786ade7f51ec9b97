//! Argument validation against an action's declared parameters.
//!
//! The model sends arguments as a raw JSON string. Before dispatch they are
//! parsed, checked against the [`ToolSpec`], and defaults are filled in. Any
//! problem becomes an `InvalidArguments` result for that action only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::types::{ParamSpec, ParamType, ToolArguments, ToolSpec};

/// Problem with one argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum ValidationError {
    /// The payload is not valid JSON.
    Malformed { message: String },

    /// The payload is valid JSON but not an object.
    NotAnObject { got: String },

    /// A required parameter is missing.
    MissingField { field: String, expected: String },

    /// A parameter the action does not declare.
    UnknownField { field: String },

    /// Value has the wrong type.
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
        /// First 100 chars of the offending value
        value_preview: String,
    },

    /// Enum parameter has a value outside the allowed set.
    EnumInvalid {
        field: String,
        value: String,
        allowed: Vec<String>,
    },
}

impl ValidationError {
    pub fn missing_field(field: impl Into<String>, expected: &ParamType) -> Self {
        Self::MissingField {
            field: field.into(),
            expected: expected.hint(),
        }
    }

    pub fn type_mismatch(field: impl Into<String>, expected: &ParamType, value: &Value) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected: expected.hint(),
            got: value_type_name(value).to_string(),
            value_preview: truncate_preview(&value.to_string(), 100),
        }
    }

    /// Human-readable message, also shown to the model.
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Malformed { message } => format!("Arguments are not valid JSON: {}", message),
            Self::NotAnObject { got } => format!("Arguments must be a JSON object, got {}", got),
            Self::MissingField { field, expected } => {
                format!("Missing required field '{}' (expected {})", field, expected)
            }
            Self::UnknownField { field } => format!("Unknown field '{}'", field),
            Self::TypeMismatch {
                field,
                expected,
                got,
                value_preview,
            } => format!(
                "Field '{}' has wrong type: expected {}, got {} (value: {})",
                field, expected, got, value_preview
            ),
            Self::EnumInvalid {
                field,
                value,
                allowed,
            } => format!(
                "Field '{}' has invalid value '{}'. Allowed values: {}",
                field,
                value,
                allowed.join(", ")
            ),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_user_message())
    }
}

impl std::error::Error for ValidationError {}

/// Join several errors into one message.
pub fn describe_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::to_user_message)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse a raw argument payload and validate it against `spec`.
///
/// An empty payload is treated as `{}`.
pub fn parse_arguments(raw: &str, spec: &ToolSpec) -> Result<ToolArguments, Vec<ValidationError>> {
    let trimmed = raw.trim();
    let value: Value = if trimmed.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(trimmed).map_err(|e| {
            vec![ValidationError::Malformed {
                message: e.to_string(),
            }]
        })?
    };

    validate_arguments(value, &spec.params)
}

/// Validate an already-parsed value and apply defaults.
pub fn validate_arguments(
    value: Value,
    params: &[ParamSpec],
) -> Result<ToolArguments, Vec<ValidationError>> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(vec![ValidationError::NotAnObject {
                got: value_type_name(&other).to_string(),
            }])
        }
    };

    let mut errors = validate_object(&obj, params, "");
    if !errors.is_empty() {
        errors.sort_by_key(error_order);
        return Err(errors);
    }

    for param in params {
        if !obj.contains_key(&param.name) {
            if let Some(default) = &param.default {
                obj.insert(param.name.clone(), default.clone());
            }
        }
    }

    Ok(ToolArguments(obj))
}

fn validate_object(obj: &Map<String, Value>, params: &[ParamSpec], prefix: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for key in obj.keys() {
        if !params.iter().any(|p| &p.name == key) {
            errors.push(ValidationError::UnknownField {
                field: join_path(prefix, key),
            });
        }
    }

    for param in params {
        let path = join_path(prefix, &param.name);
        match obj.get(&param.name) {
            Some(Value::Null) if !param.required => {}
            Some(value) => errors.extend(validate_value(value, &param.param_type, &path)),
            None if param.required => {
                errors.push(ValidationError::missing_field(path, &param.param_type));
            }
            None => {}
        }
    }

    errors
}

/// Validate a single value against a parameter type.
pub fn validate_value(value: &Value, param_type: &ParamType, field: &str) -> Vec<ValidationError> {
    match param_type {
        ParamType::String if value.is_string() => Vec::new(),
        ParamType::Integer if value.is_i64() || value.is_u64() => Vec::new(),
        ParamType::Number if value.is_number() => Vec::new(),
        ParamType::Boolean if value.is_boolean() => Vec::new(),
        ParamType::Any => Vec::new(),
        ParamType::Array(inner) => match value.as_array() {
            Some(items) => items
                .iter()
                .enumerate()
                .flat_map(|(i, item)| validate_value(item, inner, &format!("{}[{}]", field, i)))
                .collect(),
            None => vec![ValidationError::type_mismatch(field, param_type, value)],
        },
        ParamType::Object(fields) => match value.as_object() {
            Some(obj) => validate_object(obj, fields, field),
            None => vec![ValidationError::type_mismatch(field, param_type, value)],
        },
        ParamType::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.iter().any(|a| a == s) => Vec::new(),
            Some(s) => vec![ValidationError::EnumInvalid {
                field: field.to_string(),
                value: s.to_string(),
                allowed: allowed.clone(),
            }],
            None => vec![ValidationError::type_mismatch(field, param_type, value)],
        },
        _ => vec![ValidationError::type_mismatch(field, param_type, value)],
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

// Deterministic error order regardless of map iteration order
fn error_order(error: &ValidationError) -> (u8, String) {
    match error {
        ValidationError::Malformed { .. } => (0, String::new()),
        ValidationError::NotAnObject { .. } => (1, String::new()),
        ValidationError::MissingField { field, .. } => (2, field.clone()),
        ValidationError::UnknownField { field } => (3, field.clone()),
        ValidationError::TypeMismatch { field, .. } => (4, field.clone()),
        ValidationError::EnumInvalid { field, .. } => (5, field.clone()),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truncate on a char boundary for previews.
pub(crate) fn truncate_preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
