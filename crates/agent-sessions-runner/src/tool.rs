//! Tool schemas, structured outcomes and the registry.

use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{RunnerError, ToolContext};

/// Accepted JSON type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    StringList,
}

impl ParamKind {
    /// Whether `value` has this kind.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    /// Required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }

    /// Optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Declared signature of a tool, checked at registration and on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Check the tool definition itself.
    ///
    /// # Errors
    /// Returns a message for empty names or duplicate parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("tool name is empty".to_string());
        }
        let mut seen = Vec::with_capacity(self.params.len());
        for param in &self.params {
            if param.name.trim().is_empty() {
                return Err(format!("tool '{}' has an unnamed parameter", self.name));
            }
            if seen.contains(&param.name.as_str()) {
                return Err(format!(
                    "tool '{}' declares parameter '{}' twice",
                    self.name, param.name
                ));
            }
            seen.push(param.name.as_str());
        }
        Ok(())
    }

    /// Validate call arguments against the declared parameters.
    ///
    /// `null` arguments are treated as an empty object.
    ///
    /// # Errors
    /// Returns a message for non-object, missing, mistyped or unknown arguments.
    pub fn check_args(&self, args: &Value) -> Result<ToolArgs, String> {
        let map = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => return Err(format!("arguments for '{}' must be an object, got {other}", self.name)),
        };

        for param in &self.params {
            match map.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(format!("missing required argument '{}'", param.name));
                }
                Some(value) if !value.is_null() && !param.kind.accepts(value) => {
                    return Err(format!(
                        "argument '{}' must be {:?}, got {value}",
                        param.name, param.kind
                    ));
                }
                _ => {}
            }
        }

        if let Some(unknown) = map
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(format!("unknown argument '{unknown}' for '{}'", self.name));
        }

        Ok(ToolArgs(map))
    }
}

/// Validated call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn string_list(&self, name: &str) -> Option<Vec<&str>> {
        self.0
            .get(name)?
            .as_array()?
            .iter()
            .map(Value::as_str)
            .collect()
    }
}

/// Structured tool result. Callers branch on `status` before using the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    Error {
        error_message: String,
    },
}

impl ToolOutcome {
    /// Successful result.
    ///
    /// Non-object payloads, and objects carrying their own `status` field,
    /// are stored under `result` so the tag stays authoritative.
    #[must_use]
    pub fn success(data: Value) -> Self {
        let data = match data {
            Value::Object(map) if !map.contains_key("status") => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Self::Success { data }
    }

    /// Domain error reported back to the model.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error_message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Field of a successful result.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Self::Success { data } => data.get(field),
            Self::Error { .. } => None,
        }
    }

    /// JSON form stored in tool response events.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({"status": "error", "error_message": e.to_string()})
        })
    }
}

/// Trait for tools callable by an agent.
///
/// `Err` is reserved for infrastructure failures such as an unavailable
/// store; domain failures are `Ok(ToolOutcome::Error { .. })`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn call(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolOutcome, RunnerError>;
}

type ToolHandler =
    dyn Fn(ToolArgs, ToolContext) -> BoxFuture<'static, Result<ToolOutcome, RunnerError>> + Send + Sync;

/// Closure-backed tool.
pub struct FnTool {
    spec: ToolSpec,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Create a tool from a spec and an async handler.
    pub fn new<F, Fut>(spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(ToolArgs, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome, RunnerError>> + Send + 'static,
    {
        Self {
            spec,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolOutcome, RunnerError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").field("spec", &self.spec).finish()
    }
}

/// Tools available to one agent, keyed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool after validating its spec.
    ///
    /// # Errors
    /// Returns `ToolRegistration` for an invalid spec or a duplicate name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RunnerError> {
        let spec = tool.spec();
        spec.validate().map_err(RunnerError::ToolRegistration)?;
        if self.by_name.contains_key(&spec.name) {
            return Err(RunnerError::ToolRegistration(format!(
                "tool '{}' registered twice",
                spec.name
            )));
        }
        self.by_name.insert(spec.name.clone(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// Specs in registration order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fee_spec() -> ToolSpec {
        ToolSpec::new("get_fee_for_payment_method", "Looks up a fee")
            .param(ParamSpec::required("method", ParamKind::String, "payment method"))
            .param(ParamSpec::optional("note", ParamKind::String, ""))
    }

    #[test]
    fn test_check_args_accepts_valid() {
        let args = fee_spec()
            .check_args(&json!({"method": "bank transfer"}))
            .unwrap();
        assert_eq!(args.str("method"), Some("bank transfer"));
        assert!(args.get("note").is_none());
    }

    #[test]
    fn test_check_args_rejects_missing_and_mistyped() {
        let spec = fee_spec();
        assert!(spec.check_args(&json!({})).unwrap_err().contains("missing"));
        assert!(spec.check_args(&json!({"method": 3})).unwrap_err().contains("must be"));
        assert!(spec
            .check_args(&json!({"method": "x", "extra": 1}))
            .unwrap_err()
            .contains("unknown"));
        assert!(spec.check_args(&json!("x")).is_err());
    }

    #[test]
    fn test_null_args_for_parameterless_tool() {
        let spec = ToolSpec::new("retrieve_userinfo", "");
        assert!(spec.check_args(&Value::Null).is_ok());
    }

    #[test]
    fn test_string_list_kind() {
        assert!(ParamKind::StringList.accepts(&json!(["a", "b"])));
        assert!(!ParamKind::StringList.accepts(&json!(["a", 1])));
        assert!(ParamKind::Integer.accepts(&json!(3)));
        assert!(!ParamKind::Integer.accepts(&json!(3.5)));
    }

    #[test]
    fn test_spec_validation() {
        assert!(ToolSpec::new("", "").validate().is_err());
        let dup = ToolSpec::new("t", "")
            .param(ParamSpec::required("a", ParamKind::String, ""))
            .param(ParamSpec::optional("a", ParamKind::Number, ""));
        assert!(dup.validate().unwrap_err().contains("twice"));
    }

    #[test]
    fn test_outcome_wire_format() {
        let ok = ToolOutcome::success(json!({"fee_percentage": 0.02}));
        assert_eq!(ok.to_value(), json!({"status": "success", "fee_percentage": 0.02}));

        let err = ToolOutcome::error("Payment method 'cash' not found");
        assert_eq!(
            err.to_value(),
            json!({"status": "error", "error_message": "Payment method 'cash' not found"})
        );

        let parsed: ToolOutcome =
            serde_json::from_value(json!({"status": "success", "rate": 0.93})).unwrap();
        assert_eq!(parsed.get("rate"), Some(&json!(0.93)));
    }

    #[test]
    fn test_outcome_wraps_scalars() {
        let ok = ToolOutcome::success(json!(4));
        assert!(ok.is_success());
        assert_eq!(ok.get("result"), Some(&json!(4)));
    }

    #[test]
    fn test_outcome_payload_cannot_override_status() {
        let ok = ToolOutcome::success(json!({"status": "pending", "job": 1}));
        assert!(ok.is_success());

        let wire = ok.to_value();
        assert_eq!(
            wire,
            json!({"status": "success", "result": {"status": "pending", "job": 1}})
        );
        let parsed: ToolOutcome = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed, ok);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        let tool = || -> Arc<dyn Tool> {
            Arc::new(FnTool::new(fee_spec(), |_, _| async {
                Ok(ToolOutcome::success(json!({})))
            }))
        };
        registry.register(tool()).unwrap();
        assert!(matches!(
            registry.register(tool()),
            Err(RunnerError::ToolRegistration(_))
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("get_fee_for_payment_method").is_some());
        assert!(registry.get("nope").is_none());
    }
}
