//! Tool registry: name → tool mapping plus guarded invocation.
//!
//! `run_tool` never raises. Unknown tools, schema violations and tool
//! failures all come back as `tool_error` envelopes so the agent loop can
//! feed them to the model instead of dying.

use log::{debug, warn};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use super::context::{Tool, ToolContext};

/// Registry for the tools bound to a dialog's turns.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Re-registering a name replaces the previous entry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Remove a tool by name; unknown names are ignored.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_ephemeral(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|tool| tool.ephemeral())
            .unwrap_or(false)
    }

    /// Names in a stable order suitable for LLM binding.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions in the same stable order as [`names`].
    pub fn definitions(&self) -> Vec<codeforge::chat::Tool> {
        let mut tools: Vec<&Arc<dyn Tool>> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools.iter().map(|tool| tool.definition()).collect()
    }

    /// Validate `args` against the tool's schema and run it. All failure
    /// modes return an error envelope, never an `Err`.
    pub async fn run_tool(&self, name: &str, args: Value, context: &ToolContext) -> Value {
        let Some(tool) = self.find(name) else {
            warn!("unknown tool requested: {}", name);
            return json!({
                "type": "tool_error",
                "code": "unknown_tool",
                "error": format!("no tool named '{name}' is registered"),
            });
        };

        if let Err(message) = validate_args(&tool.args_schema(), &args) {
            debug!("argument validation failed for {}: {}", name, message);
            return json!({
                "type": "tool_error",
                "code": "args_validation",
                "error": message,
                "tool": name,
            });
        }

        match tool.run(args, context).await {
            Ok(result) => result,
            Err(e) => {
                warn!("tool {} failed: {}", name, e);
                json!({
                    "type": "tool_error",
                    "code": "execution_failed",
                    "error": e.to_string(),
                    "error_type": e.error_type(),
                    "tool": name,
                })
            }
        }
    }
}

/// Structural validation of an argument object against a JSON schema:
/// required keys must be present, and declared property types must match.
fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(object) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in object {
            let Some(property) = properties.get(key) else {
                return Err(format!("unknown argument '{key}'"));
            };
            if let Some(expected) = property.get("type").and_then(Value::as_str)
                && !type_matches(expected, value)
            {
                return Err(format!(
                    "argument '{key}' should be of type {expected}"
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}
