use serde::{Deserialize, Serialize};

use crate::permission::PermissionLevel;

/// Parameter definition for a tool (name, JSON type, optional enum).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON Schema type: string, integer, number, boolean, array, object.
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#enum: Option<Vec<String>>,
}

fn default_required() -> bool {
    true
}

/// Definition of a single tool exposed by a module.
///
/// Names are namespaced: `"<module>.<tool>"`, e.g. `research.web_search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    #[serde(default = "default_permission")]
    pub required_permission: PermissionLevel,
}

fn default_permission() -> PermissionLevel {
    PermissionLevel::Guest
}

impl ToolDefinition {
    /// Whether the tool's schema names a `user_id` parameter.
    pub fn takes_user_id(&self) -> bool {
        self.parameters.iter().any(|p| p.name == "user_id")
    }
}

/// Manifest describing a module and the tools it exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub module_name: String,
    pub description: String,
    pub tools: Vec<ToolDefinition>,
}

/// Canonical tool call, provider-agnostic. Every LLM adapter converts
/// provider-specific tool invocations to/from this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub tool_use_id: String,
}

/// Structured result of a tool execution. `success=false` with an error
/// message is the only failure channel — dispatch never throws.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_defaults() {
        let json = serde_json::json!({
            "name": "query",
            "type": "string",
            "description": "Search query",
        });
        let p: ToolParameter = serde_json::from_value(json).unwrap();
        assert!(p.required);
        assert!(p.r#enum.is_none());
    }

    #[test]
    fn manifest_roundtrip() {
        let manifest = ModuleManifest {
            module_name: "research".into(),
            description: "Web research".into(),
            tools: vec![ToolDefinition {
                name: "research.web_search".into(),
                description: "Search the web".into(),
                parameters: vec![],
                required_permission: PermissionLevel::User,
            }],
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let back: ModuleManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tools[0].required_permission, PermissionLevel::User);
    }

    #[test]
    fn takes_user_id() {
        let tool = ToolDefinition {
            name: "scheduler.add_job".into(),
            description: String::new(),
            parameters: vec![ToolParameter {
                name: "user_id".into(),
                param_type: "string".into(),
                description: String::new(),
                required: false,
                r#enum: None,
            }],
            required_permission: PermissionLevel::Guest,
        };
        assert!(tool.takes_user_id());
    }

    #[test]
    fn tool_result_error_shape() {
        let r = ToolResult::err("research.web_search", "timed out");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "timed out");
        assert!(json.get("result").is_none());
    }
}
