//! Normalized cross-platform message schemas — the contract between
//! the communication adapters and the orchestrator ingress.

use serde::{Deserialize, Serialize};

/// An attachment carried alongside an incoming message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub file_id: Option<String>,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Normalized incoming message from any platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub platform: String,
    pub platform_user_id: String,
    #[serde(default)]
    pub platform_username: Option<String>,
    pub platform_channel_id: String,
    #[serde(default)]
    pub platform_thread_id: Option<String>,
    #[serde(default)]
    pub platform_server_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// A file reference returned to the adapter for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFile {
    pub filename: String,
    pub url: String,
}

/// Summary of a single tool call made during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub name: String,
    pub success: bool,
    pub tool_use_id: String,
}

/// Metadata about the tool calls behind an agent response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallsMetadata {
    pub total_count: usize,
    pub unique_tools: usize,
    pub tools_sequence: Vec<ToolCallSummary>,
}

impl ToolCallsMetadata {
    /// Build metadata from the sequence of executed calls. Returns `None`
    /// when no tools ran, so the field is omitted from the response.
    pub fn from_sequence(sequence: Vec<ToolCallSummary>) -> Option<Self> {
        if sequence.is_empty() {
            return None;
        }
        let mut names: Vec<&str> = sequence.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        Some(Self {
            total_count: sequence.len(),
            unique_tools: names.len(),
            tools_sequence: sequence,
        })
    }
}

/// Response from the orchestrator back to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    #[serde(default)]
    pub files: Vec<ResponseFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls_metadata: Option<ToolCallsMetadata>,
}

impl AgentResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            files: Vec::new(),
            error: None,
            tool_calls_metadata: None,
        }
    }

    pub fn error(content: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            files: Vec::new(),
            error: Some(kind.into()),
            tool_calls_metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_counts_unique_tools() {
        let meta = ToolCallsMetadata::from_sequence(vec![
            ToolCallSummary { name: "research.web_search".into(), success: true, tool_use_id: "a".into() },
            ToolCallSummary { name: "research.web_search".into(), success: true, tool_use_id: "b".into() },
            ToolCallSummary { name: "location.create_reminder".into(), success: false, tool_use_id: "c".into() },
        ])
        .unwrap();
        assert_eq!(meta.total_count, 3);
        assert_eq!(meta.unique_tools, 2);
    }

    #[test]
    fn metadata_empty_is_none() {
        assert!(ToolCallsMetadata::from_sequence(vec![]).is_none());
    }

    #[test]
    fn response_omits_absent_error() {
        let json = serde_json::to_value(AgentResponse::text("hi")).unwrap();
        assert!(json.get("error").is_none());
        let json = serde_json::to_value(AgentResponse::error("sorry", "budget_exceeded")).unwrap();
        assert_eq!(json["error"], "budget_exceeded");
    }

    #[test]
    fn incoming_message_minimal() {
        let json = serde_json::json!({
            "platform": "discord",
            "platform_user_id": "u1",
            "platform_channel_id": "c1",
            "content": "hello",
        });
        let msg: IncomingMessage = serde_json::from_value(json).unwrap();
        assert!(msg.platform_thread_id.is_none());
        assert!(msg.attachments.is_empty());
    }
}
