use serde::{Deserialize, Serialize};

/// A message in the canonical conversation sequence handed to the LLM
/// router. Tool interactions are first-class entries bound to each other
/// by `tool_use_id`; adapters translate these into whatever block
/// structure the provider expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
    },
    ToolCall {
        tool_use_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage::System { content: text.into() }
    }
    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::User { content: text.into() }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        ChatMessage::Assistant { content: text.into() }
    }
    pub fn tool_call(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        ChatMessage::ToolCall {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }

    /// Role as stored in the `messages.role` column.
    pub fn role(&self) -> &'static str {
        match self {
            ChatMessage::System { .. } => "system",
            ChatMessage::User { .. } => "user",
            ChatMessage::Assistant { .. } => "assistant",
            ChatMessage::ToolCall { .. } => "tool_call",
            ChatMessage::ToolResult { .. } => "tool_result",
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tagged_serde() {
        let msg = ChatMessage::tool_call("toolu_1", "research.web_search", serde_json::json!({"query": "X"}));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool_call");
        assert_eq!(json["tool_use_id"], "toolu_1");
        let back: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.role(), "tool_call");
    }

    #[test]
    fn stop_reason_snake_case() {
        assert_eq!(
            serde_json::to_string(&StopReason::EndTurn).unwrap(),
            r#""end_turn""#
        );
        assert_eq!(
            serde_json::to_string(&StopReason::MaxTokens).unwrap(),
            r#""max_tokens""#
        );
    }
}
