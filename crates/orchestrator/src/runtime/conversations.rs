//! Conversation service — locate-or-create, message payloads, and the
//! token-budgeted context window.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ma_domain::chat::ChatMessage;
use ma_domain::error::Result;
use ma_domain::tokens::estimate_message_tokens;
use ma_store::models::{ConversationRow, MessageRow};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stored message payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Content of a `tool_call` message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub tool_use_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Content of a `tool_result` message row — success result or captured
/// error, so every `tool_call` has exactly one matching row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub tool_use_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResultPayload {
    /// The text handed back to the model for this result.
    pub fn render(&self) -> String {
        if self.success {
            self.result
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".into())
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Locate-or-create
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Select the active unsummarized conversation for the routing tuple
/// within the inactivity window, or create a fresh one.
pub async fn locate_or_create(
    state: &AppState,
    user_id: Uuid,
    persona_id: Option<Uuid>,
    platform: &str,
    platform_channel_id: &str,
    platform_thread_id: Option<&str>,
) -> Result<ConversationRow> {
    let now = Utc::now();
    if let Some(existing) = state
        .conversations
        .find_active(
            user_id,
            platform,
            platform_channel_id,
            platform_thread_id,
            state.config.conversation_inactivity_minutes,
            now,
        )
        .await?
    {
        state.conversations.touch(existing.id, now).await?;
        return Ok(existing);
    }
    state
        .conversations
        .insert(user_id, persona_id, platform, platform_channel_id, platform_thread_id)
        .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row → chat conversion and windowing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a stored row into a canonical chat message.
///
/// System rows are skipped (the system prompt is rebuilt every turn);
/// undecodable tool payloads are skipped with a warning rather than
/// failing the whole turn.
pub fn row_to_chat(row: &MessageRow) -> Option<ChatMessage> {
    match row.role.as_str() {
        "user" => Some(ChatMessage::user(&row.content)),
        "assistant" => Some(ChatMessage::assistant(&row.content)),
        "tool_call" => match serde_json::from_str::<ToolCallPayload>(&row.content) {
            Ok(p) => Some(ChatMessage::tool_call(p.tool_use_id, p.tool_name, p.arguments)),
            Err(e) => {
                tracing::warn!(message_id = %row.id, error = %e, "skipping undecodable tool_call row");
                None
            }
        },
        "tool_result" => match serde_json::from_str::<ToolResultPayload>(&row.content) {
            Ok(p) => {
                let rendered = p.render();
                Some(ChatMessage::tool_result(p.tool_use_id, rendered))
            }
            Err(e) => {
                tracing::warn!(message_id = %row.id, error = %e, "skipping undecodable tool_result row");
                None
            }
        },
        _ => None,
    }
}

/// The tail of the conversation that fits the token budget.
///
/// Order is preserved, the most recent message is always included, and
/// the window never opens on a `tool_result` whose `tool_call` fell
/// outside — the pair is dropped together instead of split.
pub fn window(rows: &[MessageRow], token_budget: usize) -> Vec<ChatMessage> {
    let msgs: Vec<ChatMessage> = rows.iter().filter_map(row_to_chat).collect();

    let mut cut = msgs.len();
    let mut total = 0usize;
    while cut > 0 {
        let cost = estimate_message_tokens(&msgs[cut - 1]);
        if total + cost > token_budget && cut < msgs.len() {
            break;
        }
        total += cost;
        cut -= 1;
    }

    // Do not split a tool_call/tool_result pair at the boundary.
    while cut < msgs.len() && matches!(msgs[cut], ChatMessage::ToolResult { .. }) {
        cut += 1;
    }

    msgs[cut..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(role: &str, content: &str) -> MessageRow {
        MessageRow {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role: role.into(),
            content: content.into(),
            token_count: None,
            model_used: None,
            created_at: Utc::now(),
        }
    }

    fn tool_call_row(id: &str) -> MessageRow {
        row(
            "tool_call",
            &serde_json::to_string(&ToolCallPayload {
                tool_use_id: id.into(),
                tool_name: "research.web_search".into(),
                arguments: serde_json::json!({"query": "x"}),
            })
            .unwrap(),
        )
    }

    fn tool_result_row(id: &str) -> MessageRow {
        row(
            "tool_result",
            &serde_json::to_string(&ToolResultPayload {
                tool_use_id: id.into(),
                tool_name: "research.web_search".into(),
                success: true,
                result: Some(serde_json::json!(["hit"])),
                error: None,
            })
            .unwrap(),
        )
    }

    #[test]
    fn window_preserves_order_and_budget() {
        let rows = vec![
            row("user", &"a".repeat(400)),
            row("assistant", &"b".repeat(400)),
            row("user", &"c".repeat(400)),
        ];
        // Budget fits roughly two of the ~104-token messages.
        let w = window(&rows, 220);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].role(), "assistant");
        assert_eq!(w[1].role(), "user");
    }

    #[test]
    fn window_always_includes_latest_message() {
        let rows = vec![row("user", &"x".repeat(10_000))];
        let w = window(&rows, 10);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn window_never_splits_tool_pairs() {
        let filler = row("user", &"q".repeat(400));
        let rows = vec![
            filler.clone(),
            tool_call_row("t1"),
            tool_result_row("t1"),
            row("assistant", &"done ".repeat(40)),
        ];
        // Pick a budget that would cut between the call and its result.
        for budget in [60, 80, 100, 120] {
            let w = window(&rows, budget);
            let call_ids: Vec<&str> = w
                .iter()
                .filter_map(|m| match m {
                    ChatMessage::ToolCall { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect();
            let result_ids: Vec<&str> = w
                .iter()
                .filter_map(|m| match m {
                    ChatMessage::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect();
            for rid in &result_ids {
                assert!(call_ids.contains(rid), "budget {budget}: orphan result {rid}");
            }
        }
    }

    #[test]
    fn system_rows_are_skipped() {
        let rows = vec![row("system", "old prompt"), row("user", "hi")];
        let w = window(&rows, 1000);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].role(), "user");
    }

    #[test]
    fn failed_result_renders_as_error_text() {
        let p = ToolResultPayload {
            tool_use_id: "t".into(),
            tool_name: "m.t".into(),
            success: false,
            result: None,
            error: Some("boom".into()),
        };
        assert_eq!(p.render(), "Error: boom");
    }
}
