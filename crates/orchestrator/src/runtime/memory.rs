//! Memory service — conversation summarization and semantic recall.

use pgvector::Vector;
use uuid::Uuid;

use ma_domain::chat::ChatMessage;
use ma_domain::error::Result;
use ma_llm::ChatRequest;
use ma_store::models::{ConversationRow, MemorySummaryRow, MessageRow};

use crate::state::AppState;

const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You are a conversation summarizer. Create a concise summary of the \
     following conversation that captures the key topics, decisions, and any \
     important information. The summary should be useful for providing \
     context in future conversations.";

const SUMMARY_MAX_TOKENS: u32 = 500;
const SUMMARY_TEMPERATURE: f32 = 0.3;
const TRANSCRIPT_CHAR_CAP: usize = 6000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render the user/assistant exchange as a labeled transcript. Tool
/// traffic is omitted — the summary is about what was said and decided.
pub fn render_transcript(rows: &[MessageRow]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for row in rows {
        match row.role.as_str() {
            "user" => parts.push(format!("User: {}", row.content)),
            "assistant" => parts.push(format!("Assistant: {}", row.content)),
            _ => {}
        }
    }
    parts.join("\n")
}

/// Cap the transcript length before it goes to the summarizer.
pub fn cap_transcript(mut transcript: String) -> String {
    if transcript.len() > TRANSCRIPT_CHAR_CAP {
        // Cut on a char boundary at or below the cap.
        let mut cut = TRANSCRIPT_CHAR_CAP;
        while !transcript.is_char_boundary(cut) {
            cut -= 1;
        }
        transcript.truncate(cut);
        transcript.push_str("\n... [truncated]");
    }
    transcript
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarization tick
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One summarizer pass: close out conversations idle past the timeout.
/// Returns the number summarized. Per-conversation failures are logged
/// and do not stop the batch.
pub async fn summarize_stale(state: &AppState) -> usize {
    let cutoff =
        chrono::Utc::now() - chrono::Duration::minutes(state.config.summarize_after_minutes);
    let stale = match state
        .conversations
        .stale_unsummarized(cutoff, state.config.summarize_batch_size)
        .await
    {
        Ok(convs) => convs,
        Err(e) => {
            tracing::warn!(error = %e, "stale conversation query failed");
            return 0;
        }
    };

    let mut count = 0;
    for conv in stale {
        match summarize_conversation(state, &conv).await {
            Ok(()) => count += 1,
            Err(e) => {
                tracing::error!(conversation_id = %conv.id, error = %e, "summarization failed");
            }
        }
    }
    count
}

/// Summarize one conversation and freeze it.
async fn summarize_conversation(state: &AppState, conv: &ConversationRow) -> Result<()> {
    let rows = state.conversations.messages(conv.id).await?;
    let transcript = render_transcript(&rows);

    // Empty conversations are frozen without a summary row.
    if transcript.is_empty() {
        state.conversations.mark_summarized(conv.id).await?;
        return Ok(());
    }

    let transcript = cap_transcript(transcript);
    let req = ChatRequest {
        messages: vec![
            ChatMessage::system(SUMMARIZER_SYSTEM_PROMPT),
            ChatMessage::user(format!("Summarize this conversation:\n\n{transcript}")),
        ],
        tools: Vec::new(),
        model: state.config.default_model.clone(),
        max_tokens: SUMMARY_MAX_TOKENS,
        temperature: SUMMARY_TEMPERATURE,
    };
    let resp = state.llm.chat(&req).await?;
    let summary = resp
        .content
        .unwrap_or_else(|| "No summary generated.".into());

    let cost = state
        .llm
        .estimate_cost(&resp.model, resp.input_tokens, resp.output_tokens);
    state
        .token_logs
        .append(
            conv.user_id,
            Some(conv.id),
            &resp.model,
            resp.input_tokens as i32,
            resp.output_tokens as i32,
            cost,
        )
        .await?;

    // Embedding is best-effort; the summary stays recallable by recency.
    let embedding = match state.llm.embed(&summary).await {
        Ok(vec) => Some(Vector::from(vec)),
        Err(e) => {
            tracing::warn!(conversation_id = %conv.id, error = %e, "summary embedding failed");
            None
        }
    };

    state
        .memory
        .insert(conv.user_id, Some(conv.id), &summary, embedding)
        .await?;
    state.conversations.mark_summarized(conv.id).await?;

    tracing::info!(
        conversation_id = %conv.id,
        summary_chars = summary.len(),
        "conversation summarized"
    );
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Up to `limit` summaries relevant to the query, ordered by ascending
/// cosine distance. Falls back to the most recent summaries when the
/// query cannot be embedded.
pub async fn recall(
    state: &AppState,
    user_id: Uuid,
    query: &str,
    limit: i64,
) -> Vec<MemorySummaryRow> {
    let result = match state.llm.embed(query).await {
        Ok(embedding) => state.memory.nearest(user_id, Vector::from(embedding), limit).await,
        Err(e) => {
            tracing::warn!(error = %e, "recall embedding failed, falling back to recency");
            state.memory.recent(user_id, limit).await
        }
    };
    match result {
        Ok(summaries) => summaries,
        Err(e) => {
            tracing::warn!(error = %e, "memory recall query failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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

    #[test]
    fn transcript_labels_speakers_and_skips_tool_traffic() {
        let rows = vec![
            row("user", "what's my budget?"),
            row("tool_call", "{}"),
            row("tool_result", "{}"),
            row("assistant", "about $40"),
        ];
        assert_eq!(
            render_transcript(&rows),
            "User: what's my budget?\nAssistant: about $40"
        );
    }

    #[test]
    fn empty_transcript_for_tool_only_conversation() {
        assert!(render_transcript(&[row("tool_call", "{}")]).is_empty());
    }

    #[test]
    fn cap_leaves_short_transcripts_alone() {
        assert_eq!(cap_transcript("short".into()), "short");
    }

    #[test]
    fn cap_truncates_with_marker() {
        let long = "x".repeat(TRANSCRIPT_CHAR_CAP + 500);
        let capped = cap_transcript(long);
        assert!(capped.ends_with("\n... [truncated]"));
        assert!(capped.len() < TRANSCRIPT_CHAR_CAP + 50);
    }

    #[test]
    fn cap_respects_char_boundaries() {
        let long = "é".repeat(TRANSCRIPT_CHAR_CAP);
        let capped = cap_transcript(long);
        assert!(capped.ends_with("[truncated]"));
    }
}
