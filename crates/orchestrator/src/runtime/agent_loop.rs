//! The agent loop — one user turn through the iterative LLM ↔ tool cycle.

use uuid::Uuid;

use ma_domain::chat::ChatMessage;
use ma_domain::error::{Error, Result};
use ma_domain::message::{AgentResponse, IncomingMessage, ToolCallSummary, ToolCallsMetadata};
use ma_domain::tokens::estimate_tokens;
use ma_domain::tool::ToolCall;
use ma_llm::ChatRequest;
use ma_store::errors::ErrorCapture;
use ma_store::users::over_budget;

use crate::runtime::conversations::{
    self, ToolCallPayload, ToolResultPayload,
};
use crate::runtime::memory;
use crate::state::AppState;

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Fallback system prompt when no persona is configured for the scope.
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful personal assistant. You can use the available tools to \
     look things up, manage reminders, and schedule background checks. Be \
     concise and direct.";

/// Module prefixes whose tools persist rows that a worker later reads
/// for proactive delivery. Their calls get the conversation's routing
/// injected so notifications can find their way back.
pub const NOTIFICATION_MODULE_PREFIXES: &[&str] = &["scheduler.", "location."];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context injection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn is_notification_tool(tool_name: &str) -> bool {
    NOTIFICATION_MODULE_PREFIXES
        .iter()
        .any(|prefix| tool_name.starts_with(prefix))
}

/// Inject conversation context into a tool call's arguments.
///
/// Notification-capable modules get the routing triple; any tool whose
/// schema names `user_id` gets the internal user id.
pub fn inject_context(
    call: &mut ToolCall,
    incoming: &IncomingMessage,
    user_id: Uuid,
    takes_user_id: bool,
) {
    let needs_routing = is_notification_tool(&call.tool_name);
    if !needs_routing && !takes_user_id {
        return;
    }

    if !call.arguments.is_object() {
        call.arguments = serde_json::Value::Object(Default::default());
    }
    let args = call.arguments.as_object_mut().expect("coerced to object");

    if needs_routing {
        args.insert("platform".into(), serde_json::json!(incoming.platform));
        args.insert(
            "platform_channel_id".into(),
            serde_json::json!(incoming.platform_channel_id),
        );
        args.insert(
            "platform_thread_id".into(),
            serde_json::json!(incoming.platform_thread_id),
        );
    }
    if takes_user_id {
        args.insert("user_id".into(), serde_json::json!(user_id.to_string()));
    }
}

/// Fold attachment references into the message content as a metadata
/// block the model can read.
pub fn fold_attachments(incoming: &IncomingMessage) -> String {
    if incoming.attachments.is_empty() {
        return incoming.content.clone();
    }
    let mut content = incoming.content.clone();
    content.push_str("\n\n[attachments]");
    for att in &incoming.attachments {
        content.push_str(&format!("\n- {} ({})", att.filename, att.url));
    }
    content
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn. Never fails outward: every error becomes an
/// [`AgentResponse`] with a user-appropriate `content` and the error
/// kind in `error`, plus an async error-log capture.
pub async fn handle_message(state: &AppState, incoming: IncomingMessage) -> AgentResponse {
    match run_turn(state, &incoming).await {
        Ok(response) => response,
        Err(e) => {
            let kind = e.kind();
            tracing::warn!(error = %e, kind, platform = %incoming.platform, "agent turn failed");
            state.errors.capture_async(ErrorCapture {
                service: "orchestrator".into(),
                error_type: kind.into(),
                error_message: e.to_string(),
                ..Default::default()
            });
            AgentResponse::error(user_facing_content(&e), kind)
        }
    }
}

/// A short, user-appropriate message for a surfaced error.
fn user_facing_content(e: &Error) -> String {
    match e {
        Error::BudgetExceeded { .. } => {
            "I'm sorry — you've used up your monthly token budget. \
             It will reset at the start of your next cycle."
                .into()
        }
        Error::Validation(msg) => format!("I couldn't process that message: {msg}"),
        _ => "Something went wrong while handling your message. Please try again.".into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn(state: &AppState, incoming: &IncomingMessage) -> Result<AgentResponse> {
    if incoming.content.trim().is_empty() && incoming.attachments.is_empty() {
        return Err(Error::Validation("message content is empty".into()));
    }

    let now = chrono::Utc::now();

    // ── Resolve user, persona, conversation ───────────────────────
    let user = state
        .users
        .resolve_or_create(
            &incoming.platform,
            &incoming.platform_user_id,
            incoming.platform_username.as_deref(),
            &state.config.default_permission_level,
        )
        .await?;
    let user = state.users.maybe_reset_budget(user, now).await?;

    let persona = state
        .personas
        .resolve(&incoming.platform, incoming.platform_server_id.as_deref())
        .await?;
    let (persona_id, mut system_prompt, allowed_modules, model, max_tokens) = match &persona {
        Some(p) => (
            Some(p.id),
            p.system_prompt.clone(),
            p.allowed_modules(),
            p.default_model
                .clone()
                .unwrap_or_else(|| state.config.default_model.clone()),
            p.max_tokens_per_request as u32,
        ),
        None => (
            None,
            DEFAULT_SYSTEM_PROMPT.to_string(),
            state.config.module_services.keys().cloned().collect(),
            state.config.default_model.clone(),
            state.config.default_max_tokens,
        ),
    };

    let conversation = conversations::locate_or_create(
        state,
        user.id,
        persona_id,
        &incoming.platform,
        &incoming.platform_channel_id,
        incoming.platform_thread_id.as_deref(),
    )
    .await?;

    // ── Persist the user message ──────────────────────────────────
    let content = fold_attachments(incoming);
    state
        .conversations
        .append_message(
            conversation.id,
            "user",
            &content,
            Some(estimate_tokens(&content) as i32),
            None,
        )
        .await?;

    // ── Budget gate, before any LLM call ──────────────────────────
    if over_budget(user.token_budget_monthly, user.tokens_used_this_month) {
        return Err(Error::BudgetExceeded {
            used: user.tokens_used_this_month,
            budget: user.token_budget_monthly.unwrap_or(0),
        });
    }

    // ── Memory recall into the system prompt ──────────────────────
    if state.config.recall_enabled {
        let memories = memory::recall(
            state,
            user.id,
            &incoming.content,
            state.config.recall_limit,
        )
        .await;
        if !memories.is_empty() {
            system_prompt.push_str("\n\nRelevant memories from past conversations:");
            for m in &memories {
                system_prompt.push_str(&format!("\n- {}", m.summary));
            }
        }
    }

    // ── Tool view for this user + persona ─────────────────────────
    let tools = state
        .registry
        .tools_for(user.permission(), &allowed_modules);

    // ── Iterate ───────────────────────────────────────────────────
    let mut tool_sequence: Vec<ToolCallSummary> = Vec::new();
    let mut last_text: Option<String> = None;

    for iteration in 0..state.config.max_agent_iterations {
        let rows = state.conversations.messages(conversation.id).await?;
        let mut messages = vec![ChatMessage::system(&system_prompt)];
        messages.extend(conversations::window(&rows, state.config.window_token_budget));

        let req = ChatRequest {
            messages,
            tools: tools.clone(),
            model: model.clone(),
            max_tokens,
            temperature: DEFAULT_TEMPERATURE,
        };
        tracing::debug!(iteration, conversation_id = %conversation.id, "llm call");
        let resp = state.llm.chat(&req).await?;

        // One token log row per LLM call, plus the monthly counter.
        let cost = state
            .llm
            .estimate_cost(&resp.model, resp.input_tokens, resp.output_tokens);
        state
            .token_logs
            .append(
                user.id,
                Some(conversation.id),
                &resp.model,
                resp.input_tokens as i32,
                resp.output_tokens as i32,
                cost,
            )
            .await?;
        state
            .users
            .add_token_usage(user.id, (resp.input_tokens + resp.output_tokens) as i64)
            .await?;

        // ── Final answer ──────────────────────────────────────────
        if resp.tool_calls.is_empty() {
            let text = resp.content.unwrap_or_default();
            state
                .conversations
                .append_message(
                    conversation.id,
                    "assistant",
                    &text,
                    Some(resp.output_tokens as i32),
                    Some(&resp.model),
                )
                .await?;
            return Ok(AgentResponse {
                content: text,
                files: Vec::new(),
                error: None,
                tool_calls_metadata: ToolCallsMetadata::from_sequence(std::mem::take(
                    &mut tool_sequence,
                )),
            });
        }

        last_text = resp.content.clone();

        // ── Persist tool_call rows with context injected ──────────
        let mut prepared: Vec<ToolCall> = Vec::new();
        for mut call in resp.tool_calls {
            let takes_user_id = state
                .registry
                .tool_definition(&call.tool_name)
                .map(|t| t.takes_user_id())
                .unwrap_or(false);
            inject_context(&mut call, incoming, user.id, takes_user_id);

            let payload = ToolCallPayload {
                tool_use_id: call.tool_use_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            };
            state
                .conversations
                .append_message(
                    conversation.id,
                    "tool_call",
                    &serde_json::to_string(&payload)?,
                    None,
                    None,
                )
                .await?;
            prepared.push(call);
        }

        // ── Execute all calls concurrently (order-independent) ────
        let results = futures_util::future::join_all(
            prepared
                .iter()
                .map(|call| state.registry.execute(call, Some(user.id))),
        )
        .await;

        // ── Persist tool_result rows, including captured errors ───
        for (call, result) in prepared.iter().zip(results) {
            if !result.success {
                state.errors.capture_async(ErrorCapture {
                    service: "orchestrator".into(),
                    error_type: "tool_execution".into(),
                    error_message: result.error.clone().unwrap_or_default(),
                    tool_name: Some(call.tool_name.clone()),
                    tool_arguments: Some(call.arguments.clone()),
                    user_id: Some(user.id),
                    conversation_id: Some(conversation.id),
                    ..Default::default()
                });
            }

            tool_sequence.push(ToolCallSummary {
                name: call.tool_name.clone(),
                success: result.success,
                tool_use_id: call.tool_use_id.clone(),
            });

            let payload = ToolResultPayload {
                tool_use_id: call.tool_use_id.clone(),
                tool_name: call.tool_name.clone(),
                success: result.success,
                result: result.result,
                error: result.error,
            };
            state
                .conversations
                .append_message(
                    conversation.id,
                    "tool_result",
                    &serde_json::to_string(&payload)?,
                    None,
                    None,
                )
                .await?;
        }
    }

    // ── Iteration cap exceeded ────────────────────────────────────
    tracing::warn!(
        conversation_id = %conversation.id,
        cap = state.config.max_agent_iterations,
        "agent loop iteration cap exceeded"
    );
    state.errors.capture_async(ErrorCapture {
        service: "orchestrator".into(),
        error_type: "agent_loop".into(),
        error_message: format!(
            "iteration cap of {} exceeded",
            state.config.max_agent_iterations
        ),
        user_id: Some(user.id),
        conversation_id: Some(conversation.id),
        ..Default::default()
    });
    Ok(AgentResponse {
        content: last_text.unwrap_or_else(|| {
            "I wasn't able to finish working on that — the task needed more steps \
             than I'm allowed to take in one turn."
                .into()
        }),
        files: Vec::new(),
        error: Some("agent_loop".into()),
        tool_calls_metadata: ToolCallsMetadata::from_sequence(tool_sequence),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ma_domain::message::Attachment;

    fn incoming() -> IncomingMessage {
        IncomingMessage {
            platform: "discord".into(),
            platform_user_id: "u1".into(),
            platform_username: None,
            platform_channel_id: "12345".into(),
            platform_thread_id: None,
            platform_server_id: None,
            content: "remind me to buy milk at the supermarket".into(),
            attachments: Vec::new(),
        }
    }

    fn call(tool_name: &str) -> ToolCall {
        ToolCall {
            tool_name: tool_name.into(),
            arguments: serde_json::json!({"some_arg": "value"}),
            tool_use_id: "toolu_1".into(),
        }
    }

    #[test]
    fn notification_tools_receive_platform_context() {
        for name in [
            "location.create_reminder",
            "location.cancel_reminder",
            "scheduler.add_job",
            "scheduler.cancel_job",
        ] {
            let mut c = call(name);
            inject_context(&mut c, &incoming(), Uuid::new_v4(), false);
            assert_eq!(c.arguments["platform"], "discord", "{name}");
            assert_eq!(c.arguments["platform_channel_id"], "12345", "{name}");
            assert_eq!(c.arguments["platform_thread_id"], serde_json::Value::Null);
            // Original arguments survive injection.
            assert_eq!(c.arguments["some_arg"], "value");
        }
    }

    #[test]
    fn other_tools_are_left_alone() {
        for name in [
            "research.web_search",
            "file_manager.create_document",
            "knowledge.remember",
        ] {
            let mut c = call(name);
            inject_context(&mut c, &incoming(), Uuid::new_v4(), false);
            assert!(c.arguments.get("platform").is_none(), "{name}");
        }
    }

    #[test]
    fn user_id_injected_when_schema_names_it() {
        let user_id = Uuid::new_v4();
        let mut c = call("research.web_search");
        inject_context(&mut c, &incoming(), user_id, true);
        assert_eq!(c.arguments["user_id"], user_id.to_string());
        assert!(c.arguments.get("platform").is_none());
    }

    #[test]
    fn thread_id_carried_when_present() {
        let mut msg = incoming();
        msg.platform_thread_id = Some("t-99".into());
        let mut c = call("scheduler.add_job");
        inject_context(&mut c, &msg, Uuid::new_v4(), false);
        assert_eq!(c.arguments["platform_thread_id"], "t-99");
    }

    #[test]
    fn non_object_arguments_are_coerced_before_injection() {
        let mut c = ToolCall {
            tool_name: "location.create_reminder".into(),
            arguments: serde_json::json!("oops"),
            tool_use_id: "t".into(),
        };
        inject_context(&mut c, &incoming(), Uuid::new_v4(), false);
        assert_eq!(c.arguments["platform"], "discord");
    }

    #[test]
    fn attachments_fold_into_content() {
        let mut msg = incoming();
        msg.attachments.push(Attachment {
            file_id: None,
            filename: "receipt.pdf".into(),
            url: "https://files/receipt.pdf".into(),
            mime_type: None,
            size_bytes: None,
        });
        let folded = fold_attachments(&msg);
        assert!(folded.starts_with(&msg.content));
        assert!(folded.contains("[attachments]"));
        assert!(folded.contains("receipt.pdf (https://files/receipt.pdf)"));
    }

    #[test]
    fn no_attachments_means_unchanged_content() {
        let msg = incoming();
        assert_eq!(fold_attachments(&msg), msg.content);
    }
}
