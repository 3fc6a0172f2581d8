//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API including tool use and the
//! Anthropic-specific message structure where system messages go in a
//! separate top-level `system` field. Tool names are sanitized into the
//! provider's allowed alphabet and restored from the per-request map
//! when the response comes back.

use serde_json::Value;

use ma_domain::chat::{ChatMessage, StopReason};
use ma_domain::error::{Error, Result};
use ma_domain::tool::{ToolCall, ToolDefinition, ToolParameter};

use crate::sanitize::ToolNameMap;
use crate::traits::{from_reqwest, ChatRequest, LlmProvider, LlmResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// LLM adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON Schema object for a tool's parameter list.
pub(crate) fn parameters_schema(params: &[ToolParameter]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required: Vec<Value> = Vec::new();
    for p in params {
        let mut prop = serde_json::Map::new();
        prop.insert("type".into(), Value::String(p.param_type.clone()));
        prop.insert("description".into(), Value::String(p.description.clone()));
        if let Some(values) = &p.r#enum {
            prop.insert(
                "enum".into(),
                Value::Array(values.iter().map(|v| Value::String(v.clone())).collect()),
            );
        }
        properties.insert(p.name.clone(), Value::Object(prop));
        if p.required {
            required.push(Value::String(p.name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn tool_to_wire(tool: &ToolDefinition, names: &mut ToolNameMap) -> Value {
    serde_json::json!({
        "name": names.sanitize(&tool.name),
        "description": tool.description,
        "input_schema": parameters_schema(&tool.parameters),
    })
}

/// Convert the canonical message sequence into Anthropic wire messages,
/// lifting system content into the returned prompt string.
///
/// Every message is emitted with array content so adjacent same-role
/// entries (parallel tool calls, their results) can be merged into the
/// single alternating-role sequence the API expects.
pub(crate) fn convert_messages(
    messages: &[ChatMessage],
    names: &mut ToolNameMap,
) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut wire: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        match msg {
            ChatMessage::System { content } => system_parts.push(content.clone()),
            ChatMessage::User { content } => wire.push((
                "user",
                vec![serde_json::json!({"type": "text", "text": content})],
            )),
            ChatMessage::Assistant { content } => wire.push((
                "assistant",
                vec![serde_json::json!({"type": "text", "text": content})],
            )),
            ChatMessage::ToolCall { tool_use_id, tool_name, arguments } => wire.push((
                "assistant",
                vec![serde_json::json!({
                    "type": "tool_use",
                    "id": tool_use_id,
                    "name": names.sanitize(tool_name),
                    "input": arguments,
                })],
            )),
            ChatMessage::ToolResult { tool_use_id, content } => wire.push((
                "user",
                vec![serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                })],
            )),
        }
    }

    // Merge adjacent same-role entries.
    let mut merged: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for (role, blocks) in wire {
        match merged.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => {
                last_blocks.extend(blocks);
            }
            _ => merged.push((role, blocks)),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    let api_messages = merged
        .into_iter()
        .map(|(role, content)| serde_json::json!({"role": role, "content": content}))
        .collect();
    (system, api_messages)
}

fn build_messages_body(req: &ChatRequest, names: &mut ToolNameMap) -> Value {
    let (system, api_messages) = convert_messages(&req.messages, names);

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "messages": api_messages,
    });
    if let Some(system) = system {
        body["system"] = Value::String(system);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req.tools.iter().map(|t| tool_to_wire(t, names)).collect();
        body["tools"] = Value::Array(tools);
    }
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn parse_response(body: &Value, names: &ToolNameMap) -> LlmResponse {
    let empty = Vec::new();
    let blocks = body
        .get("content")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t);
                }
            }
            "tool_use" => {
                let wire_name = block.get("name").and_then(|v| v.as_str()).unwrap_or("");
                tool_calls.push(ToolCall {
                    tool_name: names.restore(wire_name),
                    arguments: block
                        .get("input")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default())),
                    tool_use_id: block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                });
            }
            _ => {}
        }
    }

    let stop_reason = match body.get("stop_reason").and_then(|v| v.as_str()) {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    let usage = body.get("usage");
    let input_tokens = usage
        .and_then(|u| u.get("input_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let output_tokens = usage
        .and_then(|u| u.get("output_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    LlmResponse {
        content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.concat())
        },
        tool_calls,
        input_tokens,
        output_tokens,
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        stop_reason,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        let mut names = ToolNameMap::new();
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_messages_body(req, &mut names);

        tracing::debug!(provider = %self.id, model = %req.model, "anthropic chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        Ok(parse_response(&resp_json, &names))
    }

    async fn embed(&self, _text: &str, _model: &str) -> Result<Vec<f32>> {
        Err(Error::Provider {
            provider: self.id.clone(),
            message: "Anthropic does not provide an embeddings API; configure an \
                      OpenAI-compatible provider for embeddings"
                .into(),
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, id: &str) -> ChatMessage {
        ChatMessage::tool_call(id, name, serde_json::json!({"q": 1}))
    }

    #[test]
    fn system_is_lifted_out() {
        let mut names = ToolNameMap::new();
        let (system, wire) = convert_messages(
            &[ChatMessage::system("be brief"), ChatMessage::user("hi")],
            &mut names,
        );
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn parallel_tool_calls_merge_into_one_assistant_message() {
        let mut names = ToolNameMap::new();
        let (_, wire) = convert_messages(
            &[
                ChatMessage::user("do both"),
                call("research.web_search", "t1"),
                call("research.fetch_page", "t2"),
                ChatMessage::tool_result("t1", "ok"),
                ChatMessage::tool_result("t2", "ok"),
            ],
            &mut names,
        );
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn tool_names_are_sanitized_on_the_wire() {
        let mut names = ToolNameMap::new();
        let (_, wire) = convert_messages(&[call("research.web_search", "t1")], &mut names);
        assert_eq!(wire[0]["content"][0]["name"], "research_web_search");
    }

    #[test]
    fn parse_restores_canonical_names() {
        let mut names = ToolNameMap::new();
        names.sanitize("research.web_search");
        let body = serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 120, "output_tokens": 30},
            "content": [
                {"type": "text", "text": "Searching."},
                {"type": "tool_use", "id": "toolu_1", "name": "research_web_search",
                 "input": {"query": "X"}},
            ],
        });
        let resp = parse_response(&body, &names);
        assert_eq!(resp.content.as_deref(), Some("Searching."));
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "research.web_search");
        assert_eq!(resp.tool_calls[0].tool_use_id, "toolu_1");
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.input_tokens, 120);
    }

    #[test]
    fn parse_maps_max_tokens_stop() {
        let body = serde_json::json!({
            "model": "m", "stop_reason": "max_tokens", "content": [],
        });
        let resp = parse_response(&body, &ToolNameMap::new());
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
        assert!(resp.content.is_none());
    }

    #[test]
    fn schema_includes_enum_and_required() {
        let schema = parameters_schema(&[
            ToolParameter {
                name: "unit".into(),
                param_type: "string".into(),
                description: "Temperature unit".into(),
                required: true,
                r#enum: Some(vec!["c".into(), "f".into()]),
            },
            ToolParameter {
                name: "city".into(),
                param_type: "string".into(),
                description: "City".into(),
                required: false,
                r#enum: None,
            },
        ]);
        assert_eq!(schema["properties"]["unit"]["enum"][0], "c");
        assert_eq!(schema["required"].as_array().unwrap().len(), 1);
    }
}
