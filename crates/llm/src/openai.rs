//! OpenAI-compatible adapter: chat completions + embeddings.
//!
//! Also the embeddings path for the whole system — the memory service
//! and recall go through [`LlmProvider::embed`] here.

use serde_json::Value;

use ma_domain::chat::{ChatMessage, StopReason};
use ma_domain::error::{Error, Result};
use ma_domain::tool::{ToolCall, ToolDefinition};

use crate::anthropic::parameters_schema;
use crate::sanitize::ToolNameMap;
use crate::traits::{from_reqwest, ChatRequest, LlmProvider, LlmResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// LLM adapter for OpenAI-compatible chat/embeddings endpoints.
pub struct OpenAiProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: "openai".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.post(url).bearer_auth(&self.api_key)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tool_to_wire(tool: &ToolDefinition, names: &mut ToolNameMap) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": names.sanitize(&tool.name),
            "description": tool.description,
            "parameters": parameters_schema(&tool.parameters),
        },
    })
}

/// Convert canonical messages to the chat-completions shape. Adjacent
/// tool calls collapse into one assistant message with a `tool_calls`
/// array; tool results become `role: "tool"` messages.
pub(crate) fn convert_messages(messages: &[ChatMessage], names: &mut ToolNameMap) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::new();

    for msg in messages {
        match msg {
            ChatMessage::System { content } => {
                wire.push(serde_json::json!({"role": "system", "content": content}));
            }
            ChatMessage::User { content } => {
                wire.push(serde_json::json!({"role": "user", "content": content}));
            }
            ChatMessage::Assistant { content } => {
                wire.push(serde_json::json!({"role": "assistant", "content": content}));
            }
            ChatMessage::ToolCall { tool_use_id, tool_name, arguments } => {
                let call = serde_json::json!({
                    "id": tool_use_id,
                    "type": "function",
                    "function": {
                        "name": names.sanitize(tool_name),
                        "arguments": arguments.to_string(),
                    },
                });
                match wire.last_mut() {
                    Some(last)
                        if last["role"] == "assistant" && last.get("tool_calls").is_some() =>
                    {
                        last["tool_calls"].as_array_mut().expect("array").push(call);
                    }
                    _ => wire.push(serde_json::json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": [call],
                    })),
                }
            }
            ChatMessage::ToolResult { tool_use_id, content } => {
                wire.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                }));
            }
        }
    }
    wire
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn parse_response(body: &Value, names: &ToolNameMap) -> LlmResponse {
    let message = &body["choices"][0]["message"];

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);

    let mut tool_calls: Vec<ToolCall> = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let wire_name = call["function"]["name"].as_str().unwrap_or("");
            let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
            let arguments = serde_json::from_str(raw_args)
                .unwrap_or(Value::Object(Default::default()));
            tool_calls.push(ToolCall {
                tool_name: names.restore(wire_name),
                arguments,
                tool_use_id: call["id"].as_str().unwrap_or("").to_string(),
            });
        }
    }

    let stop_reason = match body["choices"][0]["finish_reason"].as_str() {
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    LlmResponse {
        content,
        tool_calls,
        input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        model: body["model"].as_str().unwrap_or("unknown").to_string(),
        stop_reason,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        let mut names = ToolNameMap::new();
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": convert_messages(&req.messages, &mut names),
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(|t| tool_to_wire(t, &mut names)).collect();
            body["tools"] = Value::Array(tools);
        }

        tracing::debug!(provider = %self.id, model = %req.model, "openai chat request");

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

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({"model": model, "input": text});

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
        let embedding = resp_json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "embeddings response missing data[0].embedding".into(),
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        Ok(embedding)
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_calls_collapse_into_one_assistant_message() {
        let mut names = ToolNameMap::new();
        let wire = convert_messages(
            &[
                ChatMessage::user("go"),
                ChatMessage::tool_call("c1", "research.web_search", serde_json::json!({"q": "a"})),
                ChatMessage::tool_call("c2", "research.fetch_page", serde_json::json!({"u": "b"})),
                ChatMessage::tool_result("c1", "r1"),
            ],
            &mut names,
        );
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "c1");
    }

    #[test]
    fn arguments_are_stringified_on_the_wire() {
        let mut names = ToolNameMap::new();
        let wire = convert_messages(
            &[ChatMessage::tool_call("c1", "m.t", serde_json::json!({"k": 1}))],
            &mut names,
        );
        let args = wire[0]["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(args).unwrap(), serde_json::json!({"k": 1}));
    }

    #[test]
    fn parse_restores_names_and_parses_arguments() {
        let mut names = ToolNameMap::new();
        names.sanitize("location.create_reminder");
        let body = serde_json::json!({
            "model": "gpt-4o",
            "usage": {"prompt_tokens": 50, "completion_tokens": 12},
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "location_create_reminder",
                            "arguments": "{\"place\": \"supermarket\"}",
                        },
                    }],
                },
            }],
        });
        let resp = parse_response(&body, &names);
        assert_eq!(resp.tool_calls[0].tool_name, "location.create_reminder");
        assert_eq!(resp.tool_calls[0].arguments["place"], "supermarket");
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert!(resp.content.is_none());
    }

    #[test]
    fn parse_length_finish_is_max_tokens() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{"finish_reason": "length", "message": {"content": "partial"}}],
        });
        let resp = parse_response(&body, &ToolNameMap::new());
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
        assert_eq!(resp.content.as_deref(), Some("partial"));
    }

    #[test]
    fn malformed_tool_arguments_default_to_empty_object() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {"tool_calls": [{
                    "id": "c", "type": "function",
                    "function": {"name": "x", "arguments": "{not json"},
                }]},
            }],
        });
        let resp = parse_response(&body, &ToolNameMap::new());
        assert!(resp.tool_calls[0].arguments.as_object().unwrap().is_empty());
    }
}
