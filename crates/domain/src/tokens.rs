//! Token estimation for window trimming and budget checks.
//!
//! The estimate only needs to be stable and roughly proportional to real
//! tokenizer output; exact counts come back from the provider with every
//! response and land in the token log.

use crate::chat::ChatMessage;

/// Approximate tokens per character for English-ish text.
const CHARS_PER_TOKEN: usize = 4;

/// Fixed overhead per message for role markers and separators.
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count of a plain string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate the token cost of a single chat message.
pub fn estimate_message_tokens(msg: &ChatMessage) -> usize {
    let content_len = match msg {
        ChatMessage::System { content }
        | ChatMessage::User { content }
        | ChatMessage::Assistant { content }
        | ChatMessage::ToolResult { content, .. } => content.len(),
        ChatMessage::ToolCall { tool_name, arguments, .. } => {
            tool_name.len() + arguments.to_string().len()
        }
    };
    PER_MESSAGE_OVERHEAD + content_len.div_ceil(CHARS_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = ChatMessage::user("12345678");
        assert_eq!(estimate_message_tokens(&msg), PER_MESSAGE_OVERHEAD + 2);
    }

    #[test]
    fn tool_call_counts_arguments() {
        let small = ChatMessage::tool_call("t1", "m.t", serde_json::json!({}));
        let big = ChatMessage::tool_call(
            "t1",
            "m.t",
            serde_json::json!({"query": "a much longer argument payload"}),
        );
        assert!(estimate_message_tokens(&big) > estimate_message_tokens(&small));
    }
}
