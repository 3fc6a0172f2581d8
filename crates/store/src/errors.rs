//! Centralized error capture — append-only rows with sanitized arguments.
//!
//! Capture is fire-and-forget: [`ErrorRepo::capture_async`] spawns the
//! insert and swallows its own failures so error reporting can never
//! fault the caller.

use regex::Regex;
use sqlx::PgPool;
use std::sync::OnceLock;
use uuid::Uuid;

use ma_domain::error::Result;

use crate::from_sqlx;

/// Argument keys whose values are redacted before persisting.
fn secret_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(token|key|secret|password|credential|auth|api_key|access_key)")
            .expect("secret key pattern is valid")
    })
}

/// Replace secret-looking values in a JSON object with a marker.
/// Non-object payloads pass through unchanged.
pub fn sanitize_arguments(args: &serde_json::Value) -> serde_json::Value {
    match args.as_object() {
        Some(map) => {
            let sanitized = map
                .iter()
                .map(|(k, v)| {
                    if secret_key_pattern().is_match(k) {
                        (k.clone(), serde_json::Value::String("[REDACTED]".into()))
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect();
            serde_json::Value::Object(sanitized)
        }
        None => args.clone(),
    }
}

/// Everything a capture site can attach to an error row.
#[derive(Debug, Clone, Default)]
pub struct ErrorCapture {
    pub service: String,
    pub error_type: String,
    pub error_message: String,
    pub tool_name: Option<String>,
    pub tool_arguments: Option<serde_json::Value>,
    pub stack_trace: Option<String>,
    pub user_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct ErrorRepo {
    pool: PgPool,
}

impl ErrorRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn capture(&self, entry: ErrorCapture) -> Result<()> {
        let sanitized = entry.tool_arguments.as_ref().map(sanitize_arguments);
        sqlx::query(
            "INSERT INTO error_logs \
             (id, service, error_type, error_message, tool_name, tool_arguments, \
              stack_trace, user_id, conversation_id, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'open')",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.service)
        .bind(&entry.error_type)
        .bind(&entry.error_message)
        .bind(&entry.tool_name)
        .bind(sanitized)
        .bind(&entry.stack_trace)
        .bind(entry.user_id)
        .bind(entry.conversation_id)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    /// Fire-and-forget capture. Never fails the caller.
    pub fn capture_async(&self, entry: ErrorCapture) {
        let repo = self.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.capture(entry).await {
                tracing::warn!(error = %e, "error capture failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_secret_keys() {
        let args = serde_json::json!({
            "query": "weather in Paris",
            "api_key": "sk-live-12345",
            "Password": "hunter2",
            "auth_header": "Bearer abc",
        });
        let clean = sanitize_arguments(&args);
        assert_eq!(clean["query"], "weather in Paris");
        assert_eq!(clean["api_key"], "[REDACTED]");
        assert_eq!(clean["Password"], "[REDACTED]");
        assert_eq!(clean["auth_header"], "[REDACTED]");
    }

    #[test]
    fn non_object_passes_through() {
        let args = serde_json::json!(["a", "b"]);
        assert_eq!(sanitize_arguments(&args), args);
    }
}
