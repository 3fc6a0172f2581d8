//! Environment-driven configuration shared by the orchestrator and the
//! worker binaries.
//!
//! Everything has a default except the store and bus URLs; optional
//! secrets (provider keys, the service auth token) degrade gracefully
//! when absent.

use std::collections::HashMap;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct Config {
    // ── Infrastructure ────────────────────────────────────────────
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: u16,

    // ── Secrets ───────────────────────────────────────────────────
    /// Shared inter-service bearer token. `None` disables the check
    /// (development mode).
    pub service_auth_token: Option<String>,
    /// AES-256 key for the credential store, base64-encoded 32 bytes.
    pub credential_encryption_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,

    // ── Models ────────────────────────────────────────────────────
    pub default_model: String,
    pub embedding_model: String,

    // ── Topology ──────────────────────────────────────────────────
    /// Capability module name → base URL.
    pub module_services: HashMap<String, String>,
    /// Adapter platform → push endpoint the delivery router posts to.
    pub adapter_push_urls: HashMap<String, String>,
    /// Base URL of the orchestrator ingress (used by the scheduler
    /// worker for `resume_conversation`).
    pub orchestrator_url: String,

    // ── Conversations & memory ────────────────────────────────────
    pub conversation_inactivity_minutes: i64,
    pub window_token_budget: usize,
    pub summarize_after_minutes: i64,
    pub summarizer_tick_seconds: u64,
    pub summarize_batch_size: i64,
    pub recall_enabled: bool,
    pub recall_limit: i64,

    // ── Agent loop ────────────────────────────────────────────────
    pub max_agent_iterations: usize,
    pub default_permission_level: String,
    pub default_max_tokens: u32,

    // ── Workers ───────────────────────────────────────────────────
    pub scheduler_tick_seconds: u64,
    pub scheduler_batch_size: i64,
    pub geofence_tick_seconds: u64,
    pub location_stale_seconds: i64,
    pub manifest_refresh_seconds: u64,
}

impl Config {
    /// Load configuration from the environment. A `.env` file is honored
    /// for local development; real deployments inject the variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            redis_url: require("REDIS_URL")?,
            host: get_or("HOST", "0.0.0.0"),
            port: parse_or("PORT", 8000)?,

            service_auth_token: get_nonempty("SERVICE_AUTH_TOKEN"),
            credential_encryption_key: get_nonempty("CREDENTIAL_ENCRYPTION_KEY"),
            anthropic_api_key: get_nonempty("ANTHROPIC_API_KEY"),
            openai_api_key: get_nonempty("OPENAI_API_KEY"),

            default_model: get_or("DEFAULT_MODEL", "claude-sonnet-4-20250514"),
            embedding_model: get_or("EMBEDDING_MODEL", "text-embedding-3-small"),

            module_services: parse_json_map("MODULE_SERVICES")?,
            adapter_push_urls: parse_json_map("ADAPTER_PUSH_URLS")?,
            orchestrator_url: get_or("ORCHESTRATOR_URL", "http://localhost:8000"),

            conversation_inactivity_minutes: parse_or("CONVERSATION_INACTIVITY_MINUTES", 30)?,
            window_token_budget: parse_or("WINDOW_TOKEN_BUDGET", 3000)?,
            summarize_after_minutes: parse_or("SUMMARIZE_AFTER_MINUTES", 30)?,
            summarizer_tick_seconds: parse_or("SUMMARIZER_TICK_SECONDS", 60)?,
            summarize_batch_size: parse_or("SUMMARIZE_BATCH_SIZE", 10)?,
            recall_enabled: parse_or("RECALL_ENABLED", true)?,
            recall_limit: parse_or("RECALL_LIMIT", 3)?,

            max_agent_iterations: parse_or("MAX_AGENT_ITERATIONS", 10)?,
            default_permission_level: get_or("DEFAULT_PERMISSION_LEVEL", "user"),
            default_max_tokens: parse_or("DEFAULT_MAX_TOKENS", 4000)?,

            scheduler_tick_seconds: parse_or("SCHEDULER_TICK_SECONDS", 10)?,
            scheduler_batch_size: parse_or("SCHEDULER_BATCH_SIZE", 20)?,
            geofence_tick_seconds: parse_or("GEOFENCE_TICK_SECONDS", 30)?,
            location_stale_seconds: parse_or("LOCATION_STALE_SECONDS", 600)?,
            manifest_refresh_seconds: parse_or("MANIFEST_REFRESH_SECONDS", 300)?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn require(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::Config(format!("{key} must be set")))
}

fn get_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an env var, treating empty values as absent.
fn get_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("{key}: invalid value {raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a JSON object of string → string from an env var. Absent or
/// empty means an empty map.
fn parse_json_map(key: &str) -> Result<HashMap<String, String>> {
    match get_nonempty(key) {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{key}: expected a JSON object: {e}"))),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_uses_default_when_absent() {
        assert_eq!(parse_or::<u64>("MA_TEST_ABSENT_U64_91", 42).unwrap(), 42);
    }

    #[test]
    fn parse_or_rejects_garbage() {
        std::env::set_var("MA_TEST_GARBAGE_U64_92", "not-a-number");
        let err = parse_or::<u64>("MA_TEST_GARBAGE_U64_92", 0).unwrap_err();
        assert!(err.to_string().contains("MA_TEST_GARBAGE_U64_92"));
        std::env::remove_var("MA_TEST_GARBAGE_U64_92");
    }

    #[test]
    fn empty_secret_is_none() {
        std::env::set_var("MA_TEST_EMPTY_SECRET_93", "");
        assert!(get_nonempty("MA_TEST_EMPTY_SECRET_93").is_none());
        std::env::remove_var("MA_TEST_EMPTY_SECRET_93");
    }

    #[test]
    fn json_map_parses() {
        std::env::set_var(
            "MA_TEST_MODULES_94",
            r#"{"research": "http://research:8010", "location": "http://location:8020"}"#,
        );
        let map = parse_json_map("MA_TEST_MODULES_94").unwrap();
        assert_eq!(map.get("research").unwrap(), "http://research:8010");
        std::env::remove_var("MA_TEST_MODULES_94");
    }

    #[test]
    fn json_map_absent_is_empty() {
        assert!(parse_json_map("MA_TEST_NO_SUCH_MAP_95").unwrap().is_empty());
    }
}
