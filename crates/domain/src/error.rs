/// Shared error type used across all maestro crates.
///
/// The first group mirrors the error taxonomy surfaced to callers
/// (`AgentResponse.error` carries the short form via [`Error::kind`]);
/// the second group wraps infrastructure failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("tool execution: {0}")]
    ToolExecution(String),

    #[error("llm call: {0}")]
    LlmCall(String),

    #[error("agent loop: {0}")]
    AgentLoop(String),

    #[error("module unreachable: {0}")]
    ModuleUnreachable(String),

    #[error("invalid tool: {0}")]
    InvalidTool(String),

    #[error("monthly token budget exceeded: used {used} of {budget}")]
    BudgetExceeded { used: i64, budget: i64 },

    #[error("auth: {0}")]
    Auth(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal: {0}")]
    Internal(String),

    // ── Infrastructure ─────────────────────────────────────────────
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("database: {0}")]
    Database(String),

    #[error("cache: {0}")]
    Cache(String),

    #[error("config: {0}")]
    Config(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },
}

impl Error {
    /// Short machine-readable kind, the form carried in
    /// `AgentResponse.error` and `error_logs.error_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ToolExecution(_) => "tool_execution",
            Error::LlmCall(_) | Error::Provider { .. } => "llm_call",
            Error::AgentLoop(_) => "agent_loop",
            Error::ModuleUnreachable(_) => "module_unreachable",
            Error::InvalidTool(_) => "invalid_tool",
            Error::BudgetExceeded { .. } => "budget_exceeded",
            Error::Auth(_) => "auth",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            _ => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_taxonomy() {
        assert_eq!(Error::ToolExecution("x".into()).kind(), "tool_execution");
        assert_eq!(
            Error::BudgetExceeded { used: 1001, budget: 1000 }.kind(),
            "budget_exceeded"
        );
        assert_eq!(
            Error::Provider { provider: "anthropic".into(), message: "500".into() }.kind(),
            "llm_call"
        );
        assert_eq!(Error::Database("down".into()).kind(), "internal");
    }

    #[test]
    fn budget_exceeded_display() {
        let e = Error::BudgetExceeded { used: 1001, budget: 1000 };
        assert_eq!(
            e.to_string(),
            "monthly token budget exceeded: used 1001 of 1000"
        );
    }
}
