use std::sync::Arc;

use ma_bus::Bus;
use ma_domain::config::Config;
use ma_llm::LlmRouter;
use ma_registry::ModuleRegistry;
use ma_store::conversations::ConversationRepo;
use ma_store::errors::ErrorRepo;
use ma_store::memory::MemoryRepo;
use ma_store::personas::PersonaRepo;
use ma_store::token_logs::TokenLogRepo;
use ma_store::users::UserRepo;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, LLM router, module registry, bus
/// - **Repositories** — one per persisted entity family
/// - **Security** — the startup-computed auth token hash
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<LlmRouter>,
    pub registry: Arc<ModuleRegistry>,
    pub bus: Bus,

    // ── Repositories ──────────────────────────────────────────────
    pub users: UserRepo,
    pub personas: PersonaRepo,
    pub conversations: ConversationRepo,
    pub memory: MemoryRepo,
    pub token_logs: TokenLogRepo,
    pub errors: ErrorRepo,

    // ── Security (startup-computed) ───────────────────────────────
    /// SHA-256 hash of the inter-service bearer token.
    /// `None` = dev mode (no auth enforced, warned per request path).
    pub auth_token_hash: Option<Vec<u8>>,
}
