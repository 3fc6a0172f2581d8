use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ma_domain::config::Config;
use ma_llm::LlmRouter;
use ma_orchestrator::api;
use ma_orchestrator::api::auth::token_hash;
use ma_orchestrator::runtime::memory;
use ma_orchestrator::state::AppState;
use ma_registry::ModuleRegistry;
use ma_store::conversations::ConversationRepo;
use ma_store::errors::ErrorRepo;
use ma_store::memory::MemoryRepo;
use ma_store::personas::PersonaRepo;
use ma_store::token_logs::TokenLogRepo;
use ma_store::users::UserRepo;

#[derive(Parser)]
#[command(name = "maestro", about = "Multi-channel assistant orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the orchestrator gateway (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::from_env().context("loading configuration")?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("maestro {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ma_orchestrator=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("maestro orchestrator starting");

    // ── Durable store ────────────────────────────────────────────────
    let pool = ma_store::connect(&config.database_url)
        .await
        .context("connecting to the database")?;
    tracing::info!("database ready");

    // ── Bus ──────────────────────────────────────────────────────────
    let bus = ma_bus::Bus::connect(&config.redis_url)
        .await
        .context("connecting to the bus")?;
    tracing::info!("bus ready");

    // ── LLM router ───────────────────────────────────────────────────
    let llm = Arc::new(LlmRouter::from_config(&config).context("initializing LLM router")?);

    // ── Module registry ──────────────────────────────────────────────
    let registry = ModuleRegistry::new(
        config.module_services.clone(),
        bus.clone(),
        config.service_auth_token.clone(),
    )
    .context("initializing module registry")?;
    registry.load_from_cache().await;
    registry.discover_all().await;
    tracing::info!(modules = config.module_services.len(), "module registry ready");

    // ── Auth token (read once, hash for constant-time comparison) ────
    let auth_token_hash = match &config.service_auth_token {
        Some(token) => {
            tracing::info!("inter-service bearer-token auth enabled");
            Some(token_hash(token))
        }
        None => {
            tracing::warn!(
                "inter-service auth DISABLED — set SERVICE_AUTH_TOKEN to enable"
            );
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        llm,
        registry: registry.clone(),
        bus,
        users: UserRepo::new(pool.clone()),
        personas: PersonaRepo::new(pool.clone()),
        conversations: ConversationRepo::new(pool.clone()),
        memory: MemoryRepo::new(pool.clone()),
        token_logs: TokenLogRepo::new(pool.clone()),
        errors: ErrorRepo::new(pool.clone()),
        auth_token_hash,
    };

    // ── Manifest refresh tick ────────────────────────────────────────
    {
        let registry = registry.clone();
        let every = config.manifest_refresh_seconds;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(every));
            interval.tick().await; // discovery already ran at startup
            loop {
                interval.tick().await;
                registry.discover_all().await;
            }
        });
    }
    tracing::info!(
        every_seconds = config.manifest_refresh_seconds,
        "manifest refresh tick started"
    );

    // ── Summarizer tick ──────────────────────────────────────────────
    {
        let state = state.clone();
        let every = config.summarizer_tick_seconds;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(every));
            loop {
                interval.tick().await;
                let summarized = memory::summarize_stale(&state).await;
                if summarized > 0 {
                    tracing::info!(summarized, "summarizer pass complete");
                }
            }
        });
    }
    tracing::info!(
        every_seconds = config.summarizer_tick_seconds,
        "summarizer tick started"
    );

    // ── Serve ────────────────────────────────────────────────────────
    let max_concurrent = std::env::var("MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    let app = api::router(state.clone())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "maestro listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}
