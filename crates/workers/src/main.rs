use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ma_domain::config::Config;
use ma_registry::ModuleRegistry;
use ma_store::jobs::JobRepo;
use ma_store::locations::LocationRepo;
use ma_store::users::UserRepo;
use ma_workers::delivery::DeliveryRouter;
use ma_workers::geofence::GeofenceWorker;
use ma_workers::scheduler::SchedulerWorker;

#[derive(Parser)]
#[command(name = "maestro-worker", about = "Scheduler, geofence, and delivery workers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run all workers (default).
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
            run_workers(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("maestro-worker {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ma_workers=debug")),
        )
        .json()
        .init();
}

async fn run_workers(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("maestro workers starting");

    let pool = ma_store::connect(&config.database_url)
        .await
        .context("connecting to the database")?;
    let bus = ma_bus::Bus::connect(&config.redis_url)
        .await
        .context("connecting to the bus")?;

    // The scheduler dispatches `poll_module` checks through the same
    // registry the orchestrator uses.
    let registry = ModuleRegistry::new(
        config.module_services.clone(),
        bus.clone(),
        config.service_auth_token.clone(),
    )
    .context("initializing module registry")?;
    registry.load_from_cache().await;
    registry.discover_all().await;

    let cancel = CancellationToken::new();

    // ── Scheduler worker ─────────────────────────────────────────────
    let scheduler = SchedulerWorker::new(
        JobRepo::new(pool.clone()),
        UserRepo::new(pool.clone()),
        registry.clone(),
        bus.clone(),
        config.clone(),
    )
    .context("initializing scheduler worker")?;
    {
        let cancel = cancel.clone();
        let every = config.scheduler_tick_seconds;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(every));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => scheduler.tick().await,
                }
            }
        });
    }
    tracing::info!(every_seconds = config.scheduler_tick_seconds, "scheduler worker started");

    // ── Geofence worker ──────────────────────────────────────────────
    let geofence = GeofenceWorker::new(LocationRepo::new(pool.clone()), bus.clone(), config.clone());
    {
        let cancel = cancel.clone();
        let every = config.geofence_tick_seconds;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(every));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => geofence.tick().await,
                }
            }
        });
    }
    tracing::info!(every_seconds = config.geofence_tick_seconds, "geofence worker started");

    // ── Delivery router ──────────────────────────────────────────────
    let delivery = DeliveryRouter::new(bus.clone(), config.clone())
        .context("initializing delivery router")?;
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            delivery.run(cancel).await;
        });
    }
    tracing::info!(
        adapters = config.adapter_push_urls.len(),
        "delivery router started"
    );

    // ── Shutdown ─────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    tracing::info!("shutdown signal received");
    cancel.cancel();
    // Give loops a moment to observe cancellation.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
