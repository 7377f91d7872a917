use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use aleph_arena::audit::AuditLog;
use aleph_arena::core::EventSink;
use aleph_arena::ipc::{self, Channels};
use aleph_arena::{ArenaConfig, ExecutionRouter, RiskEngine, RiskGuardian};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 1. Logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aleph_arena=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("🦀 AlephArena starting (risk-gated execution pipeline)...");

    // 2. Config: a bad file is fatal before any order flows
    let config = match ArenaConfig::load_default() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let audit = match &config.audit {
        Some(a) => Some(Arc::new(AuditLog::open(&a.path)?)),
        None => None,
    };

    // 3. Wiring: everything published lands on one outbound queue
    let (events_tx, events_rx) = flume::unbounded();
    let (guardian_tx, guardian_rx) = flume::unbounded();
    let (router_tx, router_rx) = flume::unbounded();
    let channels = Channels {
        guardian: guardian_tx,
        router: router_tx,
    };

    let guardian = RiskGuardian::new(
        RiskEngine::new(config.risk.clone()),
        config.arena.starting_cash,
        audit.clone(),
    );
    tokio::spawn(guardian.run(guardian_rx, events_tx.clone()));

    let sink: Arc<dyn EventSink> = Arc::new(events_tx);
    let router = Arc::new(ExecutionRouter::new(&config, sink, audit));
    tokio::spawn(router.run(router_rx));

    tokio::spawn(ipc::fan_out(events_rx, channels.clone(), true));

    tracing::info!(
        cash = %config.arena.starting_cash,
        max_daily_loss = %config.risk.max_daily_loss_pct,
        "⏳ Waiting for signals on {}",
        config.arena.socket_path
    );

    // 4. Ingress until the listener fails or ctrl-c
    tokio::select! {
        res = ipc::listen(config.arena.socket_path.clone(), channels) => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    Ok(())
}
