//! VIGIL — Cost-Aware Adaptive Trading Decision Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores credit and risk state from disk, and runs the macro
//! allocation loop alongside the sentiment refresh with graceful
//! shutdown.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use vigil::analyst::local::LocalAnalyst;
use vigil::analyst::remote::RemoteAnalyst;
use vigil::config::AppConfig;
use vigil::credit::{CreditLedger, SharedLedger};
use vigil::engine::Engine;
use vigil::market::paper::PaperExecutor;
use vigil::market::rest::RestGateway;
use vigil::risk::RiskGate;
use vigil::storage;
use vigil::storage::EngineState;
use vigil::supervisor::{WorkerContext, WorkerSupervisor};
use vigil::types::NewsDigest;

const BANNER: &str = r#"
__     _____ ____ ___ _
\ \   / /_ _/ ___|_ _| |
 \ \ / / | | |  _ | || |
  \ V /  | | |_| || || |___
   \_/  |___\____|___|_____|

  Volatility-Informed Gated Intelligence Layer
  v0.1.0 — Decision Engine
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = Arc::new(AppConfig::load("config.toml").unwrap_or_else(|e| {
        eprintln!("Config load failed ({e}), using defaults");
        AppConfig::default()
    }));

    init_logging();

    println!("{BANNER}");
    info!(
        micro_cadence_secs = cfg.engine.micro_cadence_secs,
        macro_cadence_secs = cfg.engine.macro_cadence_secs,
        daily_credits = cfg.credit.daily_limit,
        total_budget = %cfg.allocation.total_budget,
        "VIGIL starting up"
    );

    // -- Restore or create state -----------------------------------------

    let saved = storage::load_state(None)?;
    let (ledger, mut risk) = match saved {
        Some(state) => (
            CreditLedger::from_entry(cfg.credit.clone(), state.ledger),
            RiskGate::from_state(cfg.risk.clone(), state.risk),
        ),
        None => (
            CreditLedger::new(cfg.credit.clone()),
            RiskGate::new(cfg.risk.clone(), cfg.allocation.total_budget),
        ),
    };

    if risk.is_halted() {
        if std::env::var("VIGIL_RESUME_TRADING").is_ok() {
            risk.resume();
        } else {
            warn!(
                "trading is halted from a previous run; set VIGIL_RESUME_TRADING=1 to resume"
            );
        }
    }

    // -- Initialise components -------------------------------------------

    let gateway = Arc::new(RestGateway::new(&cfg.gateway)?);
    let executor = Arc::new(PaperExecutor::new());

    let api_key = std::env::var(&cfg.provider.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        warn!(
            env = %cfg.provider.api_key_env,
            "no provider API key configured; external analysis will fail and latch off"
        );
    }
    let provider = Arc::new(RemoteAnalyst::new(&cfg.provider, api_key)?);

    let ledger = SharedLedger::new(ledger);
    let risk = Arc::new(Mutex::new(risk));
    let news = Arc::new(RwLock::new(NewsDigest::default()));

    let ctx = WorkerContext {
        cfg: cfg.clone(),
        market: gateway.clone(),
        news: news.clone(),
        executor,
        provider,
        local: Arc::new(LocalAnalyst::new(cfg.volatility.clone())),
        ledger: ledger.clone(),
        risk: risk.clone(),
        allocations: Arc::new(RwLock::new(HashMap::new())),
    };
    let supervisor = WorkerSupervisor::new(ctx);
    let mut engine = Engine::new(cfg.clone(), gateway.clone(), gateway, news, supervisor);

    // -- Main loop -------------------------------------------------------

    let mut macro_interval =
        tokio::time::interval(Duration::from_secs(cfg.engine.macro_cadence_secs));
    let mut sentiment_interval =
        tokio::time::interval(Duration::from_secs(cfg.engine.sentiment_cadence_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        macro_secs = cfg.engine.macro_cadence_secs,
        sentiment_secs = cfg.engine.sentiment_cadence_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = macro_interval.tick() => {
                match engine.run_macro_cycle().await {
                    Ok(report) => {
                        if !report.is_noop() {
                            info!(
                                started = ?report.started,
                                stopped = ?report.stopped,
                                rebudgeted = ?report.rebudgeted,
                                "allocation changed"
                            );
                        }
                        if let Err(e) = persist(&ledger, &risk).await {
                            error!(error = %e, "Failed to save state");
                        }
                    }
                    Err(e) => error!(error = %e, "Macro cycle failed — continuing"),
                }
            }
            _ = sentiment_interval.tick() => {
                engine.refresh_sentiment().await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Drain workers, then persist final state.
    engine.shutdown().await;
    persist(&ledger, &risk).await?;
    info!(
        credits_remaining = ledger.remaining().await,
        "VIGIL shut down cleanly."
    );

    Ok(())
}

async fn persist(ledger: &SharedLedger, risk: &Arc<Mutex<RiskGate>>) -> Result<()> {
    let state = EngineState {
        ledger: ledger.entry().await,
        risk: risk.lock().await.state().clone(),
    };
    storage::save_state(&state, None)
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info"));

    let json_logging = std::env::var("VIGIL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}
