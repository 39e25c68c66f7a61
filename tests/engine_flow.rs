//! End-to-end decision flow against in-memory mocks.
//!
//! Exercises the full worker pipeline (market -> trigger -> credit ->
//! external analysis -> fusion -> strategy -> executor) and the
//! supervisor lifecycle, all without touching the network.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use vigil::allocation::{AllocationEntry, AllocationPlan};
use vigil::analyst::local::LocalAnalyst;
use vigil::analyst::{AnalysisProvider, AnalysisRequest};
use vigil::config::AppConfig;
use vigil::credit::{CreditAction, CreditLedger, SharedLedger};
use vigil::market::{MarketDataSource, StrategyExecutor};
use vigil::risk::RiskGate;
use vigil::supervisor::{WorkerContext, WorkerSupervisor};
use vigil::types::{
    AnalysisResult, Candle, DecisionPolicy, MarketSnapshot, NewsDigest, NewsSentiment,
    PositionSnapshot, Regime, SourceTag, StrategyDirective, TechnicalSummary,
    VolatilityBucket,
};

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

/// Market that can replay a scripted 5-minute collapse.
struct ScriptedMarket {
    crash: bool,
}

#[async_trait]
impl MarketDataSource for ScriptedMarket {
    async fn snapshot(&self, asset_id: &str, bars: usize) -> Result<MarketSnapshot> {
        let candles: Vec<Candle> = (0..bars)
            .map(|_| Candle {
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 50.0,
            })
            .collect();
        let price = if self.crash { 93.0 } else { 100.0 };
        Ok(MarketSnapshot {
            asset_id: asset_id.to_string(),
            price,
            candles,
            technical: TechnicalSummary::default(),
            fetched_at: Utc::now(),
        })
    }
}

#[derive(Default)]
struct RecordingExecutor {
    applied: StdMutex<Vec<StrategyDirective>>,
    released: StdMutex<Vec<String>>,
}

#[async_trait]
impl StrategyExecutor for RecordingExecutor {
    async fn apply(&self, directive: &StrategyDirective) -> Result<()> {
        self.applied.lock().unwrap().push(directive.clone());
        Ok(())
    }

    async fn position(&self, _asset_id: &str) -> Result<Option<PositionSnapshot>> {
        Ok(None)
    }

    async fn release(&self, asset_id: &str) -> Result<()> {
        self.released.lock().unwrap().push(asset_id.to_string());
        Ok(())
    }
}

/// Provider that always answers with a confident uptrend call.
#[derive(Default)]
struct BullishProvider {
    calls: AtomicU32,
}

#[async_trait]
impl AnalysisProvider for BullishProvider {
    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(AnalysisResult {
            regime: Regime::StrongUptrend,
            confidence: 0.9,
            volatility: VolatilityBucket::Low,
            policy: DecisionPolicy::Balanced,
            news_sentiment: NewsSentiment::Bullish,
            news_urgency: 5.0,
            emergency: false,
            reason: "mock uptrend".to_string(),
            source: SourceTag::External,
            timestamp: Utc::now(),
        })
    }

    fn is_available(&self) -> bool {
        true
    }

    fn reset(&self) {}

    fn name(&self) -> &str {
        "bullish-mock"
    }
}

fn test_context(
    market: Arc<dyn MarketDataSource>,
    executor: Arc<RecordingExecutor>,
    provider: Arc<dyn AnalysisProvider>,
) -> WorkerContext {
    let mut cfg = AppConfig::default();
    cfg.engine.micro_cadence_secs = 1;
    cfg.engine.grace_period_secs = 2;
    let cfg = Arc::new(cfg);
    WorkerContext {
        cfg: cfg.clone(),
        market,
        news: Arc::new(RwLock::new(NewsDigest::default())),
        executor,
        provider,
        local: Arc::new(LocalAnalyst::new(cfg.volatility.clone())),
        ledger: SharedLedger::new(CreditLedger::new(cfg.credit.clone())),
        risk: Arc::new(Mutex::new(RiskGate::new(cfg.risk.clone(), dec!(1000000)))),
        allocations: Arc::new(RwLock::new(HashMap::new())),
    }
}

fn single_asset_plan(asset: &str) -> AllocationPlan {
    AllocationPlan {
        entries: vec![AllocationEntry {
            asset_id: asset.to_string(),
            budget: dec!(600000),
            weight_score: 50.0,
            rationale: "test".to_string(),
        }],
        total: dec!(600000),
        sentiment: NewsDigest::default(),
        planned_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_quiet_market_never_spends_credit() {
    let executor = Arc::new(RecordingExecutor::default());
    let provider = Arc::new(BullishProvider::default());
    let ctx = test_context(
        Arc::new(ScriptedMarket { crash: false }),
        executor.clone(),
        provider.clone(),
    );
    let ledger = ctx.ledger.clone();
    let mut sup = WorkerSupervisor::new(ctx);

    sup.reconcile(&single_asset_plan("KRW-BTC")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    sup.shutdown().await;

    // Flat market: no trigger, no spend, no provider call.
    assert_eq!(ledger.remaining().await, 50);
    assert_eq!(provider.calls.load(Ordering::Relaxed), 0);

    // The worker still emitted a local-only directive.
    let applied = executor.applied.lock().unwrap();
    assert!(!applied.is_empty());
    assert_eq!(applied[0].regime, Regime::Sideways);
}

#[tokio::test]
async fn test_crash_buys_emergency_analysis_and_external_view_wins() {
    let executor = Arc::new(RecordingExecutor::default());
    let provider = Arc::new(BullishProvider::default());
    let ctx = test_context(
        Arc::new(ScriptedMarket { crash: true }),
        executor.clone(),
        provider.clone(),
    );
    let ledger = ctx.ledger.clone();
    let mut sup = WorkerSupervisor::new(ctx);

    sup.reconcile(&single_asset_plan("KRW-BTC")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    sup.shutdown().await;

    // A -7% five-minute move is an emergency: the worker pays the
    // emergency rate and consults the provider.
    let calls = provider.calls.load(Ordering::Relaxed);
    assert!(calls >= 1);
    assert_eq!(ledger.remaining().await, 50 - 3 * calls);

    // The confident external uptrend overrides the local sideways view.
    let applied = executor.applied.lock().unwrap();
    let last = applied.last().unwrap();
    assert_eq!(last.regime, Regime::StrongUptrend);
    assert!(last.opens_exposure());
}

#[tokio::test]
async fn test_concurrent_workers_never_overdraw_credit() {
    // Many crash-mode workers all want emergency analysis at once; the
    // shared ledger must keep total spend within the daily limit.
    let executor = Arc::new(RecordingExecutor::default());
    let provider = Arc::new(BullishProvider::default());
    let ctx = test_context(
        Arc::new(ScriptedMarket { crash: true }),
        executor.clone(),
        provider.clone(),
    );
    let ledger = ctx.ledger.clone();
    let mut sup = WorkerSupervisor::new(ctx);

    // 30 workers x 3 credits would be 90 > 50: some must be refused.
    let entries: Vec<AllocationEntry> = (0..30)
        .map(|i| AllocationEntry {
            asset_id: format!("KRW-A{i}"),
            budget: dec!(20000),
            weight_score: 1.0,
            rationale: String::new(),
        })
        .collect();
    let plan = AllocationPlan {
        entries,
        total: dec!(600000),
        sentiment: NewsDigest::default(),
        planned_at: Utc::now(),
    };

    sup.reconcile(&plan).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    sup.shutdown().await;

    let status = ledger.status().await;
    assert!(status.used <= status.daily_limit);
    // Emergency costs 3, so at most 48 of the 50 can be used.
    assert_eq!(status.used, 48);
}

/// Provider that flags emergency conditions on every call.
#[derive(Default)]
struct EmergencyProvider;

#[async_trait]
impl AnalysisProvider for EmergencyProvider {
    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResult> {
        Ok(AnalysisResult {
            regime: Regime::StrongUptrend,
            confidence: 0.9,
            volatility: VolatilityBucket::High,
            policy: DecisionPolicy::NewsPriority,
            news_sentiment: NewsSentiment::Emergency,
            news_urgency: 9.5,
            emergency: true,
            reason: "exchange hack headline".to_string(),
            source: SourceTag::External,
            timestamp: Utc::now(),
        })
    }

    fn is_available(&self) -> bool {
        true
    }

    fn reset(&self) {}

    fn name(&self) -> &str {
        "emergency-mock"
    }
}

#[tokio::test]
async fn test_emergency_judgment_stands_down() {
    let executor = Arc::new(RecordingExecutor::default());
    let ctx = test_context(
        Arc::new(ScriptedMarket { crash: true }),
        executor.clone(),
        Arc::new(EmergencyProvider),
    );
    let mut sup = WorkerSupervisor::new(ctx);

    sup.reconcile(&single_asset_plan("KRW-BTC")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    sup.shutdown().await;

    // Even a confident uptrend call opens nothing under an emergency.
    let applied = executor.applied.lock().unwrap();
    let last = applied.last().unwrap();
    assert!(!last.opens_exposure());
    assert!(last.reason.contains("emergency"));
}

#[tokio::test]
async fn test_retired_workers_release_exposure() {
    let executor = Arc::new(RecordingExecutor::default());
    let provider = Arc::new(BullishProvider::default());
    let ctx = test_context(
        Arc::new(ScriptedMarket { crash: false }),
        executor.clone(),
        provider,
    );
    let mut sup = WorkerSupervisor::new(ctx);

    sup.reconcile(&single_asset_plan("KRW-BTC")).await;
    assert_eq!(sup.worker_count(), 1);

    // Retire by reconciling to a different asset.
    let report = sup.reconcile(&single_asset_plan("KRW-ETH")).await;
    assert_eq!(report.stopped, vec!["KRW-BTC".to_string()]);
    assert!(executor
        .released
        .lock()
        .unwrap()
        .contains(&"KRW-BTC".to_string()));

    sup.shutdown().await;
}

#[tokio::test]
async fn test_shared_ledger_exactness_under_contention() {
    let ledger = SharedLedger::new(CreditLedger::new(
        AppConfig::default().credit.clone(),
    ));
    let mut handles = Vec::new();
    for i in 0..200 {
        let l = ledger.clone();
        handles.push(tokio::spawn(async move {
            l.try_spend(&format!("A{i}"), CreditAction::Standard).await
        }));
    }
    let mut succeeded = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 50);
    assert_eq!(ledger.remaining().await, 0);
}
