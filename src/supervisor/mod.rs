//! Dynamic worker-pool supervision.
//!
//! The macro planner decides which assets deserve attention; the
//! supervisor makes the running worker set match that decision. Newly
//! allocated assets get a worker task, dropped assets get a cancel
//! signal and a grace period, and surviving assets pick up their new
//! budget from the shared allocation registry on their next cycle.

pub mod worker;

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::allocation::AllocationPlan;
use crate::analyst::local::LocalAnalyst;
use crate::analyst::AnalysisProvider;
use crate::config::AppConfig;
use crate::credit::SharedLedger;
use crate::market::{MarketDataSource, StrategyExecutor};
use crate::risk::RiskGate;
use crate::types::NewsDigest;

/// Shared dependencies handed to every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub cfg: Arc<AppConfig>,
    pub market: Arc<dyn MarketDataSource>,
    pub news: Arc<RwLock<NewsDigest>>,
    pub executor: Arc<dyn StrategyExecutor>,
    pub provider: Arc<dyn AnalysisProvider>,
    pub local: Arc<LocalAnalyst>,
    pub ledger: SharedLedger,
    pub risk: Arc<Mutex<RiskGate>>,
    /// Asset -> budget. Whole-map swapped by the supervisor; workers
    /// re-read their entry each cycle.
    pub allocations: Arc<RwLock<HashMap<String, Decimal>>>,
}

struct WorkerHandle {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// What one reconciliation changed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub rebudgeted: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.rebudgeted.is_empty()
    }
}

/// Owns the worker tasks and keeps them aligned with the latest plan.
pub struct WorkerSupervisor {
    ctx: WorkerContext,
    workers: HashMap<String, WorkerHandle>,
}

impl WorkerSupervisor {
    pub fn new(ctx: WorkerContext) -> Self {
        WorkerSupervisor {
            ctx,
            workers: HashMap::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn active_assets(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    /// Make the running worker set match the plan. Idempotent: a plan
    /// identical to the current state starts and stops nothing.
    pub async fn reconcile(&mut self, plan: &AllocationPlan) -> ReconcileReport {
        let new_map: HashMap<String, Decimal> = plan
            .entries
            .iter()
            .map(|e| (e.asset_id.clone(), e.budget))
            .collect();

        let mut report = ReconcileReport::default();

        // Swap the registry first so surviving workers see their new
        // budget on the very next cycle.
        {
            let mut allocations = self.ctx.allocations.write().await;
            for (asset, budget) in &new_map {
                if self.workers.contains_key(asset)
                    && allocations.get(asset).is_some_and(|old| old != budget)
                {
                    report.rebudgeted.push(asset.clone());
                }
            }
            *allocations = new_map.clone();
        }

        let to_stop: Vec<String> = self
            .workers
            .keys()
            .filter(|id| !new_map.contains_key(*id))
            .cloned()
            .collect();
        for asset in to_stop {
            self.stop_worker(&asset).await;
            report.stopped.push(asset);
        }

        for asset in new_map.keys() {
            if !self.workers.contains_key(asset) {
                self.spawn_worker(asset.clone());
                report.started.push(asset.clone());
            }
        }

        if !report.is_noop() {
            info!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                rebudgeted = report.rebudgeted.len(),
                active = self.workers.len(),
                "worker set reconciled"
            );
        }
        report
    }

    /// Stop every worker (engine shutdown).
    pub async fn shutdown(&mut self) {
        let assets: Vec<String> = self.workers.keys().cloned().collect();
        info!(workers = assets.len(), "supervisor shutting down");
        for asset in assets {
            self.stop_worker(&asset).await;
        }
    }

    fn spawn_worker(&mut self, asset_id: String) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(worker::run(asset_id.clone(), self.ctx.clone(), cancel_rx));
        self.workers.insert(
            asset_id,
            WorkerHandle {
                cancel: cancel_tx,
                handle,
            },
        );
    }

    /// Cancel one worker and wait out the grace period. A worker that
    /// does not finish in time is aborted; its exposure may then be
    /// unmanaged until the executor reaps it.
    async fn stop_worker(&mut self, asset_id: &str) {
        let Some(mut w) = self.workers.remove(asset_id) else {
            return;
        };
        let _ = w.cancel.send(true);

        let grace = Duration::from_secs(self.ctx.cfg.engine.grace_period_secs);
        match tokio::time::timeout(grace, &mut w.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(asset = %asset_id, error = %e, "worker task panicked"),
            Err(_) => {
                warn!(
                    asset = %asset_id,
                    grace_secs = grace.as_secs(),
                    "worker missed grace period, aborting; exposure may be unmanaged"
                );
                w.handle.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationEntry;
    use crate::config::AppConfig;
    use crate::credit::CreditLedger;
    use crate::risk::RiskGate;
    use crate::types::{
        Candle, MarketSnapshot, PositionSnapshot, StrategyDirective, TechnicalSummary,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    struct MockMarket;

    #[async_trait]
    impl MarketDataSource for MockMarket {
        async fn snapshot(&self, asset_id: &str, bars: usize) -> Result<MarketSnapshot> {
            Ok(MarketSnapshot {
                asset_id: asset_id.to_string(),
                price: 100.0,
                candles: (0..bars)
                    .map(|_| Candle {
                        open: 100.0,
                        high: 100.0,
                        low: 100.0,
                        close: 100.0,
                        volume: 10.0,
                    })
                    .collect(),
                technical: TechnicalSummary::default(),
                fetched_at: Utc::now(),
            })
        }
    }

    #[derive(Default)]
    struct MockExecutor {
        applied: StdMutex<Vec<StrategyDirective>>,
        released: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl StrategyExecutor for MockExecutor {
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

    struct OfflineProvider;

    #[async_trait]
    impl AnalysisProvider for OfflineProvider {
        async fn analyze(
            &self,
            _request: &crate::analyst::AnalysisRequest,
        ) -> Result<crate::types::AnalysisResult> {
            anyhow::bail!("offline")
        }

        fn is_available(&self) -> bool {
            false
        }

        fn reset(&self) {}

        fn name(&self) -> &str {
            "offline"
        }
    }

    fn test_context(executor: Arc<MockExecutor>) -> WorkerContext {
        let mut cfg = AppConfig::default();
        cfg.engine.micro_cadence_secs = 1;
        cfg.engine.grace_period_secs = 2;
        let cfg = Arc::new(cfg);
        WorkerContext {
            cfg: cfg.clone(),
            market: Arc::new(MockMarket),
            news: Arc::new(RwLock::new(NewsDigest::default())),
            executor,
            provider: Arc::new(OfflineProvider),
            local: Arc::new(LocalAnalyst::new(cfg.volatility.clone())),
            ledger: SharedLedger::new(CreditLedger::new(cfg.credit.clone())),
            risk: Arc::new(Mutex::new(RiskGate::new(cfg.risk.clone(), dec!(1000000)))),
            allocations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn plan_for(assets: &[(&str, Decimal)]) -> AllocationPlan {
        AllocationPlan {
            entries: assets
                .iter()
                .map(|(id, budget)| AllocationEntry {
                    asset_id: id.to_string(),
                    budget: *budget,
                    weight_score: 1.0,
                    rationale: String::new(),
                })
                .collect(),
            total: assets.iter().map(|(_, b)| *b).sum(),
            sentiment: NewsDigest::default(),
            planned_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_starts_and_stops_workers() {
        let executor = Arc::new(MockExecutor::default());
        let mut sup = WorkerSupervisor::new(test_context(executor.clone()));

        let plan = plan_for(&[("KRW-BTC", dec!(300000)), ("KRW-ETH", dec!(300000))]);
        let report = sup.reconcile(&plan).await;
        assert_eq!(report.started.len(), 2);
        assert_eq!(sup.worker_count(), 2);

        // Same plan again: nothing changes.
        let report = sup.reconcile(&plan).await;
        assert!(report.is_noop());
        assert_eq!(sup.worker_count(), 2);

        // Drop ETH.
        let plan = plan_for(&[("KRW-BTC", dec!(600000))]);
        let report = sup.reconcile(&plan).await;
        assert_eq!(report.stopped, vec!["KRW-ETH".to_string()]);
        assert_eq!(report.rebudgeted, vec!["KRW-BTC".to_string()]);
        assert_eq!(sup.worker_count(), 1);

        // The retired worker released its exposure.
        assert!(executor
            .released
            .lock()
            .unwrap()
            .contains(&"KRW-ETH".to_string()));

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_rebudget_visible_to_running_worker() {
        let executor = Arc::new(MockExecutor::default());
        let ctx = test_context(executor.clone());
        let allocations = ctx.allocations.clone();
        let mut sup = WorkerSupervisor::new(ctx);

        sup.reconcile(&plan_for(&[("KRW-BTC", dec!(200000))])).await;
        sup.reconcile(&plan_for(&[("KRW-BTC", dec!(450000))])).await;

        let map = allocations.read().await;
        assert_eq!(map.get("KRW-BTC"), Some(&dec!(450000)));
        drop(map);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_all_workers() {
        let executor = Arc::new(MockExecutor::default());
        let mut sup = WorkerSupervisor::new(test_context(executor.clone()));

        sup.reconcile(&plan_for(&[
            ("KRW-BTC", dec!(200000)),
            ("KRW-ETH", dec!(200000)),
            ("KRW-XRP", dec!(200000)),
        ]))
        .await;
        assert_eq!(sup.worker_count(), 3);

        sup.shutdown().await;
        assert_eq!(sup.worker_count(), 0);

        let released = executor.released.lock().unwrap();
        assert_eq!(released.len(), 3);
    }

    #[tokio::test]
    async fn test_worker_emits_directives() {
        let executor = Arc::new(MockExecutor::default());
        let mut sup = WorkerSupervisor::new(test_context(executor.clone()));

        sup.reconcile(&plan_for(&[("KRW-BTC", dec!(600000))])).await;
        // First interval tick fires immediately; give the cycle a beat.
        tokio::time::sleep(Duration::from_millis(300)).await;
        sup.shutdown().await;

        let applied = executor.applied.lock().unwrap();
        assert!(!applied.is_empty(), "worker never produced a directive");
        let d = &applied[0];
        assert_eq!(d.asset_id, "KRW-BTC");
        assert_eq!(d.budget, dec!(600000));
        // Flat mock market: sideways regime, grid-style selection.
        assert_eq!(d.regime, crate::types::Regime::Sideways);
    }

    #[tokio::test]
    async fn test_halted_stand_down_leaves_risk_lock_free() {
        use std::sync::atomic::{AtomicBool, Ordering};

        // Executor that checks, mid-apply, that the risk gate is not
        // still locked by the calling worker.
        struct LockCheckExecutor {
            risk: Arc<Mutex<RiskGate>>,
            lock_free: Arc<AtomicBool>,
            applied: Arc<AtomicBool>,
        }

        #[async_trait]
        impl StrategyExecutor for LockCheckExecutor {
            async fn apply(&self, directive: &StrategyDirective) -> Result<()> {
                if self.risk.try_lock().is_ok() {
                    self.lock_free.store(true, Ordering::SeqCst);
                }
                assert!(!directive.opens_exposure());
                assert!(directive.reason.contains("daily loss"));
                self.applied.store(true, Ordering::SeqCst);
                Ok(())
            }

            async fn position(&self, _asset_id: &str) -> Result<Option<PositionSnapshot>> {
                Ok(None)
            }

            async fn release(&self, _asset_id: &str) -> Result<()> {
                Ok(())
            }
        }

        let mut cfg = AppConfig::default();
        cfg.engine.micro_cadence_secs = 1;
        cfg.engine.grace_period_secs = 2;
        let cfg = Arc::new(cfg);

        let mut gate = RiskGate::new(cfg.risk.clone(), dec!(1000000));
        gate.record_trade(crate::types::MarketClass::Spot, -0.06);
        let _ = gate.check(crate::types::MarketClass::Spot);
        assert!(gate.is_halted());
        let risk = Arc::new(Mutex::new(gate));

        let lock_free = Arc::new(AtomicBool::new(false));
        let applied = Arc::new(AtomicBool::new(false));
        let executor = Arc::new(LockCheckExecutor {
            risk: risk.clone(),
            lock_free: lock_free.clone(),
            applied: applied.clone(),
        });

        let ctx = WorkerContext {
            cfg: cfg.clone(),
            market: Arc::new(MockMarket),
            news: Arc::new(RwLock::new(NewsDigest::default())),
            executor,
            provider: Arc::new(OfflineProvider),
            local: Arc::new(LocalAnalyst::new(cfg.volatility.clone())),
            ledger: SharedLedger::new(CreditLedger::new(cfg.credit.clone())),
            risk,
            allocations: Arc::new(RwLock::new(HashMap::new())),
        };
        let mut sup = WorkerSupervisor::new(ctx);

        sup.reconcile(&plan_for(&[("KRW-BTC", dec!(600000))])).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        sup.shutdown().await;

        assert!(applied.load(Ordering::SeqCst), "stand-down never reached the executor");
        assert!(
            lock_free.load(Ordering::SeqCst),
            "risk gate still locked during executor apply"
        );
    }

    #[tokio::test]
    async fn test_empty_plan_stops_everything() {
        let executor = Arc::new(MockExecutor::default());
        let mut sup = WorkerSupervisor::new(test_context(executor.clone()));

        sup.reconcile(&plan_for(&[("KRW-BTC", dec!(600000))])).await;
        let report = sup.reconcile(&plan_for(&[])).await;
        assert_eq!(report.stopped.len(), 1);
        assert_eq!(sup.worker_count(), 0);
    }
}
