//! Macro-cadence orchestration.
//!
//! On each macro cycle the engine scans the candidate universe with a
//! bounded fan-out, feeds the metrics to the allocation planner, and
//! hands the resulting plan to the supervisor. Asset scan failures are
//! logged and skipped so one flaky symbol never blocks the plan.
//!
//! The market-sentiment digest is refreshed on its own cadence and
//! shared with all workers through a read-write lock.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::allocation::{AllocationPlanner, CandidateMetrics};
use crate::config::AppConfig;
use crate::market::{MarketDataSource, NewsSource};
use crate::supervisor::{ReconcileReport, WorkerSupervisor};
use crate::types::{MarketSnapshot, NewsDigest};

/// History bars for the macro scan; enough for the 1h momentum
/// lookback and the volume window.
const SCAN_BARS: usize = 100;
/// Volume window for the surge ratio.
const VOLUME_WINDOW: usize = 20;

pub struct Engine {
    cfg: Arc<AppConfig>,
    market: Arc<dyn MarketDataSource>,
    news_source: Arc<dyn NewsSource>,
    news: Arc<RwLock<NewsDigest>>,
    planner: AllocationPlanner,
    supervisor: WorkerSupervisor,
}

impl Engine {
    pub fn new(
        cfg: Arc<AppConfig>,
        market: Arc<dyn MarketDataSource>,
        news_source: Arc<dyn NewsSource>,
        news: Arc<RwLock<NewsDigest>>,
        supervisor: WorkerSupervisor,
    ) -> Self {
        let planner = AllocationPlanner::new(cfg.allocation.clone());
        Engine {
            cfg,
            market,
            news_source,
            news,
            planner,
            supervisor,
        }
    }

    /// Universe to scan: configured candidates plus core assets,
    /// de-duplicated with order preserved.
    fn universe(&self) -> Vec<String> {
        let mut assets = self.cfg.allocation.universe.clone();
        for core in &self.cfg.allocation.core_assets {
            if !assets.contains(core) {
                assets.push(core.clone());
            }
        }
        assets
    }

    fn metrics_from(snapshot: &MarketSnapshot) -> CandidateMetrics {
        CandidateMetrics {
            asset_id: snapshot.asset_id.clone(),
            volume_ratio: snapshot.volume_ratio(VOLUME_WINDOW).unwrap_or(1.0),
            technical_score: snapshot.technical.composite_score,
            momentum_short_pct: snapshot.price_change_pct(5).unwrap_or(0.0),
            momentum_long_pct: snapshot.price_change_pct(60).unwrap_or(0.0),
        }
    }

    /// Scan, plan, reconcile. One macro cycle.
    pub async fn run_macro_cycle(&mut self) -> Result<ReconcileReport> {
        let universe = self.universe();
        info!(assets = universe.len(), "macro cycle: scanning universe");

        let market = self.market.clone();
        let candidates: Vec<CandidateMetrics> = stream::iter(universe)
            .map(|asset_id| {
                let market = market.clone();
                async move {
                    match market.snapshot(&asset_id, SCAN_BARS).await {
                        Ok(snap) => Some(Self::metrics_from(&snap)),
                        Err(e) => {
                            warn!(asset = %asset_id, error = %e, "scan failed, skipping");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.cfg.engine.scan_concurrency)
            .filter_map(|m| async move { m })
            .collect()
            .await;

        let sentiment = *self.news.read().await;
        let plan = self.planner.plan(&candidates, &sentiment);
        let report = self.supervisor.reconcile(&plan).await;
        info!(
            candidates = candidates.len(),
            allocated = plan.entries.len(),
            workers = self.supervisor.worker_count(),
            "macro cycle complete"
        );
        Ok(report)
    }

    /// Refresh the shared sentiment digest. Failures keep the previous
    /// digest in place.
    pub async fn refresh_sentiment(&self) {
        match self.news_source.digest().await {
            Ok(digest) => {
                info!(
                    urgency = digest.urgency,
                    count_1h = digest.count_1h,
                    emergency = digest.emergency,
                    "sentiment refreshed"
                );
                *self.news.write().await = digest;
            }
            Err(e) => warn!(error = %e, "sentiment refresh failed, keeping last digest"),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.supervisor.worker_count()
    }

    pub async fn shutdown(&mut self) {
        self.supervisor.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
