//! Per-asset worker loop.
//!
//! Each monitored asset gets one worker task running the micro-cadence
//! decision cycle: risk gate, local analysis, trigger scoring, credit-
//! gated external analysis, fusion, strategy selection, and finally a
//! directive to the executor. A failed cycle is logged and skipped;
//! the loop itself only ends on cancellation.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::WorkerContext;
use crate::analyst::AnalysisRequest;
use crate::credit::CreditAction;
use crate::fusion::DecisionFusion;
use crate::strategy;
use crate::trigger::{TriggerScorer, UrgencyTier};
use crate::types::{MarketClass, StrategyDirective};

/// History bars requested per snapshot. Covers the 1h momentum lookback
/// with headroom for the volume window.
const SNAPSHOT_BARS: usize = 100;

/// Entry point for one worker task. Returns when cancelled.
pub async fn run(asset_id: String, ctx: WorkerContext, mut cancel: watch::Receiver<bool>) {
    info!(asset = %asset_id, "worker started");

    let mut scorer = TriggerScorer::new(ctx.cfg.trigger.clone());
    let mut fusion = DecisionFusion::new(ctx.cfg.fusion.clone());
    let mut interval =
        tokio::time::interval(Duration::from_secs(ctx.cfg.engine.micro_cadence_secs));

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if let Err(e) = cycle(&asset_id, &ctx, &mut scorer, &mut fusion).await {
                    warn!(asset = %asset_id, error = %e, "worker cycle failed");
                }
            }
        }
    }

    // Retirement: hand exposure back to the executor before exiting.
    if let Err(e) = ctx.executor.release(&asset_id).await {
        warn!(asset = %asset_id, error = %e, "failed to release exposure on retirement");
    }
    info!(asset = %asset_id, "worker stopped");
}

/// One micro-cadence decision cycle.
async fn cycle(
    asset_id: &str,
    ctx: &WorkerContext,
    scorer: &mut TriggerScorer,
    fusion: &mut DecisionFusion,
) -> Result<()> {
    // Budget is re-read every cycle so a rebudget from the macro
    // planner takes effect without restarting the worker.
    let budget = {
        let allocations = ctx.allocations.read().await;
        match allocations.get(asset_id) {
            Some(b) => *b,
            None => {
                debug!(asset = %asset_id, "no allocation this cycle");
                return Ok(());
            }
        }
    };

    let snapshot = ctx.market.snapshot(asset_id, SNAPSHOT_BARS).await?;
    let news = *ctx.news.read().await;
    let position = ctx.executor.position(asset_id).await?;

    // Sticky halt: stand down and emit nothing else. The verdict is
    // taken in its own scope so sibling workers are not stuck behind
    // the executor call.
    let halt_reason = {
        let mut risk = ctx.risk.lock().await;
        let verdict = risk.check(MarketClass::Spot);
        if verdict.halted {
            Some(
                verdict
                    .reason
                    .unwrap_or_else(|| "trading halted by risk gate".to_string()),
            )
        } else {
            None
        }
    };
    if let Some(reason) = halt_reason {
        let directive = StrategyDirective::stand_down(
            asset_id,
            budget,
            crate::types::Regime::Unknown,
            format!("trading halted: {reason}"),
        );
        ctx.executor.apply(&directive).await?;
        return Ok(());
    }

    // Free local view, always available.
    let local = ctx.local.analyze(&snapshot, Some(&news));

    // Trigger: is this cycle worth paying for?
    let decision = scorer.score(&snapshot, Some(&news), position.as_ref());

    let external = if decision.should_call && ctx.provider.is_available() {
        let action = match decision.urgency {
            UrgencyTier::Emergency => CreditAction::Emergency,
            UrgencyTier::High => CreditAction::Debate,
            _ => CreditAction::Standard,
        };
        match ctx.ledger.try_spend(asset_id, action).await {
            Ok(remaining) => {
                // Credit is spent either way; the cooldown starts now.
                scorer.record_call();
                debug!(
                    asset = %asset_id,
                    score = decision.total_score,
                    ?action,
                    credits_remaining = remaining,
                    "external analysis purchased"
                );
                let request = AnalysisRequest {
                    snapshot: snapshot.clone(),
                    news: Some(news),
                    trigger_reasons: decision.reasons.clone(),
                    action,
                };
                match ctx.provider.analyze(&request).await {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!(asset = %asset_id, error = %e, "external analysis lost");
                        None
                    }
                }
            }
            Err(e) => {
                scorer.record_prevented();
                debug!(asset = %asset_id, reason = %e, "external call skipped");
                None
            }
        }
    } else {
        None
    };

    let fused = fusion.fuse(local, external);
    let mut selection = strategy::select(
        fused.analysis.regime,
        fused.analysis.volatility,
        fused.analysis.policy,
        fused.analysis.news_urgency,
    );

    // An emergency judgment always means protect, never position.
    if fused.analysis.emergency && !selection.strategies.is_empty() {
        selection.strategies.clear();
        selection.reason = format!("emergency conditions: {}", fused.analysis.reason);
    }

    // Per-class caps can still veto individual strategies.
    let mut strategies = selection.strategies;
    if !strategies.is_empty() {
        let mut risk = ctx.risk.lock().await;
        let spot_ok = risk.check(MarketClass::Spot).trading_allowed;
        let futures_ok = risk.check(MarketClass::Futures).trading_allowed;
        strategies.retain(|s| match s.class() {
            MarketClass::Spot => spot_ok,
            MarketClass::Futures => futures_ok,
        });
    }

    let directive = StrategyDirective {
        asset_id: asset_id.to_string(),
        strategies,
        budget,
        policy: fused.analysis.policy,
        regime: fused.analysis.regime,
        reason: selection.reason,
    };

    debug!(
        asset = %asset_id,
        regime = %directive.regime,
        strategies = directive.strategies.len(),
        budget = %directive.budget,
        dominant = %fused.dominant,
        "cycle directive"
    );
    ctx.executor.apply(&directive).await?;
    Ok(())
}
