//! Macro-cadence budget allocation across the candidate universe.
//!
//! Candidates are scored on volume, technical posture, and momentum,
//! with a bonus for designated core assets. The top scorers split the
//! live budget proportionally, subject to per-asset clamps and core
//! floors; weight an entry cannot take without leaving its clamp range
//! is re-split among the others, and anything no entry may absorb is
//! held back as reserve. Budgets are exact decimals: after rounding,
//! any residue vs. the bounded target is assigned to the largest entry.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AllocationConfig;
use crate::types::NewsDigest;

const CAP_VOLUME_SCORE: f64 = 40.0;
const CAP_TECHNICAL_SCORE: f64 = 30.0;
const SCORE_SHORT_MOMENTUM: f64 = 10.0;
const SCORE_LONG_MOMENTUM: f64 = 10.0;
const SCORE_CORE_BONUS: f64 = 10.0;

/// Per-candidate inputs gathered by the macro scan.
#[derive(Debug, Clone)]
pub struct CandidateMetrics {
    pub asset_id: String,
    /// Latest volume vs. trailing average.
    pub volume_ratio: f64,
    /// Composite technical score in [-5, 5].
    pub technical_score: f64,
    /// Short-horizon price change, percent.
    pub momentum_short_pct: f64,
    /// Long-horizon price change, percent.
    pub momentum_long_pct: f64,
}

/// One asset's slice of the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub asset_id: String,
    pub budget: Decimal,
    pub weight_score: f64,
    pub rationale: String,
}

/// The full plan for one macro cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub entries: Vec<AllocationEntry>,
    pub total: Decimal,
    /// Market-wide sentiment this plan was drawn under.
    pub sentiment: NewsDigest,
    pub planned_at: DateTime<Utc>,
}

impl AllocationPlan {
    pub fn budget_for(&self, asset_id: &str) -> Option<Decimal> {
        self.entries
            .iter()
            .find(|e| e.asset_id == asset_id)
            .map(|e| e.budget)
    }

    pub fn asset_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.asset_id.clone()).collect()
    }
}

/// The allocation planner. Stateless between cycles.
pub struct AllocationPlanner {
    cfg: AllocationConfig,
}

impl AllocationPlanner {
    pub fn new(cfg: AllocationConfig) -> Self {
        AllocationPlanner { cfg }
    }

    /// Composite attractiveness score for one candidate.
    pub fn score(&self, m: &CandidateMetrics) -> f64 {
        let mut score = 0.0;
        score += (m.volume_ratio * 10.0).clamp(0.0, CAP_VOLUME_SCORE);
        score += (m.technical_score * 6.0).clamp(0.0, CAP_TECHNICAL_SCORE);
        if m.momentum_short_pct > 0.0 {
            score += SCORE_SHORT_MOMENTUM;
        }
        if m.momentum_long_pct > 0.0 {
            score += SCORE_LONG_MOMENTUM;
        }
        if self.is_core(&m.asset_id) {
            score += SCORE_CORE_BONUS;
        }
        score
    }

    fn is_core(&self, asset_id: &str) -> bool {
        self.cfg.core_assets.iter().any(|c| c == asset_id)
    }

    fn rationale(&self, m: &CandidateMetrics) -> String {
        let mut parts = Vec::new();
        if m.volume_ratio >= self.cfg.volume_surge_ratio {
            parts.push(format!("volume surge {:.1}x", m.volume_ratio));
        }
        if m.technical_score > 0.0 {
            parts.push(format!("technical +{:.1}", m.technical_score));
        }
        if m.momentum_short_pct > 0.0 && m.momentum_long_pct > 0.0 {
            parts.push("dual momentum".to_string());
        }
        if self.is_core(&m.asset_id) {
            parts.push("core asset".to_string());
        }
        if parts.is_empty() {
            parts.push("baseline score".to_string());
        }
        parts.join(", ")
    }

    /// Build the plan for this cycle. Falls back to a core-only split
    /// when no candidate scores above the floor. The sentiment digest
    /// is recorded on the plan so the conditions it was drawn under
    /// travel with it.
    pub fn plan(&self, candidates: &[CandidateMetrics], sentiment: &NewsDigest) -> AllocationPlan {
        let mut scored: Vec<(f64, &CandidateMetrics)> = candidates
            .iter()
            .map(|m| (self.score(m), m))
            .filter(|(s, _)| *s >= self.cfg.min_score)
            .collect();

        if scored.is_empty() {
            warn!("no allocatable candidates, falling back to core split");
            return self.core_fallback(sentiment);
        }

        // Ties break on asset id so the plan is stable regardless of
        // scan completion order.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.asset_id.cmp(&b.1.asset_id))
        });
        scored.truncate(self.cfg.top_k);

        let fractions = self.bounded_fractions(&scored);
        let frac_sum: f64 = fractions.iter().sum();

        let mut entries: Vec<AllocationEntry> = scored
            .iter()
            .zip(&fractions)
            .map(|((score, m), frac)| {
                let frac_dec = Decimal::from_f64(*frac).unwrap_or(Decimal::ZERO);
                AllocationEntry {
                    asset_id: m.asset_id.clone(),
                    budget: (self.cfg.total_budget * frac_dec).round_dp(2),
                    weight_score: *score,
                    rationale: self.rationale(m),
                }
            })
            .collect();

        let target = (self.cfg.total_budget
            * Decimal::from_f64(frac_sum).unwrap_or(Decimal::ONE))
        .round_dp(2);
        self.assign_residue(&mut entries, target);

        if frac_sum < 0.999 {
            info!(
                reserve_pct = (1.0 - frac_sum) * 100.0,
                "per-asset caps left part of the budget in reserve"
            );
        }

        let plan = AllocationPlan {
            entries,
            total: self.cfg.total_budget,
            sentiment: *sentiment,
            planned_at: Utc::now(),
        };
        info!(
            assets = plan.entries.len(),
            total = %plan.total,
            sentiment_urgency = plan.sentiment.urgency,
            "allocation plan built"
        );
        plan
    }

    /// Proportional fractions under per-entry bounds. An entry pushed
    /// past a bound is pinned there and the remaining weight is
    /// re-split among the unpinned entries until no bound is violated,
    /// so no entry ever leaves its clamp range.
    fn bounded_fractions(&self, scored: &[(f64, &CandidateMetrics)]) -> Vec<f64> {
        let n = scored.len();
        let mut fractions = vec![0.0; n];
        let mut pinned = vec![false; n];
        loop {
            let pinned_sum: f64 = fractions
                .iter()
                .zip(&pinned)
                .filter(|(_, p)| **p)
                .map(|(f, _)| f)
                .sum();
            let free_weight = (1.0 - pinned_sum).max(0.0);
            let free_score: f64 = scored
                .iter()
                .zip(&pinned)
                .filter(|(_, p)| !**p)
                .map(|((s, _), _)| s)
                .sum();
            if free_score <= 0.0 {
                break;
            }
            for i in 0..n {
                if !pinned[i] {
                    fractions[i] = scored[i].0 / free_score * free_weight;
                }
            }
            let mut changed = false;
            for i in 0..n {
                if pinned[i] {
                    continue;
                }
                let hi = self.cfg.max_fraction;
                let lo = if self.is_core(&scored[i].1.asset_id) {
                    self.cfg.min_fraction.max(self.cfg.core_floor_fraction)
                } else {
                    self.cfg.min_fraction
                }
                .min(hi);
                if fractions[i] > hi {
                    fractions[i] = hi;
                    pinned[i] = true;
                    changed = true;
                } else if fractions[i] < lo {
                    fractions[i] = lo;
                    pinned[i] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        fractions
    }

    /// Nothing worth scanning: 60/40 across the first two core assets
    /// (all to the first when only one is configured).
    fn core_fallback(&self, sentiment: &NewsDigest) -> AllocationPlan {
        let mut entries = Vec::new();
        let total = self.cfg.total_budget;
        match self.cfg.core_assets.len() {
            0 => {}
            1 => entries.push(AllocationEntry {
                asset_id: self.cfg.core_assets[0].clone(),
                budget: total,
                weight_score: 0.0,
                rationale: "core fallback".to_string(),
            }),
            _ => {
                let first = (total * dec!(0.6)).round_dp(2);
                entries.push(AllocationEntry {
                    asset_id: self.cfg.core_assets[0].clone(),
                    budget: first,
                    weight_score: 0.0,
                    rationale: "core fallback".to_string(),
                });
                entries.push(AllocationEntry {
                    asset_id: self.cfg.core_assets[1].clone(),
                    budget: total - first,
                    weight_score: 0.0,
                    rationale: "core fallback".to_string(),
                });
            }
        }
        AllocationPlan {
            entries,
            total,
            sentiment: *sentiment,
            planned_at: Utc::now(),
        }
    }

    /// Make the plan sum exactly to the bounded target by dropping the
    /// rounding residue onto the largest entry.
    fn assign_residue(&self, entries: &mut [AllocationEntry], target: Decimal) {
        let allocated: Decimal = entries.iter().map(|e| e.budget).sum();
        let residue = target - allocated;
        if residue != Decimal::ZERO {
            if let Some(largest) = entries.iter_mut().max_by_key(|e| e.budget) {
                largest.budget += residue;
            }
        }
    }
}
