//! Fusing free local analysis with paid external analysis.
//!
//! Local analysis runs every cycle; external results arrive only when
//! the trigger and the credit ledger both agree. Fusion decides which
//! judgment wins and how disagreement dents confidence, and keeps the
//! last external result around so it can season local-only cycles for
//! a bounded freshness window.

use chrono::Duration;
use tracing::{debug, warn};

use crate::config::FusionConfig;
use crate::types::{
    AnalysisResult, DecisionPolicy, FusedDecision, RegimeConflict, SourceTag,
};

/// Confidence multiplier applied to the winner of a regime conflict.
const CONFLICT_PENALTY: f64 = 0.8;
/// Confidence bump when both analysts agree on the regime.
const AGREEMENT_BOOST: f64 = 0.1;
/// Confidence is never reported above this after fusion.
const CONFIDENCE_CEILING: f64 = 0.95;

/// Urgency at or above which news dominates the chart.
const NEWS_PRIORITY_URGENCY: f64 = 7.0;
/// Urgency at or below which the chart dominates the news.
const CHART_PRIORITY_URGENCY: f64 = 3.0;

/// Map a news-urgency score to the decision policy band.
pub fn policy_for_urgency(urgency: f64) -> DecisionPolicy {
    if urgency >= NEWS_PRIORITY_URGENCY {
        DecisionPolicy::NewsPriority
    } else if urgency <= CHART_PRIORITY_URGENCY {
        DecisionPolicy::ChartPriority
    } else {
        DecisionPolicy::Balanced
    }
}

/// Per-asset fusion state. Owns the external-result cache.
pub struct DecisionFusion {
    cfg: FusionConfig,
    last_external: Option<AnalysisResult>,
}

impl DecisionFusion {
    pub fn new(cfg: FusionConfig) -> Self {
        DecisionFusion {
            cfg,
            last_external: None,
        }
    }

    /// Store a freshly-purchased external result for later reuse.
    pub fn cache_external(&mut self, result: AnalysisResult) {
        self.last_external = Some(result);
    }

    /// The cached external result, if it is still inside the freshness
    /// window. Returned with its source re-tagged as cached.
    pub fn cached_external(&self) -> Option<AnalysisResult> {
        let window = Duration::seconds(self.cfg.freshness_window_secs as i64);
        self.last_external
            .as_ref()
            .filter(|r| !r.is_stale(window))
            .map(|r| AnalysisResult {
                source: SourceTag::ExternalCached,
                ..r.clone()
            })
    }

    /// Fuse this cycle's local analysis with an external result, if any.
    /// Falls back to the cached external result when `external` is None
    /// and the cache is still fresh; otherwise the local view stands
    /// alone.
    pub fn fuse(
        &mut self,
        local: AnalysisResult,
        external: Option<AnalysisResult>,
    ) -> FusedDecision {
        if let Some(ext) = &external {
            self.last_external = Some(ext.clone());
        }
        let external = external.or_else(|| self.cached_external());

        let Some(external) = external else {
            // No external judgment means no news interpretation: the
            // chart is all there is, however hot the digest reads.
            return FusedDecision {
                analysis: AnalysisResult {
                    policy: DecisionPolicy::ChartPriority,
                    ..local
                },
                dominant: SourceTag::Local,
                conflict: None,
            };
        };

        // The external judgment carries the news context, so its
        // urgency sets the policy band.
        let policy = policy_for_urgency(external.news_urgency);

        if local.regime == external.regime {
            // Agreement: keep the more detailed external view, bump
            // confidence toward the ceiling.
            let confidence = (local.confidence.max(external.confidence) + AGREEMENT_BOOST)
                .min(CONFIDENCE_CEILING);
            debug!(
                regime = %external.regime,
                confidence,
                "local and external analysis agree"
            );
            return FusedDecision {
                analysis: AnalysisResult {
                    confidence,
                    policy,
                    ..external.clone()
                },
                dominant: external.source,
                conflict: None,
            };
        }

        // Conflict: the policy band picks the winner, with confidence
        // as the tie-breaker under Balanced. The winner pays a
        // confidence penalty either way.
        let conflict = RegimeConflict {
            local: local.regime,
            external: external.regime,
        };
        let external_wins = match policy {
            DecisionPolicy::NewsPriority => true,
            DecisionPolicy::ChartPriority => false,
            DecisionPolicy::Balanced => external.confidence > local.confidence,
        };
        let (winner, dominant) = if external_wins {
            (external.clone(), external.source)
        } else {
            (local, SourceTag::Local)
        };
        let confidence = (winner.confidence * CONFLICT_PENALTY).min(CONFIDENCE_CEILING);

        warn!(
            local = %conflict.local,
            external = %conflict.external,
            %dominant,
            confidence,
            "regime conflict during fusion"
        );

        FusedDecision {
            analysis: AnalysisResult {
                confidence,
                policy,
                ..winner
            },
            dominant,
            conflict: Some(conflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewsSentiment, Regime, VolatilityBucket};
    use chrono::Utc;

    fn result(regime: Regime, confidence: f64, urgency: f64, source: SourceTag) -> AnalysisResult {
        AnalysisResult {
            regime,
            confidence,
            volatility: VolatilityBucket::Medium,
            policy: DecisionPolicy::Balanced,
            news_sentiment: NewsSentiment::Neutral,
            news_urgency: urgency,
            emergency: false,
            reason: String::new(),
            source,
            timestamp: Utc::now(),
        }
    }

    fn fusion() -> DecisionFusion {
        DecisionFusion::new(FusionConfig::default())
    }

    #[test]
    fn test_policy_bands() {
        assert_eq!(policy_for_urgency(8.0), DecisionPolicy::NewsPriority);
        assert_eq!(policy_for_urgency(7.0), DecisionPolicy::NewsPriority);
        assert_eq!(policy_for_urgency(5.0), DecisionPolicy::Balanced);
        assert_eq!(policy_for_urgency(3.0), DecisionPolicy::ChartPriority);
        assert_eq!(policy_for_urgency(1.0), DecisionPolicy::ChartPriority);
    }

    #[test]
    fn test_local_only_passthrough() {
        let mut f = fusion();
        let local = result(Regime::WeakUptrend, 0.4, 2.0, SourceTag::Local);
        let fused = f.fuse(local, None);
        assert_eq!(fused.dominant, SourceTag::Local);
        assert_eq!(fused.analysis.regime, Regime::WeakUptrend);
        assert_eq!(fused.analysis.policy, DecisionPolicy::ChartPriority);
        assert!(fused.conflict.is_none());
    }

    #[test]
    fn test_local_only_hot_news_still_chart_priority() {
        // Hot headlines with nobody to interpret them must not drive
        // the policy; only an external result can claim news priority.
        let mut f = fusion();
        let local = result(Regime::WeakUptrend, 0.4, 8.0, SourceTag::Local);
        let fused = f.fuse(local, None);
        assert_eq!(fused.dominant, SourceTag::Local);
        assert_eq!(fused.analysis.policy, DecisionPolicy::ChartPriority);
    }

    #[test]
    fn test_agreement_boosts_confidence() {
        let mut f = fusion();
        let local = result(Regime::StrongUptrend, 0.6, 5.0, SourceTag::Local);
        let ext = result(Regime::StrongUptrend, 0.8, 5.0, SourceTag::External);
        let fused = f.fuse(local, Some(ext));
        assert_eq!(fused.dominant, SourceTag::External);
        assert!((fused.analysis.confidence - 0.9).abs() < 1e-9);
        assert!(fused.conflict.is_none());
    }

    #[test]
    fn test_agreement_confidence_never_exceeds_ceiling() {
        let mut f = fusion();
        let local = result(Regime::Sideways, 0.9, 5.0, SourceTag::Local);
        let ext = result(Regime::Sideways, 0.92, 5.0, SourceTag::External);
        let fused = f.fuse(local, Some(ext));
        assert!(fused.analysis.confidence <= CONFIDENCE_CEILING);
    }

    #[test]
    fn test_news_priority_conflict_external_wins() {
        let mut f = fusion();
        let local = result(Regime::WeakUptrend, 0.9, 0.0, SourceTag::Local);
        let ext = result(Regime::WeakDowntrend, 0.5, 8.5, SourceTag::External);
        let fused = f.fuse(local, Some(ext));
        assert_eq!(fused.dominant, SourceTag::External);
        assert_eq!(fused.analysis.regime, Regime::WeakDowntrend);
        assert_eq!(fused.analysis.policy, DecisionPolicy::NewsPriority);
        assert!((fused.analysis.confidence - 0.5 * CONFLICT_PENALTY).abs() < 1e-9);
        let c = fused.conflict.unwrap();
        assert_eq!(c.local, Regime::WeakUptrend);
        assert_eq!(c.external, Regime::WeakDowntrend);
    }

    #[test]
    fn test_chart_priority_conflict_local_wins() {
        let mut f = fusion();
        let local = result(Regime::Sideways, 0.4, 0.0, SourceTag::Local);
        let ext = result(Regime::StrongUptrend, 0.9, 2.0, SourceTag::External);
        let fused = f.fuse(local, Some(ext));
        assert_eq!(fused.dominant, SourceTag::Local);
        assert_eq!(fused.analysis.regime, Regime::Sideways);
        assert!(fused.conflict.is_some());
    }

    #[test]
    fn test_balanced_conflict_higher_confidence_wins() {
        let mut f = fusion();
        let local = result(Regime::WeakUptrend, 0.65, 0.0, SourceTag::Local);
        let ext = result(Regime::Sideways, 0.55, 5.0, SourceTag::External);
        let fused = f.fuse(local, Some(ext));
        assert_eq!(fused.dominant, SourceTag::Local);
        assert_eq!(fused.analysis.regime, Regime::WeakUptrend);
        assert!((fused.analysis.confidence - 0.65 * CONFLICT_PENALTY).abs() < 1e-9);
    }

    #[test]
    fn test_cached_external_reused_within_window() {
        let mut f = fusion();
        let local1 = result(Regime::Sideways, 0.3, 5.0, SourceTag::Local);
        let ext = result(Regime::StrongUptrend, 0.8, 5.0, SourceTag::External);
        let _ = f.fuse(local1, Some(ext));

        // Next cycle: no fresh external, cache kicks in.
        let local2 = result(Regime::StrongUptrend, 0.4, 5.0, SourceTag::Local);
        let fused = f.fuse(local2, None);
        assert_eq!(fused.dominant, SourceTag::ExternalCached);
        assert_eq!(fused.analysis.source, SourceTag::ExternalCached);
        assert!(fused.conflict.is_none());
    }

    #[test]
    fn test_stale_cache_ignored() {
        let mut f = fusion();
        let mut ext = result(Regime::StrongUptrend, 0.8, 5.0, SourceTag::External);
        ext.timestamp = Utc::now() - Duration::seconds(601);
        f.cache_external(ext);
        assert!(f.cached_external().is_none());

        let local = result(Regime::Sideways, 0.3, 5.0, SourceTag::Local);
        let fused = f.fuse(local, None);
        assert_eq!(fused.dominant, SourceTag::Local);
        assert_eq!(fused.analysis.regime, Regime::Sideways);
    }
}
