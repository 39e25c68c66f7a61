//! Free local analysis from the technical summary.
//!
//! Runs every worker cycle at zero cost. Maps the composite technical
//! score onto a regime with deliberately modest confidence — the local
//! view is a coarse heuristic and fusion should treat it as such.

use chrono::Utc;

use crate::config::VolatilityConfig;
use crate::types::{
    AnalysisResult, DecisionPolicy, MarketSnapshot, NewsDigest, NewsSentiment, Regime,
    SourceTag, VolatilityBucket,
};

/// Local confidence is capped here; only the external provider may
/// claim more conviction.
const LOCAL_CONFIDENCE_CEILING: f64 = 0.7;

pub struct LocalAnalyst {
    vol_cfg: VolatilityConfig,
}

impl LocalAnalyst {
    pub fn new(vol_cfg: VolatilityConfig) -> Self {
        LocalAnalyst { vol_cfg }
    }

    /// Judge the asset from its technical summary alone.
    pub fn analyze(&self, snapshot: &MarketSnapshot, news: Option<&NewsDigest>) -> AnalysisResult {
        let score = snapshot.technical.composite_score;
        let regime = if score >= 3.0 {
            Regime::StrongUptrend
        } else if score >= 1.0 {
            Regime::WeakUptrend
        } else if score <= -3.0 {
            Regime::StrongDowntrend
        } else if score <= -1.0 {
            Regime::WeakDowntrend
        } else {
            Regime::Sideways
        };

        // Confidence scales with score magnitude, capped well below
        // certainty.
        let confidence = (score.abs() / 5.0 * LOCAL_CONFIDENCE_CEILING)
            .min(LOCAL_CONFIDENCE_CEILING);

        let volatility = snapshot
            .trailing_return_stdev_pct()
            .map(|s| {
                VolatilityBucket::classify(s, self.vol_cfg.low_bound_pct, self.vol_cfg.high_bound_pct)
            })
            .unwrap_or(VolatilityBucket::Medium);

        let news_urgency = news.map(|n| n.urgency).unwrap_or(0.0);
        let emergency = news.is_some_and(|n| n.emergency);
        let news_sentiment = if emergency {
            NewsSentiment::Emergency
        } else {
            NewsSentiment::Neutral
        };

        AnalysisResult {
            regime,
            confidence,
            volatility,
            // A chart-only view cannot interpret the news, so it never
            // proposes anything but chart priority.
            policy: DecisionPolicy::ChartPriority,
            news_sentiment,
            news_urgency,
            emergency,
            reason: format!("local technical score {score:.1}"),
            source: SourceTag::Local,
            timestamp: Utc::now(),
        }
    }
}
