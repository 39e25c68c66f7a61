//! Regime-and-volatility strategy selection.
//!
//! A pure lookup: given the fused regime, the volatility bucket, and
//! the decision policy, return the strategy set to run. Downtrends and
//! unknown regimes return an empty set — standing down is a valid and
//! common outcome, not an error.

use crate::types::{DecisionPolicy, Regime, StrategyId, VolatilityBucket};

/// Urgency at which a news-priority decision narrows exposure.
const NEWS_OVERRIDE_URGENCY: f64 = 7.0;

/// The chosen strategy set plus a one-line rationale.
#[derive(Debug, Clone)]
pub struct StrategySelection {
    pub strategies: Vec<StrategyId>,
    pub reason: String,
}

impl StrategySelection {
    fn stand_down(reason: impl Into<String>) -> Self {
        StrategySelection {
            strategies: Vec::new(),
            reason: reason.into(),
        }
    }
}

/// Select the strategy set for one asset and one decision.
///
/// Leveraged (futures) strategies are dropped first as conditions
/// deteriorate; high-urgency news narrows everything down to the most
/// conservative spot strategy or to nothing at all.
pub fn select(
    regime: Regime,
    volatility: VolatilityBucket,
    policy: DecisionPolicy,
    news_urgency: f64,
) -> StrategySelection {
    // High-urgency news overrides the table: no leverage, and only the
    // confirmed uptrends keep a single conservative spot strategy.
    if policy == DecisionPolicy::NewsPriority && news_urgency >= NEWS_OVERRIDE_URGENCY {
        return match regime {
            Regime::StrongUptrend | Regime::WeakUptrend => StrategySelection {
                strategies: vec![StrategyId::MultiIndicator],
                reason: format!("news override: conservative spot only in {regime}"),
            },
            _ => StrategySelection::stand_down(format!(
                "news override: no exposure in {regime}"
            )),
        };
    }

    let mut strategies = match regime {
        Regime::StrongUptrend => vec![
            StrategyId::MultiIndicator,
            StrategyId::Breakout,
            StrategyId::LongShort,
        ],
        Regime::WeakUptrend => vec![StrategyId::MultiIndicator, StrategyId::LongShort],
        Regime::Sideways => vec![StrategyId::Grid, StrategyId::Scalping],
        Regime::WeakDowntrend => {
            let mut s = vec![StrategyId::Dca];
            if volatility == VolatilityBucket::Low {
                s.push(StrategyId::Grid);
            }
            s
        }
        Regime::StrongDowntrend => {
            return StrategySelection::stand_down("strong downtrend: stand down");
        }
        Regime::Unknown => {
            return StrategySelection::stand_down("unknown regime: stand down");
        }
    };

    // High volatility sheds the riskiest strategy of the set.
    if volatility == VolatilityBucket::High {
        match regime {
            Regime::StrongUptrend => strategies.retain(|s| *s != StrategyId::Breakout),
            Regime::WeakUptrend => strategies.retain(|s| !s.is_leveraged()),
            Regime::Sideways => strategies.retain(|s| *s != StrategyId::Scalping),
            _ => {}
        }
    }

    StrategySelection {
        reason: format!("{regime}/{volatility} table selection"),
        strategies,
    }
}
