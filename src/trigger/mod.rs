//! Event-driven trigger scoring for expensive external analysis.
//!
//! Every worker cycle runs local analysis for free; an external call is
//! only warranted when enough independent signals fire at once. Each
//! signal contributes an individually-capped sub-score; the external
//! call is recommended when the sum crosses the configured threshold.
//!
//! The scorer is advisory only: it never consumes budget and never
//! advances its own cooldown. The caller invokes [`TriggerScorer::record_call`]
//! after credit was actually spent, so attempts blocked by an exhausted
//! ledger are never counted as calls made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::TriggerConfig;
use crate::types::{IndicatorSignal, MarketSnapshot, NewsDigest, PositionSnapshot, Regime};

// ---------------------------------------------------------------------------
// Sub-score caps
// ---------------------------------------------------------------------------

const CAP_PRICE_5M: f64 = 30.0;
const CAP_PRICE_1H: f64 = 25.0;
const CAP_VOLUME_SURGE: f64 = 20.0;
const CAP_RANGE_VOLATILITY: f64 = 15.0;
const CAP_RSI_EXTREME: f64 = 15.0;
const SCORE_MACD_CROSS: f64 = 15.0;
const SCORE_BOLLINGER_TOUCH: f64 = 10.0;
const SCORE_MA_ALIGNMENT: f64 = 12.0;
const SCORE_RSI_MACD_CONFLICT: f64 = 15.0;
const SCORE_PRICE_TREND_CONFLICT: f64 = 12.0;
const CAP_NEWS_URGENCY: f64 = 40.0;
const SCORE_NEWS_EMERGENCY: f64 = 50.0;
const CAP_NEWS_COUNT: f64 = 15.0;
const SCORE_NEAR_STOP_LOSS: f64 = 20.0;
const SCORE_NEAR_TAKE_PROFIT: f64 = 18.0;
const SCORE_TRAILING_RISK: f64 = 15.0;
const CAP_POSITION_RISK: f64 = 20.0;

/// Urgency tier derived from the total score (emergency signals override).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrgencyTier {
    Low,
    Normal,
    High,
    Emergency,
}

impl fmt::Display for UrgencyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrgencyTier::Low => write!(f, "low"),
            UrgencyTier::Normal => write!(f, "normal"),
            UrgencyTier::High => write!(f, "high"),
            UrgencyTier::Emergency => write!(f, "emergency"),
        }
    }
}

/// Category of a fired trigger signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Market,
    Technical,
    News,
    Position,
    Conflict,
}

/// One fired signal: what it saw, the capped score it contributed,
/// and a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub value: f64,
    pub score: f64,
    pub reason: String,
}

/// The scorer's recommendation for one worker cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub should_call: bool,
    pub total_score: f64,
    pub threshold: f64,
    pub urgency: UrgencyTier,
    /// Top trigger reasons, highest score first (at most three).
    pub reasons: Vec<String>,
    pub events: Vec<TriggerEvent>,
    /// Seconds until the cooldown allows a non-emergency call (0 = now).
    pub seconds_until_eligible: u64,
}

/// Running call/savings statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TriggerStats {
    pub calls_made: u64,
    pub calls_prevented: u64,
}

impl TriggerStats {
    /// Fraction of checks that avoided an external call.
    pub fn savings_rate(&self) -> f64 {
        let total = self.calls_made + self.calls_prevented;
        if total == 0 {
            0.0
        } else {
            self.calls_prevented as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerScorer
// ---------------------------------------------------------------------------

/// Scores incoming signals and decides whether an expensive external
/// analysis call is warranted. One instance per asset worker.
pub struct TriggerScorer {
    cfg: TriggerConfig,
    last_call: Option<DateTime<Utc>>,
    stats: TriggerStats,
}

impl TriggerScorer {
    pub fn new(cfg: TriggerConfig) -> Self {
        TriggerScorer {
            cfg,
            last_call: None,
            stats: TriggerStats::default(),
        }
    }

    /// Score the current cycle's signals. Advisory only — no state is
    /// mutated besides the prevented-call counter for declined cycles.
    pub fn score(
        &mut self,
        market: &MarketSnapshot,
        news: Option<&NewsDigest>,
        position: Option<&PositionSnapshot>,
    ) -> TriggerDecision {
        let emergency = self.is_emergency(market, news);
        let seconds_until_eligible = self.seconds_until_eligible();

        // Cooldown gate: non-emergency calls wait out the interval.
        if seconds_until_eligible > 0 && !emergency {
            self.stats.calls_prevented += 1;
            return TriggerDecision {
                should_call: false,
                total_score: 0.0,
                threshold: self.cfg.call_threshold,
                urgency: UrgencyTier::Low,
                reasons: vec![format!(
                    "cooldown: {seconds_until_eligible}s until next call"
                )],
                events: Vec::new(),
                seconds_until_eligible,
            };
        }

        let mut events = Vec::new();
        events.extend(self.market_events(market));
        events.extend(self.technical_events(market));
        if let Some(n) = news {
            events.extend(self.news_events(n));
        }
        if let Some(p) = position {
            events.extend(self.position_events(p));
        }
        events.extend(self.conflict_events(market));

        let total_score: f64 = events.iter().map(|e| e.score).sum();
        let urgency = self.determine_urgency(total_score, emergency);

        // An emergency overrides cooldown and score alike.
        let should_call = emergency || total_score >= self.cfg.call_threshold;

        if !should_call {
            self.stats.calls_prevented += 1;
        }

        let mut sorted: Vec<&TriggerEvent> = events.iter().collect();
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let reasons: Vec<String> = sorted.iter().take(3).map(|e| e.reason.clone()).collect();

        TriggerDecision {
            should_call,
            total_score,
            threshold: self.cfg.call_threshold,
            urgency,
            reasons,
            events,
            seconds_until_eligible,
        }
    }

    /// Record that an external call was actually made (budget spent).
    /// Starts the cooldown clock.
    pub fn record_call(&mut self) {
        self.last_call = Some(Utc::now());
        self.stats.calls_made += 1;
    }

    /// Record a recommended call that the caller declined (typically
    /// because the credit ledger refused to spend).
    pub fn record_prevented(&mut self) {
        self.stats.calls_prevented += 1;
    }

    pub fn stats(&self) -> TriggerStats {
        self.stats
    }

    fn seconds_until_eligible(&self) -> u64 {
        match self.last_call {
            None => 0,
            Some(t) => {
                let elapsed = (Utc::now() - t).num_seconds().max(0) as u64;
                self.cfg.cooldown_secs.saturating_sub(elapsed)
            }
        }
    }

    /// Emergency conditions override cooldown and score: an explicit
    /// emergency news flag, or a 5-minute price collapse.
    fn is_emergency(&self, market: &MarketSnapshot, news: Option<&NewsDigest>) -> bool {
        if news.is_some_and(|n| n.emergency) {
            return true;
        }
        market
            .price_change_pct(5)
            .is_some_and(|c| c <= -self.cfg.emergency_drop_pct)
    }

    fn determine_urgency(&self, score: f64, emergency: bool) -> UrgencyTier {
        if emergency || score >= 80.0 {
            UrgencyTier::Emergency
        } else if score >= 60.0 {
            UrgencyTier::High
        } else if score >= 40.0 {
            UrgencyTier::Normal
        } else {
            UrgencyTier::Low
        }
    }

    // -- Sub-score evaluation --------------------------------------------

    fn market_events(&self, market: &MarketSnapshot) -> Vec<TriggerEvent> {
        let mut events = Vec::new();

        if let Some(change) = market.price_change_pct(5) {
            let magnitude = change.abs();
            if magnitude >= self.cfg.price_change_5m_pct {
                let direction = if change > 0.0 { "surge" } else { "drop" };
                events.push(TriggerEvent {
                    kind: TriggerKind::Market,
                    value: magnitude,
                    score: (magnitude * 5.0).min(CAP_PRICE_5M),
                    reason: format!("5m price {direction} ({magnitude:.1}%)"),
                });
            }
        }

        if let Some(change) = market.price_change_pct(60) {
            let magnitude = change.abs();
            if magnitude >= self.cfg.price_change_1h_pct {
                let direction = if change > 0.0 { "rise" } else { "fall" };
                events.push(TriggerEvent {
                    kind: TriggerKind::Market,
                    value: magnitude,
                    score: (magnitude * 3.0).min(CAP_PRICE_1H),
                    reason: format!("1h price {direction} ({magnitude:.1}%)"),
                });
            }
        }

        if let Some(ratio) = market.volume_ratio(20) {
            if ratio >= self.cfg.volume_surge_ratio {
                events.push(TriggerEvent {
                    kind: TriggerKind::Market,
                    value: ratio,
                    score: ((ratio - 1.0) * 10.0).min(CAP_VOLUME_SURGE),
                    reason: format!("volume surge ({ratio:.1}x)"),
                });
            }
        }

        if let Some(vol) = market.range_volatility_pct(24) {
            if vol >= self.cfg.range_volatility_pct {
                events.push(TriggerEvent {
                    kind: TriggerKind::Market,
                    value: vol,
                    score: (vol * 2.0).min(CAP_RANGE_VOLATILITY),
                    reason: format!("volatility spike ({vol:.1}%)"),
                });
            }
        }

        events
    }

    fn technical_events(&self, market: &MarketSnapshot) -> Vec<TriggerEvent> {
        let mut events = Vec::new();
        let ta = &market.technical;

        if let Some(rsi) = ta.rsi {
            if rsi <= 25.0 {
                events.push(TriggerEvent {
                    kind: TriggerKind::Technical,
                    value: rsi,
                    score: ((30.0 - rsi) * 0.5).min(CAP_RSI_EXTREME),
                    reason: format!("RSI extreme oversold ({rsi:.0})"),
                });
            } else if rsi >= 75.0 {
                events.push(TriggerEvent {
                    kind: TriggerKind::Technical,
                    value: rsi,
                    score: ((rsi - 70.0) * 0.5).min(CAP_RSI_EXTREME),
                    reason: format!("RSI extreme overbought ({rsi:.0})"),
                });
            }
        }

        if ta.macd_bullish_cross {
            events.push(TriggerEvent {
                kind: TriggerKind::Technical,
                value: 1.0,
                score: SCORE_MACD_CROSS,
                reason: "MACD golden cross".to_string(),
            });
        } else if ta.macd_bearish_cross {
            events.push(TriggerEvent {
                kind: TriggerKind::Technical,
                value: 1.0,
                score: SCORE_MACD_CROSS,
                reason: "MACD death cross".to_string(),
            });
        }

        if let Some(pos) = ta.bollinger_position {
            if pos <= 0.1 {
                events.push(TriggerEvent {
                    kind: TriggerKind::Technical,
                    value: pos,
                    score: SCORE_BOLLINGER_TOUCH,
                    reason: "Bollinger lower band touch".to_string(),
                });
            } else if pos >= 0.9 {
                events.push(TriggerEvent {
                    kind: TriggerKind::Technical,
                    value: pos,
                    score: SCORE_BOLLINGER_TOUCH,
                    reason: "Bollinger upper band touch".to_string(),
                });
            }
        }

        if let Some(trend @ (Regime::StrongUptrend | Regime::StrongDowntrend)) = ta.ma_trend {
            events.push(TriggerEvent {
                kind: TriggerKind::Technical,
                value: 1.0,
                score: SCORE_MA_ALIGNMENT,
                reason: format!("MA alignment {trend}"),
            });
        }

        events
    }

    fn news_events(&self, news: &NewsDigest) -> Vec<TriggerEvent> {
        let mut events = Vec::new();

        if news.urgency >= self.cfg.news_urgency {
            events.push(TriggerEvent {
                kind: TriggerKind::News,
                value: news.urgency,
                score: (news.urgency * 4.0).min(CAP_NEWS_URGENCY),
                reason: format!("important news ({:.1}/10)", news.urgency),
            });
        }

        if news.emergency {
            events.push(TriggerEvent {
                kind: TriggerKind::News,
                value: 1.0,
                score: SCORE_NEWS_EMERGENCY,
                reason: "emergency news".to_string(),
            });
        }

        if news.count_1h >= self.cfg.news_count_1h {
            events.push(TriggerEvent {
                kind: TriggerKind::News,
                value: news.count_1h as f64,
                score: (news.count_1h as f64 * 2.0).min(CAP_NEWS_COUNT),
                reason: format!("{} headlines in 1h", news.count_1h),
            });
        }

        events
    }

    fn position_events(&self, position: &PositionSnapshot) -> Vec<TriggerEvent> {
        let mut events = Vec::new();

        if (position.pnl_ratio - position.stop_loss).abs() <= self.cfg.pnl_critical {
            events.push(TriggerEvent {
                kind: TriggerKind::Position,
                value: position.pnl_ratio,
                score: SCORE_NEAR_STOP_LOSS,
                reason: format!("near stop-loss ({:.1}%)", position.pnl_ratio * 100.0),
            });
        } else if (position.pnl_ratio - position.take_profit).abs() <= self.cfg.pnl_critical {
            events.push(TriggerEvent {
                kind: TriggerKind::Position,
                value: position.pnl_ratio,
                score: SCORE_NEAR_TAKE_PROFIT,
                reason: format!("near take-profit ({:.1}%)", position.pnl_ratio * 100.0),
            });
        }

        if position.trailing_stop_risk {
            events.push(TriggerEvent {
                kind: TriggerKind::Position,
                value: 1.0,
                score: SCORE_TRAILING_RISK,
                reason: "trailing stop at risk".to_string(),
            });
        }

        if position.risk_score >= self.cfg.position_risk {
            events.push(TriggerEvent {
                kind: TriggerKind::Position,
                value: position.risk_score,
                score: (position.risk_score * 25.0).min(CAP_POSITION_RISK),
                reason: format!("elevated position risk ({:.0}%)", position.risk_score * 100.0),
            });
        }

        events
    }

    fn conflict_events(&self, market: &MarketSnapshot) -> Vec<TriggerEvent> {
        let mut events = Vec::new();
        let ta = &market.technical;

        // RSI and MACD pointing in opposite directions is exactly the
        // kind of ambiguity worth an external opinion.
        if let (Some(rsi), Some(macd)) = (ta.rsi_signal, ta.macd_signal) {
            let conflicted = matches!(
                (rsi, macd),
                (IndicatorSignal::Oversold, IndicatorSignal::Bearish)
                    | (IndicatorSignal::Overbought, IndicatorSignal::Bullish)
            );
            if conflicted {
                events.push(TriggerEvent {
                    kind: TriggerKind::Conflict,
                    value: 1.0,
                    score: SCORE_RSI_MACD_CONFLICT,
                    reason: format!("RSI-MACD conflict ({rsi:?} vs {macd:?})"),
                });
            }
        }

        if let (Some(pos), Some(trend)) = (ta.bollinger_position, ta.ma_trend) {
            let conflicted = (pos <= 0.2
                && matches!(trend, Regime::WeakDowntrend | Regime::StrongDowntrend))
                || (pos >= 0.8
                    && matches!(trend, Regime::WeakUptrend | Regime::StrongUptrend));
            if conflicted {
                events.push(TriggerEvent {
                    kind: TriggerKind::Conflict,
                    value: pos,
                    score: SCORE_PRICE_TREND_CONFLICT,
                    reason: "price-trend conflict".to_string(),
                });
            }
        }

        events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
