//! Shared types for the VIGIL engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that market, analyst, strategy,
//! and supervisor modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Market regime & volatility
// ---------------------------------------------------------------------------

/// Coarse market-direction classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    StrongUptrend,
    WeakUptrend,
    Sideways,
    WeakDowntrend,
    StrongDowntrend,
    Unknown,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::StrongUptrend => write!(f, "STRONG_UPTREND"),
            Regime::WeakUptrend => write!(f, "WEAK_UPTREND"),
            Regime::Sideways => write!(f, "SIDEWAYS"),
            Regime::WeakDowntrend => write!(f, "WEAK_DOWNTREND"),
            Regime::StrongDowntrend => write!(f, "STRONG_DOWNTREND"),
            Regime::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for Regime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STRONG_UPTREND" => Ok(Regime::StrongUptrend),
            "WEAK_UPTREND" => Ok(Regime::WeakUptrend),
            "SIDEWAYS" => Ok(Regime::Sideways),
            "WEAK_DOWNTREND" => Ok(Regime::WeakDowntrend),
            "STRONG_DOWNTREND" => Ok(Regime::StrongDowntrend),
            "UNKNOWN" => Ok(Regime::Unknown),
            _ => Err(anyhow::anyhow!("Unknown market regime: {s}")),
        }
    }
}

/// Discretized recent-return-variance classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolatilityBucket {
    Low,
    Medium,
    High,
}

impl VolatilityBucket {
    /// Classify a trailing-return stdev (in percent) against bucket
    /// boundaries (defaults: LOW < 5%, MED 5–10%, HIGH > 10%).
    pub fn classify(stdev_pct: f64, low_bound: f64, high_bound: f64) -> Self {
        if stdev_pct < low_bound {
            VolatilityBucket::Low
        } else if stdev_pct <= high_bound {
            VolatilityBucket::Medium
        } else {
            VolatilityBucket::High
        }
    }

    /// All buckets (useful for table iteration in tests).
    pub const ALL: &'static [VolatilityBucket] = &[
        VolatilityBucket::Low,
        VolatilityBucket::Medium,
        VolatilityBucket::High,
    ];
}

impl fmt::Display for VolatilityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityBucket::Low => write!(f, "LOW"),
            VolatilityBucket::Medium => write!(f, "MED"),
            VolatilityBucket::High => write!(f, "HIGH"),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

/// Which information source should dominate the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionPolicy {
    ChartPriority,
    NewsPriority,
    Balanced,
}

impl fmt::Display for DecisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionPolicy::ChartPriority => write!(f, "CHART_PRIORITY"),
            DecisionPolicy::NewsPriority => write!(f, "NEWS_PRIORITY"),
            DecisionPolicy::Balanced => write!(f, "BALANCED"),
        }
    }
}

/// News sentiment classification from an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewsSentiment {
    Bullish,
    Bearish,
    Neutral,
    Emergency,
}

impl fmt::Display for NewsSentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NewsSentiment::Bullish => write!(f, "BULLISH"),
            NewsSentiment::Bearish => write!(f, "BEARISH"),
            NewsSentiment::Neutral => write!(f, "NEUTRAL"),
            NewsSentiment::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// Origin of an analysis result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTag {
    Local,
    External,
    /// External result reused as context past its originating cycle.
    ExternalCached,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::Local => write!(f, "local"),
            SourceTag::External => write!(f, "external"),
            SourceTag::ExternalCached => write!(f, "external_cached"),
        }
    }
}

/// A single analysis judgment, from either the local analyst or the
/// external provider. Field semantics are identical for both so that
/// fusion can treat them symmetrically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub regime: Regime,
    /// Self-reported confidence (0–1).
    pub confidence: f64,
    pub volatility: VolatilityBucket,
    pub policy: DecisionPolicy,
    pub news_sentiment: NewsSentiment,
    /// News importance score (0–10).
    pub news_urgency: f64,
    pub emergency: bool,
    /// One-sentence rationale for observability.
    pub reason: String,
    pub source: SourceTag,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} conf={:.0}% urgency={:.1} policy={}",
            self.source,
            self.regime,
            self.confidence * 100.0,
            self.news_urgency,
            self.policy,
        )
    }
}

impl AnalysisResult {
    /// Age of this result relative to now.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }

    /// Whether this result is older than the given freshness window.
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        self.age() > max_age
    }
}

/// Regimes that disagreed during fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeConflict {
    pub local: Regime,
    pub external: Regime,
}

/// Fusion output: the winning analysis plus provenance of the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedDecision {
    pub analysis: AnalysisResult,
    pub dominant: SourceTag,
    pub conflict: Option<RegimeConflict>,
}

impl fmt::Display for FusedDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (dominant: {})", self.analysis, self.dominant)?;
        if let Some(c) = &self.conflict {
            write!(f, " [conflict: {} vs {}]", c.local, c.external)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Directional hint emitted by an individual indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorSignal {
    Oversold,
    Overbought,
    Bullish,
    Bearish,
    Neutral,
}

/// Read-only technical summary produced by the external indicator
/// library. VIGIL consumes it; it never computes indicator math itself.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TechnicalSummary {
    pub rsi: Option<f64>,
    pub rsi_signal: Option<IndicatorSignal>,
    pub macd_signal: Option<IndicatorSignal>,
    pub macd_bullish_cross: bool,
    pub macd_bearish_cross: bool,
    /// Position within the Bollinger band, 0.0 = lower band, 1.0 = upper.
    pub bollinger_position: Option<f64>,
    /// Moving-average trend classification, if the library produced one.
    pub ma_trend: Option<Regime>,
    /// Composite score in [-5, 5]; positive = bullish.
    pub composite_score: f64,
}

/// A point-in-time view of one asset's market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset_id: String,
    pub price: f64,
    /// Trailing OHLCV window, oldest first. One bar per micro-cadence tick.
    pub candles: Vec<Candle>,
    pub technical: TechnicalSummary,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Absolute percent change of the current price vs. `bars_ago` bars.
    /// Returns None when history is too short — callers degrade the
    /// affected signal to zero rather than failing.
    pub fn price_change_pct(&self, bars_ago: usize) -> Option<f64> {
        if self.candles.len() < bars_ago || bars_ago == 0 {
            return None;
        }
        let past = self.candles[self.candles.len() - bars_ago].close;
        if past <= 0.0 {
            return None;
        }
        Some((self.price - past) / past * 100.0)
    }

    /// Latest bar volume vs. the mean of the preceding `window` bars.
    pub fn volume_ratio(&self, window: usize) -> Option<f64> {
        if self.candles.len() < window + 1 {
            return None;
        }
        let last = self.candles.last()?.volume;
        let prior = &self.candles[self.candles.len() - window - 1..self.candles.len() - 1];
        let avg: f64 = prior.iter().map(|c| c.volume).sum::<f64>() / prior.len() as f64;
        if avg <= 0.0 {
            return None;
        }
        Some(last / avg)
    }

    /// High-low range across the last `bars` bars as a percent of price.
    pub fn range_volatility_pct(&self, bars: usize) -> Option<f64> {
        if self.candles.len() < bars || self.price <= 0.0 {
            return None;
        }
        let tail = &self.candles[self.candles.len() - bars..];
        let high = tail.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = tail.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        Some((high - low) / self.price * 100.0)
    }

    /// Stdev of 1-bar close-to-close returns over the whole window,
    /// in percent. Feeds the volatility bucket classification.
    pub fn trailing_return_stdev_pct(&self) -> Option<f64> {
        if self.candles.len() < 3 {
            return None;
        }
        let returns: Vec<f64> = self
            .candles
            .windows(2)
            .filter(|w| w[0].close > 0.0)
            .map(|w| (w[1].close - w[0].close) / w[0].close)
            .collect();
        if returns.len() < 2 {
            return None;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        Some(var.sqrt() * 100.0)
    }
}

/// Aggregated recent-news view from the news source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct NewsDigest {
    /// Importance score (0–10).
    pub urgency: f64,
    /// Headlines in the last hour.
    pub count_1h: u32,
    pub emergency: bool,
}

/// Open-position view used for trigger scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Current P&L as a fraction of entry (e.g. -0.018 = -1.8%).
    pub pnl_ratio: f64,
    /// Stop-loss level as a fraction (negative).
    pub stop_loss: f64,
    /// Take-profit level as a fraction (positive).
    pub take_profit: f64,
    pub trailing_stop_risk: bool,
    /// Composite position risk score (0–1).
    pub risk_score: f64,
}

// ---------------------------------------------------------------------------
// Strategies & directives
// ---------------------------------------------------------------------------

/// Venue class a strategy trades on. Futures strategies are the
/// leveraged/high-risk instrument class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketClass {
    Spot,
    Futures,
}

impl fmt::Display for MarketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketClass::Spot => write!(f, "spot"),
            MarketClass::Futures => write!(f, "futures"),
        }
    }
}

/// The closed set of strategy implementations registered at startup.
/// Resolution is by table lookup on this enum — no name-based dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyId {
    MultiIndicator,
    Breakout,
    Grid,
    Dca,
    Trailing,
    Scalping,
    LongShort,
}

impl StrategyId {
    /// Which venue class this strategy trades on.
    pub fn class(&self) -> MarketClass {
        match self {
            StrategyId::MultiIndicator
            | StrategyId::Breakout
            | StrategyId::Grid
            | StrategyId::Dca
            | StrategyId::Trailing => MarketClass::Spot,
            StrategyId::Scalping | StrategyId::LongShort => MarketClass::Futures,
        }
    }

    /// Whether this strategy uses leverage.
    pub fn is_leveraged(&self) -> bool {
        self.class() == MarketClass::Futures
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyId::MultiIndicator => write!(f, "multi_indicator"),
            StrategyId::Breakout => write!(f, "breakout"),
            StrategyId::Grid => write!(f, "grid"),
            StrategyId::Dca => write!(f, "dca"),
            StrategyId::Trailing => write!(f, "trailing"),
            StrategyId::Scalping => write!(f, "scalping"),
            StrategyId::LongShort => write!(f, "long_short"),
        }
    }
}

/// What one worker cycle hands to the downstream strategy executor.
/// VIGIL never places orders itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDirective {
    pub asset_id: String,
    pub strategies: Vec<StrategyId>,
    pub budget: Decimal,
    pub policy: DecisionPolicy,
    pub regime: Regime,
    /// Human-readable reason for this directive (or for its emptiness).
    pub reason: String,
}

impl StrategyDirective {
    /// A directive that opens no exposure.
    pub fn stand_down(asset_id: &str, budget: Decimal, regime: Regime, reason: String) -> Self {
        StrategyDirective {
            asset_id: asset_id.to_string(),
            strategies: Vec::new(),
            budget,
            policy: DecisionPolicy::ChartPriority,
            regime,
            reason,
        }
    }

    /// Whether executing this directive would open new exposure.
    pub fn opens_exposure(&self) -> bool {
        !self.strategies.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for VIGIL.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    #[error("Market data error ({asset}): {message}")]
    MarketData { asset: String, message: String },

    #[error("Analysis provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("Analysis provider unavailable after {failures} consecutive failures")]
    ProviderUnavailable { failures: u32 },

    #[error("News source error: {0}")]
    News(String),

    #[error("Credit exhausted: need {needed}, have {remaining}")]
    CreditExhausted { needed: u32, remaining: u32 },

    #[error("Risk limit breached: {0}")]
    RiskLimit(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
