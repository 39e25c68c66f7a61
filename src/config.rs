//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every tunable carries a serde default so a partial file (or a missing
//! one, via `AppConfig::default()`) still yields a runnable engine.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub credit: CreditConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub volatility: VolatilityConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Cadences and worker lifecycle settings.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Per-asset worker loop cadence.
    #[serde(default = "default_micro_cadence")]
    pub micro_cadence_secs: u64,
    /// Allocation-planning cadence.
    #[serde(default = "default_macro_cadence")]
    pub macro_cadence_secs: u64,
    /// Market-sentiment refresh cadence.
    #[serde(default = "default_sentiment_cadence")]
    pub sentiment_cadence_secs: u64,
    /// How long a cancelled worker may run before forced abort.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
    /// Concurrency cap for the macro candidate scan fan-out.
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            micro_cadence_secs: default_micro_cadence(),
            macro_cadence_secs: default_macro_cadence(),
            sentiment_cadence_secs: default_sentiment_cadence(),
            grace_period_secs: default_grace_period(),
            scan_concurrency: default_scan_concurrency(),
        }
    }
}

fn default_micro_cadence() -> u64 {
    30
}
fn default_macro_cadence() -> u64 {
    1800
}
fn default_sentiment_cadence() -> u64 {
    600
}
fn default_grace_period() -> u64 {
    10
}
fn default_scan_concurrency() -> usize {
    8
}

/// Thresholds for the event-driven trigger scorer.
#[derive(Debug, Deserialize, Clone)]
pub struct TriggerConfig {
    /// Total score at or above which an external call is recommended.
    #[serde(default = "default_call_threshold")]
    pub call_threshold: f64,
    /// Minimum seconds between external calls (emergencies override).
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// A 5-minute drop of at least this percent is an emergency.
    #[serde(default = "default_emergency_drop")]
    pub emergency_drop_pct: f64,
    #[serde(default = "default_price_change_5m")]
    pub price_change_5m_pct: f64,
    #[serde(default = "default_price_change_1h")]
    pub price_change_1h_pct: f64,
    #[serde(default = "default_volume_surge")]
    pub volume_surge_ratio: f64,
    #[serde(default = "default_range_volatility")]
    pub range_volatility_pct: f64,
    #[serde(default = "default_news_urgency")]
    pub news_urgency: f64,
    #[serde(default = "default_news_count")]
    pub news_count_1h: u32,
    #[serde(default = "default_position_risk")]
    pub position_risk: f64,
    /// Distance from stop-loss/take-profit considered "near" (fraction).
    #[serde(default = "default_pnl_critical")]
    pub pnl_critical: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig {
            call_threshold: default_call_threshold(),
            cooldown_secs: default_cooldown(),
            emergency_drop_pct: default_emergency_drop(),
            price_change_5m_pct: default_price_change_5m(),
            price_change_1h_pct: default_price_change_1h(),
            volume_surge_ratio: default_volume_surge(),
            range_volatility_pct: default_range_volatility(),
            news_urgency: default_news_urgency(),
            news_count_1h: default_news_count(),
            position_risk: default_position_risk(),
            pnl_critical: default_pnl_critical(),
        }
    }
}

fn default_call_threshold() -> f64 {
    50.0
}
fn default_cooldown() -> u64 {
    180
}
fn default_emergency_drop() -> f64 {
    5.0
}
fn default_price_change_5m() -> f64 {
    3.0
}
fn default_price_change_1h() -> f64 {
    5.0
}
fn default_volume_surge() -> f64 {
    2.5
}
fn default_range_volatility() -> f64 {
    5.0
}
fn default_news_urgency() -> f64 {
    6.5
}
fn default_news_count() -> u32 {
    5
}
fn default_position_risk() -> f64 {
    0.8
}
fn default_pnl_critical() -> f64 {
    0.02
}

/// Daily credit budget for external analysis calls.
#[derive(Debug, Deserialize, Clone)]
pub struct CreditConfig {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_cost_standard")]
    pub cost_standard: u32,
    #[serde(default = "default_cost_debate")]
    pub cost_debate: u32,
    #[serde(default = "default_cost_emergency")]
    pub cost_emergency: u32,
}

impl Default for CreditConfig {
    fn default() -> Self {
        CreditConfig {
            daily_limit: default_daily_limit(),
            cost_standard: default_cost_standard(),
            cost_debate: default_cost_debate(),
            cost_emergency: default_cost_emergency(),
        }
    }
}

fn default_daily_limit() -> u32 {
    50
}
fn default_cost_standard() -> u32 {
    1
}
fn default_cost_debate() -> u32 {
    2
}
fn default_cost_emergency() -> u32 {
    3
}

/// Decision-fusion settings.
#[derive(Debug, Deserialize, Clone)]
pub struct FusionConfig {
    /// How long an external result may be reused as context.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            freshness_window_secs: default_freshness_window(),
        }
    }
}

fn default_freshness_window() -> u64 {
    600
}

/// Volatility bucket boundaries (trailing-return stdev, percent).
#[derive(Debug, Deserialize, Clone)]
pub struct VolatilityConfig {
    #[serde(default = "default_vol_low")]
    pub low_bound_pct: f64,
    #[serde(default = "default_vol_high")]
    pub high_bound_pct: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        VolatilityConfig {
            low_bound_pct: default_vol_low(),
            high_bound_pct: default_vol_high(),
        }
    }
}

fn default_vol_low() -> f64 {
    5.0
}
fn default_vol_high() -> f64 {
    10.0
}

/// Account-level risk limits.
#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// Daily loss as a fraction of the account (hard limit).
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    /// Peak-to-trough drawdown limit (fraction).
    #[serde(default = "default_drawdown_limit")]
    pub drawdown_limit: f64,
    #[serde(default = "default_max_spot_positions")]
    pub max_spot_positions: u32,
    #[serde(default = "default_max_futures_positions")]
    pub max_futures_positions: u32,
    #[serde(default = "default_max_spot_trades")]
    pub max_spot_trades_per_day: u32,
    #[serde(default = "default_max_futures_trades")]
    pub max_futures_trades_per_day: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            daily_loss_limit: default_daily_loss_limit(),
            max_consecutive_losses: default_max_consecutive_losses(),
            drawdown_limit: default_drawdown_limit(),
            max_spot_positions: default_max_spot_positions(),
            max_futures_positions: default_max_futures_positions(),
            max_spot_trades_per_day: default_max_spot_trades(),
            max_futures_trades_per_day: default_max_futures_trades(),
        }
    }
}

fn default_daily_loss_limit() -> f64 {
    0.05
}
fn default_max_consecutive_losses() -> u32 {
    4
}
fn default_drawdown_limit() -> f64 {
    0.15
}
fn default_max_spot_positions() -> u32 {
    2
}
fn default_max_futures_positions() -> u32 {
    1
}
fn default_max_spot_trades() -> u32 {
    15
}
fn default_max_futures_trades() -> u32 {
    10
}

/// Budget allocation settings for the macro planner.
#[derive(Debug, Deserialize, Clone)]
pub struct AllocationConfig {
    /// Total live budget shared across workers.
    #[serde(default = "default_total_budget")]
    pub total_budget: Decimal,
    #[serde(default = "default_min_fraction")]
    pub min_fraction: f64,
    #[serde(default = "default_max_fraction")]
    pub max_fraction: f64,
    /// Floor fraction for designated core assets.
    #[serde(default = "default_core_floor")]
    pub core_floor_fraction: f64,
    /// How many assets the planner keeps.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Volume ratio at which a surge is flagged in the rationale.
    #[serde(default = "default_surge_ratio")]
    pub volume_surge_ratio: f64,
    /// Candidates scoring below this are not allocatable.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_core_assets")]
    pub core_assets: Vec<String>,
    /// Full candidate universe scanned on the macro cadence.
    #[serde(default)]
    pub universe: Vec<String>,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        AllocationConfig {
            total_budget: default_total_budget(),
            min_fraction: default_min_fraction(),
            max_fraction: default_max_fraction(),
            core_floor_fraction: default_core_floor(),
            top_k: default_top_k(),
            volume_surge_ratio: default_surge_ratio(),
            min_score: default_min_score(),
            core_assets: default_core_assets(),
            universe: Vec::new(),
        }
    }
}

fn default_total_budget() -> Decimal {
    dec!(600000)
}
fn default_min_fraction() -> f64 {
    0.05
}
fn default_max_fraction() -> f64 {
    0.40
}
fn default_core_floor() -> f64 {
    0.20
}
fn default_top_k() -> usize {
    5
}
fn default_surge_ratio() -> f64 {
    3.0
}
fn default_min_score() -> f64 {
    1.0
}
fn default_core_assets() -> Vec<String> {
    vec!["KRW-BTC".to_string(), "KRW-ETH".to_string()]
}

/// External analysis provider settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub endpoint: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Consecutive failures before the provider is latched unavailable.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            endpoint: default_provider_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_provider_timeout(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

fn default_provider_url() -> String {
    "https://api.example.com/v1/analyze".to_string()
}
fn default_api_key_env() -> String {
    "VIGIL_PROVIDER_API_KEY".to_string()
}
fn default_provider_timeout() -> u64 {
    10
}
fn default_max_failures() -> u32 {
    3
}

/// Market-data gateway settings (candles, tickers, news digest).
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            base_url: default_gateway_url(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

fn default_gateway_url() -> String {
    "http://localhost:8090".to_string()
}
fn default_gateway_timeout() -> u64 {
    5
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
