//! HTTP-backed external analysis provider.
//!
//! Implements `AnalysisProvider` against a JSON analysis endpoint.
//! Responses are decoded at this boundary into the shared
//! [`AnalysisResult`] type; malformed numeric fields fall back to
//! conservative defaults and an unrecognized regime string becomes
//! `Regime::Unknown` rather than poisoning the decision path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AnalysisProvider, AnalysisRequest, ProviderHealth};
use crate::config::ProviderConfig;
use crate::credit::CreditAction;
use crate::fusion::policy_for_urgency;
use crate::types::{
    AnalysisResult, NewsSentiment, Regime, SourceTag, VigilError, VolatilityBucket,
};

/// Confidence assumed when the provider omits one.
const DEFAULT_CONFIDENCE: f64 = 0.5;
/// Urgency assumed when the provider omits one.
const DEFAULT_URGENCY: f64 = 5.0;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    asset_id: &'a str,
    price: f64,
    composite_score: f64,
    rsi: Option<f64>,
    news_urgency: Option<f64>,
    news_emergency: bool,
    trigger_reasons: &'a [String],
    mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    regime: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    volatility: Option<String>,
    #[serde(default)]
    news_sentiment: Option<String>,
    #[serde(default)]
    news_urgency: Option<f64>,
    #[serde(default)]
    emergency: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl AnalyzeResponse {
    /// Decode into the shared result type. Lenient on optionals,
    /// strict on structure: a body that is not this shape fails the
    /// call entirely.
    fn into_result(self) -> AnalysisResult {
        let regime = self.regime.parse::<Regime>().unwrap_or_else(|_| {
            warn!(raw = %self.regime, "unrecognized regime from provider");
            Regime::Unknown
        });
        let confidence = self
            .confidence
            .filter(|c| (0.0..=1.0).contains(c))
            .unwrap_or(DEFAULT_CONFIDENCE);
        let news_urgency = self
            .news_urgency
            .filter(|u| (0.0..=10.0).contains(u))
            .unwrap_or(DEFAULT_URGENCY);
        let volatility = match self.volatility.as_deref() {
            Some("LOW") => VolatilityBucket::Low,
            Some("HIGH") => VolatilityBucket::High,
            _ => VolatilityBucket::Medium,
        };
        let news_sentiment = match self.news_sentiment.as_deref() {
            Some("BULLISH") => NewsSentiment::Bullish,
            Some("BEARISH") => NewsSentiment::Bearish,
            Some("EMERGENCY") => NewsSentiment::Emergency,
            _ => NewsSentiment::Neutral,
        };

        AnalysisResult {
            regime,
            confidence,
            volatility,
            policy: policy_for_urgency(news_urgency),
            news_sentiment,
            news_urgency,
            emergency: self.emergency,
            reason: self.reason.unwrap_or_else(|| "provider analysis".to_string()),
            source: SourceTag::External,
            timestamp: Utc::now(),
        }
    }
}

fn mode_label(action: CreditAction) -> &'static str {
    match action {
        CreditAction::Standard => "standard",
        CreditAction::Debate => "debate",
        CreditAction::Emergency => "emergency",
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RemoteAnalyst {
    http: Client,
    endpoint: String,
    api_key: String,
    health: ProviderHealth,
}

impl RemoteAnalyst {
    pub fn new(cfg: &ProviderConfig, api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build analysis provider HTTP client")?;

        Ok(RemoteAnalyst {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key,
            health: ProviderHealth::new(cfg.max_consecutive_failures),
        })
    }

    async fn call_api(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        let news = request.news.as_ref();
        let body = AnalyzeRequest {
            asset_id: &request.snapshot.asset_id,
            price: request.snapshot.price,
            composite_score: request.snapshot.technical.composite_score,
            rsi: request.snapshot.technical.rsi,
            news_urgency: news.map(|n| n.urgency),
            news_emergency: news.is_some_and(|n| n.emergency),
            trigger_reasons: &request.trigger_reasons,
            mode: mode_label(request.action),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Analysis provider request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Analysis provider error {status}: {text}");
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .context("Failed to parse analysis provider response")?;

        debug!(
            asset = %request.snapshot.asset_id,
            regime = %parsed.regime,
            "external analysis received"
        );
        Ok(parsed.into_result())
    }
}

#[async_trait]
impl AnalysisProvider for RemoteAnalyst {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        if !self.health.is_available() {
            return Err(VigilError::ProviderUnavailable {
                failures: self.health.consecutive_failures(),
            }
            .into());
        }

        match self.call_api(request).await {
            Ok(result) => {
                self.health.record_success();
                Ok(result)
            }
            Err(e) => {
                let failures = self.health.record_failure();
                warn!(
                    asset = %request.snapshot.asset_id,
                    failures,
                    error = %e,
                    "external analysis failed"
                );
                Err(e)
            }
        }
    }

    fn is_available(&self) -> bool {
        self.health.is_available()
    }

    fn reset(&self) {
        self.health.reset();
    }

    fn name(&self) -> &str {
        "remote"
    }
}
