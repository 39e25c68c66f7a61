//! REST market-data gateway client.
//!
//! Talks to the data gateway service that aggregates exchange candles,
//! precomputed technical summaries, and the news digest. Implements
//! both `MarketDataSource` and `NewsSource` against its JSON API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{MarketDataSource, NewsSource};
use crate::config::GatewayConfig;
use crate::types::{Candle, MarketSnapshot, NewsDigest, TechnicalSummary};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    price: f64,
    candles: Vec<CandleWire>,
    #[serde(default)]
    technical: Option<TechnicalSummary>,
}

#[derive(Debug, Deserialize)]
struct CandleWire {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct DigestResponse {
    #[serde(default)]
    urgency: f64,
    #[serde(default)]
    count_1h: u32,
    #[serde(default)]
    emergency: bool,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RestGateway {
    http: Client,
    base_url: String,
}

impl RestGateway {
    pub fn new(cfg: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build gateway HTTP client")?;

        Ok(RestGateway {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketDataSource for RestGateway {
    async fn snapshot(&self, asset_id: &str, bars: usize) -> Result<MarketSnapshot> {
        let url = format!("{}/v1/snapshot", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("asset", asset_id), ("bars", &bars.to_string())])
            .send()
            .await
            .with_context(|| format!("Gateway snapshot request failed for {asset_id}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gateway snapshot error {status} for {asset_id}: {text}");
        }

        let body: SnapshotResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse gateway snapshot for {asset_id}"))?;

        debug!(asset = %asset_id, bars = body.candles.len(), "snapshot fetched");
        Ok(MarketSnapshot {
            asset_id: asset_id.to_string(),
            price: body.price,
            candles: body
                .candles
                .into_iter()
                .map(|c| Candle {
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume: c.volume,
                })
                .collect(),
            technical: body.technical.unwrap_or_default(),
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl NewsSource for RestGateway {
    async fn digest(&self) -> Result<NewsDigest> {
        let url = format!("{}/v1/news/digest", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Gateway digest request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Gateway digest error {status}");
        }

        let body: DigestResponse = response
            .json()
            .await
            .context("Failed to parse gateway digest")?;

        Ok(NewsDigest {
            urgency: body.urgency,
            count_1h: body.count_1h,
            emergency: body.emergency,
        })
    }
}
