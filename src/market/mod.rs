//! External collaborator seams.
//!
//! VIGIL consumes market data and news, and emits strategy directives;
//! it never talks to an exchange directly. These traits are the
//! boundaries: production wires real clients in, tests wire mocks.

pub mod paper;
pub mod rest;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{MarketSnapshot, NewsDigest, PositionSnapshot, StrategyDirective};

/// Source of per-asset market snapshots.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch a snapshot with at least `bars` of trailing history where
    /// available. Short history is fine; consumers degrade gracefully.
    async fn snapshot(&self, asset_id: &str, bars: usize) -> Result<MarketSnapshot>;
}

/// Source of the aggregated news view.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Market-wide digest, refreshed on its own cadence.
    async fn digest(&self) -> Result<NewsDigest>;
}

/// Downstream consumer of strategy directives. Order placement and
/// position bookkeeping live behind this seam.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    /// Apply one directive. Must be idempotent for identical
    /// consecutive directives.
    async fn apply(&self, directive: &StrategyDirective) -> Result<()>;

    /// Current open position for the asset, if any.
    async fn position(&self, asset_id: &str) -> Result<Option<PositionSnapshot>>;

    /// Wind down all exposure for the asset (worker retirement).
    async fn release(&self, asset_id: &str) -> Result<()>;
}
