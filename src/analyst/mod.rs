//! External and local market analysis.
//!
//! Defines the `AnalysisProvider` trait for paid external analysis and
//! the provider health latch. The free local analyst lives in
//! [`local`]; the HTTP-backed provider in [`remote`].

pub mod local;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::credit::CreditAction;
use crate::types::{AnalysisResult, MarketSnapshot, NewsDigest};

/// Everything an external provider needs to judge one asset.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub snapshot: MarketSnapshot,
    pub news: Option<NewsDigest>,
    /// Why the trigger fired, for the provider's context.
    pub trigger_reasons: Vec<String>,
    /// Analysis depth, mirrors what the spend paid for.
    pub action: CreditAction,
}

/// Abstraction over paid external analysis providers.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Analyze one asset. Implementations must not be called unless
    /// credit has already been spent for `request.action`.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult>;

    /// Whether the provider is currently accepting calls.
    fn is_available(&self) -> bool;

    /// Clear the unavailability latch (operator action).
    fn reset(&self);

    /// Provider identifier for logs.
    fn name(&self) -> &str;
}

/// Consecutive-failure latch. After `max_failures` failures in a row
/// the provider reports unavailable until an explicit reset; a single
/// success also clears the streak.
pub struct ProviderHealth {
    failures: AtomicU32,
    max_failures: u32,
}

impl ProviderHealth {
    pub fn new(max_failures: u32) -> Self {
        ProviderHealth {
            failures: AtomicU32::new(0),
            max_failures,
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    /// Returns the new consecutive-failure count.
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_available(&self) -> bool {
        self.failures.load(Ordering::Relaxed) < self.max_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_latches_after_max_failures() {
        let h = ProviderHealth::new(3);
        assert!(h.is_available());
        h.record_failure();
        h.record_failure();
        assert!(h.is_available());
        h.record_failure();
        assert!(!h.is_available());
        assert_eq!(h.consecutive_failures(), 3);
    }

    #[test]
    fn test_success_clears_streak() {
        let h = ProviderHealth::new(3);
        h.record_failure();
        h.record_failure();
        h.record_success();
        assert_eq!(h.consecutive_failures(), 0);
        assert!(h.is_available());
    }

    #[test]
    fn test_latch_holds_until_reset() {
        let h = ProviderHealth::new(3);
        for _ in 0..3 {
            h.record_failure();
        }
        assert!(!h.is_available());
        h.reset();
        assert!(h.is_available());
    }
}
