//! Paper strategy executor.
//!
//! Logs every directive instead of forwarding it to a live strategy
//! runtime. This is the default executor until a real one is wired in,
//! and doubles as the audit trail when validating decision quality.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

use super::StrategyExecutor;
use crate::types::{PositionSnapshot, StrategyDirective};

#[derive(Default)]
pub struct PaperExecutor {
    /// Last directive per asset, for idempotence and inspection.
    directives: Mutex<HashMap<String, StrategyDirective>>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        PaperExecutor::default()
    }

    pub fn last_directive(&self, asset_id: &str) -> Option<StrategyDirective> {
        self.directives.lock().unwrap().get(asset_id).cloned()
    }
}

#[async_trait]
impl StrategyExecutor for PaperExecutor {
    async fn apply(&self, directive: &StrategyDirective) -> Result<()> {
        let strategies: Vec<String> =
            directive.strategies.iter().map(|s| s.to_string()).collect();
        info!(
            asset = %directive.asset_id,
            regime = %directive.regime,
            budget = %directive.budget,
            strategies = ?strategies,
            reason = %directive.reason,
            "paper directive"
        );
        self.directives
            .lock()
            .unwrap()
            .insert(directive.asset_id.clone(), directive.clone());
        Ok(())
    }

    async fn position(&self, _asset_id: &str) -> Result<Option<PositionSnapshot>> {
        // Paper mode holds no positions.
        Ok(None)
    }

    async fn release(&self, asset_id: &str) -> Result<()> {
        info!(asset = %asset_id, "paper exposure released");
        self.directives.lock().unwrap().remove(asset_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecisionPolicy, Regime, StrategyId};
    use rust_decimal_macros::dec;

    fn directive(asset: &str) -> StrategyDirective {
        StrategyDirective {
            asset_id: asset.to_string(),
            strategies: vec![StrategyId::Grid],
            budget: dec!(100000),
            policy: DecisionPolicy::Balanced,
            regime: Regime::Sideways,
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_records_last_directive() {
        let exec = PaperExecutor::new();
        exec.apply(&directive("KRW-BTC")).await.unwrap();
        let last = exec.last_directive("KRW-BTC").unwrap();
        assert_eq!(last.strategies, vec![StrategyId::Grid]);
    }

    #[tokio::test]
    async fn test_release_clears_directive() {
        let exec = PaperExecutor::new();
        exec.apply(&directive("KRW-BTC")).await.unwrap();
        exec.release("KRW-BTC").await.unwrap();
        assert!(exec.last_directive("KRW-BTC").is_none());
    }

    #[tokio::test]
    async fn test_no_positions_in_paper_mode() {
        let exec = PaperExecutor::new();
        assert!(exec.position("KRW-BTC").await.unwrap().is_none());
    }
}
