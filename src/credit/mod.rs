//! Daily credit budget for external analysis calls.
//!
//! Every external call costs credits (deeper analysis modes cost more).
//! The ledger enforces a hard daily limit that resets lazily at local
//! midnight: the first operation on a new calendar date zeroes usage,
//! so no scheduled reset task is needed.
//!
//! Spending is check-and-spend in a single call. Wrap the ledger in
//! [`SharedLedger`] so concurrent workers cannot interleave a check
//! with a spend and overdraw the budget.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::CreditConfig;
use crate::types::VigilError;

/// What kind of external analysis a spend pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditAction {
    /// Single-pass analysis.
    Standard,
    /// Multi-perspective debate analysis.
    Debate,
    /// Emergency re-assessment.
    Emergency,
}

impl CreditAction {
    pub fn cost(&self, cfg: &CreditConfig) -> u32 {
        match self {
            CreditAction::Standard => cfg.cost_standard,
            CreditAction::Debate => cfg.cost_debate,
            CreditAction::Emergency => cfg.cost_emergency,
        }
    }
}

/// One successful spend, kept for the daily audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    pub at: DateTime<Utc>,
    pub asset_id: String,
    pub action: CreditAction,
    pub cost: u32,
}

/// Persistable ledger state: the date it belongs to plus usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub used: u32,
    #[serde(default)]
    pub spends: Vec<SpendRecord>,
}

impl LedgerEntry {
    fn fresh(date: NaiveDate) -> Self {
        LedgerEntry {
            date,
            used: 0,
            spends: Vec::new(),
        }
    }
}

/// Point-in-time usage summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditStatus {
    pub date: NaiveDate,
    pub used: u32,
    pub remaining: u32,
    pub daily_limit: u32,
    pub spend_count: usize,
}

/// The daily credit ledger. Not thread-safe by itself; see [`SharedLedger`].
pub struct CreditLedger {
    cfg: CreditConfig,
    entry: LedgerEntry,
}

impl CreditLedger {
    pub fn new(cfg: CreditConfig) -> Self {
        let entry = LedgerEntry::fresh(Local::now().date_naive());
        CreditLedger { cfg, entry }
    }

    /// Restore from a persisted entry. An entry from a previous calendar
    /// date is discarded so the new day starts with a full budget.
    pub fn from_entry(cfg: CreditConfig, entry: LedgerEntry) -> Self {
        let today = Local::now().date_naive();
        let entry = if entry.date == today {
            entry
        } else {
            info!(
                stale_date = %entry.date,
                "discarding stale credit ledger entry"
            );
            LedgerEntry::fresh(today)
        };
        CreditLedger { cfg, entry }
    }

    /// Roll to a fresh entry if the calendar date has changed.
    fn reset_if_new_day(&mut self) {
        let today = Local::now().date_naive();
        if self.entry.date != today {
            info!(
                used_yesterday = self.entry.used,
                limit = self.cfg.daily_limit,
                "daily credit budget reset"
            );
            self.entry = LedgerEntry::fresh(today);
        }
    }

    /// Whether the action is affordable right now. Advisory only.
    pub fn can_spend(&mut self, action: CreditAction) -> bool {
        self.reset_if_new_day();
        self.entry.used + action.cost(&self.cfg) <= self.cfg.daily_limit
    }

    /// Atomically check affordability and deduct. Returns the remaining
    /// balance on success.
    pub fn try_spend(&mut self, asset_id: &str, action: CreditAction) -> Result<u32, VigilError> {
        self.reset_if_new_day();
        let cost = action.cost(&self.cfg);
        let remaining = self.cfg.daily_limit.saturating_sub(self.entry.used);
        if cost > remaining {
            warn!(
                asset = asset_id,
                ?action,
                cost,
                remaining,
                "credit spend refused"
            );
            return Err(VigilError::CreditExhausted {
                needed: cost,
                remaining,
            });
        }
        self.entry.used += cost;
        self.entry.spends.push(SpendRecord {
            at: Utc::now(),
            asset_id: asset_id.to_string(),
            action,
            cost,
        });
        Ok(self.cfg.daily_limit - self.entry.used)
    }

    pub fn remaining(&mut self) -> u32 {
        self.reset_if_new_day();
        self.cfg.daily_limit.saturating_sub(self.entry.used)
    }

    pub fn status(&mut self) -> CreditStatus {
        self.reset_if_new_day();
        CreditStatus {
            date: self.entry.date,
            used: self.entry.used,
            remaining: self.cfg.daily_limit.saturating_sub(self.entry.used),
            daily_limit: self.cfg.daily_limit,
            spend_count: self.entry.spends.len(),
        }
    }

    /// Snapshot for persistence.
    pub fn entry(&self) -> &LedgerEntry {
        &self.entry
    }
}

/// Ledger shared across worker tasks. All spending goes through one
/// mutex so check-and-spend is atomic under concurrency.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<CreditLedger>>,
}

impl SharedLedger {
    pub fn new(ledger: CreditLedger) -> Self {
        SharedLedger {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    pub async fn try_spend(
        &self,
        asset_id: &str,
        action: CreditAction,
    ) -> Result<u32, VigilError> {
        self.inner.lock().await.try_spend(asset_id, action)
    }

    pub async fn can_spend(&self, action: CreditAction) -> bool {
        self.inner.lock().await.can_spend(action)
    }

    pub async fn remaining(&self) -> u32 {
        self.inner.lock().await.remaining()
    }

    pub async fn status(&self) -> CreditStatus {
        self.inner.lock().await.status()
    }

    pub async fn entry(&self) -> LedgerEntry {
        self.inner.lock().await.entry().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cfg() -> CreditConfig {
        CreditConfig::default()
    }

    #[test]
    fn test_costs_by_action() {
        let c = cfg();
        assert_eq!(CreditAction::Standard.cost(&c), 1);
        assert_eq!(CreditAction::Debate.cost(&c), 2);
        assert_eq!(CreditAction::Emergency.cost(&c), 3);
    }

    #[test]
    fn test_spend_deducts_and_records() {
        let mut ledger = CreditLedger::new(cfg());
        let remaining = ledger.try_spend("KRW-BTC", CreditAction::Debate).unwrap();
        assert_eq!(remaining, 48);
        let status = ledger.status();
        assert_eq!(status.used, 2);
        assert_eq!(status.spend_count, 1);
    }

    #[test]
    fn test_refuses_when_exhausted() {
        let mut ledger = CreditLedger::new(cfg());
        for _ in 0..50 {
            ledger.try_spend("KRW-BTC", CreditAction::Standard).unwrap();
        }
        assert_eq!(ledger.remaining(), 0);
        let err = ledger
            .try_spend("KRW-BTC", CreditAction::Standard)
            .unwrap_err();
        match err {
            VigilError::CreditExhausted { needed, remaining } => {
                assert_eq!(needed, 1);
                assert_eq!(remaining, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_refuses_partial_affordability() {
        // 49 used, emergency costs 3: must refuse, not overdraw.
        let mut ledger = CreditLedger::new(cfg());
        for _ in 0..49 {
            ledger.try_spend("KRW-BTC", CreditAction::Standard).unwrap();
        }
        assert!(!ledger.can_spend(CreditAction::Emergency));
        assert!(ledger
            .try_spend("KRW-BTC", CreditAction::Emergency)
            .is_err());
        assert_eq!(ledger.remaining(), 1);
        assert!(ledger.can_spend(CreditAction::Standard));
    }

    #[test]
    fn test_stale_entry_discarded_on_restore() {
        let yesterday = Local::now().date_naive() - Duration::days(1);
        let entry = LedgerEntry {
            date: yesterday,
            used: 47,
            spends: Vec::new(),
        };
        let mut ledger = CreditLedger::from_entry(cfg(), entry);
        assert_eq!(ledger.remaining(), 50);
    }

    #[test]
    fn test_same_day_entry_restored() {
        let entry = LedgerEntry {
            date: Local::now().date_naive(),
            used: 12,
            spends: Vec::new(),
        };
        let mut ledger = CreditLedger::from_entry(cfg(), entry);
        assert_eq!(ledger.remaining(), 38);
    }

    #[test]
    fn test_lazy_reset_on_new_day() {
        let mut ledger = CreditLedger::new(cfg());
        ledger.try_spend("KRW-ETH", CreditAction::Standard).unwrap();
        // Simulate the process having lived across midnight.
        ledger.entry.date = Local::now().date_naive() - Duration::days(1);
        assert_eq!(ledger.remaining(), 50);
        assert_eq!(ledger.status().spend_count, 0);
    }

    #[tokio::test]
    async fn test_shared_ledger_atomic_spend() {
        let shared = SharedLedger::new(CreditLedger::new(cfg()));
        let mut handles = Vec::new();
        for i in 0..60 {
            let s = shared.clone();
            handles.push(tokio::spawn(async move {
                s.try_spend(&format!("A-{i}"), CreditAction::Standard).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 50);
        assert_eq!(shared.remaining().await, 0);
    }
}
