//! Persistence layer.
//!
//! Saves and loads engine state to/from a JSON file so credit usage
//! and the risk latch survive restarts. The stale-date handling lives
//! in the owning modules: `CreditLedger::from_entry` and
//! `RiskGate::from_state` discard day-scoped counters from previous
//! calendar dates.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::credit::LedgerEntry;
use crate::risk::RiskState;

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "vigil_state.json";

/// Everything VIGIL persists between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub ledger: LedgerEntry,
    pub risk: RiskState,
}

/// Save engine state to a JSON file.
pub fn save_state(state: &EngineState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state)
        .context("Failed to serialise engine state")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write state to {path}"))?;

    debug!(path, credits_used = state.ledger.used, "State saved");
    Ok(())
}

/// Load engine state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<EngineState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read state from {path}"))?;

    let state: EngineState = serde_json::from_str(&json)
        .context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        ledger_date = %state.ledger.date,
        credits_used = state.ledger.used,
        halted = state.risk.halted,
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
