//! Account-level risk limits with a sticky trading halt.
//!
//! Three limits latch the whole engine halted when breached: daily
//! loss, consecutive losses, and peak-to-trough drawdown. The latch is
//! sticky — recovering below a limit does NOT resume trading; only an
//! explicit operator [`RiskGate::resume`] does.
//!
//! Position-count and trade-count caps are softer: they block new
//! exposure for the affected venue class without latching.

use chrono::{Local, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::RiskConfig;
use crate::types::MarketClass;

/// Fraction of a hard limit at which a warning is emitted.
const WARN_FRACTION: f64 = 0.7;

/// Persistable account risk state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub date: NaiveDate,
    /// Cumulative signed daily P&L as a fraction of the account.
    pub daily_pnl: f64,
    pub consecutive_losses: u32,
    pub peak_equity: Decimal,
    pub equity: Decimal,
    pub open_spot_positions: u32,
    pub open_futures_positions: u32,
    pub spot_trades_today: u32,
    pub futures_trades_today: u32,
    pub halted: bool,
    pub halt_reason: Option<String>,
}

impl RiskState {
    pub fn fresh(equity: Decimal) -> Self {
        RiskState {
            date: Local::now().date_naive(),
            daily_pnl: 0.0,
            consecutive_losses: 0,
            peak_equity: equity,
            equity,
            open_spot_positions: 0,
            open_futures_positions: 0,
            spot_trades_today: 0,
            futures_trades_today: 0,
            halted: false,
            halt_reason: None,
        }
    }

    /// Peak-to-trough drawdown as a fraction (0 when at the peak).
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= Decimal::ZERO {
            return 0.0;
        }
        let dd = (self.peak_equity - self.equity) / self.peak_equity;
        dd.to_f64().unwrap_or(0.0).max(0.0)
    }
}

/// One evaluation of the limits.
#[derive(Debug, Clone)]
pub struct RiskVerdict {
    /// Whether new exposure may be opened for the queried venue class.
    pub trading_allowed: bool,
    pub halted: bool,
    /// Why exposure is blocked, when it is. Carries the latched halt
    /// reason even on checks long after the breach itself.
    pub reason: Option<String>,
    pub warnings: Vec<String>,
    pub breaches: Vec<String>,
}

/// The risk gate: owns the state, evaluates limits, latches the halt.
pub struct RiskGate {
    cfg: RiskConfig,
    state: RiskState,
}

impl RiskGate {
    pub fn new(cfg: RiskConfig, initial_equity: Decimal) -> Self {
        RiskGate {
            cfg,
            state: RiskState::fresh(initial_equity),
        }
    }

    /// Restore from persisted state. Daily counters from a previous
    /// calendar date are zeroed; the halt latch survives restarts.
    pub fn from_state(cfg: RiskConfig, mut state: RiskState) -> Self {
        let today = Local::now().date_naive();
        if state.date != today {
            info!(stale_date = %state.date, "rolling risk state to new day");
            state.date = today;
            state.daily_pnl = 0.0;
            state.spot_trades_today = 0;
            state.futures_trades_today = 0;
        }
        RiskGate { cfg, state }
    }

    fn reset_if_new_day(&mut self) {
        let today = Local::now().date_naive();
        if self.state.date != today {
            self.state.date = today;
            self.state.daily_pnl = 0.0;
            self.state.spot_trades_today = 0;
            self.state.futures_trades_today = 0;
        }
    }

    /// Evaluate all limits for opening new exposure on `class`.
    /// Each limit is checked independently so one breach does not mask
    /// another in the log.
    pub fn check(&mut self, class: MarketClass) -> RiskVerdict {
        self.reset_if_new_day();

        let mut warnings = Vec::new();
        let mut breaches = Vec::new();

        // Daily loss (loss is negative pnl).
        let daily_loss = (-self.state.daily_pnl).max(0.0);
        if daily_loss >= self.cfg.daily_loss_limit {
            breaches.push(format!(
                "daily loss {:.1}% >= limit {:.1}%",
                daily_loss * 100.0,
                self.cfg.daily_loss_limit * 100.0
            ));
        } else if daily_loss >= self.cfg.daily_loss_limit * WARN_FRACTION {
            warnings.push(format!(
                "daily loss {:.1}% approaching limit {:.1}%",
                daily_loss * 100.0,
                self.cfg.daily_loss_limit * 100.0
            ));
        }

        // Consecutive losses.
        if self.state.consecutive_losses >= self.cfg.max_consecutive_losses {
            breaches.push(format!(
                "{} consecutive losses >= limit {}",
                self.state.consecutive_losses, self.cfg.max_consecutive_losses
            ));
        } else if self.state.consecutive_losses + 1 >= self.cfg.max_consecutive_losses {
            warnings.push(format!(
                "{} consecutive losses, one away from halt",
                self.state.consecutive_losses
            ));
        }

        // Drawdown.
        let dd = self.state.drawdown();
        if dd >= self.cfg.drawdown_limit {
            breaches.push(format!(
                "drawdown {:.1}% >= limit {:.1}%",
                dd * 100.0,
                self.cfg.drawdown_limit * 100.0
            ));
        } else if dd >= self.cfg.drawdown_limit * WARN_FRACTION {
            warnings.push(format!(
                "drawdown {:.1}% approaching limit {:.1}%",
                dd * 100.0,
                self.cfg.drawdown_limit * 100.0
            ));
        }

        // Any hard breach latches the halt.
        if !breaches.is_empty() && !self.state.halted {
            let reason = breaches.join("; ");
            error!(%reason, "risk limit breached, trading halted");
            self.state.halted = true;
            self.state.halt_reason = Some(reason);
        }

        for w in &warnings {
            warn!("{w}");
        }

        // Per-class soft caps: block without latching.
        let class_block = match class {
            MarketClass::Spot => {
                if self.state.open_spot_positions >= self.cfg.max_spot_positions {
                    Some(format!(
                        "spot position cap {} reached",
                        self.cfg.max_spot_positions
                    ))
                } else if self.state.spot_trades_today >= self.cfg.max_spot_trades_per_day {
                    Some(format!(
                        "spot trade cap {} reached for today",
                        self.cfg.max_spot_trades_per_day
                    ))
                } else {
                    None
                }
            }
            MarketClass::Futures => {
                if self.state.open_futures_positions >= self.cfg.max_futures_positions {
                    Some(format!(
                        "futures position cap {} reached",
                        self.cfg.max_futures_positions
                    ))
                } else if self.state.futures_trades_today >= self.cfg.max_futures_trades_per_day {
                    Some(format!(
                        "futures trade cap {} reached for today",
                        self.cfg.max_futures_trades_per_day
                    ))
                } else {
                    None
                }
            }
        };

        let reason = if self.state.halted {
            self.state.halt_reason.clone()
        } else {
            class_block.clone()
        };

        RiskVerdict {
            trading_allowed: !self.state.halted && class_block.is_none(),
            halted: self.state.halted,
            reason,
            warnings,
            breaches,
        }
    }

    /// Record a completed trade: signed P&L fraction and venue class.
    pub fn record_trade(&mut self, class: MarketClass, pnl_fraction: f64) {
        self.reset_if_new_day();
        self.state.daily_pnl += pnl_fraction;
        if pnl_fraction < 0.0 {
            self.state.consecutive_losses += 1;
        } else {
            self.state.consecutive_losses = 0;
        }
        match class {
            MarketClass::Spot => self.state.spot_trades_today += 1,
            MarketClass::Futures => self.state.futures_trades_today += 1,
        }
    }

    pub fn position_opened(&mut self, class: MarketClass) {
        match class {
            MarketClass::Spot => self.state.open_spot_positions += 1,
            MarketClass::Futures => self.state.open_futures_positions += 1,
        }
    }

    pub fn position_closed(&mut self, class: MarketClass) {
        match class {
            MarketClass::Spot => {
                self.state.open_spot_positions = self.state.open_spot_positions.saturating_sub(1)
            }
            MarketClass::Futures => {
                self.state.open_futures_positions =
                    self.state.open_futures_positions.saturating_sub(1)
            }
        }
    }

    /// Update account equity; the peak only ratchets upward.
    pub fn update_equity(&mut self, equity: Decimal) {
        self.state.equity = equity;
        if equity > self.state.peak_equity {
            self.state.peak_equity = equity;
        }
    }

    /// Operator-initiated resume. The only way out of a halt.
    pub fn resume(&mut self) {
        info!(
            reason = self.state.halt_reason.as_deref().unwrap_or("-"),
            "trading halt cleared by operator"
        );
        self.state.halted = false;
        self.state.halt_reason = None;
        self.state.consecutive_losses = 0;
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }
}
