use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Hard capital-preservation limits. Configuration, not state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub starting_capital: f64,
    /// Reject all new entries at or beyond this drawdown from peak (percent).
    pub max_drawdown_pct: f64,
    /// Reject new entries once today's realized loss exceeds this percent of
    /// start-of-day capital.
    pub max_daily_loss_pct: f64,
    /// Global cap on a single trade's notional, percent of current capital.
    pub max_position_pct: f64,
    /// Cap on combined exposure to one underlying, percent of current capital.
    pub max_correlation_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            starting_capital: 100_000.0,
            max_drawdown_pct: 15.0,
            max_daily_loss_pct: 5.0,
            max_position_pct: 20.0,
            max_correlation_pct: 50.0,
        }
    }
}

/// Account figures derived from the position store each cycle; the inputs
/// from which `RiskState` is computed.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub realized_pnl_total: f64,
    pub realized_pnl_today: f64,
    /// Open notional per symbol.
    pub open_exposure: Vec<(String, f64)>,
}

/// Process-wide risk state, recomputed at the start of every tick.
///
/// Invariants: `current_drawdown_pct >= 0` and `peak_capital` never
/// decreases (the peak is durable in the `portfolio_peak` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub current_capital: f64,
    pub peak_capital: f64,
    pub current_drawdown_pct: f64,
    pub daily_realized_pnl: f64,
    pub total_exposure_pct: f64,
    pub per_symbol_exposure_pct: HashMap<String, f64>,
}

/// A trade awaiting risk authorization.
#[derive(Debug, Clone)]
pub struct ProposedTrade {
    pub symbol: String,
    pub strategy_name: String,
    /// Total premium outlay (contracts x mid x 100).
    pub notional: f64,
    /// The strategy's own position cap, percent of capital.
    pub strategy_max_pct: f64,
}

/// Authorization outcome. A rejection is a first-class decision with the
/// breached limit's name, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Approved,
    Rejected { limit: &'static str, detail: String },
}

impl Authorization {
    pub fn is_approved(&self) -> bool {
        matches!(self, Authorization::Approved)
    }

    pub fn limit_name(&self) -> Option<&'static str> {
        match self {
            Authorization::Approved => None,
            Authorization::Rejected { limit, .. } => Some(limit),
        }
    }
}

pub const LIMIT_MAX_DRAWDOWN: &str = "max_drawdown";
pub const LIMIT_DAILY_LOSS: &str = "daily_loss";
pub const LIMIT_POSITION_SIZE: &str = "position_size";
pub const LIMIT_CORRELATION: &str = "correlation";

/// Reporting-only rolling performance statistics. Not consulted by
/// `authorize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub trade_count: usize,
    pub win_rate: f64,
    pub avg_pnl: f64,
    /// Annualized mean/stddev of per-trade returns on starting capital.
    pub sharpe_ratio: f64,
}
