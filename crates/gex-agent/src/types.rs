use chrono::{DateTime, NaiveDate, Utc};
use gex_gateway::OptionType;
use regime_classifier::{GexSnapshot, Regime};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a position. Open positions are evaluated every
/// management pass; closed positions are immutable history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn from_name(name: &str) -> PositionStatus {
        match name {
            "CLOSED" => PositionStatus::Closed,
            _ => PositionStatus::Open,
        }
    }
}

/// Why a position was closed. Recorded with the closing trade and used in
/// the daily summary breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    Expiration,
    RegimeFlip,
    EarlyProfitLock,
}

impl ExitReason {
    pub fn name(&self) -> &'static str {
        match self {
            ExitReason::ProfitTarget => "PROFIT_TARGET",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::Expiration => "EXPIRATION",
            ExitReason::RegimeFlip => "REGIME_FLIP",
            ExitReason::EarlyProfitLock => "EARLY_PROFIT_LOCK",
        }
    }

    pub fn from_name(name: &str) -> Option<ExitReason> {
        match name {
            "PROFIT_TARGET" => Some(ExitReason::ProfitTarget),
            "STOP_LOSS" => Some(ExitReason::StopLoss),
            "EXPIRATION" => Some(ExitReason::Expiration),
            "REGIME_FLIP" => Some(ExitReason::RegimeFlip),
            "EARLY_PROFIT_LOCK" => Some(ExitReason::EarlyProfitLock),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single long option position.
///
/// `entry_snapshot` and `entry_regime` are frozen at entry time so the
/// regime-flip exit compares against the conditions the trade was actually
/// opened under, not a re-read of history.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub strategy_name: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub contracts: i64,
    /// Per-contract premium paid at entry.
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_regime: Regime,
    pub entry_snapshot: GexSnapshot,
    pub status: PositionStatus,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<f64>,
    pub realized_pnl: Option<f64>,
}

impl Position {
    /// Total premium at risk (contracts x entry price x 100 multiplier).
    pub fn notional(&self) -> f64 {
        self.contracts as f64 * self.entry_price * 100.0
    }

    /// Unrealized P&L percent for a given per-contract mark.
    pub fn unrealized_pct(&self, mark: f64) -> f64 {
        if self.entry_price > 0.0 {
            (mark - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        }
    }

    /// Calendar days to expiration from the given date. Can be negative if
    /// evaluation slips past expiry.
    pub fn days_to_expiration(&self, today: NaiveDate) -> i64 {
        (self.expiration - today).num_days()
    }
}

/// A position close produced by the management pass.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub position_id: String,
    pub symbol: String,
    pub strategy_name: String,
    pub reason: ExitReason,
    pub exit_price: f64,
    pub realized_pnl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_position() -> Position {
        Position {
            id: "p-1".to_string(),
            symbol: "SPY".to_string(),
            strategy_name: "gamma_squeeze_call".to_string(),
            option_type: OptionType::Call,
            strike: 582.0,
            expiration: NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
            contracts: 5,
            entry_price: 4.0,
            entry_time: Utc::now(),
            entry_regime: Regime::NegativeGexSqueeze,
            entry_snapshot: GexSnapshot {
                symbol: "SPY".to_string(),
                timestamp: Utc::now(),
                spot_price: 576.0,
                net_gex: Some(-2.0e9),
                flip_point: Some(580.0),
                call_wall: Some(585.0),
                put_wall: Some(570.0),
                implied_vol: Some(0.18),
            },
            status: PositionStatus::Open,
            exit_reason: None,
            exit_price: None,
            realized_pnl: None,
        }
    }

    #[test]
    fn notional_includes_contract_multiplier() {
        let p = sample_position();
        assert_eq!(p.notional(), 2_000.0);
    }

    #[test]
    fn unrealized_pct_from_entry() {
        let p = sample_position();
        assert!((p.unrealized_pct(6.0) - 50.0).abs() < 1e-9);
        assert!((p.unrealized_pct(2.8) - (-30.0)).abs() < 1e-9);
    }

    #[test]
    fn exit_reason_names_round_trip() {
        for reason in [
            ExitReason::ProfitTarget,
            ExitReason::StopLoss,
            ExitReason::Expiration,
            ExitReason::RegimeFlip,
            ExitReason::EarlyProfitLock,
        ] {
            assert_eq!(ExitReason::from_name(reason.name()), Some(reason));
        }
        assert_eq!(ExitReason::from_name("bogus"), None);
    }
}
