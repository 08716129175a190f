use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use gex_gateway::GexGateway;
use regime_classifier::{GexSnapshot, Regime};
use strategy_catalog::StrategyDefinition;
use uuid::Uuid;

use crate::store::StateStore;
use crate::types::{ClosedTrade, ExitReason, Position, PositionStatus};

/// Exit thresholds, from configuration. Percentages are of entry premium.
#[derive(Debug, Clone)]
pub struct ExitRules {
    pub profit_target_pct: f64,
    /// Negative, e.g. -30.0.
    pub stop_loss_pct: f64,
    /// Close when days-to-expiration falls to this or below.
    pub min_dte_exit: i64,
    pub early_lock_profit_pct: f64,
    /// Early lock applies only while DTE is still at or above this.
    pub early_lock_min_dte: i64,
}

/// Decide whether an open position should be closed, and why.
///
/// Pure over its inputs; the management pass supplies a fresh mark and the
/// current regime, or `None` for the regime when no fresh read exists this
/// pass. A missing regime defers the flip check alone; it never stands in
/// for market evidence. Conditions are checked in fixed priority order and
/// the first hit wins, so a position that is past both its profit target
/// and its expiry cutoff closes as a profit-target exit.
pub fn plan_exit(
    position: &Position,
    mark: f64,
    current_regime: Option<Regime>,
    today: NaiveDate,
    rules: &ExitRules,
) -> Option<ExitReason> {
    let pnl_pct = position.unrealized_pct(mark);
    let dte = position.days_to_expiration(today);

    if pnl_pct >= rules.profit_target_pct {
        return Some(ExitReason::ProfitTarget);
    }
    if pnl_pct <= rules.stop_loss_pct {
        return Some(ExitReason::StopLoss);
    }
    if dte <= rules.min_dte_exit {
        return Some(ExitReason::Expiration);
    }
    if current_regime.is_some_and(|regime| regime != position.entry_regime) {
        return Some(ExitReason::RegimeFlip);
    }
    if pnl_pct >= rules.early_lock_profit_pct && dte >= rules.early_lock_min_dte {
        return Some(ExitReason::EarlyProfitLock);
    }
    None
}

/// Opens and closes positions against the store, pricing them through the
/// gateway. Exit decisions themselves live in `plan_exit`.
pub struct PositionEngine {
    gateway: Arc<GexGateway>,
    store: Arc<StateStore>,
    rules: ExitRules,
}

impl PositionEngine {
    pub fn new(gateway: Arc<GexGateway>, store: Arc<StateStore>, rules: ExitRules) -> Self {
        Self {
            gateway,
            store,
            rules,
        }
    }

    /// Record a freshly authorized entry. The GEX snapshot and regime are
    /// frozen onto the position for later regime-flip comparison.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_position(
        &self,
        strategy: &StrategyDefinition,
        snapshot: &GexSnapshot,
        regime: Regime,
        strike: f64,
        expiration: NaiveDate,
        contracts: i64,
        entry_price: f64,
    ) -> Result<Position> {
        let position = Position {
            id: Uuid::new_v4().to_string(),
            symbol: snapshot.symbol.clone(),
            strategy_name: strategy.name.to_string(),
            option_type: strategy.option_type,
            strike,
            expiration,
            contracts,
            entry_price,
            entry_time: Utc::now(),
            entry_regime: regime,
            entry_snapshot: snapshot.clone(),
            status: PositionStatus::Open,
            exit_reason: None,
            exit_price: None,
            realized_pnl: None,
        };

        self.store.insert_position(&position).await?;
        tracing::info!(
            position_id = %position.id,
            symbol = %position.symbol,
            strategy = %position.strategy_name,
            option_type = position.option_type.name(),
            strike = position.strike,
            expiration = %position.expiration,
            contracts = position.contracts,
            entry_price = position.entry_price,
            notional = position.notional(),
            "Position opened"
        );
        Ok(position)
    }

    /// Evaluate one open position against the exit rules, closing it if an
    /// exit fires. A failed quote fetch defers the decision to the next
    /// pass; the position stays untouched.
    pub async fn evaluate(
        &self,
        position: &Position,
        current_regime: Option<Regime>,
        today: NaiveDate,
    ) -> Result<Option<ClosedTrade>> {
        let quote = match self
            .gateway
            .get_option_quote(
                &position.symbol,
                position.strike,
                position.expiration,
                position.option_type,
            )
            .await
        {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(
                    position_id = %position.id,
                    symbol = %position.symbol,
                    error = %e,
                    "Quote unavailable; deferring exit evaluation"
                );
                return Ok(None);
            }
        };

        let mark = quote.mid();
        if mark <= 0.0 {
            tracing::warn!(
                position_id = %position.id,
                symbol = %position.symbol,
                "Unpriceable quote; deferring exit evaluation"
            );
            return Ok(None);
        }

        let Some(reason) = plan_exit(position, mark, current_regime, today, &self.rules) else {
            tracing::debug!(
                position_id = %position.id,
                symbol = %position.symbol,
                mark,
                pnl_pct = position.unrealized_pct(mark),
                dte = position.days_to_expiration(today),
                "Position holds"
            );
            return Ok(None);
        };

        let realized_pnl = (mark - position.entry_price) * position.contracts as f64 * 100.0;
        self.store
            .close_position(&position.id, reason, mark, realized_pnl, today)
            .await?;

        Ok(Some(ClosedTrade {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            strategy_name: position.strategy_name.clone(),
            reason,
            exit_price: mark,
            realized_pnl,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gex_gateway::OptionType;
    use regime_classifier::GexSnapshot;

    fn rules() -> ExitRules {
        ExitRules {
            profit_target_pct: 50.0,
            stop_loss_pct: -30.0,
            min_dte_exit: 1,
            early_lock_profit_pct: 25.0,
            early_lock_min_dte: 5,
        }
    }

    fn position(entry_price: f64, expiration: NaiveDate) -> Position {
        Position {
            id: "p-1".to_string(),
            symbol: "SPY".to_string(),
            strategy_name: "gamma_squeeze_call".to_string(),
            option_type: OptionType::Call,
            strike: 582.0,
            expiration,
            contracts: 5,
            entry_price,
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

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn profit_target_fires_at_threshold() {
        // Entered at $4.00, mid now $6.05: +51.25%, past the 50% target.
        let p = position(4.0, day(2025, 6, 20));
        let exit = plan_exit(&p, 6.05, Some(Regime::NegativeGexSqueeze), day(2025, 6, 13), &rules());
        assert_eq!(exit, Some(ExitReason::ProfitTarget));
    }

    #[test]
    fn stop_loss_fires_on_drawdown() {
        let p = position(4.0, day(2025, 6, 20));
        let exit = plan_exit(&p, 2.70, Some(Regime::NegativeGexSqueeze), day(2025, 6, 13), &rules());
        assert_eq!(exit, Some(ExitReason::StopLoss));
    }

    #[test]
    fn expiration_cutoff_fires_at_min_dte() {
        let p = position(4.0, day(2025, 6, 20));
        // One day out, P&L flat: forced close ahead of expiry.
        let exit = plan_exit(&p, 4.0, Some(Regime::NegativeGexSqueeze), day(2025, 6, 19), &rules());
        assert_eq!(exit, Some(ExitReason::Expiration));
    }

    #[test]
    fn regime_flip_closes_the_thesis() {
        let p = position(4.0, day(2025, 6, 20));
        let exit = plan_exit(&p, 4.2, Some(Regime::RangeBound), day(2025, 6, 13), &rules());
        assert_eq!(exit, Some(ExitReason::RegimeFlip));
    }

    #[test]
    fn early_lock_requires_remaining_dte() {
        let p = position(4.0, day(2025, 6, 20));

        // +30% with 7 DTE left: lock it in.
        let exit = plan_exit(&p, 5.2, Some(Regime::NegativeGexSqueeze), day(2025, 6, 13), &rules());
        assert_eq!(exit, Some(ExitReason::EarlyProfitLock));

        // Same P&L with only 3 DTE left: below early_lock_min_dte, hold
        // for the main target or the expiry cutoff.
        let exit = plan_exit(&p, 5.2, Some(Regime::NegativeGexSqueeze), day(2025, 6, 17), &rules());
        assert_eq!(exit, None);
    }

    #[test]
    fn priority_order_profit_target_beats_expiration() {
        let p = position(4.0, day(2025, 6, 20));
        // Both the profit target and the expiry cutoff hold; the target wins.
        let exit = plan_exit(&p, 6.5, Some(Regime::RangeBound), day(2025, 6, 19), &rules());
        assert_eq!(exit, Some(ExitReason::ProfitTarget));
    }

    #[test]
    fn quiet_position_holds() {
        let p = position(4.0, day(2025, 6, 20));
        let exit = plan_exit(&p, 4.1, Some(Regime::NegativeGexSqueeze), day(2025, 6, 13), &rules());
        assert_eq!(exit, None);
    }

    #[test]
    fn missing_regime_read_defers_the_flip_check() {
        // Two positions on the same underlying, entered under different
        // regimes. With no fresh regime read this pass, neither may close
        // as a flip; one position's entry regime is not market evidence
        // for the other.
        let a = position(4.0, day(2025, 6, 20));
        let mut b = position(4.0, day(2025, 6, 27));
        b.entry_regime = Regime::RangeBound;

        assert_eq!(plan_exit(&a, 4.1, None, day(2025, 6, 13), &rules()), None);
        assert_eq!(plan_exit(&b, 4.1, None, day(2025, 6, 13), &rules()), None);

        // A fresh read that genuinely disagrees still flips.
        let exit = plan_exit(
            &b,
            4.1,
            Some(Regime::NegativeGexSqueeze),
            day(2025, 6, 13),
            &rules(),
        );
        assert_eq!(exit, Some(ExitReason::RegimeFlip));
    }
}
