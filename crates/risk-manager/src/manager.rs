use anyhow::Result;

use crate::models::*;

/// The final gate before any capital commitment.
///
/// Derives `RiskState` from account figures each cycle (persisting the
/// capital peak), and authorizes proposed trades against four hard limits.
/// Any single breach rejects the trade, reported with the limit's name so
/// the decision can be attributed downstream.
pub struct RiskManager {
    pool: sqlx::AnyPool,
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(pool: sqlx::AnyPool, limits: RiskLimits) -> Self {
        Self { pool, limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Create the portfolio peak table (called on startup).
    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS portfolio_peak (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                peak_value REAL NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Derive the current risk state from the account snapshot, updating the
    /// durable capital peak when a new high is reached.
    pub async fn derive_state(&self, account: &AccountSnapshot) -> Result<RiskState> {
        let current_capital = self.limits.starting_capital + account.realized_pnl_total;
        let peak_capital = self.update_peak(current_capital).await?;

        let current_drawdown_pct = if peak_capital > 0.0 {
            ((peak_capital - current_capital) / peak_capital * 100.0).max(0.0)
        } else {
            0.0
        };

        let mut per_symbol_exposure_pct = std::collections::HashMap::new();
        let mut total_exposure = 0.0;
        for (symbol, notional) in &account.open_exposure {
            total_exposure += notional;
            if current_capital > 0.0 {
                *per_symbol_exposure_pct.entry(symbol.clone()).or_insert(0.0) +=
                    notional / current_capital * 100.0;
            }
        }
        let total_exposure_pct = if current_capital > 0.0 {
            total_exposure / current_capital * 100.0
        } else {
            0.0
        };

        Ok(RiskState {
            current_capital,
            peak_capital,
            current_drawdown_pct,
            daily_realized_pnl: account.realized_pnl_today,
            total_exposure_pct,
            per_symbol_exposure_pct,
        })
    }

    /// Check a proposed trade against the four hard limits, in fixed order.
    /// Pure over the given state: no I/O, no mutation.
    pub fn authorize(&self, proposed: &ProposedTrade, state: &RiskState) -> Authorization {
        // 1. Max drawdown: no new entries while capital is this far off peak.
        if state.current_drawdown_pct >= self.limits.max_drawdown_pct {
            return Authorization::Rejected {
                limit: LIMIT_MAX_DRAWDOWN,
                detail: format!(
                    "drawdown {:.1}% >= limit {:.1}%",
                    state.current_drawdown_pct, self.limits.max_drawdown_pct
                ),
            };
        }

        // 2. Daily loss, as a fraction of start-of-day capital.
        let start_of_day = state.current_capital - state.daily_realized_pnl;
        if start_of_day > 0.0 {
            let daily_pct = state.daily_realized_pnl / start_of_day * 100.0;
            if daily_pct <= -self.limits.max_daily_loss_pct {
                return Authorization::Rejected {
                    limit: LIMIT_DAILY_LOSS,
                    detail: format!(
                        "daily P&L {:.1}% breaches limit -{:.1}%",
                        daily_pct, self.limits.max_daily_loss_pct
                    ),
                };
            }
        }

        // 3. Position size: stricter of the global and strategy caps.
        let cap_pct = self.limits.max_position_pct.min(proposed.strategy_max_pct);
        let max_notional = state.current_capital * cap_pct / 100.0;
        if proposed.notional > max_notional {
            return Authorization::Rejected {
                limit: LIMIT_POSITION_SIZE,
                detail: format!(
                    "notional ${:.0} exceeds {:.1}% of capital (${:.0})",
                    proposed.notional, cap_pct, max_notional
                ),
            };
        }

        // 4. Concentration in one underlying, including the proposed trade.
        let existing = state
            .per_symbol_exposure_pct
            .get(&proposed.symbol)
            .copied()
            .unwrap_or(0.0);
        let proposed_pct = if state.current_capital > 0.0 {
            proposed.notional / state.current_capital * 100.0
        } else {
            100.0
        };
        if existing + proposed_pct > self.limits.max_correlation_pct {
            return Authorization::Rejected {
                limit: LIMIT_CORRELATION,
                detail: format!(
                    "{} exposure {:.1}% + {:.1}% exceeds limit {:.1}%",
                    proposed.symbol, existing, proposed_pct, self.limits.max_correlation_pct
                ),
            };
        }

        Authorization::Approved
    }

    /// Rolling performance statistics over closed-trade P&Ls.
    /// Read-only reporting; plays no part in authorization.
    pub fn performance_report(&self, closed_pnls: &[f64]) -> PerformanceReport {
        let trade_count = closed_pnls.len();
        if trade_count == 0 {
            return PerformanceReport {
                trade_count: 0,
                win_rate: 0.0,
                avg_pnl: 0.0,
                sharpe_ratio: 0.0,
            };
        }

        let wins = closed_pnls.iter().filter(|&&p| p > 0.0).count();
        let win_rate = wins as f64 / trade_count as f64;
        let avg_pnl = closed_pnls.iter().sum::<f64>() / trade_count as f64;

        let sharpe_ratio = if trade_count >= 2 && self.limits.starting_capital > 0.0 {
            let returns: Vec<f64> = closed_pnls
                .iter()
                .map(|p| p / self.limits.starting_capital)
                .collect();
            let mean = returns.iter().sum::<f64>() / returns.len() as f64;
            let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
                / (returns.len() - 1) as f64;
            let std = variance.sqrt();
            if std > 0.0 {
                mean / std * (252.0_f64).sqrt()
            } else {
                0.0
            }
        } else {
            0.0
        };

        PerformanceReport {
            trade_count,
            win_rate,
            avg_pnl,
            sharpe_ratio,
        }
    }

    /// Read the durable capital peak, advancing it if the current value is a
    /// new high. The peak never decreases.
    async fn update_peak(&self, current_value: f64) -> Result<f64> {
        let peak: Option<(f64,)> =
            sqlx::query_as("SELECT peak_value FROM portfolio_peak ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        match peak {
            None => {
                sqlx::query("INSERT INTO portfolio_peak (peak_value) VALUES (?)")
                    .bind(current_value)
                    .execute(&self.pool)
                    .await?;
                Ok(current_value)
            }
            Some((peak_value,)) if current_value > peak_value => {
                sqlx::query("INSERT INTO portfolio_peak (peak_value) VALUES (?)")
                    .bind(current_value)
                    .execute(&self.pool)
                    .await?;
                Ok(current_value)
            }
            Some((peak_value,)) => Ok(peak_value),
        }
    }
}
