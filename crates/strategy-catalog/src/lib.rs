//! Static strategy catalog and regime-to-strategy selection.
//!
//! Each entry carries fixed historical priors and an entry/exit template.
//! The catalog is built once at startup and never mutated; selection is a
//! pure function over (regime, confidence, snapshot, weekday).

use chrono::Weekday;
use gex_gateway::OptionType;
use regime_classifier::{GexSnapshot, Regime};

/// Snapshot-level entry rule, beyond the regime match itself.
#[derive(Debug, Clone, Copy)]
pub enum EntryRule {
    /// Spot trading below the flip point (squeeze fuel intact).
    SpotBelowFlip,
    /// Spot trading below the flip point after a positive-gamma pin.
    BreakBelowFlip,
    /// Spot within `band` (fraction of spot) of the put wall.
    SpotNearPutWall { band: f64 },
}

impl EntryRule {
    fn holds(&self, snapshot: &GexSnapshot) -> bool {
        match self {
            EntryRule::SpotBelowFlip | EntryRule::BreakBelowFlip => snapshot
                .flip_point
                .map(|flip| snapshot.spot_price < flip)
                .unwrap_or(false),
            EntryRule::SpotNearPutWall { band } => snapshot
                .put_wall
                .map(|wall| {
                    ((snapshot.spot_price - wall) / snapshot.spot_price).abs() <= *band
                })
                .unwrap_or(false),
        }
    }
}

/// One catalog entry. Read-only configuration: loaded at startup, never
/// mutated at runtime.
#[derive(Debug, Clone)]
pub struct StrategyDefinition {
    pub name: &'static str,
    pub regime: Regime,
    pub min_confidence: f64,
    pub entry_rule: EntryRule,
    pub historical_win_rate: f64,
    pub risk_reward_ratio: f64,
    pub best_days: &'static [Weekday],
    pub option_type: OptionType,
    /// Strike relative to spot, e.g. 0.01 = 1% out-of-the-money.
    pub strike_offset_pct: f64,
    /// Days to expiration at entry.
    pub target_dte: i64,
    pub max_position_pct_of_capital: f64,
}

impl StrategyDefinition {
    /// Whether this strategy's entry conditions hold for the given regime
    /// and snapshot.
    pub fn entry_conditions(&self, regime: Regime, confidence: f64, snapshot: &GexSnapshot) -> bool {
        regime == self.regime && confidence >= self.min_confidence && self.entry_rule.holds(snapshot)
    }

    /// Expectancy proxy used for tie-breaking between eligible strategies.
    pub fn expectancy(&self) -> f64 {
        self.historical_win_rate * self.risk_reward_ratio
    }

    pub fn strike_for(&self, spot: f64) -> f64 {
        let raw = match self.option_type {
            OptionType::Call => spot * (1.0 + self.strike_offset_pct),
            OptionType::Put => spot * (1.0 - self.strike_offset_pct),
        };
        raw.round()
    }
}

pub struct StrategyCatalog {
    strategies: Vec<StrategyDefinition>,
}

impl StrategyCatalog {
    /// The built-in catalog. Win rates and risk/reward ratios are static
    /// priors from historical GEX regime studies, not live statistics.
    pub fn builtin() -> Self {
        let strategies = vec![
            StrategyDefinition {
                name: "gamma_squeeze_call",
                regime: Regime::NegativeGexSqueeze,
                min_confidence: 0.55,
                entry_rule: EntryRule::SpotBelowFlip,
                historical_win_rate: 0.62,
                risk_reward_ratio: 2.5,
                best_days: &[Weekday::Mon, Weekday::Tue, Weekday::Wed],
                option_type: OptionType::Call,
                strike_offset_pct: 0.01,
                target_dte: 7,
                max_position_pct_of_capital: 10.0,
            },
            StrategyDefinition {
                name: "flip_breakdown_put",
                regime: Regime::PositiveGexBreakdown,
                min_confidence: 0.55,
                entry_rule: EntryRule::BreakBelowFlip,
                historical_win_rate: 0.58,
                risk_reward_ratio: 2.2,
                best_days: &[Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
                option_type: OptionType::Put,
                strike_offset_pct: 0.01,
                target_dte: 7,
                max_position_pct_of_capital: 10.0,
            },
            StrategyDefinition {
                name: "put_wall_bounce_call",
                regime: Regime::RangeBound,
                min_confidence: 0.60,
                entry_rule: EntryRule::SpotNearPutWall { band: 0.01 },
                historical_win_rate: 0.66,
                risk_reward_ratio: 1.6,
                best_days: &[Weekday::Mon, Weekday::Wed, Weekday::Thu, Weekday::Fri],
                option_type: OptionType::Call,
                strike_offset_pct: 0.005,
                target_dte: 5,
                max_position_pct_of_capital: 8.0,
            },
        ];

        Self { strategies }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Select at most one strategy for the current conditions.
    ///
    /// A strategy is eligible when its entry conditions hold and the calendar
    /// day is in its best-days set. Ties between eligible strategies go to
    /// the highest `win_rate x risk_reward`, then to catalog declaration
    /// order, so selection is deterministic. `None` is a routine outcome.
    pub fn select(
        &self,
        regime: Regime,
        confidence: f64,
        snapshot: &GexSnapshot,
        weekday: Weekday,
    ) -> Option<&StrategyDefinition> {
        let mut best: Option<&StrategyDefinition> = None;

        for strategy in &self.strategies {
            if !strategy.best_days.contains(&weekday) {
                continue;
            }
            if !strategy.entry_conditions(regime, confidence, snapshot) {
                continue;
            }
            match best {
                Some(current) if strategy.expectancy() <= current.expectancy() => {}
                _ => best = Some(strategy),
            }
        }

        if let Some(chosen) = best {
            tracing::debug!(
                strategy = chosen.name,
                regime = regime.name(),
                expectancy = chosen.expectancy(),
                "Strategy selected"
            );
        }
        best
    }
}

impl Default for StrategyCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
