use std::collections::VecDeque;
use std::time::Instant;

/// Structured telemetry for the agent.
/// Tracks per-pass timing, aggregate counters, and a rolling trade window.
pub struct AgentMetrics {
    pub entry_passes: u64,
    pub management_passes: u64,
    pub snapshots_fetched: u64,
    pub entries_opened: u64,
    pub entries_no_strategy: u64,
    pub entries_risk_rejected: u64,
    pub entries_too_small: u64,
    pub positions_closed: u64,
    pub total_pnl: f64,
    pub winning_trades: u64,
    pub losing_trades: u64,

    pub last_entry_pass_ms: u64,
    pub last_management_pass_ms: u64,

    // Rolling 20-trade window
    recent_trades: VecDeque<TradeRecord>,
    log_interval_passes: u64,
}

struct TradeRecord {
    pnl: f64,
    won: bool,
}

impl AgentMetrics {
    pub fn new(log_interval_passes: u64) -> Self {
        Self {
            entry_passes: 0,
            management_passes: 0,
            snapshots_fetched: 0,
            entries_opened: 0,
            entries_no_strategy: 0,
            entries_risk_rejected: 0,
            entries_too_small: 0,
            positions_closed: 0,
            total_pnl: 0.0,
            winning_trades: 0,
            losing_trades: 0,
            last_entry_pass_ms: 0,
            last_management_pass_ms: 0,
            recent_trades: VecDeque::with_capacity(20),
            log_interval_passes,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_trade_result(&mut self, pnl: f64) {
        let won = pnl > 0.0;
        self.total_pnl += pnl;
        self.positions_closed += 1;
        if won {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }

        self.recent_trades.push_back(TradeRecord { pnl, won });
        if self.recent_trades.len() > 20 {
            self.recent_trades.pop_front();
        }
    }

    pub fn finish_entry_pass(&mut self, start: Instant) {
        self.last_entry_pass_ms = start.elapsed().as_millis() as u64;
        self.entry_passes += 1;
    }

    pub fn finish_management_pass(&mut self, start: Instant) {
        self.last_management_pass_ms = start.elapsed().as_millis() as u64;
        self.management_passes += 1;

        if self.log_interval_passes > 0
            && self.management_passes.is_multiple_of(self.log_interval_passes)
        {
            self.log_metrics();
        }
    }

    /// Rolling win rate from last 20 trades (0-100%)
    pub fn recent_win_rate(&self) -> f64 {
        if self.recent_trades.is_empty() {
            return 0.0;
        }
        let wins = self.recent_trades.iter().filter(|t| t.won).count() as f64;
        (wins / self.recent_trades.len() as f64) * 100.0
    }

    /// Rolling average P&L from last 20 trades
    pub fn recent_avg_pnl(&self) -> f64 {
        if self.recent_trades.is_empty() {
            return 0.0;
        }
        self.recent_trades.iter().map(|t| t.pnl).sum::<f64>() / self.recent_trades.len() as f64
    }

    /// Overall win rate (0-100%)
    pub fn overall_win_rate(&self) -> f64 {
        let total = self.winning_trades + self.losing_trades;
        if total == 0 {
            return 0.0;
        }
        (self.winning_trades as f64 / total as f64) * 100.0
    }

    /// Emit structured telemetry via tracing
    pub fn log_metrics(&self) {
        tracing::info!(
            entry_passes = self.entry_passes,
            management_passes = self.management_passes,
            snapshots_fetched = self.snapshots_fetched,
            entries_opened = self.entries_opened,
            entries_no_strategy = self.entries_no_strategy,
            entries_risk_rejected = self.entries_risk_rejected,
            entries_too_small = self.entries_too_small,
            positions_closed = self.positions_closed,
            total_pnl = format!("{:.2}", self.total_pnl),
            overall_win_rate = format!("{:.1}%", self.overall_win_rate()),
            recent_win_rate = format!("{:.1}%", self.recent_win_rate()),
            recent_avg_pnl = format!("{:.2}", self.recent_avg_pnl()),
            last_entry_pass_ms = self.last_entry_pass_ms,
            last_management_pass_ms = self.last_management_pass_ms,
            "Agent metrics summary"
        );
    }

    /// Serialize metrics to JSON for state persistence
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "entry_passes": self.entry_passes,
            "management_passes": self.management_passes,
            "snapshots_fetched": self.snapshots_fetched,
            "entries_opened": self.entries_opened,
            "entries_no_strategy": self.entries_no_strategy,
            "entries_risk_rejected": self.entries_risk_rejected,
            "entries_too_small": self.entries_too_small,
            "positions_closed": self.positions_closed,
            "total_pnl": self.total_pnl,
            "winning_trades": self.winning_trades,
            "losing_trades": self.losing_trades,
        })
    }

    /// Restore counters from persisted JSON
    pub fn restore_from_json(&mut self, json: &serde_json::Value) {
        let u64_field = |key: &str| json.get(key).and_then(|v| v.as_u64());
        if let Some(v) = u64_field("entry_passes") {
            self.entry_passes = v;
        }
        if let Some(v) = u64_field("management_passes") {
            self.management_passes = v;
        }
        if let Some(v) = u64_field("snapshots_fetched") {
            self.snapshots_fetched = v;
        }
        if let Some(v) = u64_field("entries_opened") {
            self.entries_opened = v;
        }
        if let Some(v) = u64_field("entries_no_strategy") {
            self.entries_no_strategy = v;
        }
        if let Some(v) = u64_field("entries_risk_rejected") {
            self.entries_risk_rejected = v;
        }
        if let Some(v) = u64_field("entries_too_small") {
            self.entries_too_small = v;
        }
        if let Some(v) = u64_field("positions_closed") {
            self.positions_closed = v;
        }
        if let Some(v) = json.get("total_pnl").and_then(|v| v.as_f64()) {
            self.total_pnl = v;
        }
        if let Some(v) = u64_field("winning_trades") {
            self.winning_trades = v;
        }
        if let Some(v) = u64_field("losing_trades") {
            self.losing_trades = v;
        }
        tracing::info!(
            "Restored metrics from persisted state (entry_passes={})",
            self.entry_passes
        );
    }
}
