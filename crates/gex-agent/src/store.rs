use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use gex_gateway::OptionType;
use regime_classifier::{GexSnapshot, Regime};

use crate::types::{ExitReason, Position, PositionStatus};

/// Durable agent state: positions, per-day entry markers, and key-value
/// scratch state (persisted metrics, last summary date).
///
/// The agent is the sole writer. Concurrency safety comes from that
/// single-writer discipline, not from the store itself.
pub struct StateStore {
    pub(crate) db_pool: sqlx::AnyPool,
}

type PositionRow = (
    String,         // id
    String,         // symbol
    String,         // strategy_name
    String,         // option_type
    f64,            // strike
    String,         // expiration
    i64,            // contracts
    f64,            // entry_price
    String,         // entry_time
    String,         // entry_regime
    String,         // entry_snapshot JSON
    String,         // status
    Option<String>, // exit_reason
    Option<f64>,    // exit_price
    Option<f64>,    // realized_pnl
);

const POSITION_COLUMNS: &str = "id, symbol, strategy_name, option_type, strike, expiration, \
     contracts, entry_price, entry_time, entry_regime, entry_snapshot, \
     status, exit_reason, exit_price, realized_pnl";

impl StateStore {
    pub fn new(db_pool: sqlx::AnyPool) -> Self {
        Self { db_pool }
    }

    /// Initialize agent tables.
    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                option_type TEXT NOT NULL,
                strike REAL NOT NULL,
                expiration TEXT NOT NULL,
                contracts INTEGER NOT NULL,
                entry_price REAL NOT NULL,
                entry_time TEXT NOT NULL,
                entry_regime TEXT NOT NULL,
                entry_snapshot TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                exit_reason TEXT,
                exit_price REAL,
                realized_pnl REAL,
                close_date TEXT,
                closed_at TEXT
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS daily_trade_markers (
                symbol TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                outcome TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (symbol, trade_date)
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status)")
            .execute(&self.db_pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_close_date ON positions(close_date)")
            .execute(&self.db_pool)
            .await
            .ok();

        Ok(())
    }

    pub async fn insert_position(&self, position: &Position) -> Result<()> {
        let snapshot_json = serde_json::to_string(&position.entry_snapshot)?;
        sqlx::query(&format!(
            "INSERT INTO positions ({POSITION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&position.id)
        .bind(&position.symbol)
        .bind(&position.strategy_name)
        .bind(position.option_type.name())
        .bind(position.strike)
        .bind(position.expiration.format("%Y-%m-%d").to_string())
        .bind(position.contracts)
        .bind(position.entry_price)
        .bind(position.entry_time.to_rfc3339())
        .bind(position.entry_regime.name())
        .bind(snapshot_json)
        .bind(position.status.name())
        .bind(position.exit_reason.map(|r| r.name()))
        .bind(position.exit_price)
        .bind(position.realized_pnl)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> = sqlx::query_as(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE status = 'OPEN' ORDER BY entry_time"
        ))
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(decode_position).collect()
    }

    /// Close an open position. Fails loudly if the position is missing or
    /// already closed: a double close is a contract violation, not a no-op.
    pub async fn close_position(
        &self,
        position_id: &str,
        reason: ExitReason,
        exit_price: f64,
        realized_pnl: f64,
        close_date: NaiveDate,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE positions
             SET status = 'CLOSED', exit_reason = ?, exit_price = ?, realized_pnl = ?,
                 close_date = ?, closed_at = ?
             WHERE id = ? AND status = 'OPEN'",
        )
        .bind(reason.name())
        .bind(exit_price)
        .bind(realized_pnl)
        .bind(close_date.format("%Y-%m-%d").to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(position_id)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "position {position_id} is not open; refusing to close it again"
            ));
        }
        Ok(())
    }

    pub async fn realized_pnl_total(&self) -> Result<f64> {
        let row: (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(realized_pnl), 0.0) FROM positions WHERE status = 'CLOSED'",
        )
        .fetch_one(&self.db_pool)
        .await?;
        Ok(row.0)
    }

    /// Realized P&L for positions closed on the given (Eastern) trading day.
    pub async fn realized_pnl_on(&self, date: NaiveDate) -> Result<f64> {
        let row: (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(realized_pnl), 0.0) FROM positions
             WHERE status = 'CLOSED' AND close_date = ?",
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_one(&self.db_pool)
        .await?;
        Ok(row.0)
    }

    /// Open premium notional per symbol, for concentration checks.
    pub async fn open_exposure(&self) -> Result<Vec<(String, f64)>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT symbol, SUM(contracts * entry_price * 100.0) FROM positions
             WHERE status = 'OPEN' GROUP BY symbol",
        )
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows)
    }

    /// Most recent closed-trade P&Ls, newest first.
    pub async fn recent_closed_pnls(&self, limit: i64) -> Result<Vec<f64>> {
        let rows: Vec<(f64,)> = sqlx::query_as(
            "SELECT realized_pnl FROM positions
             WHERE status = 'CLOSED' AND realized_pnl IS NOT NULL
             ORDER BY closed_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    /// Whether an entry decision already exists for this symbol and day.
    pub async fn entry_decided(&self, symbol: &str, trade_date: NaiveDate) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT symbol FROM daily_trade_markers WHERE symbol = ? AND trade_date = ?",
        )
        .bind(symbol)
        .bind(trade_date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(row.is_some())
    }

    /// Claim today's entry decision for a symbol. Returns false if the
    /// marker already exists, which means the decision was already made
    /// (possibly by a previous run that crashed before finalizing).
    pub async fn try_begin_entry(&self, symbol: &str, trade_date: NaiveDate) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO daily_trade_markers (symbol, trade_date) VALUES (?, ?)
             ON CONFLICT(symbol, trade_date) DO NOTHING",
        )
        .bind(symbol)
        .bind(trade_date.format("%Y-%m-%d").to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record the outcome of a claimed entry decision.
    pub async fn finalize_entry(
        &self,
        symbol: &str,
        trade_date: NaiveDate,
        outcome: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE daily_trade_markers SET outcome = ? WHERE symbol = ? AND trade_date = ?",
        )
        .bind(outcome)
        .bind(symbol)
        .bind(trade_date.format("%Y-%m-%d").to_string())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn save_metrics(&self, metrics_json: &serde_json::Value) -> Result<()> {
        self.save_state("agent_metrics", &metrics_json.to_string())
            .await
    }

    pub async fn load_metrics(&self) -> Result<Option<serde_json::Value>> {
        match self.load_state("agent_metrics").await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub async fn save_last_summary_date(&self, date: &str) -> Result<()> {
        self.save_state("last_summary_date", date).await
    }

    pub async fn load_last_summary_date(&self) -> Result<Option<String>> {
        self.load_state("last_summary_date").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use regime_classifier::Regime;

    async fn setup_store() -> StateStore {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite");

        let store = StateStore::new(pool);
        store.init_tables().await.unwrap();
        store
    }

    fn sample_position(id: &str, symbol: &str) -> Position {
        Position {
            id: id.to_string(),
            symbol: symbol.to_string(),
            strategy_name: "gamma_squeeze_call".to_string(),
            option_type: OptionType::Call,
            strike: 582.0,
            expiration: NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
            contracts: 5,
            entry_price: 4.0,
            entry_time: Utc::now(),
            entry_regime: Regime::NegativeGexSqueeze,
            entry_snapshot: GexSnapshot {
                symbol: symbol.to_string(),
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

    #[tokio::test]
    async fn position_round_trips_through_the_store() {
        let store = setup_store().await;
        store.insert_position(&sample_position("p-1", "SPY")).await.unwrap();

        let open = store.open_positions().await.unwrap();
        assert_eq!(open.len(), 1);

        let p = &open[0];
        assert_eq!(p.id, "p-1");
        assert_eq!(p.symbol, "SPY");
        assert_eq!(p.option_type, OptionType::Call);
        assert_eq!(p.entry_regime, Regime::NegativeGexSqueeze);
        assert_eq!(p.entry_snapshot.flip_point, Some(580.0));
        assert_eq!(p.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn close_is_guarded_against_double_close() {
        let store = setup_store().await;
        store.insert_position(&sample_position("p-1", "SPY")).await.unwrap();

        store
            .close_position("p-1", ExitReason::ProfitTarget, 6.05, 1_025.0, day(2025, 6, 13))
            .await
            .unwrap();
        assert!(store.open_positions().await.unwrap().is_empty());

        // Second close of the same position must fail, not silently succeed.
        let err = store
            .close_position("p-1", ExitReason::StopLoss, 2.0, -1_000.0, day(2025, 6, 13))
            .await;
        assert!(err.is_err());

        // The first close's outcome is untouched.
        assert_eq!(store.realized_pnl_total().await.unwrap(), 1_025.0);
    }

    #[tokio::test]
    async fn realized_pnl_splits_by_close_date() {
        let store = setup_store().await;
        store.insert_position(&sample_position("p-1", "SPY")).await.unwrap();
        store.insert_position(&sample_position("p-2", "SPY")).await.unwrap();

        store
            .close_position("p-1", ExitReason::ProfitTarget, 6.0, 1_000.0, day(2025, 6, 12))
            .await
            .unwrap();
        store
            .close_position("p-2", ExitReason::StopLoss, 2.8, -600.0, day(2025, 6, 13))
            .await
            .unwrap();

        assert_eq!(store.realized_pnl_total().await.unwrap(), 400.0);
        assert_eq!(store.realized_pnl_on(day(2025, 6, 13)).await.unwrap(), -600.0);
        assert_eq!(store.realized_pnl_on(day(2025, 6, 12)).await.unwrap(), 1_000.0);
    }

    #[tokio::test]
    async fn open_exposure_groups_by_symbol() {
        let store = setup_store().await;
        store.insert_position(&sample_position("p-1", "SPY")).await.unwrap();
        store.insert_position(&sample_position("p-2", "SPY")).await.unwrap();
        store.insert_position(&sample_position("p-3", "QQQ")).await.unwrap();

        let mut exposure = store.open_exposure().await.unwrap();
        exposure.sort_by(|a, b| a.0.cmp(&b.0));
        // 5 contracts x $4.00 x 100 = $2,000 per position.
        assert_eq!(
            exposure,
            vec![("QQQ".to_string(), 2_000.0), ("SPY".to_string(), 4_000.0)]
        );
    }

    #[tokio::test]
    async fn entry_marker_is_claimed_exactly_once() {
        let store = setup_store().await;
        let today = day(2025, 6, 13);

        assert!(!store.entry_decided("SPY", today).await.unwrap());
        assert!(store.try_begin_entry("SPY", today).await.unwrap());

        // Second claim for the same symbol and day loses.
        assert!(!store.try_begin_entry("SPY", today).await.unwrap());
        // A claim alone already counts as decided, even before finalize.
        assert!(store.entry_decided("SPY", today).await.unwrap());

        store.finalize_entry("SPY", today, "opened").await.unwrap();
        assert!(store.entry_decided("SPY", today).await.unwrap());

        // Other symbols and other days are independent.
        assert!(store.try_begin_entry("QQQ", today).await.unwrap());
        assert!(store.try_begin_entry("SPY", day(2025, 6, 16)).await.unwrap());
    }

    #[tokio::test]
    async fn state_kv_upserts() {
        let store = setup_store().await;

        assert_eq!(store.load_state("missing").await.unwrap(), None);
        store.save_state("k", "v1").await.unwrap();
        store.save_state("k", "v2").await.unwrap();
        assert_eq!(store.load_state("k").await.unwrap().as_deref(), Some("v2"));

        let metrics = serde_json::json!({"entry_passes": 3});
        store.save_metrics(&metrics).await.unwrap();
        assert_eq!(store.load_metrics().await.unwrap(), Some(metrics));
    }
}

fn decode_position(row: PositionRow) -> Result<Position> {
    let (
        id,
        symbol,
        strategy_name,
        option_type,
        strike,
        expiration,
        contracts,
        entry_price,
        entry_time,
        entry_regime,
        entry_snapshot,
        status,
        exit_reason,
        exit_price,
        realized_pnl,
    ) = row;

    let expiration = NaiveDate::parse_from_str(&expiration, "%Y-%m-%d")
        .map_err(|e| anyhow!("position {id}: bad expiration {expiration:?}: {e}"))?;
    let entry_time = DateTime::parse_from_rfc3339(&entry_time)
        .map_err(|e| anyhow!("position {id}: bad entry_time: {e}"))?
        .with_timezone(&Utc);
    let entry_snapshot: GexSnapshot = serde_json::from_str(&entry_snapshot)
        .map_err(|e| anyhow!("position {id}: bad entry snapshot: {e}"))?;

    Ok(Position {
        id,
        symbol,
        strategy_name,
        option_type: OptionType::from_name(&option_type),
        strike,
        expiration,
        contracts,
        entry_price,
        entry_time,
        entry_regime: Regime::from_name(&entry_regime),
        entry_snapshot,
        status: PositionStatus::from_name(&status),
        exit_reason: exit_reason.as_deref().and_then(ExitReason::from_name),
        exit_price,
        realized_pnl,
    })
}
