use crate::manager::RiskManager;
use crate::models::*;

async fn setup_manager(limits: RiskLimits) -> RiskManager {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");

    let rm = RiskManager::new(pool, limits);
    rm.init_tables().await.unwrap();
    rm
}

fn flat_state(rm_capital: f64) -> RiskState {
    RiskState {
        current_capital: rm_capital,
        peak_capital: rm_capital,
        current_drawdown_pct: 0.0,
        daily_realized_pnl: 0.0,
        total_exposure_pct: 0.0,
        per_symbol_exposure_pct: Default::default(),
    }
}

fn proposed(symbol: &str, notional: f64) -> ProposedTrade {
    ProposedTrade {
        symbol: symbol.to_string(),
        strategy_name: "gamma_squeeze_call".to_string(),
        notional,
        strategy_max_pct: 10.0,
    }
}

#[tokio::test]
async fn peak_capital_never_decreases() {
    let rm = setup_manager(RiskLimits::default()).await;

    let state = rm
        .derive_state(&AccountSnapshot {
            realized_pnl_total: 10_000.0,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(state.peak_capital, 110_000.0);

    // Capital falls back, peak holds.
    let state = rm
        .derive_state(&AccountSnapshot {
            realized_pnl_total: -5_000.0,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(state.peak_capital, 110_000.0);
    assert!((state.current_drawdown_pct - (15_000.0 / 110_000.0 * 100.0)).abs() < 1e-6);
}

#[tokio::test]
async fn drawdown_is_never_negative() {
    let rm = setup_manager(RiskLimits::default()).await;

    let state = rm.derive_state(&AccountSnapshot::default()).await.unwrap();
    assert_eq!(state.current_drawdown_pct, 0.0);
    assert_eq!(state.current_capital, 100_000.0);
}

#[tokio::test]
async fn drawdown_breach_rejects_by_name() {
    let rm = setup_manager(RiskLimits {
        max_drawdown_pct: 15.0,
        ..Default::default()
    })
    .await;

    let mut state = flat_state(84_000.0);
    state.peak_capital = 100_000.0;
    state.current_drawdown_pct = 16.0;

    let auth = rm.authorize(&proposed("SPY", 1_000.0), &state);
    assert_eq!(auth.limit_name(), Some(LIMIT_MAX_DRAWDOWN));
}

#[tokio::test]
async fn daily_loss_breach_rejects_by_name() {
    let rm = setup_manager(RiskLimits {
        max_daily_loss_pct: 5.0,
        ..Default::default()
    })
    .await;

    let mut state = flat_state(94_000.0);
    state.peak_capital = 100_000.0;
    state.current_drawdown_pct = 6.0;
    state.daily_realized_pnl = -6_000.0; // -6% of the 100k start-of-day

    let auth = rm.authorize(&proposed("SPY", 1_000.0), &state);
    assert_eq!(auth.limit_name(), Some(LIMIT_DAILY_LOSS));
}

#[tokio::test]
async fn position_size_uses_stricter_of_global_and_strategy_cap() {
    let rm = setup_manager(RiskLimits {
        max_position_pct: 20.0,
        ..Default::default()
    })
    .await;

    let state = flat_state(100_000.0);

    // Strategy cap (10%) is the binding one: $12k notional rejected.
    let auth = rm.authorize(&proposed("SPY", 12_000.0), &state);
    assert_eq!(auth.limit_name(), Some(LIMIT_POSITION_SIZE));

    // Within both caps.
    let auth = rm.authorize(&proposed("SPY", 9_000.0), &state);
    assert!(auth.is_approved());
}

#[tokio::test]
async fn symbol_concentration_rejects_by_name() {
    let rm = setup_manager(RiskLimits {
        max_correlation_pct: 50.0,
        ..Default::default()
    })
    .await;

    let mut state = flat_state(100_000.0);
    state.per_symbol_exposure_pct.insert("SPY".to_string(), 45.0);

    let auth = rm.authorize(&proposed("SPY", 8_000.0), &state);
    assert_eq!(auth.limit_name(), Some(LIMIT_CORRELATION));

    // Another underlying is unaffected.
    let auth = rm.authorize(&proposed("QQQ", 8_000.0), &state);
    assert!(auth.is_approved());
}

#[tokio::test]
async fn clean_state_approves() {
    let rm = setup_manager(RiskLimits::default()).await;
    let state = flat_state(100_000.0);

    let auth = rm.authorize(&proposed("SPY", 5_000.0), &state);
    assert_eq!(auth, Authorization::Approved);
}

#[tokio::test]
async fn performance_report_basics() {
    let rm = setup_manager(RiskLimits::default()).await;

    let empty = rm.performance_report(&[]);
    assert_eq!(empty.trade_count, 0);
    assert_eq!(empty.sharpe_ratio, 0.0);

    let report = rm.performance_report(&[500.0, -200.0, 300.0, 100.0]);
    assert_eq!(report.trade_count, 4);
    assert!((report.win_rate - 0.75).abs() < 1e-9);
    assert!((report.avg_pnl - 175.0).abs() < 1e-9);
    assert!(report.sharpe_ratio > 0.0);
}
