use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, Timelike};
use gex_gateway::{GexGateway, Session};
use regime_classifier::{classify, Regime};
use risk_manager::{Authorization, ProposedTrade, RiskManager};
use strategy_catalog::StrategyCatalog;
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;
mod engine;
mod metrics;
mod store;
mod types;

use config::AgentConfig;
use engine::PositionEngine;
use metrics::AgentMetrics;
use store::StateStore;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting GexFlow agent");

    // 2. Load configuration (with validation)
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Watchlist: {} symbols", config.watchlist.len());
    tracing::info!("  Starting capital: ${:.0}", config.starting_capital);
    tracing::info!(
        "  Limits: drawdown {}%, daily loss {}%, position {}%, per-symbol {}%",
        config.max_drawdown_pct,
        config.max_daily_loss_pct,
        config.max_position_pct,
        config.max_correlation_pct
    );
    tracing::info!(
        "  Exits: target +{}%, stop {}%, expiry cutoff {} DTE, early lock +{}% at >= {} DTE",
        config.profit_target_pct,
        config.stop_loss_pct,
        config.min_dte_exit,
        config.early_lock_profit_pct,
        config.early_lock_min_dte
    );
    tracing::info!(
        "  Entry pass every {}s, management pass every {}s",
        config.entry_interval_seconds,
        config.management_interval_seconds
    );

    // 3. Database and durable state
    sqlx::any::install_default_drivers();
    let db_pool = sqlx::AnyPool::connect(&config.database_url).await?;

    let store = Arc::new(StateStore::new(db_pool.clone()));
    store.init_tables().await?;
    tracing::info!("State store initialized");

    let risk_manager = Arc::new(RiskManager::new(db_pool.clone(), config.risk_limits()));
    risk_manager.init_tables().await?;
    tracing::info!("Risk manager initialized");

    // 4. Gateway, catalog, position engine
    let gateway = Arc::new(GexGateway::new(config.gateway_config())?);
    tracing::info!("GEX gateway initialized ({})", config.gex_api_base_url);

    let catalog = StrategyCatalog::builtin();
    tracing::info!("Strategy catalog loaded ({} strategies)", catalog.len());

    let position_engine = PositionEngine::new(
        Arc::clone(&gateway),
        Arc::clone(&store),
        config.exit_rules(),
    );

    // 5. Metrics, with optional restore from persisted state
    let mut agent_metrics = AgentMetrics::new(config.metrics_log_interval_passes);
    if let Ok(Some(saved)) = store.load_metrics().await {
        agent_metrics.restore_from_json(&saved);
    }

    // 6. Startup checks: DB connectivity, then recover open positions
    sqlx::query("SELECT 1")
        .execute(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database connectivity check failed: {}", e))?;
    tracing::info!("Startup check: database OK");

    let open = store.open_positions().await?;
    if open.is_empty() {
        tracing::info!("No open positions to recover");
    } else {
        for position in &open {
            tracing::info!(
                position_id = %position.id,
                symbol = %position.symbol,
                strategy = %position.strategy_name,
                expiration = %position.expiration,
                "Recovered open position; management pass will pick it up"
            );
        }
    }

    let mut last_summary_date = store
        .load_last_summary_date()
        .await
        .ok()
        .flatten()
        .unwrap_or_default();

    tracing::info!(
        "Agent is now running. Entry window {:02}:{:02}-{:02}:{:02} ET. Press Ctrl+C to stop.",
        config.entry_window_start / 60,
        config.entry_window_start % 60,
        config.entry_window_end / 60,
        config.entry_window_end % 60
    );

    // Main loop with graceful shutdown (SIGINT + SIGTERM). Both passes run
    // inline on this task, so the store only ever has one writer.
    let mut entry_interval = time::interval(Duration::from_secs(config.entry_interval_seconds));
    let mut management_interval =
        time::interval(Duration::from_secs(config.management_interval_seconds));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = entry_interval.tick() => {
                if let Err(e) = run_entry_pass(
                    &gateway,
                    &catalog,
                    &risk_manager,
                    &store,
                    &position_engine,
                    &config,
                    &mut agent_metrics,
                )
                .await
                {
                    tracing::error!("Error in entry pass: {}", e);
                }

                if let Err(e) = store.save_metrics(&agent_metrics.to_json()).await {
                    tracing::debug!("Failed to persist metrics: {}", e);
                }
            }
            _ = management_interval.tick() => {
                if let Err(e) = run_management_pass(
                    &gateway,
                    &store,
                    &position_engine,
                    &config,
                    &mut agent_metrics,
                )
                .await
                {
                    tracing::error!("Error in management pass: {}", e);
                }

                if let Err(e) = store.save_metrics(&agent_metrics.to_json()).await {
                    tracing::debug!("Failed to persist metrics: {}", e);
                }

                // Daily summary after 4:05 PM ET
                let now_et = chrono::Utc::now().with_timezone(&chrono_tz::US::Eastern);
                let today = now_et.format("%Y-%m-%d").to_string();
                if today != last_summary_date
                    && now_et.hour() == 16
                    && now_et.minute() >= 5
                {
                    if let Err(e) =
                        log_daily_summary(&store, &risk_manager, &agent_metrics).await
                    {
                        tracing::warn!("Failed to build daily summary: {}", e);
                    }
                    last_summary_date.clone_from(&today);
                    store.save_last_summary_date(&today).await.ok();
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                store.save_metrics(&agent_metrics.to_json()).await.ok();
                agent_metrics.log_metrics();
                break;
            }
        }
    }

    tracing::info!("GexFlow agent shut down.");
    Ok(())
}

/// One entry pass: at most one irrevocable entry decision per watchlist
/// symbol per trading day, made inside the morning window.
async fn run_entry_pass(
    gateway: &Arc<GexGateway>,
    catalog: &StrategyCatalog,
    risk_manager: &Arc<RiskManager>,
    store: &Arc<StateStore>,
    position_engine: &PositionEngine,
    config: &AgentConfig,
    metrics: &mut AgentMetrics,
) -> Result<()> {
    let pass_start = AgentMetrics::start_timer();

    if Session::current() != Session::TradingHours {
        tracing::debug!("Entry pass skipped: outside trading hours");
        return Ok(());
    }

    let now_et = chrono::Utc::now().with_timezone(&chrono_tz::US::Eastern);
    if !config.entry_window_contains(&now_et.time()) {
        tracing::debug!("Entry pass skipped: outside the entry window");
        return Ok(());
    }

    let today = now_et.date_naive();
    let weekday = now_et.weekday();

    for symbol in &config.watchlist {
        if store.entry_decided(symbol, today).await? {
            tracing::debug!(symbol, "Entry already decided today");
            continue;
        }

        // Market read first: a failed fetch is retryable on the next tick
        // and must not burn the daily decision.
        let snapshot = match gateway.get_snapshot(symbol).await {
            Ok(s) => {
                metrics.snapshots_fetched += 1;
                s
            }
            Err(e) => {
                tracing::warn!(symbol, error = %e, "Snapshot unavailable; will retry");
                continue;
            }
        };

        let vol_level = snapshot
            .implied_vol
            .map(|iv| iv * 100.0)
            .unwrap_or(config.default_vol_level);
        let detection = classify(&snapshot, vol_level);
        tracing::info!(
            symbol,
            regime = detection.regime.name(),
            confidence = format!("{:.2}", detection.confidence),
            reasoning = %detection.reasoning,
            "Regime classified"
        );

        let Some(strategy) = catalog.select(
            detection.regime,
            detection.confidence,
            &snapshot,
            weekday,
        ) else {
            if !store.try_begin_entry(symbol, today).await? {
                continue;
            }
            store.finalize_entry(symbol, today, "no_strategy").await?;
            metrics.entries_no_strategy += 1;
            tracing::info!(
                symbol,
                regime = detection.regime.name(),
                outcome = "no_strategy",
                "Entry decision"
            );
            continue;
        };

        let strike = strategy.strike_for(snapshot.spot_price);
        let expiration = today + chrono::Duration::days(strategy.target_dte);

        // Quote failures are also retryable: nothing is claimed yet.
        let quote = match gateway
            .get_option_quote(symbol, strike, expiration, strategy.option_type)
            .await
        {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(symbol, strike, error = %e, "Quote unavailable; will retry");
                continue;
            }
        };
        let mid = quote.mid();
        if mid <= 0.0 {
            tracing::warn!(symbol, strike, "Unpriceable contract; will retry");
            continue;
        }

        // Claim the day before committing capital; everything past this
        // point finalizes the marker rather than retrying.
        if !store.try_begin_entry(symbol, today).await? {
            continue;
        }

        let account = risk_manager::AccountSnapshot {
            realized_pnl_total: store.realized_pnl_total().await?,
            realized_pnl_today: store.realized_pnl_on(today).await?,
            open_exposure: store.open_exposure().await?,
        };
        let risk_state = risk_manager.derive_state(&account).await?;

        let budget_pct = config
            .max_position_pct
            .min(strategy.max_position_pct_of_capital);
        let budget = risk_state.current_capital * budget_pct / 100.0;
        let contracts = (budget / (mid * 100.0)).floor() as i64;
        if contracts < 1 {
            store
                .finalize_entry(symbol, today, "position_too_small")
                .await?;
            metrics.entries_too_small += 1;
            tracing::info!(
                symbol,
                strategy = strategy.name,
                mid,
                outcome = "position_too_small",
                "Entry decision"
            );
            continue;
        }

        let proposed = ProposedTrade {
            symbol: symbol.clone(),
            strategy_name: strategy.name.to_string(),
            notional: contracts as f64 * mid * 100.0,
            strategy_max_pct: strategy.max_position_pct_of_capital,
        };

        match risk_manager.authorize(&proposed, &risk_state) {
            Authorization::Rejected { limit, detail } => {
                store
                    .finalize_entry(symbol, today, &format!("risk_rejected:{limit}"))
                    .await?;
                metrics.entries_risk_rejected += 1;
                tracing::info!(
                    symbol,
                    strategy = strategy.name,
                    limit,
                    detail = %detail,
                    outcome = "risk_rejected",
                    "Entry decision"
                );
            }
            Authorization::Approved => {
                let position = position_engine
                    .open_position(
                        strategy,
                        &snapshot,
                        detection.regime,
                        strike,
                        expiration,
                        contracts,
                        mid,
                    )
                    .await?;
                store.finalize_entry(symbol, today, "opened").await?;
                metrics.entries_opened += 1;
                tracing::info!(
                    symbol,
                    strategy = strategy.name,
                    position_id = %position.id,
                    outcome = "opened",
                    "Entry decision"
                );
            }
        }
    }

    metrics.finish_entry_pass(pass_start);
    Ok(())
}

/// One management pass: evaluate every open position against the exit
/// rules. Runs only during trading hours, when quotes are live.
async fn run_management_pass(
    gateway: &Arc<GexGateway>,
    store: &Arc<StateStore>,
    position_engine: &PositionEngine,
    config: &AgentConfig,
    metrics: &mut AgentMetrics,
) -> Result<()> {
    let pass_start = AgentMetrics::start_timer();

    if Session::current() != Session::TradingHours {
        tracing::debug!("Management pass skipped: outside trading hours");
        return Ok(());
    }

    let open = store.open_positions().await?;
    if open.is_empty() {
        metrics.finish_management_pass(pass_start);
        return Ok(());
    }

    let today = chrono::Utc::now()
        .with_timezone(&chrono_tz::US::Eastern)
        .date_naive();

    // One regime read per symbol per pass; positions on the same underlying
    // share it. A failed read caches as None: the flip check is deferred
    // for every position on that symbol, never substituted.
    let mut regimes: HashMap<String, Option<Regime>> = HashMap::new();

    for position in &open {
        let current_regime = match regimes.get(&position.symbol) {
            Some(r) => *r,
            None => {
                let regime = match gateway.get_snapshot(&position.symbol).await {
                    Ok(snapshot) => {
                        metrics.snapshots_fetched += 1;
                        let vol_level = snapshot
                            .implied_vol
                            .map(|iv| iv * 100.0)
                            .unwrap_or(config.default_vol_level);
                        Some(classify(&snapshot, vol_level).regime)
                    }
                    Err(e) => {
                        // Without a fresh read there is no flip evidence;
                        // price and calendar exits still apply.
                        tracing::warn!(
                            symbol = %position.symbol,
                            error = %e,
                            "Snapshot unavailable; regime-flip check skipped this pass"
                        );
                        None
                    }
                };
                regimes.insert(position.symbol.clone(), regime);
                regime
            }
        };

        match position_engine.evaluate(position, current_regime, today).await {
            Ok(Some(closed)) => {
                metrics.record_trade_result(closed.realized_pnl);
                tracing::info!(
                    position_id = %closed.position_id,
                    symbol = %closed.symbol,
                    strategy = %closed.strategy_name,
                    reason = closed.reason.name(),
                    entry_price = position.entry_price,
                    exit_price = closed.exit_price,
                    realized_pnl = closed.realized_pnl,
                    "Position closed"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    position_id = %position.id,
                    symbol = %position.symbol,
                    "Failed to evaluate position: {}",
                    e
                );
            }
        }
    }

    metrics.finish_management_pass(pass_start);
    Ok(())
}

/// Build and log the end-of-day summary after market close.
async fn log_daily_summary(
    store: &Arc<StateStore>,
    risk_manager: &Arc<RiskManager>,
    metrics: &AgentMetrics,
) -> Result<()> {
    let today = chrono::Utc::now()
        .with_timezone(&chrono_tz::US::Eastern)
        .date_naive();

    let realized_today = store.realized_pnl_on(today).await?;
    let open = store.open_positions().await?;
    let recent = store.recent_closed_pnls(50).await?;
    let report = risk_manager.performance_report(&recent);

    let account = risk_manager::AccountSnapshot {
        realized_pnl_total: store.realized_pnl_total().await?,
        realized_pnl_today: realized_today,
        open_exposure: store.open_exposure().await?,
    };
    let risk_state = risk_manager.derive_state(&account).await?;

    tracing::info!(
        date = %today,
        realized_pnl_today = format!("{:.2}", realized_today),
        current_capital = format!("{:.2}", risk_state.current_capital),
        peak_capital = format!("{:.2}", risk_state.peak_capital),
        drawdown_pct = format!("{:.2}", risk_state.current_drawdown_pct),
        open_positions = open.len(),
        entries_opened = metrics.entries_opened,
        positions_closed = metrics.positions_closed,
        recent_trades = report.trade_count,
        recent_win_rate = format!("{:.1}%", report.win_rate * 100.0),
        recent_avg_pnl = format!("{:.2}", report.avg_pnl),
        sharpe = format!("{:.2}", report.sharpe_ratio),
        "Daily summary"
    );
    Ok(())
}
