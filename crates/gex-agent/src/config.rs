use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Timelike;
use gex_gateway::{CircuitBreakerConfig, GatewayConfig, SessionQuotas, SessionTtls};
use risk_manager::RiskLimits;

use crate::engine::ExitRules;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    // Universe
    pub watchlist: Vec<String>,

    // Capital and risk limits
    pub starting_capital: f64,
    pub max_drawdown_pct: f64,      // 15%
    pub max_daily_loss_pct: f64,    // 5%
    pub max_position_pct: f64,      // 20%
    pub max_correlation_pct: f64,   // 50%

    // Exit thresholds
    pub profit_target_pct: f64,     // +50% of premium
    pub stop_loss_pct: f64,         // -30% of premium
    pub min_dte_exit: i64,          // force-close at 1 DTE
    pub early_lock_profit_pct: f64, // +25%
    pub early_lock_min_dte: i64,

    // Scheduling (Eastern time entry window)
    pub entry_window_start: u32, // minutes from midnight ET
    pub entry_window_end: u32,
    pub entry_interval_seconds: u64,
    pub management_interval_seconds: u64,
    pub metrics_log_interval_passes: u64,

    // Upstream GEX provider
    pub gex_api_base_url: String,
    pub gex_api_key: String,
    pub request_timeout_seconds: u64,
    pub acquire_timeout_seconds: u64,
    pub rate_limit_weekend_per_min: usize,
    pub rate_limit_trading_per_min: usize,
    pub rate_limit_after_hours_per_min: usize,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_seconds: u64,
    pub circuit_max_cooldown_seconds: u64,
    pub cache_ttl_weekend_seconds: u64,
    pub cache_ttl_trading_seconds: u64,
    pub cache_ttl_after_hours_seconds: u64,

    /// VIX-like volatility level assumed when a snapshot carries no
    /// implied vol.
    pub default_vol_level: f64,

    // Database
    pub database_url: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            watchlist: env::var("WATCHLIST")
                .unwrap_or_else(|_| "SPY".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            starting_capital: env::var("STARTING_CAPITAL")
                .unwrap_or_else(|_| "100000.0".to_string())
                .parse()?,
            max_drawdown_pct: env::var("MAX_DRAWDOWN_PCT")
                .unwrap_or_else(|_| "15.0".to_string())
                .parse()?,
            max_daily_loss_pct: env::var("MAX_DAILY_LOSS_PCT")
                .unwrap_or_else(|_| "5.0".to_string())
                .parse()?,
            max_position_pct: env::var("MAX_POSITION_PCT")
                .unwrap_or_else(|_| "20.0".to_string())
                .parse()?,
            max_correlation_pct: env::var("MAX_CORRELATION_PCT")
                .unwrap_or_else(|_| "50.0".to_string())
                .parse()?,

            profit_target_pct: env::var("PROFIT_TARGET_PCT")
                .unwrap_or_else(|_| "50.0".to_string())
                .parse()?,
            stop_loss_pct: env::var("STOP_LOSS_PCT")
                .unwrap_or_else(|_| "-30.0".to_string())
                .parse()?,
            min_dte_exit: env::var("MIN_DTE_EXIT")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,
            early_lock_profit_pct: env::var("EARLY_LOCK_PROFIT_PCT")
                .unwrap_or_else(|_| "25.0".to_string())
                .parse()?,
            early_lock_min_dte: env::var("EARLY_LOCK_MIN_DTE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            entry_window_start: parse_window(
                &env::var("ENTRY_WINDOW_START").unwrap_or_else(|_| "09:45".to_string()),
            )?,
            entry_window_end: parse_window(
                &env::var("ENTRY_WINDOW_END").unwrap_or_else(|_| "10:30".to_string()),
            )?,
            entry_interval_seconds: env::var("ENTRY_INTERVAL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            management_interval_seconds: env::var("MANAGEMENT_INTERVAL")
                .unwrap_or_else(|_| "180".to_string())
                .parse()?,
            metrics_log_interval_passes: env::var("METRICS_LOG_INTERVAL")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            gex_api_base_url: env::var("GEX_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.gexview.io".to_string()),
            gex_api_key: env::var("GEX_API_KEY").context("GEX_API_KEY not set")?,
            request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            acquire_timeout_seconds: env::var("ACQUIRE_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            rate_limit_weekend_per_min: env::var("RATE_LIMIT_WEEKEND")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            rate_limit_trading_per_min: env::var("RATE_LIMIT_TRADING_HOURS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            rate_limit_after_hours_per_min: env::var("RATE_LIMIT_AFTER_HOURS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            circuit_failure_threshold: env::var("CIRCUIT_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            circuit_cooldown_seconds: env::var("CIRCUIT_COOLDOWN_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            circuit_max_cooldown_seconds: env::var("CIRCUIT_MAX_COOLDOWN_SECONDS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()?,
            cache_ttl_weekend_seconds: env::var("CACHE_TTL_WEEKEND_SECONDS")
                .unwrap_or_else(|_| "21600".to_string())
                .parse()?,
            cache_ttl_trading_seconds: env::var("CACHE_TTL_TRADING_SECONDS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()?,
            cache_ttl_after_hours_seconds: env::var("CACHE_TTL_AFTER_HOURS_SECONDS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()?,

            default_vol_level: env::var("DEFAULT_VOL_LEVEL")
                .unwrap_or_else(|_| "20.0".to_string())
                .parse()?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:gexflow.db".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.watchlist.is_empty() {
            bail!("WATCHLIST must contain at least one symbol");
        }
        if self.starting_capital <= 0.0 {
            bail!("STARTING_CAPITAL must be positive");
        }
        for (name, pct) in [
            ("MAX_DRAWDOWN_PCT", self.max_drawdown_pct),
            ("MAX_DAILY_LOSS_PCT", self.max_daily_loss_pct),
            ("MAX_POSITION_PCT", self.max_position_pct),
            ("MAX_CORRELATION_PCT", self.max_correlation_pct),
        ] {
            if pct <= 0.0 || pct > 100.0 {
                bail!("{name} must be in (0, 100], got {pct}");
            }
        }
        if self.profit_target_pct <= 0.0 {
            bail!("PROFIT_TARGET_PCT must be positive");
        }
        if self.stop_loss_pct >= 0.0 {
            bail!("STOP_LOSS_PCT must be negative");
        }
        if self.early_lock_profit_pct >= self.profit_target_pct {
            bail!("EARLY_LOCK_PROFIT_PCT must be below PROFIT_TARGET_PCT");
        }
        if self.min_dte_exit < 0 {
            bail!("MIN_DTE_EXIT must be >= 0");
        }
        if self.entry_window_start >= self.entry_window_end {
            bail!("ENTRY_WINDOW_START must be before ENTRY_WINDOW_END");
        }
        if self.entry_interval_seconds == 0 || self.management_interval_seconds == 0 {
            bail!("entry and management intervals must be positive");
        }
        for (name, quota) in [
            ("RATE_LIMIT_WEEKEND", self.rate_limit_weekend_per_min),
            ("RATE_LIMIT_TRADING_HOURS", self.rate_limit_trading_per_min),
            ("RATE_LIMIT_AFTER_HOURS", self.rate_limit_after_hours_per_min),
        ] {
            if quota == 0 {
                bail!("{name} must be at least 1 call per minute");
            }
        }
        Ok(())
    }

    /// Whether an Eastern-time clock reading falls inside the entry window.
    pub fn entry_window_contains<T: Timelike>(&self, now_et: &T) -> bool {
        let minutes = now_et.hour() * 60 + now_et.minute();
        minutes >= self.entry_window_start && minutes < self.entry_window_end
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gex_api_base_url.clone(),
            api_key: self.gex_api_key.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_seconds),
            quotas: SessionQuotas {
                weekend_per_min: self.rate_limit_weekend_per_min,
                trading_hours_per_min: self.rate_limit_trading_per_min,
                after_hours_per_min: self.rate_limit_after_hours_per_min,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_failure_threshold,
                cooldown: Duration::from_secs(self.circuit_cooldown_seconds),
                max_cooldown: Duration::from_secs(self.circuit_max_cooldown_seconds),
            },
            cache_ttls: SessionTtls {
                weekend: Duration::from_secs(self.cache_ttl_weekend_seconds),
                trading_hours: Duration::from_secs(self.cache_ttl_trading_seconds),
                after_hours: Duration::from_secs(self.cache_ttl_after_hours_seconds),
            },
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            starting_capital: self.starting_capital,
            max_drawdown_pct: self.max_drawdown_pct,
            max_daily_loss_pct: self.max_daily_loss_pct,
            max_position_pct: self.max_position_pct,
            max_correlation_pct: self.max_correlation_pct,
        }
    }

    pub fn exit_rules(&self) -> ExitRules {
        ExitRules {
            profit_target_pct: self.profit_target_pct,
            stop_loss_pct: self.stop_loss_pct,
            min_dte_exit: self.min_dte_exit,
            early_lock_profit_pct: self.early_lock_profit_pct,
            early_lock_min_dte: self.early_lock_min_dte,
        }
    }
}

/// Parse an "HH:MM" wall-clock string into minutes from midnight.
fn parse_window(raw: &str) -> Result<u32> {
    let (hours, minutes) = raw
        .split_once(':')
        .with_context(|| format!("expected HH:MM, got {raw:?}"))?;
    let hours: u32 = hours.parse().with_context(|| format!("bad hour in {raw:?}"))?;
    let minutes: u32 = minutes
        .parse()
        .with_context(|| format!("bad minute in {raw:?}"))?;
    if hours > 23 || minutes > 59 {
        bail!("out-of-range time {raw:?}");
    }
    Ok(hours * 60 + minutes)
}
