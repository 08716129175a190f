pub mod manager;
pub mod models;

#[cfg(test)]
mod tests;

pub use manager::RiskManager;
pub use models::{
    AccountSnapshot, Authorization, PerformanceReport, ProposedTrade, RiskLimits, RiskState,
    LIMIT_CORRELATION, LIMIT_DAILY_LOSS, LIMIT_MAX_DRAWDOWN, LIMIT_POSITION_SIZE,
};
