//! Rate-limited, circuit-broken access to the upstream GEX data provider,
//! with a session-aware snapshot cache. Everything above this crate reads
//! market data exclusively through [`GexGateway`].

mod error;
mod gateway;
mod models;
mod rate_limiter;
mod session;

pub use error::GatewayError;
pub use gateway::{GatewayConfig, GexGateway};
pub use models::{OptionQuote, OptionType};
pub use rate_limiter::{CircuitBreakerConfig, RateLimiter, RateLimiterState};
pub use session::{Session, SessionQuotas, SessionTtls};
