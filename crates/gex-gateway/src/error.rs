use thiserror::Error;

/// Closed error taxonomy for the market-data path.
///
/// `RateLimitTimeout` and `CircuitOpen` are admission denials from the rate
/// limiter; the rest are upstream failures surfaced by the gateway. Callers
/// treat all of them as "skip this symbol for the tick" — the distinction
/// exists for observability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Upstream request timed out")]
    RequestTimeout,

    #[error("Rate limit window full, acquire timed out")]
    RateLimitTimeout,

    #[error("Circuit breaker open")]
    CircuitOpen,
}
