use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use regime_classifier::GexSnapshot;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::models::{OptionQuote, OptionType};
use crate::rate_limiter::{CircuitBreakerConfig, RateLimiter, RateLimiterState};
use crate::session::{Session, SessionQuotas, SessionTtls};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Timeout for a single upstream HTTP request.
    pub request_timeout: Duration,
    /// How long a caller is willing to wait on the rate limiter.
    pub acquire_timeout: Duration,
    pub quotas: SessionQuotas,
    pub breaker: CircuitBreakerConfig,
    pub cache_ttls: SessionTtls,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.gexview.io".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(15),
            acquire_timeout: Duration::from_secs(20),
            quotas: SessionQuotas::default(),
            breaker: CircuitBreakerConfig::default(),
            cache_ttls: SessionTtls::default(),
        }
    }
}

struct CachedSnapshot {
    snapshot: GexSnapshot,
    fetched_at: Instant,
}

/// The sole path to the upstream GEX provider.
///
/// Wraps the rate limiter with a session-aware snapshot cache: a live cache
/// hit bypasses the limiter entirely, a miss goes through `acquire` and an
/// upstream fetch. Upstream errors come back typed — the gateway never
/// substitutes stale or synthetic data on a failed fetch.
pub struct GexGateway {
    client: Client,
    limiter: RateLimiter,
    snapshot_cache: DashMap<(String, Session), CachedSnapshot>,
    config: GatewayConfig,
}

impl GexGateway {
    /// Fails only if the HTTP client cannot be built; a client without the
    /// configured request timeout is never substituted.
    pub fn new(config: GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(config.quotas, config.breaker),
            snapshot_cache: DashMap::new(),
            config,
        })
    }

    /// Fetch the current GEX snapshot for a symbol, serving from cache when
    /// a live entry exists for the current session bucket.
    pub async fn get_snapshot(&self, symbol: &str) -> Result<GexSnapshot, GatewayError> {
        let session = Session::current();
        let key = (symbol.to_string(), session);

        if let Some(entry) = self.snapshot_cache.get(&key) {
            if entry.fetched_at.elapsed() < self.config.cache_ttls.ttl(session) {
                tracing::debug!(symbol, session = session.name(), "GEX snapshot cache hit");
                return Ok(entry.snapshot.clone());
            }
        }

        self.limiter.acquire(session, self.config.acquire_timeout).await?;

        let url = format!("{}/v1/gex/{}", self.config.base_url, symbol);
        let raw: SnapshotPayload = self.fetch_json(&url, &[]).await?;
        let snapshot = raw.into_snapshot(symbol);

        self.snapshot_cache.insert(
            key,
            CachedSnapshot {
                snapshot: snapshot.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(snapshot)
    }

    /// Fetch a quote for a single option contract. Quotes feed exit decisions
    /// on open positions, so they are never served from cache.
    pub async fn get_option_quote(
        &self,
        symbol: &str,
        strike: f64,
        expiration: NaiveDate,
        option_type: OptionType,
    ) -> Result<OptionQuote, GatewayError> {
        let session = Session::current();
        self.limiter.acquire(session, self.config.acquire_timeout).await?;

        let url = format!("{}/v1/options/quote", self.config.base_url);
        let strike_s = format!("{strike}");
        let exp_s = expiration.format("%Y-%m-%d").to_string();
        let query = [
            ("ticker", symbol),
            ("strike", strike_s.as_str()),
            ("expiration", exp_s.as_str()),
            ("type", option_type.name()),
        ];

        let raw: QuotePayload = self.fetch_json(&url, &query).await?;
        Ok(OptionQuote {
            bid: raw.bid,
            ask: raw.ask,
            last: raw.last,
        })
    }

    pub async fn limiter_state(&self) -> RateLimiterState {
        self.limiter.state().await
    }

    /// Issue an admitted upstream request and record its outcome with the
    /// circuit breaker.
    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let result = self
            .client
            .get(url)
            .query(query)
            .query(&[("apiKey", self.config.api_key.as_str())])
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.limiter.record_failure().await;
                return Err(if e.is_timeout() {
                    GatewayError::RequestTimeout
                } else {
                    GatewayError::Upstream(e.to_string())
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            // The provider throws occasional 403s independent of load;
            // ordinary failure, not a special case.
            self.limiter.record_failure().await;
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream(format!("HTTP {status}: {body}")));
        }

        match response.json::<T>().await {
            Ok(parsed) => {
                self.limiter.record_success().await;
                Ok(parsed)
            }
            Err(e) => {
                self.limiter.record_failure().await;
                Err(GatewayError::MalformedPayload(e.to_string()))
            }
        }
    }
}

#[derive(Deserialize)]
struct SnapshotPayload {
    spot_price: f64,
    net_gex: Option<f64>,
    flip_point: Option<f64>,
    call_wall: Option<f64>,
    put_wall: Option<f64>,
    implied_vol: Option<f64>,
    timestamp: Option<i64>,
}

impl SnapshotPayload {
    fn into_snapshot(self, symbol: &str) -> GexSnapshot {
        let timestamp: DateTime<Utc> = self
            .timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        GexSnapshot {
            symbol: symbol.to_string(),
            timestamp,
            spot_price: self.spot_price,
            net_gex: self.net_gex,
            flip_point: self.flip_point,
            call_wall: self.call_wall,
            put_wall: self.put_wall,
            implied_vol: self.implied_vol,
        }
    }
}

#[derive(Deserialize)]
struct QuotePayload {
    bid: f64,
    ask: f64,
    last: f64,
}
