use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dealer gamma-exposure snapshot for a single underlying.
///
/// Immutable once constructed: the gateway produces it, the classifier reads
/// it, and the position engine freezes a copy at entry time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GexSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub spot_price: f64,
    /// Net dealer gamma exposure in dollars per 1% move. Negative means
    /// dealer hedging amplifies price moves.
    pub net_gex: Option<f64>,
    /// Spot level at which aggregate dealer gamma changes sign.
    pub flip_point: Option<f64>,
    pub call_wall: Option<f64>,
    pub put_wall: Option<f64>,
    /// At-the-money implied volatility as a fraction (0.18 = 18%).
    pub implied_vol: Option<f64>,
}

impl GexSnapshot {
    /// Distance from spot to the nearest wall, as a fraction of spot.
    /// `None` when neither wall is present.
    pub fn nearest_wall_distance(&self) -> Option<f64> {
        let dist = |wall: f64| ((self.spot_price - wall) / self.spot_price).abs();
        match (self.call_wall, self.put_wall) {
            (Some(c), Some(p)) => Some(dist(c).min(dist(p))),
            (Some(c), None) => Some(dist(c)),
            (None, Some(p)) => Some(dist(p)),
            (None, None) => None,
        }
    }
}

/// Market-maker hedging regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    /// Dealers short gamma below the flip point: hedging chases price,
    /// squeezes run further than they "should"
    NegativeGexSqueeze,

    /// Positive-gamma pin losing its grip: spot broke under the flip point
    /// and dealer support flips to pressure
    PositiveGexBreakdown,

    /// Dealers long gamma between the walls: hedging dampens moves,
    /// price oscillates between put wall and call wall
    RangeBound,

    /// Ambiguous or missing positioning data
    Neutral,
}

impl Regime {
    pub fn name(&self) -> &'static str {
        match self {
            Regime::NegativeGexSqueeze => "NEGATIVE_GEX_SQUEEZE",
            Regime::PositiveGexBreakdown => "POSITIVE_GEX_BREAKDOWN",
            Regime::RangeBound => "RANGE_BOUND",
            Regime::Neutral => "NEUTRAL",
        }
    }

    pub fn from_name(name: &str) -> Regime {
        match name {
            "NEGATIVE_GEX_SQUEEZE" => Regime::NegativeGexSqueeze,
            "POSITIVE_GEX_BREAKDOWN" => Regime::PositiveGexBreakdown,
            "RANGE_BOUND" => Regime::RangeBound,
            _ => Regime::Neutral,
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Classification result with confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDetection {
    pub regime: Regime,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
    pub reasoning: String,
}

/// |net_gex| above which dealer positioning is considered meaningful ($1B).
const GEX_MAGNITUDE_FLOOR: f64 = 1.0e9;

/// |net_gex| at which magnitude-based confidence saturates ($3B).
const GEX_MAGNITUDE_CAP: f64 = 3.0e9;

/// Spot within this fraction of a wall counts as "at the wall".
const WALL_PROXIMITY_BAND: f64 = 0.005;

/// Classify the current market-maker hedging regime.
///
/// Pure and total: every input maps to exactly one regime, with `Neutral`
/// (confidence 0) for missing `net_gex` or `flip_point`. `vol_level` is an
/// ambient VIX-like volatility reading; elevated volatility widens conviction
/// bands and reduces confidence, while spot sitting tight against a wall
/// sharpens the expected reaction and raises it.
pub fn classify(snapshot: &GexSnapshot, vol_level: f64) -> RegimeDetection {
    let (net_gex, flip_point) = match (snapshot.net_gex, snapshot.flip_point) {
        (Some(g), Some(f)) => (g, f),
        _ => {
            return RegimeDetection {
                regime: Regime::Neutral,
                confidence: 0.0,
                detected_at: Utc::now(),
                reasoning: "Missing net GEX or flip point — no positioning read".to_string(),
            };
        }
    };

    let spot = snapshot.spot_price;
    let magnitude = (net_gex.abs() / GEX_MAGNITUDE_CAP).min(1.0);

    let (regime, base_confidence) = if net_gex <= -GEX_MAGNITUDE_FLOOR {
        // Short-gamma dealers: hedging amplifies. Below the flip the squeeze
        // fuel is largest, above it conviction fades.
        let conf = if spot < flip_point {
            0.55 + 0.30 * magnitude
        } else {
            0.40 + 0.20 * magnitude
        };
        (Regime::NegativeGexSqueeze, conf)
    } else if net_gex >= GEX_MAGNITUDE_FLOOR && spot < flip_point {
        (Regime::PositiveGexBreakdown, 0.50 + 0.25 * magnitude)
    } else if net_gex >= GEX_MAGNITUDE_FLOOR && between_walls(snapshot) {
        (Regime::RangeBound, 0.50 + 0.25 * magnitude)
    } else {
        (Regime::Neutral, 0.30)
    };

    // Wall proximity sharpens the expected reaction
    let wall_bonus = match snapshot.nearest_wall_distance() {
        Some(d) if d <= WALL_PROXIMITY_BAND => 0.15,
        _ => 0.0,
    };

    // Elevated volatility widens the conviction bands
    let vol_penalty = 1.0 / (1.0 + 0.02 * (vol_level - 20.0).max(0.0));

    let confidence = ((base_confidence + wall_bonus) * vol_penalty).clamp(0.0, 1.0);

    let reasoning = format!(
        "{} (net_gex={:.2}B, spot={:.2}, flip={:.2}, vol={:.1})",
        regime.name(),
        net_gex / 1.0e9,
        spot,
        flip_point,
        vol_level
    );

    RegimeDetection {
        regime,
        confidence,
        detected_at: Utc::now(),
        reasoning,
    }
}

fn between_walls(snapshot: &GexSnapshot) -> bool {
    match (snapshot.put_wall, snapshot.call_wall) {
        (Some(put), Some(call)) => snapshot.spot_price >= put && snapshot.spot_price <= call,
        _ => false,
    }
}
