use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Normal,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    RangeVolatile,
    RangeQuiet,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Regime::TrendingUp => "TRENDING_UP",
            Regime::TrendingDown => "TRENDING_DOWN",
            Regime::RangeVolatile => "RANGE_VOLATILE",
            Regime::RangeQuiet => "RANGE_QUIET",
        };
        write!(f, "{s}")
    }
}

/// Output of the RegimeAnalyzer over a candle window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeMetrics {
    pub regime: Regime,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub atr: f64,
    pub rsi: f64,
    pub insufficient_data: bool,
}

/// Published once per ReasoningLoop tick. Single writer, many readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub signal: Signal,
    pub confidence: f64,
    pub reasoning: String,
    pub regime: Regime,
    pub metrics: RegimeMetrics,
    pub evolution_suggestion: Option<EvolutionSuggestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionSuggestion {
    pub reason: String,
    pub suggestion: String,
    pub regime: Regime,
}

/// The parameter bundle an evolution is keyed on. Blacklist lookups use full
/// structural equality over this type, matching the source system exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionParameters {
    pub reason: String,
    pub suggestion: String,
    pub regime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionRecord {
    pub timestamp: DateTime<Utc>,
    pub parameters: EvolutionParameters,
    pub reason: String,
    pub suggestion: String,
    pub initial_equity: f64,
    pub start_time: DateTime<Utc>,
    pub evaluated: bool,
    pub final_pnl: Option<f64>,
    pub final_equity: Option<f64>,
    pub current_pnl: Option<f64>,
    pub current_equity: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub parameters: EvolutionParameters,
    pub pnl: f64,
    pub timestamp: DateTime<Utc>,
    pub evolution_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    OneHour,
    FourHour,
    TwelveHour,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::OneHour, Timeframe::FourHour, Timeframe::TwelveHour];

    pub fn hours(self) -> i64 {
        match self {
            Timeframe::OneHour => 1,
            Timeframe::FourHour => 4,
            Timeframe::TwelveHour => 12,
        }
    }

    pub fn column_suffix(self) -> &'static str {
        match self {
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::TwelveHour => "12h",
        }
    }
}

/// A single ledger row: a prediction made at `price_at_prediction`, later
/// reconciled against the realized price at 1h/4h/12h horizons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub predicted_bias: String,
    pub predicted_outcome: String,
    pub confidence: f64,
    pub market_regime: String,
    pub archetype: String,
    pub signal: Signal,
    pub price_at_prediction: f64,
    pub actual_price_1h: Option<f64>,
    pub actual_price_4h: Option<f64>,
    pub actual_price_12h: Option<f64>,
    pub success_score_1h: Option<f64>,
    pub success_score_4h: Option<f64>,
    pub success_score_12h: Option<f64>,
    pub audited: bool,
}

impl Prediction {
    pub fn actual_price(&self, tf: Timeframe) -> Option<f64> {
        match tf {
            Timeframe::OneHour => self.actual_price_1h,
            Timeframe::FourHour => self.actual_price_4h,
            Timeframe::TwelveHour => self.actual_price_12h,
        }
    }

    pub fn success_score(&self, tf: Timeframe) -> Option<f64> {
        match tf {
            Timeframe::OneHour => self.success_score_1h,
            Timeframe::FourHour => self.success_score_4h,
            Timeframe::TwelveHour => self.success_score_12h,
        }
    }
}

/// Ledger-wide aggregate stats. `avg_score_1h` is `None` when no audited row
/// carries a 1h score yet, distinct from an average of exactly zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total: i64,
    pub audited: i64,
    pub avg_score_1h: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdversaryMode {
    Api,
    Heuristic,
    Shadow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Archetype {
    FomoChaser,
    PanicSeller,
    Neutral,
}

impl std::fmt::Display for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Archetype::FomoChaser => "FOMO_CHASER",
            Archetype::PanicSeller => "PANIC_SELLER",
            Archetype::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdversaryResult {
    pub timestamp: DateTime<Utc>,
    pub detected_archetype: Archetype,
    pub vulnerability_score: f64,
    pub predicted_bias: String,
    pub predicted_outcome: String,
    pub confidence: f64,
    pub reasoning: String,
    pub signal: Signal,
    pub liquidity_zones: Vec<f64>,
    pub market_regime: String,
    pub mode: AdversaryMode,
    pub response_time_ms: u64,
}

/// Market data as consumed by the behavioral adversary and the narrative
/// pulse: a plain struct rather than a raw candle, since these components
/// reason over derived fields (rsi, vwap, price_change_pct) rather than OHLCV.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price: f64,
    pub rsi: f64,
    pub volume: f64,
    pub price_change_pct: f64,
    pub vwap: f64,
    pub volume_24h: f64,
}

impl MarketSnapshot {
    /// The synthetic floor BehavioralAdversary falls back to in shadow mode,
    /// overridden field-by-field by whatever real data is actually supplied.
    pub fn synthetic_floor() -> Self {
        let price = 90_000.0;
        Self {
            price,
            rsi: 55.0,
            volume: 1_000.0,
            price_change_pct: 0.5,
            vwap: price * 0.99,
            volume_24h: 0.0,
        }
    }
}
