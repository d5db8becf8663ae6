//! Snapshot payload types.
//!
//! These types match the JSON document served by the chain snapshot endpoint. Every numeric
//! field is optional: a poll cycle may omit any of them, and numeric strings or garbage are
//! tolerated (garbage deserialises to "absent" rather than failing the whole snapshot).

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use smol_str::{SmolStr, format_smolstr};

/// One poll cycle's complete chain state.
///
/// Replaces the previous snapshot wholesale and is not retained once applied.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Underlying index identifier (e.g., "NIFTY")
    #[serde(default)]
    pub underlying: String,
    /// Spot price of the underlying
    #[serde(default, deserialize_with = "lenient_f64", alias = "spot_price")]
    pub spot_price: Option<f64>,
    /// Futures contracts, nearest expiry first
    #[serde(default)]
    pub futures: Vec<Contract>,
    /// Call options across strikes
    #[serde(default)]
    pub calls: Vec<Contract>,
    /// Put options across strikes
    #[serde(default)]
    pub puts: Vec<Contract>,
    /// Server timestamp of the snapshot
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Data-source tag (e.g., "live", "delayed")
    #[serde(default)]
    pub source: Option<String>,
}

impl Snapshot {
    /// Contracts of the given segment.
    pub fn segment(&self, segment: Segment) -> &[Contract] {
        match segment {
            Segment::Futures => &self.futures,
            Segment::Calls => &self.calls,
            Segment::Puts => &self.puts,
        }
    }

    /// Iterate every contract with its segment.
    pub fn contracts(&self) -> impl Iterator<Item = (Segment, &Contract)> {
        Segment::ALL
            .into_iter()
            .flat_map(move |segment| self.segment(segment).iter().map(move |c| (segment, c)))
    }
}

/// A single futures or options contract within a [`Snapshot`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    #[serde(default, deserialize_with = "lenient_id", alias = "instrument_token")]
    pub instrument_token: Option<SmolStr>,
    #[serde(default, deserialize_with = "lenient_id", alias = "trading_symbol")]
    pub trading_symbol: Option<SmolStr>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub strike: Option<f64>,
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "last_price")]
    pub ltp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "bid_qty")]
    pub bid_qty: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "ask_qty")]
    pub ask_qty: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "open_interest")]
    pub oi: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "change_percent")]
    pub change_percent: Option<f64>,
    /// Net consumed quantity (bid eaten - ask eaten) for the current accumulation window
    #[serde(default, deserialize_with = "lenient_f64", alias = "eaten_delta")]
    pub eaten_delta: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "bid_eaten")]
    pub bid_eaten: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "ask_eaten")]
    pub ask_eaten: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "day_high", alias = "high")]
    pub day_high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "day_low", alias = "low")]
    pub day_low: Option<f64>,
}

impl Contract {
    /// Resolve the normalised [`ContractKey`] for this contract, if it is identifiable.
    pub fn key(&self) -> Option<ContractKey> {
        ContractKey::resolve(
            self.instrument_token.as_deref(),
            self.trading_symbol.as_deref(),
        )
    }

    /// Value of a trend-tracked field.
    pub fn field(&self, field: MetricField) -> Option<f64> {
        match field {
            MetricField::Ltp => self.ltp,
            MetricField::Vol => self.volume,
            MetricField::Bid => self.bid,
            MetricField::Ask => self.ask,
            MetricField::BidQty => self.bid_qty,
            MetricField::AskQty => self.ask_qty,
        }
    }
}

/// Normalised contract identifier, resolved once at ingestion.
///
/// Instrument tokens are preferred; trading symbols are the fallback. The two namespaces are
/// prefixed so a numeric symbol can never collide with a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deserialize, Serialize)]
pub struct ContractKey(SmolStr);

impl ContractKey {
    pub fn resolve(token: Option<&str>, symbol: Option<&str>) -> Option<Self> {
        let token = token.map(str::trim).filter(|token| !token.is_empty());
        let symbol = symbol.map(str::trim).filter(|symbol| !symbol.is_empty());

        match (token, symbol) {
            (Some(token), _) => Some(Self(format_smolstr!("tok:{token}"))),
            (None, Some(symbol)) => Some(Self(format_smolstr!("sym:{}", symbol.to_uppercase()))),
            (None, None) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Chain segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    #[display("futures")]
    Futures,
    #[display("calls")]
    Calls,
    #[display("puts")]
    Puts,
}

impl Segment {
    pub const ALL: [Segment; 3] = [Segment::Futures, Segment::Calls, Segment::Puts];

    /// Sign applied to a segment's signals relative to the underlying.
    ///
    /// Puts are inverted: put price, volume or bid falling is bullish for the underlying.
    pub fn polarity(&self) -> f64 {
        match self {
            Segment::Futures | Segment::Calls => 1.0,
            Segment::Puts => -1.0,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Segment::Futures => 0,
            Segment::Calls => 1,
            Segment::Puts => 2,
        }
    }
}

/// Contract field tracked by the trend [`MetricWindow`](crate::signal::window::MetricWindow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricField {
    #[display("ltp")]
    Ltp,
    #[display("vol")]
    Vol,
    #[display("bid")]
    Bid,
    #[display("ask")]
    Ask,
    #[display("bidQty")]
    BidQty,
    #[display("askQty")]
    AskQty,
}

impl MetricField {
    pub const ALL: [MetricField; 6] = [
        MetricField::Ltp,
        MetricField::Vol,
        MetricField::Bid,
        MetricField::Ask,
        MetricField::BidQty,
        MetricField::AskQty,
    ];

    pub fn index(&self) -> usize {
        match self {
            MetricField::Ltp => 0,
            MetricField::Vol => 1,
            MetricField::Bid => 2,
            MetricField::Ask => 3,
            MetricField::BidQty => 4,
            MetricField::AskQty => 5,
        }
    }

    /// Price-like fields are averaged across option strikes, quantity-like fields are summed.
    pub fn is_price(&self) -> bool {
        matches!(self, MetricField::Ltp | MetricField::Bid | MetricField::Ask)
    }
}

/// Sanitise a loosely typed JSON value into a finite number.
///
/// Accepts numbers and numeric strings (thousands separators allowed); everything else,
/// including NaN and infinities, is `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|number| number.is_finite())
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_number))
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<SmolStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(SmolStr::new(text.trim())),
        Some(Value::Number(number)) => Some(format_smolstr!("{number}")),
        _ => None,
    })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|time| time.with_timezone(&Utc)),
        Some(Value::Number(number)) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    })
}
