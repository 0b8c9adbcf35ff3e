//! Card transaction records as served by the transaction source

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Flat field mapping exactly as returned by the source
pub type RawRecord = Map<String, Value>;

/// Accepted wall-clock layouts for `trans_date_trans_time`
const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// A payment transaction to be scored. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique transaction identifier
    #[serde(rename = "trans_num")]
    pub transaction_id: String,

    /// Wall-clock time of the transaction, as recorded by the card network
    #[serde(rename = "trans_date_trans_time", with = "wall_clock")]
    pub timestamp: NaiveDateTime,

    /// Transaction amount
    #[serde(rename = "amt")]
    pub amount: f64,

    /// Merchant category (e.g. `grocery_pos`)
    pub category: String,

    /// Merchant name; empty when the source sends null
    #[serde(default, deserialize_with = "null_as_default")]
    pub merchant: String,

    /// Cardholder gender code (`F` / `M`)
    pub gender: String,

    /// Population of the cardholder's city
    pub city_pop: i64,

    /// Cardholder latitude, absent when the source has none
    #[serde(default)]
    pub lat: Option<f64>,

    /// Cardholder longitude, absent when the source has none
    #[serde(default)]
    pub long: Option<f64>,
}

impl Transaction {
    /// Parse and validate a raw source record.
    ///
    /// Unknown extra fields are ignored. Missing or mistyped required fields,
    /// a negative or non-finite amount and an empty identifier are rejected.
    pub fn from_record(record: &RawRecord) -> PipelineResult<Self> {
        let id_hint = record.get("trans_num").and_then(Value::as_str);

        let tx: Transaction = serde_json::from_value(Value::Object(record.clone()))
            .map_err(|e| PipelineError::malformed(id_hint, e.to_string()))?;

        tx.validate()?;
        Ok(tx)
    }

    fn validate(&self) -> PipelineResult<()> {
        let id = Some(self.transaction_id.as_str());

        if self.transaction_id.trim().is_empty() {
            return Err(PipelineError::malformed(None, "empty transaction identifier"));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(PipelineError::malformed(
                id,
                format!("amount must be a non-negative number, got {}", self.amount),
            ));
        }
        if self.city_pop < 0 {
            return Err(PipelineError::malformed(id, "city_pop must be non-negative"));
        }
        if [self.lat, self.long].iter().flatten().any(|c| !c.is_finite()) {
            return Err(PipelineError::malformed(id, "coordinates must be finite"));
        }
        Ok(())
    }

    /// Build a transaction with neutral demographics, mostly for tests and tooling
    pub fn new(transaction_id: &str, timestamp: NaiveDateTime, amount: f64, category: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            timestamp,
            amount,
            category: category.to_string(),
            merchant: String::new(),
            gender: "F".to_string(),
            city_pop: 0,
            lat: None,
            long: None,
        }
    }
}

/// Parse a source timestamp into its recorded wall-clock time.
///
/// RFC 3339 values keep their own local time; the offset is dropped rather
/// than converted, so hour and weekday match what the record says.
pub fn parse_wall_clock(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

mod wall_clock {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_wall_clock(&raw)
            .ok_or_else(|| de::Error::custom(format!("unrecognised timestamp `{raw}`")))
    }
}
