//! Sensor channels and conversion of raw bus payloads into display values.
//!
//! Field devices publish integer-scaled numbers (water temperature x10,
//! pH x100) in a handful of shapes: a bare number, a numeric string, or an
//! object carrying either `value` or the channel's own field name. Every
//! shape is decoded into [`RawPayload`] first, then scaled and rounded.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorChannel {
    AirTemperature,
    AirHumidity,
    Co2,
    WaterTemperature,
    Ph,
    Ec,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 6] = [
        SensorChannel::AirTemperature,
        SensorChannel::AirHumidity,
        SensorChannel::Co2,
        SensorChannel::WaterTemperature,
        SensorChannel::Ph,
        SensorChannel::Ec,
    ];

    /// Channels carried by the combined air-quality message.
    pub const AIR: [SensorChannel; 3] = [
        SensorChannel::AirTemperature,
        SensorChannel::AirHumidity,
        SensorChannel::Co2,
    ];

    /// Channels stored together as one water-environment row.
    pub const WATER: [SensorChannel; 3] = [
        SensorChannel::WaterTemperature,
        SensorChannel::Ph,
        SensorChannel::Ec,
    ];

    /// Divisor applied to the raw integer-scaled reading.
    pub fn divisor(self) -> f64 {
        match self {
            SensorChannel::WaterTemperature => 10.0,
            SensorChannel::Ph => 100.0,
            _ => 1.0,
        }
    }

    /// Number of decimal places shown on the dashboard.
    pub fn precision(self) -> usize {
        match self {
            SensorChannel::Co2 | SensorChannel::Ec => 0,
            SensorChannel::Ph => 2,
            _ => 1,
        }
    }

    /// Field name this channel uses inside an object payload.
    pub fn field(self) -> &'static str {
        match self {
            SensorChannel::AirTemperature | SensorChannel::WaterTemperature => "temperature",
            SensorChannel::AirHumidity => "humidity",
            SensorChannel::Co2 => "co2",
            SensorChannel::Ph => "ph",
            SensorChannel::Ec => "ec",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorChannel::AirTemperature => "air_temperature",
            SensorChannel::AirHumidity => "air_humidity",
            SensorChannel::Co2 => "co2",
            SensorChannel::WaterTemperature => "water_temperature",
            SensorChannel::Ph => "ph",
            SensorChannel::Ec => "ec",
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// A display-ready sensor value, or the "unknown" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reading {
    Known {
        value: f64,
        precision: usize,
    },
    #[default]
    Unknown,
}

impl Reading {
    /// Round `value` to `precision` decimals. Non-finite input is Unknown.
    pub fn new(value: f64, precision: usize) -> Self {
        if !value.is_finite() {
            return Reading::Unknown;
        }
        let factor = 10f64.powi(precision as i32);
        let rounded = (value * factor).round() / factor;
        if rounded.is_finite() {
            Reading::Known {
                value: rounded,
                precision,
            }
        } else {
            Reading::Unknown
        }
    }

    /// Scale a raw integer-scaled reading for `channel` and round it.
    pub fn scaled(channel: SensorChannel, raw: f64) -> Self {
        Self::new(raw / channel.divisor(), channel.precision())
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Known { value, .. } => Some(*value),
            Reading::Unknown => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Known { value, precision } => write!(f, "{value:.precision$}"),
            Reading::Unknown => f.write_str("--"),
        }
    }
}

/// Serialized as a plain JSON number, or `null` when unknown.
impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

/// The shapes a channel payload can take once parsed as JSON.
#[derive(Debug)]
enum RawPayload<'a> {
    Number(f64),
    Text(&'a str),
    Object(&'a Map<String, Value>),
    Other,
}

impl<'a> RawPayload<'a> {
    fn decode(v: &'a Value) -> Self {
        match v {
            Value::Number(n) => n.as_f64().map_or(RawPayload::Other, RawPayload::Number),
            Value::String(s) => RawPayload::Text(s),
            Value::Object(map) => RawPayload::Object(map),
            _ => RawPayload::Other,
        }
    }
}

/// Interpret a scalar JSON value as a finite number.
fn numeric(v: &Value) -> Option<f64> {
    let n = match RawPayload::decode(v) {
        RawPayload::Number(n) => n,
        RawPayload::Text(s) => s.trim().parse::<f64>().ok()?,
        RawPayload::Object(_) | RawPayload::Other => return None,
    };
    n.is_finite().then_some(n)
}

/// Resolve the raw number carried by a single-channel payload.
///
/// Objects are searched for `value`, then for the channel's own field name;
/// the first field present decides, even if it is not numeric.
fn resolve_raw(channel: SensorChannel, payload: &Value) -> Option<f64> {
    match RawPayload::decode(payload) {
        RawPayload::Object(map) => ["value", channel.field()]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(numeric),
        RawPayload::Number(_) | RawPayload::Text(_) => numeric(payload),
        RawPayload::Other => None,
    }
}

/// Convert a single-channel payload into a display value.
pub fn normalize(channel: SensorChannel, payload: &Value) -> Reading {
    match resolve_raw(channel, payload) {
        Some(raw) => Reading::scaled(channel, raw),
        None => Reading::Unknown,
    }
}

/// Convert the channel's named field of a combined payload.
///
/// Combined messages are read by field name only; a nested object or a
/// missing field gives Unknown.
pub fn normalize_field(channel: SensorChannel, payload: &Value) -> Reading {
    match payload.get(channel.field()).and_then(numeric) {
        Some(raw) => Reading::scaled(channel, raw),
        None => Reading::Unknown,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known(v: f64) -> Option<f64> {
        Some(v)
    }

    // -- Scaling and precision ----------------------------------------------

    #[test]
    fn water_temperature_value_field_is_divided_by_ten() {
        let r = normalize(SensorChannel::WaterTemperature, &json!({"value": 235}));
        assert_eq!(r.value(), known(23.5));
        assert_eq!(r.to_string(), "23.5");
    }

    #[test]
    fn water_temperature_accepts_temperature_field() {
        let r = normalize(SensorChannel::WaterTemperature, &json!({"temperature": 198}));
        assert_eq!(r.value(), known(19.8));
    }

    #[test]
    fn ph_named_field_is_divided_by_hundred() {
        let r = normalize(SensorChannel::Ph, &json!({"ph": 742}));
        assert_eq!(r.value(), known(7.42));
        assert_eq!(r.to_string(), "7.42");
    }

    #[test]
    fn ph_keeps_trailing_zero_in_display() {
        let r = normalize(SensorChannel::Ph, &json!(740));
        assert_eq!(r.to_string(), "7.40");
    }

    #[test]
    fn co2_rounds_to_whole_ppm() {
        let r = normalize(SensorChannel::Co2, &json!({"co2": 812.7}));
        assert_eq!(r.value(), known(813.0));
        assert_eq!(r.to_string(), "813");
    }

    #[test]
    fn ec_uses_divisor_one() {
        let r = normalize(SensorChannel::Ec, &json!({"ec": 1203}));
        assert_eq!(r.value(), known(1203.0));
    }

    #[test]
    fn bare_number_payload_is_used_directly() {
        let r = normalize(SensorChannel::WaterTemperature, &json!(251));
        assert_eq!(r.value(), known(25.1));
    }

    #[test]
    fn numeric_string_payload_is_accepted() {
        let r = normalize(SensorChannel::Ec, &json!(" 950 "));
        assert_eq!(r.value(), known(950.0));
    }

    // -- Field priority -----------------------------------------------------

    #[test]
    fn value_field_wins_over_named_field() {
        let r = normalize(SensorChannel::Ph, &json!({"value": 700, "ph": 650}));
        assert_eq!(r.value(), known(7.0));
    }

    #[test]
    fn present_but_invalid_value_field_does_not_fall_through() {
        let r = normalize(SensorChannel::Ph, &json!({"value": "abc", "ph": 650}));
        assert_eq!(r, Reading::Unknown);
    }

    // -- Unknown-shaped payloads --------------------------------------------

    #[test]
    fn unknown_shapes_are_unknown_for_every_channel() {
        let shapes = [
            json!(null),
            json!(true),
            json!([1, 2, 3]),
            json!({}),
            json!({"other": 5}),
            json!({"value": null}),
            json!({"value": {"nested": 1}}),
            json!("not a number"),
            json!("NaN"),
            json!("inf"),
        ];
        for channel in SensorChannel::ALL {
            for shape in &shapes {
                assert_eq!(
                    normalize(channel, shape),
                    Reading::Unknown,
                    "{channel} with {shape}"
                );
            }
        }
    }

    // -- Combined payload fields --------------------------------------------

    #[test]
    fn normalize_field_reads_named_field_only() {
        let payload = json!({"value": 1, "temperature": 22.46});
        let r = normalize_field(SensorChannel::AirTemperature, &payload);
        assert_eq!(r.value(), known(22.5));
    }

    #[test]
    fn normalize_field_missing_is_unknown() {
        let payload = json!({"temperature": 22.0});
        assert_eq!(
            normalize_field(SensorChannel::AirHumidity, &payload),
            Reading::Unknown
        );
    }

    #[test]
    fn normalize_field_on_non_object_is_unknown() {
        assert_eq!(
            normalize_field(SensorChannel::Co2, &json!(400)),
            Reading::Unknown
        );
    }

    // -- Reading ------------------------------------------------------------

    #[test]
    fn reading_new_rejects_non_finite() {
        assert_eq!(Reading::new(f64::NAN, 1), Reading::Unknown);
        assert_eq!(Reading::new(f64::INFINITY, 0), Reading::Unknown);
    }

    #[test]
    fn unknown_displays_placeholder() {
        assert_eq!(Reading::Unknown.to_string(), "--");
    }

    #[test]
    fn reading_serializes_as_number_or_null() {
        assert_eq!(
            serde_json::to_value(Reading::new(23.5, 1)).unwrap(),
            json!(23.5)
        );
        assert_eq!(serde_json::to_value(Reading::Unknown).unwrap(), json!(null));
    }
}
