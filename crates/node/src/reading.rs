//! One sensor snapshot and its MQTT payload encoding.

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

/// Five-field snapshot published once per cycle.  Field order here is the
/// key order on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    #[serde(serialize_with = "two_decimals")]
    pub water_level_cm: f32,
    #[serde(serialize_with = "two_decimals")]
    pub rain_mm_hour: f32,
    #[serde(serialize_with = "two_decimals")]
    pub soil_humidity_pct: f32,
    #[serde(serialize_with = "two_decimals")]
    pub temp_c: f32,
    #[serde(serialize_with = "two_decimals")]
    pub humidity_air_pct: f32,
}

impl Reading {
    /// True when every field is a real number.  Hardware reads that come back
    /// NaN or infinite are treated as failed reads.
    pub fn is_finite(&self) -> bool {
        [
            self.water_level_cm,
            self.rain_mm_hour,
            self.soil_humidity_pct,
            self.temp_c,
            self.humidity_air_pct,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// Encode as the compact JSON object consumed by the flood backend, e.g.
    /// `{"water_level_cm":180.00,"rain_mm_hour":3.42,...}`.
    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode reading payload")
    }
}

/// Emit `v` as a JSON number with exactly two decimal places.
fn two_decimals<S: Serializer>(v: &f32, s: S) -> Result<S::Ok, S::Error> {
    let raw = RawValue::from_string(format!("{v:.2}")).map_err(serde::ser::Error::custom)?;
    raw.serialize(s)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Reading {
        Reading {
            water_level_cm: 180.0,
            rain_mm_hour: 3.42,
            soil_humidity_pct: 65.0,
            temp_c: 26.1,
            humidity_air_pct: 84.33,
        }
    }

    #[test]
    fn payload_matches_wire_format() {
        let payload = sample().to_payload().unwrap();
        assert_eq!(
            payload,
            r#"{"water_level_cm":180.00,"rain_mm_hour":3.42,"soil_humidity_pct":65.00,"temp_c":26.10,"humidity_air_pct":84.33}"#
        );
    }

    #[test]
    fn payload_has_exactly_five_numeric_fields() {
        let payload = sample().to_payload().unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 5);
        for key in [
            "water_level_cm",
            "rain_mm_hour",
            "soil_humidity_pct",
            "temp_c",
            "humidity_air_pct",
        ] {
            assert!(obj[key].is_number(), "{key} should be a number");
        }
    }

    #[test]
    fn payload_rounds_to_two_decimals() {
        let r = Reading {
            water_level_cm: 301.456,
            rain_mm_hour: 0.0,
            soil_humidity_pct: 99.999,
            temp_c: 22.004,
            humidity_air_pct: 90.5,
        };
        let payload = r.to_payload().unwrap();
        assert!(payload.contains(r#""water_level_cm":301.46"#), "{payload}");
        assert!(payload.contains(r#""rain_mm_hour":0.00"#), "{payload}");
        assert!(payload.contains(r#""soil_humidity_pct":100.00"#), "{payload}");
        assert!(payload.contains(r#""temp_c":22.00"#), "{payload}");
        assert!(payload.contains(r#""humidity_air_pct":90.50"#), "{payload}");
    }

    #[test]
    fn non_finite_reading_fails_to_encode() {
        let mut r = sample();
        r.temp_c = f32::NAN;
        assert!(r.to_payload().is_err());
    }

    #[test]
    fn is_finite_detects_bad_fields() {
        assert!(sample().is_finite());

        let mut r = sample();
        r.humidity_air_pct = f32::NAN;
        assert!(!r.is_finite());

        let mut r = sample();
        r.water_level_cm = f32::INFINITY;
        assert!(!r.is_finite());
    }
}
