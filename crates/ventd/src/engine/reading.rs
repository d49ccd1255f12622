//! Tolerant decoding of inbound telemetry payloads.
//!
//! Readings arrive as untrusted JSON published by the device firmware. Any
//! field may be missing, and a field of an unexpected type is treated as
//! missing rather than poisoning the rest of the reading.

use anyhow::Context;
use serde_json::Value;

/// A single decoded telemetry payload.
///
/// `motion` keeps its raw JSON value: firmwares encode it as a boolean, a
/// number or a string, and interpreting that is the reducer's job, not the
/// decoder's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub motion: Option<Value>,
    pub gas: Option<bool>,
    pub vent_angle: Option<i64>,
}

impl SensorReading {
    /// Decode a raw payload.
    ///
    /// Fails only when the payload is not a JSON object at all; individual
    /// fields degrade to `None`.
    pub fn from_slice(payload: &[u8]) -> anyhow::Result<Self> {
        let value: Value =
            serde_json::from_slice(payload).context("payload is not valid JSON")?;
        anyhow::ensure!(value.is_object(), "payload is not a JSON object");
        Ok(Self::from_value(&value))
    }

    /// Extract the known fields from a decoded JSON object.
    pub fn from_value(value: &Value) -> Self {
        Self {
            temperature: value.get("temperature").and_then(|v| v.as_f64()),
            humidity: value.get("humidity").and_then(|v| v.as_f64()),
            motion: value.get("motion").cloned(),
            gas: value.get("gas").and_then(|v| v.as_bool()),
            vent_angle: value.get("vent_angle").and_then(|v| v.as_i64()),
        }
    }
}
