//! Payload decoding for the three telemetry categories

use serde::Deserialize;

use crate::model::OtaStatus;

/// Body of a `health` message
///
/// Every field is optional. Unknown fields are ignored so firmware can add
/// metrics without breaking older backends.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub fw: Option<String>,
    #[serde(default)]
    pub heap: Option<f64>,
    #[serde(default)]
    pub temp: Option<f64>,
}

impl HealthReport {
    /// Decode a health payload
    ///
    /// Fails on invalid UTF-8, invalid JSON, a non-object body, or fields
    /// of the wrong type.
    pub fn decode(payload: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

/// LED state carried by a `status` message
///
/// `None` for anything other than the literals `ON` / `OFF`.
pub fn decode_led(payload: &[u8]) -> Option<bool> {
    match std::str::from_utf8(payload).map(str::trim) {
        Ok("ON") => Some(true),
        Ok("OFF") => Some(false),
        _ => None,
    }
}

/// Status literal carried by an `ota/status` message
///
/// Novel literals are preserved as [`OtaStatus::Unrecognized`].
pub fn decode_ota_status(payload: &[u8]) -> OtaStatus {
    let text = String::from_utf8_lossy(payload);
    OtaStatus::from_literal(text.trim())
}
