//! Serde adapter for durations written as `"5s"`, `"1h 30m"` and so on.
//!
//! Use with `#[serde(with = "mesh_transport::humantime_duration")]`.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Serialize as a humantime string
pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

/// Parse a humantime string
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}
