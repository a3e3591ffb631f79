#![forbid(unsafe_code)]
//! Millisecond timestamps and their RFC 3339 boundary encoding.
//!
//! Internally every timestamp is a Unix-epoch millisecond count. The
//! textual mirror serializes RFC 3339; millisecond precision is the
//! lossless round-trip profile.

use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn now_ms() -> i64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX).max(0)
}

pub fn ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = i128::from(ts_ms).saturating_mul(1_000_000);
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(epoch_rfc3339)
}

fn epoch_rfc3339() -> String {
    OffsetDateTime::UNIX_EPOCH
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Parse an RFC 3339 timestamp, truncating sub-millisecond precision.
pub fn rfc3339_to_ms(value: &str) -> Result<i64, time::error::Parse> {
    let dt = OffsetDateTime::parse(value, &Rfc3339)?;
    let millis = dt.unix_timestamp_nanos() / 1_000_000;
    Ok(i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX }))
}

/// Serde adapter for required millisecond timestamps.
pub mod rfc3339_ms {
    use super::*;

    pub fn serialize<S: Serializer>(ts_ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ms_to_rfc3339(*ts_ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        rfc3339_to_ms(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional millisecond timestamps.
pub mod rfc3339_ms_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts_ms: &Option<i64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts_ms {
            Some(ms) => serializer.serialize_some(&ms_to_rfc3339(*ms)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(s) if !s.is_empty() => rfc3339_to_ms(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
