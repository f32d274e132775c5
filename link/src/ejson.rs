//! EJSON scalar codecs.
//!
//! DDP encodes values JSON cannot express natively as tagged objects:
//!
//! - dates: `{"$date": <epoch-millis>}`
//! - binary: `{"$binary": <base64 string>}`
//!
//! The plain functions convert between wire values and native values. The
//! `date`, `datetime` and `binary` submodules plug the same conversions into
//! serde via `#[serde(with = "...")]`.
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Snapshot {
//!     #[serde(with = "truenas_link::ejson::date")]
//!     taken_at: i64,
//! }
//! ```

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue};

/// Key of the EJSON date wrapper
pub const DATE_KEY: &str = "$date";

/// Key of the EJSON binary wrapper
pub const BINARY_KEY: &str = "$binary";

/// Wrap epoch milliseconds as `{"$date": millis}`.
pub fn encode_date(millis: i64) -> JsonValue {
    wrap(DATE_KEY, JsonValue::from(millis))
}

/// Unwrap `{"$date": millis}`.
///
/// Values without a `$date` key are passed through unchanged, so a bare
/// value is returned as-is.
pub fn decode_date(value: &JsonValue) -> &JsonValue {
    value.get(DATE_KEY).unwrap_or(value)
}

/// Read epoch milliseconds from a wrapped or bare numeric value.
pub fn date_millis(value: &JsonValue) -> Option<i64> {
    let inner = decode_date(value);
    inner
        .as_i64()
        .or_else(|| inner.as_f64().map(|millis| millis as i64))
}

/// Convert epoch milliseconds to a UTC instant.
pub fn millis_to_instant(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Wrap a base64 string as `{"$binary": b64}`.
pub fn encode_binary(base64: &str) -> JsonValue {
    wrap(BINARY_KEY, JsonValue::from(base64))
}

/// Unwrap `{"$binary": b64}`, passing other values through unchanged.
///
/// The base64 text is not decoded here; callers use [`decode_base64`] when
/// they need the raw bytes.
pub fn decode_binary(value: &JsonValue) -> &JsonValue {
    value.get(BINARY_KEY).unwrap_or(value)
}

/// Decode the base64 text carried by an EJSON binary value.
pub fn decode_base64(text: &str) -> Option<Vec<u8>> {
    general_purpose::STANDARD.decode(text).ok()
}

/// Encode raw bytes as base64 text suitable for [`encode_binary`].
pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

fn wrap(key: &str, value: JsonValue) -> JsonValue {
    let mut object = Map::with_capacity(1);
    object.insert(key.to_string(), value);
    JsonValue::Object(object)
}

/// `#[serde(with = "ejson::date")]` for `i64` epoch-millisecond fields.
pub mod date {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value as JsonValue;

    pub fn serialize<S>(millis: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::encode_date(*millis).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        super::date_millis(&value)
            .ok_or_else(|| D::Error::custom(format!("expected EJSON date, got {}", value)))
    }
}

/// `#[serde(with = "ejson::datetime")]` for `DateTime<Utc>` fields.
pub mod datetime {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::date::serialize(&instant.timestamp_millis(), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = super::date::deserialize(deserializer)?;
        super::millis_to_instant(millis)
            .ok_or_else(|| D::Error::custom(format!("date out of range: {} ms", millis)))
    }
}

/// `#[serde(with = "ejson::binary")]` for base64 `String` fields.
pub mod binary {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value as JsonValue;

    pub fn serialize<S>(base64: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::encode_binary(base64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        match super::decode_binary(&value) {
            JsonValue::String(text) => Ok(text.clone()),
            other => Err(D::Error::custom(format!("expected EJSON binary, got {}", other))),
        }
    }
}
