use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Error payload attached to `result` and `nosub` messages.
///
/// Fields are carried verbatim from the wire. `error` is usually a numeric
/// errno or a string code depending on the server. A bare value in place of
/// the object (`"error": "denied"`) becomes the `error` code with no detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodError {
    /// Error code
    pub error: JsonValue,

    /// Error class name (e.g. `Meteor.Error`); empty when the server omits
    /// it or sends `null`
    #[serde(rename = "errorType")]
    pub error_type: String,

    /// Short human-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct WireMethodError {
    #[serde(default)]
    error: JsonValue,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl<'de> Deserialize<'de> for MethodError {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        if !value.is_object() {
            return Ok(MethodError {
                error: value,
                error_type: String::new(),
                reason: None,
                message: None,
            });
        }

        let wire: WireMethodError =
            serde_json::from_value(value).map_err(serde::de::Error::custom)?;
        Ok(MethodError {
            error: wire.error,
            error_type: wire.error_type.unwrap_or_default(),
            reason: wire.reason,
            message: wire.message,
        })
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_type.is_empty() {
            write!(f, "[{}]", self.error)?;
        } else {
            write!(f, "{} [{}]", self.error_type, self.error)?;
        }
        match self.reason.as_deref().or(self.message.as_deref()) {
            Some(detail) => write!(f, " {}", detail),
            None => Ok(()),
        }
    }
}
