use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::api::ApiVersion;

/// The `{type, data, messages}` wrapper shared by every broker response.
///
/// The API document additionally carries the version fields.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub supported_api_versions: Vec<ApiVersion>,
    #[serde(default)]
    pub api_version: Option<ApiVersion>,
    #[serde(default)]
    pub version: Option<ApiVersion>,
}

impl Envelope {
    /// Parses a response body.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// A server-supplied message attached to a response.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Message {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default, deserialize_with = "lenient_exit_code")]
    pub exit_code: Option<i32>,
}

impl Message {
    /// Message text; empty when the server sent none.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Severity is compared case-insensitively against `ERROR`.
    pub fn is_error(&self) -> bool {
        self.severity
            .as_deref()
            .is_some_and(|severity| severity.eq_ignore_ascii_case("error"))
    }

    /// Messages with no field, or the `result` field, are meant for display.
    pub fn is_result(&self) -> bool {
        self.field.as_deref().is_none_or(|field| field == "result")
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// Older brokers send exit codes as strings.
fn lenient_exit_code<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let code = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number.as_i64().and_then(|n| i32::try_from(n).ok()),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::Envelope;

    #[test]
    fn parses_messages_with_string_exit_codes_and_mixed_severity() {
        let envelope = Envelope::parse(
            r#"{"type":null,"data":null,"messages":[
                {"text":"Namespace taken","field":"id","severity":"error","exit_code":"103"},
                {"text":"FYI","field":null,"severity":"INFO","exit_code":0}
            ]}"#,
        )
        .expect("valid envelope");

        assert_eq!(envelope.kind, None);
        assert_eq!(envelope.messages.len(), 2);
        assert!(envelope.messages[0].is_error());
        assert_eq!(envelope.messages[0].exit_code, Some(103));
        assert!(!envelope.messages[1].is_error());
        assert!(envelope.messages[1].is_result());
    }

    #[test]
    fn null_messages_decode_as_empty() {
        let envelope =
            Envelope::parse(r#"{"type":"domains","data":[],"messages":null}"#).expect("valid");
        assert!(envelope.messages.is_empty());
    }

    #[test]
    fn rejects_non_object_bodies() {
        assert!(Envelope::parse("[1, 2]").is_err());
        assert!(Envelope::parse("<html>502</html>").is_err());
    }
}
