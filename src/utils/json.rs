use serde_json::Value;

/// A JSON member that may be absent, explicitly `null`, or a string.
#[derive(Debug, PartialEq, Eq)]
pub enum NullableValue<'a> {
    Omitted,
    Null,
    String(&'a str),
}

pub fn classify_nullable(value: Option<&Value>) -> Result<NullableValue<'_>, String> {
    match value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(text)) => Ok(NullableValue::String(text)),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}
