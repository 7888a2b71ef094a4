//! Small helpers for storing the closed wire enums (all plain
//! lowercase-string serializable) as SQLite `TEXT` columns.

use anyhow::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn enum_to_text<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        other => panic!("expected a unit-enum to serialize to a string, got {other:?}"),
    }
}

pub fn enum_from_text<T: DeserializeOwned>(text: &str) -> Result<T, Error> {
    Ok(serde_json::from_value(serde_json::Value::String(
        text.to_string(),
    ))?)
}
