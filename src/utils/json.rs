use serde::de::DeserializeOwned;
use serde_json::Value;

/// A field of a partial update body: left out, explicitly cleared, or set.
#[derive(Debug, Clone, PartialEq)]
pub enum Nullable<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Nullable<T> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, Nullable::Omitted)
    }

    /// Shape expected by diesel changesets: `None` leaves the column alone,
    /// `Some(None)` writes NULL.
    pub fn into_change(self) -> Option<Option<T>> {
        match self {
            Nullable::Omitted => None,
            Nullable::Null => Some(None),
            Nullable::Value(value) => Some(Some(value)),
        }
    }
}

pub fn nullable_field<T: DeserializeOwned>(body: &Value, field: &str) -> Result<Nullable<T>, String> {
    match body.get(field) {
        None => Ok(Nullable::Omitted),
        Some(Value::Null) => Ok(Nullable::Null),
        Some(value) => serde_json::from_value(value.clone())
            .map(Nullable::Value)
            .map_err(|err| format!("invalid value for {field}: {err}")),
    }
}
