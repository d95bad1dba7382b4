//! Typed repositories over the [`DocumentStore`](crate::store::DocumentStore).
//!
//! Rows are decoded into domain types field by field; a row that does not
//! fit is reported as a [`DecodeError`] rather than silently defaulted.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use crate::store::{Fields, StoreError};

pub mod bills;
pub mod ledgers;
pub mod users;

pub use bills::{BillQuery, BillStore, BillSummary, DateRange};
pub use ledgers::LedgerStore;
pub use users::UserStore;

/// A stored row that does not decode into its domain type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("record {record}: missing field {field:?}")]
    MissingField { record: String, field: &'static str },

    #[error("record {record}: field {field:?} has unexpected value {value}")]
    InvalidField {
        record: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Stored amounts add up to more than a decimal can hold.
    #[error("bill totals overflow")]
    Overflow,
}

impl RepoError {
    /// Whether retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RepoError::Store(e) => e.is_transient(),
            RepoError::Decode(_) | RepoError::Overflow => false,
        }
    }
}

// ─── Field decoding helpers ───

/// Reads a text field. Absent and null read as empty.
///
/// Bitable text cells sometimes arrive as rich-text segments
/// (`[{"type": "text", "text": "..."}]`); those are concatenated.
pub(crate) fn text(fields: &Fields, field: &str) -> String {
    match fields.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(segments)) => segments
            .iter()
            .filter_map(|seg| match seg {
                Value::String(s) => Some(s.as_str()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn required_text(
    record: &str,
    fields: &Fields,
    field: &'static str,
) -> Result<String, DecodeError> {
    let value = text(fields, field);
    if value.is_empty() {
        return Err(DecodeError::MissingField {
            record: record.to_string(),
            field,
        });
    }
    Ok(value)
}

/// Reads a list of option labels; a single string is a one-element list.
pub(crate) fn labels(fields: &Fields, field: &str) -> Vec<String> {
    match fields.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Reads a decimal stored either as a number or as numeric text.
pub(crate) fn decimal(record: &str, fields: &Fields, field: &'static str) -> Result<Decimal, DecodeError> {
    let invalid = |value: &Value| DecodeError::InvalidField {
        record: record.to_string(),
        field,
        value: value.to_string(),
    };
    match fields.get(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField {
            record: record.to_string(),
            field,
        }),
        Some(v @ Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .map_err(|_| invalid(v)),
        Some(v @ Value::String(s)) => Decimal::from_str(s.trim()).map_err(|_| invalid(v)),
        Some(other) => Err(invalid(other)),
    }
}

/// Reads a millisecond timestamp. Absent reads as zero.
pub(crate) fn millis(record: &str, fields: &Fields, field: &'static str) -> Result<i64, DecodeError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(v @ Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| DecodeError::InvalidField {
                record: record.to_string(),
                field,
                value: v.to_string(),
            }),
        Some(v @ Value::String(s)) => s.trim().parse().map_err(|_| DecodeError::InvalidField {
            record: record.to_string(),
            field,
            value: v.to_string(),
        }),
        Some(other) => Err(DecodeError::InvalidField {
            record: record.to_string(),
            field,
            value: other.to_string(),
        }),
    }
}
