//! Conversion of raw SailPoint records into canonical identities.
//!
//! Records are arbitrary JSON objects. Fields are read through explicit
//! extraction with defaults; only the unique identifier is mandatory.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::graph::{GroupRef, Identity};

/// Prefix of properties derived from custom attributes.
pub const CUSTOM_ATTRIBUTE_PREFIX: &str = "custom_";

/// One record as returned by a collection endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wraps a JSON value, returning `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a field as a non-empty string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A record that cannot become an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record has no unique identifier")]
    MissingUniqueId,

    #[error("unique identifier is not a string or integer: {0}")]
    InvalidUniqueId(String),
}

/// Unit of numeric timestamps in the source data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EpochUnit {
    #[default]
    Milliseconds,
    Seconds,
}

/// Options of the record transformer.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub epoch_unit: EpochUnit,
}

/// Maps raw records to [`Identity`] values. Pure; performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct RecordTransformer {
    options: TransformOptions,
}

impl RecordTransformer {
    #[must_use]
    pub fn new(options: TransformOptions) -> Self {
        Self { options }
    }

    /// Transforms one record.
    pub fn transform(&self, record: &RawRecord) -> Result<Identity, ValidationError> {
        let unique_id = unique_id(record)?;

        Ok(Identity {
            display_name: record.get_str("name").unwrap_or_default().to_string(),
            primary_email: record.get_str("email").map(str::to_string),
            status: record.get_str("status").map(str::to_string),
            created_at: self.timestamp(record.get("created")),
            last_login_at: self.timestamp(record.get("lastLogin")),
            group_memberships: group_refs(record.get("groups")),
            custom_attributes: custom_attributes(record),
            unique_id,
        })
    }

    /// Normalizes a timestamp field to UTC ISO-8601, or `None` when the value
    /// is missing, zero or unparseable.
    #[must_use]
    pub fn timestamp(&self, value: Option<&Value>) -> Option<String> {
        match value? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => {
                if is_iso8601(s) {
                    Some(s.clone())
                } else {
                    s.trim()
                        .parse::<f64>()
                        .ok()
                        .and_then(|n| self.epoch_to_iso(n))
                }
            }
            Value::Number(n) => n.as_f64().and_then(|n| self.epoch_to_iso(n)),
            _ => None,
        }
    }

    fn epoch_to_iso(&self, value: f64) -> Option<String> {
        if !value.is_finite() || value == 0.0 {
            return None;
        }
        let millis = match self.options.epoch_unit {
            EpochUnit::Milliseconds => value,
            EpochUnit::Seconds => value * 1000.0,
        };
        if millis.abs() > i64::MAX as f64 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        Utc.timestamp_millis_opt(millis.round() as i64)
            .single()
            .map(|dt| dt.to_rfc3339())
    }
}

fn unique_id(record: &RawRecord) -> Result<String, ValidationError> {
    match record.get("id") {
        None | Some(Value::Null) => Err(ValidationError::MissingUniqueId),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::MissingUniqueId),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Some(other) => Err(ValidationError::InvalidUniqueId(other.to_string())),
    }
}

fn is_iso8601(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Reads `[{id, name}]` group references; the name stands in for a missing id
/// and vice versa. References with neither are skipped.
fn group_refs(value: Option<&Value>) -> Vec<GroupRef> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut refs: Vec<GroupRef> = Vec::with_capacity(items.len());
    for item in items {
        let id = item.get("id").and_then(scalar_string);
        let name = item.get("name").and_then(scalar_string);
        let group = match (id, name) {
            (Some(id), Some(name)) => GroupRef {
                unique_id: id,
                display_name: name,
            },
            (Some(id), None) => GroupRef {
                display_name: id.clone(),
                unique_id: id,
            },
            (None, Some(name)) => GroupRef {
                unique_id: name.clone(),
                display_name: name,
            },
            (None, None) => continue,
        };
        if !refs.iter().any(|r| r.unique_id == group.unique_id) {
            refs.push(group);
        }
    }
    refs
}

/// Scalar entries of `attributes` and `profile.custom_attributes`.
fn custom_attributes(record: &RawRecord) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();

    if let Some(Value::Object(attrs)) = record.get("attributes") {
        for (name, value) in attrs {
            insert_custom(&mut out, name, value);
        }
    }

    if let Some(Value::Array(items)) = record
        .get("profile")
        .and_then(|p| p.get("custom_attributes"))
    {
        for item in items {
            if let (Some(name), Some(value)) =
                (item.get("name").and_then(Value::as_str), item.get("value"))
            {
                insert_custom(&mut out, name, value);
            }
        }
    }

    out
}

fn insert_custom(out: &mut BTreeMap<String, Value>, name: &str, value: &Value) {
    let is_scalar = matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_));
    if !is_scalar {
        return;
    }
    if let Some(key) = custom_property_name(name) {
        out.insert(key, value.clone());
    }
}

/// Builds `custom_<name>` with the name lowercased and everything outside
/// `[a-z0-9_]` replaced by `_`.
#[must_use]
pub fn custom_property_name(name: &str) -> Option<String> {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        None
    } else {
        Some(format!("{CUSTOM_ATTRIBUTE_PREFIX}{sanitized}"))
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
