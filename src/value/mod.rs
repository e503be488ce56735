//! # Parameter Values
//!
//! Values supplied for query parameters, modelled as a closed tagged union so
//! validation and rendering can match exhaustively instead of inspecting
//! runtime types.
//!
//! ## Design Decisions
//!
//! - **JSON-shaped**: `ParamValue` converts to and from `serde_json::Value`, so
//!   a request body can be handed over verbatim
//! - **Dates are explicit**: JSON never produces `Date`/`DateTime` variants;
//!   strings stay strings and the validator parses them on demand
//! - **Stable stringification**: `Display` is the single rendering used by the
//!   template engine, list joining and enum membership checks
//!
//! ## Usage
//!
//! ```rust
//! use querygate::value::ParamValue;
//!
//! let v = ParamValue::from(22);
//! assert_eq!(v.to_string(), "22");
//!
//! let range = ParamValue::range("2024-01-01", "2024-01-31");
//! assert!(range.get("start").is_some());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Formats accepted for date and datetime parameters, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Multi-value parameters (enum/query with `multiValuesOptions`)
    List(Vec<ParamValue>),
    /// Compound values, e.g. `{start, end}` for ranges
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Build a `{start, end}` range value.
    pub fn range(start: impl Into<ParamValue>, end: impl Into<ParamValue>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("start".to_string(), start.into());
        map.insert("end".to_string(), end.into());
        ParamValue::Map(map)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ParamValue::List(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, ParamValue::Map(_))
    }

    /// Member lookup for compound values.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        match self {
            ParamValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Mustache truthiness: missing, `false`, empty strings and empty
    /// collections are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            ParamValue::Null => false,
            ParamValue::Bool(b) => *b,
            ParamValue::String(s) => !s.is_empty(),
            ParamValue::List(items) => !items.is_empty(),
            ParamValue::Map(map) => !map.is_empty(),
            ParamValue::Number(_) | ParamValue::Date(_) | ParamValue::DateTime(_) => true,
        }
    }

    /// Interpret the value as a number. Strings are accepted when they parse
    /// as a float after trimming.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Interpret the value as a point in time.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            ParamValue::Date(d) => d.and_hms_opt(0, 0, 0),
            ParamValue::DateTime(dt) => Some(*dt),
            ParamValue::String(s) => parse_datetime(s),
            _ => None,
        }
    }
}

/// Parse a date or datetime string in any of the accepted formats.
pub fn parse_datetime(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Some(dt);
        }
    }
    DateTime::parse_from_rfc3339(input)
        .ok()
        .map(|dt| dt.naive_utc())
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => Ok(()),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Number(n) => f.write_str(&format_number(*n)),
            ParamValue::String(s) => f.write_str(s),
            ParamValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            ParamValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            ParamValue::List(_) | ParamValue::Map(_) => {
                let json: serde_json::Value = self.clone().into();
                write!(f, "{json}")
            }
        }
    }
}

impl From<serde_json::Value> for ParamValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ParamValue::Null,
            serde_json::Value::Bool(b) => ParamValue::Bool(b),
            serde_json::Value::Number(n) => ParamValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => ParamValue::String(s),
            serde_json::Value::Array(items) => {
                ParamValue::List(items.into_iter().map(ParamValue::from).collect())
            }
            serde_json::Value::Object(map) => ParamValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, ParamValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<ParamValue> for serde_json::Value {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::Null => serde_json::Value::Null,
            ParamValue::Bool(b) => serde_json::Value::Bool(b),
            ParamValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    serde_json::Value::from(n as i64)
                } else {
                    serde_json::Number::from_f64(n)
                        .map_or(serde_json::Value::Null, serde_json::Value::Number)
                }
            }
            ParamValue::String(s) => serde_json::Value::String(s),
            date @ (ParamValue::Date(_) | ParamValue::DateTime(_)) => {
                serde_json::Value::String(date.to_string())
            }
            ParamValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            ParamValue::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Number(n as f64)
    }
}

impl From<i32> for ParamValue {
    fn from(n: i32) -> Self {
        ParamValue::Number(f64::from(n))
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(d: NaiveDate) -> Self {
        ParamValue::Date(d)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(dt: NaiveDateTime) -> Self {
        ParamValue::DateTime(dt)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(items: Vec<T>) -> Self {
        ParamValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Parameter values keyed by name, as supplied to `apply`.
pub type ParamValues = BTreeMap<String, ParamValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_display_drops_integral_fraction() {
        assert_eq!(ParamValue::from(22).to_string(), "22");
        assert_eq!(ParamValue::from(22.5).to_string(), "22.5");
        assert_eq!(ParamValue::from(-3.0).to_string(), "-3");
    }

    #[test]
    fn test_truthiness() {
        assert!(!ParamValue::Null.is_truthy());
        assert!(!ParamValue::from("").is_truthy());
        assert!(!ParamValue::List(vec![]).is_truthy());
        assert!(ParamValue::from(0).is_truthy());
        assert!(ParamValue::from("x").is_truthy());
    }

    #[test]
    fn test_number_from_string() {
        assert_eq!(ParamValue::from(" 1.5 ").as_number(), Some(1.5));
        assert_eq!(ParamValue::from("abc").as_number(), None);
        assert_eq!(ParamValue::from(true).as_number(), None);
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2024-01-31").is_some());
        assert!(parse_datetime("2024-01-31 10:15").is_some());
        assert!(parse_datetime("2024-01-31T10:15:30").is_some());
        assert!(parse_datetime("2024-01-31 10:15:30.250").is_some());
        assert!(parse_datetime("2024-01-31T10:15:30+02:00").is_some());
        assert!(parse_datetime("yesterday").is_none());
        assert!(parse_datetime("2024-13-01").is_none());
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": [1, "x"], "b": {"start": "2024-01-01"}});
        let value: ParamValue = serde_json::from_value(json.clone()).unwrap();
        assert!(value.get("a").unwrap().is_list());
        assert_eq!(
            value.get("b").and_then(|b| b.get("start")),
            Some(&ParamValue::from("2024-01-01"))
        );
        let back = serde_json::to_value(&value).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn test_date_display() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(ParamValue::from(d).to_string(), "2024-02-29");
    }
}
