//! Field types and typed field values.
//!
//! The set of field kinds is closed. Every stored value is one of the
//! [`Value`] variants and is checked against its field's [`FieldType`] on
//! every write.

use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Kind of value an album field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Date,
    Integer,
    Decimal,
    Option,
    StarRating,
    Time,
    Url,
    /// Pseudo-field backed by the picture table, never a column.
    Picture,
    /// Item id column, system reserved.
    Id,
    /// Content version column, system reserved.
    Uuid,
}

impl FieldType {
    pub const USER_TYPES: [FieldType; 8] = [
        FieldType::Text,
        FieldType::Date,
        FieldType::Integer,
        FieldType::Decimal,
        FieldType::Option,
        FieldType::StarRating,
        FieldType::Time,
        FieldType::Url,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Date => "DATE",
            FieldType::Integer => "INTEGER",
            FieldType::Decimal => "DECIMAL",
            FieldType::Option => "OPTION",
            FieldType::StarRating => "STAR_RATING",
            FieldType::Time => "TIME",
            FieldType::Url => "URL",
            FieldType::Picture => "PICTURE",
            FieldType::Id => "ID",
            FieldType::Uuid => "UUID",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Some(FieldType::Text),
            "DATE" => Some(FieldType::Date),
            "INTEGER" => Some(FieldType::Integer),
            "DECIMAL" => Some(FieldType::Decimal),
            "OPTION" => Some(FieldType::Option),
            "STAR_RATING" => Some(FieldType::StarRating),
            "TIME" => Some(FieldType::Time),
            "URL" => Some(FieldType::Url),
            "PICTURE" => Some(FieldType::Picture),
            "ID" => Some(FieldType::Id),
            "UUID" => Some(FieldType::Uuid),
            _ => None,
        }
    }

    /// True for types that can never be declared as user fields.
    pub fn is_reserved(&self) -> bool {
        matches!(self, FieldType::Picture | FieldType::Id | FieldType::Uuid)
    }

    /// SQLite column affinity used for this type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer | FieldType::StarRating | FieldType::Id => "INTEGER",
            FieldType::Decimal => "REAL",
            _ => "TEXT",
        }
    }

    /// Whether a field of this type may hold `Value::Null`.
    pub fn is_nullable(&self) -> bool {
        !matches!(self, FieldType::Option | FieldType::StarRating)
    }

    /// Types ordered numerically by the comparison operators.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Decimal)
    }

    /// Types stored as text that pattern matching applies to.
    pub fn is_pattern_matchable(&self) -> bool {
        matches!(
            self,
            FieldType::Text | FieldType::Url | FieldType::Date | FieldType::Time
        )
    }

    /// Value given to existing items when a field of this type is added.
    pub fn default_value(&self) -> Value {
        match self {
            FieldType::Option => Value::Option(OptionValue::Unknown),
            FieldType::StarRating => Value::StarRating(StarRating::Zero),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state yes/no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionValue {
    Yes,
    No,
    Unknown,
}

impl OptionValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionValue::Yes => "YES",
            OptionValue::No => "NO",
            OptionValue::Unknown => "UNKNOWN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" => Some(OptionValue::Yes),
            "NO" => Some(OptionValue::No),
            "UNKNOWN" => Some(OptionValue::Unknown),
            _ => None,
        }
    }
}

/// Rating from zero to five stars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StarRating {
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
}

impl StarRating {
    pub fn from_u8(stars: u8) -> Option<Self> {
        match stars {
            0 => Some(StarRating::Zero),
            1 => Some(StarRating::One),
            2 => Some(StarRating::Two),
            3 => Some(StarRating::Three),
            4 => Some(StarRating::Four),
            5 => Some(StarRating::Five),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl From<StarRating> for u8 {
    fn from(rating: StarRating) -> u8 {
        rating.as_u8()
    }
}

impl TryFrom<u8> for StarRating {
    type Error = String;

    fn try_from(stars: u8) -> Result<Self, Self::Error> {
        StarRating::from_u8(stars).ok_or_else(|| format!("{} is not a star rating (0-5)", stars))
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Date(NaiveDate),
    Integer(i64),
    Decimal(f64),
    Option(OptionValue),
    StarRating(StarRating),
    Time(NaiveTime),
    Url(String),
}

impl Value {
    /// The field type this value belongs to, `None` for null.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Text(_) => Some(FieldType::Text),
            Value::Date(_) => Some(FieldType::Date),
            Value::Integer(_) => Some(FieldType::Integer),
            Value::Decimal(_) => Some(FieldType::Decimal),
            Value::Option(_) => Some(FieldType::Option),
            Value::StarRating(_) => Some(FieldType::StarRating),
            Value::Time(_) => Some(FieldType::Time),
            Value::Url(_) => Some(FieldType::Url),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check that this value may be stored in a field of `field_type`.
    pub fn check(&self, field_type: FieldType) -> Result<(), String> {
        match self.field_type() {
            None if field_type.is_nullable() => Ok(()),
            None => Err(format!("{} fields cannot be empty", field_type)),
            Some(t) if t == field_type => Ok(()),
            Some(t) => Err(format!("got a {} value", t)),
        }
    }

    /// Parse a user-supplied literal as a value of `field_type`.
    pub fn parse(field_type: FieldType, literal: &str) -> Result<Value, String> {
        let trimmed = literal.trim();
        match field_type {
            FieldType::Text => Ok(Value::Text(literal.to_string())),
            FieldType::Url => Ok(Value::Url(literal.to_string())),
            FieldType::Integer => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| format!("'{}' is not an integer: {}", literal, e)),
            FieldType::Decimal => trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Value::Decimal)
                .ok_or_else(|| format!("'{}' is not a decimal number", literal)),
            FieldType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|e| format!("'{}' is not a date (YYYY-MM-DD): {}", literal, e)),
            FieldType::Time => NaiveTime::parse_from_str(trimmed, TIME_FORMAT)
                .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
                .map(Value::Time)
                .map_err(|e| format!("'{}' is not a time (HH:MM:SS): {}", literal, e)),
            FieldType::Option => OptionValue::from_str(trimmed)
                .map(Value::Option)
                .ok_or_else(|| format!("'{}' is not one of YES, NO, UNKNOWN", literal)),
            FieldType::StarRating => trimmed
                .parse::<u8>()
                .ok()
                .and_then(StarRating::from_u8)
                .map(Value::StarRating)
                .ok_or_else(|| format!("'{}' is not a star rating (0-5)", literal)),
            FieldType::Picture | FieldType::Id | FieldType::Uuid => {
                Err(format!("{} values cannot be written directly", field_type))
            }
        }
    }

    /// Convert to another field type, falling back to that type's default
    /// when no sensible conversion exists.
    pub fn convert_to(&self, target: FieldType) -> Value {
        if self.field_type() == Some(target) {
            return self.clone();
        }
        match (self, target) {
            (Value::Null, _) => target.default_value(),
            (Value::Decimal(v), FieldType::Integer) if v.is_finite() => Value::Integer(v.trunc() as i64),
            (Value::Integer(v), FieldType::Decimal) => Value::Decimal(*v as f64),
            (Value::StarRating(r), FieldType::Integer) => Value::Integer(r.as_u8() as i64),
            (Value::StarRating(r), FieldType::Decimal) => Value::Decimal(r.as_u8() as f64),
            (Value::Integer(v), FieldType::StarRating) => u8::try_from(*v)
                .ok()
                .and_then(StarRating::from_u8)
                .map(Value::StarRating)
                .unwrap_or_else(|| target.default_value()),
            _ => Value::parse(target, &self.to_string()).unwrap_or_else(|_| target.default_value()),
        }
    }

    /// Decode a stored column value for a field of `field_type`.
    pub fn from_sql(field_type: FieldType, raw: ValueRef<'_>) -> Result<Value, String> {
        let text = match raw {
            ValueRef::Null => {
                return Ok(if field_type.is_nullable() {
                    Value::Null
                } else {
                    field_type.default_value()
                });
            }
            ValueRef::Integer(i) => match field_type {
                FieldType::Integer => return Ok(Value::Integer(i)),
                FieldType::Decimal => return Ok(Value::Decimal(i as f64)),
                _ => i.to_string(),
            },
            ValueRef::Real(f) => match field_type {
                FieldType::Decimal => return Ok(Value::Decimal(f)),
                _ => f.to_string(),
            },
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| format!("stored text is not UTF-8: {}", e))?
                .to_string(),
            ValueRef::Blob(_) => return Err("unexpected blob in field column".to_string()),
        };
        Value::parse(field_type, &text)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) | Value::Url(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Option(o) => f.write_str(o.as_str()),
            Value::StarRating(r) => write!(f, "{}", r.as_u8()),
            Value::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Text(s) | Value::Url(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Decimal(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::StarRating(r) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Integer(r.as_u8() as i64))
            }
            Value::Option(o) => ToSqlOutput::Borrowed(ValueRef::Text(o.as_str().as_bytes())),
            Value::Date(_) | Value::Time(_) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Text(self.to_string()))
            }
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<OptionValue> for Value {
    fn from(v: OptionValue) -> Self {
        Value::Option(v)
    }
}

impl From<StarRating> for Value {
    fn from(v: StarRating) -> Self {
        Value::StarRating(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_names_round_trip() {
        for t in FieldType::USER_TYPES {
            assert_eq!(FieldType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(FieldType::from_str("star_rating"), Some(FieldType::StarRating));
        assert_eq!(FieldType::from_str("blob"), None);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(FieldType::Option.default_value(), Value::Option(OptionValue::Unknown));
        assert_eq!(FieldType::StarRating.default_value(), Value::StarRating(StarRating::Zero));
        assert!(FieldType::Text.default_value().is_null());
        assert!(FieldType::Decimal.default_value().is_null());
    }

    #[test]
    fn test_check_rejects_wrong_type_and_null_option() {
        assert!(Value::Text("x".into()).check(FieldType::Text).is_ok());
        assert!(Value::Null.check(FieldType::Date).is_ok());
        assert!(Value::Integer(3).check(FieldType::Decimal).is_err());
        assert!(Value::Null.check(FieldType::Option).is_err());
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(Value::parse(FieldType::Decimal, "30.0"), Ok(Value::Decimal(30.0)));
        assert_eq!(Value::parse(FieldType::Option, "yes"), Ok(Value::Option(OptionValue::Yes)));
        assert_eq!(
            Value::parse(FieldType::StarRating, "4"),
            Ok(Value::StarRating(StarRating::Four))
        );
        assert_eq!(
            Value::parse(FieldType::Date, "2012-03-04"),
            Ok(Value::Date(NaiveDate::from_ymd_opt(2012, 3, 4).unwrap()))
        );
        assert!(Value::parse(FieldType::StarRating, "6").is_err());
        assert!(Value::parse(FieldType::Integer, "4.5").is_err());
        assert!(Value::parse(FieldType::Id, "1").is_err());
    }

    #[test]
    fn test_convert_between_types() {
        assert_eq!(Value::Decimal(4.7).convert_to(FieldType::Integer), Value::Integer(4));
        assert_eq!(Value::Integer(3).convert_to(FieldType::StarRating), Value::StarRating(StarRating::Three));
        assert_eq!(Value::Integer(9).convert_to(FieldType::StarRating), Value::StarRating(StarRating::Zero));
        assert_eq!(Value::Text("12.5".into()).convert_to(FieldType::Decimal), Value::Decimal(12.5));
        assert_eq!(Value::Text("Tom".into()).convert_to(FieldType::Decimal), Value::Null);
        assert_eq!(Value::Decimal(2.5).convert_to(FieldType::Text), Value::Text("2.5".into()));
        assert_eq!(Value::Null.convert_to(FieldType::Option), Value::Option(OptionValue::Unknown));
    }

    #[test]
    fn test_from_sql_handles_affinity_changes() {
        assert_eq!(Value::from_sql(FieldType::Decimal, ValueRef::Integer(3)), Ok(Value::Decimal(3.0)));
        assert_eq!(
            Value::from_sql(FieldType::Text, ValueRef::Real(1.5)),
            Ok(Value::Text("1.5".into()))
        );
        assert_eq!(
            Value::from_sql(FieldType::StarRating, ValueRef::Null),
            Ok(Value::StarRating(StarRating::Zero))
        );
        assert!(Value::from_sql(FieldType::Text, ValueRef::Blob(&[1, 2])).is_err());
    }
}
