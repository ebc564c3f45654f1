// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::ids::PatientId;

pub const ID_KEY: &str = "id";
pub const CREATED_AT_KEY: &str = "created_at";
pub const NAME_KEY: &str = "name";
pub const BIRTH_DATE_KEY: &str = "date_of_birth";

/// Names one attribute of a patient record. The valid set is owned by the
/// server, so this is an open string rather than an enum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldKey(String);

impl FieldKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_identity(&self) -> bool {
        self.0 == ID_KEY
    }

    /// `id` and `created_at` are assigned by the server and never edited.
    pub fn is_server_assigned(&self) -> bool {
        self.0 == ID_KEY || self.0 == CREATED_AT_KEY
    }
}

impl Borrow<str> for FieldKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for FieldKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(value) => value.trim().is_empty(),
            Self::Bool(_) | Self::Integer(_) | Self::Decimal(_) => false,
        }
    }

    /// Numeric zero. Unit suffixes are skipped for it.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Integer(value) => *value == 0,
            Self::Decimal(value) => *value == 0.0,
            Self::Null | Self::Bool(_) | Self::Text(_) => false,
        }
    }

    /// Raw value as it should appear in an input widget. Never carries
    /// display decoration such as unit suffixes.
    pub fn to_input_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Decimal(value) => value.to_string(),
            Self::Text(value) => value.clone(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Decimal(value) if value.fract() == 0.0 => Some(*value as i64),
            Self::Text(value) => value.trim().parse().ok(),
            Self::Null | Self::Bool(_) | Self::Decimal(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

/// One row of the remote registry, exactly as the server returned it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientRecord {
    fields: BTreeMap<FieldKey, FieldValue>,
}

impl PatientRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<FieldKey>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn id(&self) -> Option<PatientId> {
        self.get(ID_KEY)
            .and_then(FieldValue::as_i64)
            .map(PatientId::new)
    }

    pub fn created_at(&self) -> Option<OffsetDateTime> {
        self.get(CREATED_AT_KEY)
            .and_then(FieldValue::as_text)
            .and_then(parse_timestamp)
    }

    pub fn full_name(&self) -> &str {
        self.get(NAME_KEY)
            .and_then(FieldValue::as_text)
            .unwrap_or("")
    }
}

impl FromIterator<(FieldKey, FieldValue)> for PatientRecord {
    fn from_iter<T: IntoIterator<Item = (FieldKey, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub key: FieldKey,
    pub label: String,
}

impl ColumnSpec {
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: FieldKey::new(key),
            label: label.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnDataType {
    Text,
    Integer,
    Real,
    Date,
    Boolean,
}

impl ColumnDataType {
    pub const ALL: [Self; 5] = [
        Self::Text,
        Self::Integer,
        Self::Real,
        Self::Date,
        Self::Boolean,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Date => "DATE",
            Self::Boolean => "BOOLEAN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(Self::Text),
            "INTEGER" => Some(Self::Integer),
            "REAL" => Some(Self::Real),
            "DATE" => Some(Self::Date),
            "BOOLEAN" => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// Server-side metadata for one registry column, visible or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub column_name: FieldKey,
    pub display_name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub is_visible: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub display_order: i64,
}

/// Parses the timestamp shapes the registry server emits: RFC 3339, RFC 2822
/// (with the `GMT` zone name), `YYYY-MM-DD HH:MM:SS[.ffffff]` and plain dates.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc2822) {
        return Some(value);
    }
    if let Some(head) = raw
        .strip_suffix(" GMT")
        .or_else(|| raw.strip_suffix(" UTC"))
        && let Ok(value) = OffsetDateTime::parse(&format!("{head} +0000"), &Rfc2822)
    {
        return Some(value);
    }
    if let (Some(date), Some(separator), Some(clock)) =
        (raw.get(0..10), raw.get(10..11), raw.get(11..19))
        && (separator == " " || separator == "T")
        && let Ok(value) = PrimitiveDateTime::parse(
            &format!("{date} {clock}"),
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
    {
        return Some(value.assume_utc());
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

pub fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_default()
}

pub fn format_date(value: OffsetDateTime) -> String {
    value
        .to_offset(UtcOffset::UTC)
        .date()
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{FieldValue, PatientRecord, format_date, format_timestamp, parse_timestamp};
    use crate::PatientId;

    #[test]
    fn parses_server_timestamp_shapes() {
        let expected = "2025-10-14 09:30:05";
        for raw in [
            "2025-10-14T09:30:05Z",
            "2025-10-14T10:30:05+01:00",
            "Tue, 14 Oct 2025 09:30:05 GMT",
            "2025-10-14 09:30:05",
            "2025-10-14T09:30:05.123456",
        ] {
            let parsed = parse_timestamp(raw).unwrap_or_else(|| panic!("parse {raw}"));
            assert_eq!(format_timestamp(parsed), expected, "input {raw}");
        }
    }

    #[test]
    fn plain_date_parses_to_midnight() {
        let parsed = parse_timestamp("1984-02-29").expect("leap day parses");
        assert_eq!(format_date(parsed), "1984-02-29");
        assert_eq!(format_timestamp(parsed), "1984-02-29 00:00:00");
    }

    #[test]
    fn garbage_timestamp_is_none() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn record_decodes_mixed_value_shapes() -> anyhow::Result<()> {
        let record: PatientRecord = serde_json::from_str(
            r#"{"id": 7, "name": "Awa Diallo", "poids": 64.5, "age": 31, "bilan": null, "new_cases": true}"#,
        )?;
        assert_eq!(record.id(), Some(PatientId::new(7)));
        assert_eq!(record.full_name(), "Awa Diallo");
        assert_eq!(record.get("poids"), Some(&FieldValue::Decimal(64.5)));
        assert_eq!(record.get("age"), Some(&FieldValue::Integer(31)));
        assert_eq!(record.get("bilan"), Some(&FieldValue::Null));
        assert_eq!(record.get("new_cases"), Some(&FieldValue::Bool(true)));
        Ok(())
    }

    #[test]
    fn input_string_never_decorates() {
        assert_eq!(FieldValue::Decimal(72.0).to_input_string(), "72");
        assert_eq!(FieldValue::Decimal(72.5).to_input_string(), "72.5");
        assert_eq!(FieldValue::Null.to_input_string(), "");
    }

    #[test]
    fn textual_id_is_accepted() {
        let record = PatientRecord::new().with("id", "12");
        assert_eq!(record.id(), Some(PatientId::new(12)));
    }
}
