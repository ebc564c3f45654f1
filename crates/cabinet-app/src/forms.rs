// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use std::collections::BTreeMap;

use crate::{
    BIRTH_DATE_KEY, ColumnConfig, FieldKey, NAME_KEY, PatientRecord, format_date, parse_timestamp,
};

/// Serialized form contents: one string per field key, as a browser form
/// would post them.
pub type FieldPayload = BTreeMap<FieldKey, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberStep {
    Whole,
    Tenth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    Date,
    Number(NumberStep),
    Text,
    TextArea,
}

#[derive(Debug, Clone, Copy)]
enum KeyPattern {
    Exact(&'static str),
    ContainsAny(&'static [&'static str]),
}

impl KeyPattern {
    fn matches(self, key: &str) -> bool {
        match self {
            Self::Exact(expected) => key == expected,
            Self::ContainsAny(needles) => needles.iter().any(|needle| key.contains(needle)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WidgetRule {
    pattern: KeyPattern,
    widget: WidgetKind,
}

// First match wins.
const WIDGET_RULES: [WidgetRule; 5] = [
    WidgetRule {
        pattern: KeyPattern::Exact(BIRTH_DATE_KEY),
        widget: WidgetKind::Date,
    },
    WidgetRule {
        pattern: KeyPattern::ContainsAny(&["poids", "taille", "temperature"]),
        widget: WidgetKind::Number(NumberStep::Tenth),
    },
    WidgetRule {
        pattern: KeyPattern::ContainsAny(&["age"]),
        widget: WidgetKind::Number(NumberStep::Whole),
    },
    WidgetRule {
        pattern: KeyPattern::ContainsAny(&["tension_arterielle"]),
        widget: WidgetKind::Text,
    },
    WidgetRule {
        pattern: KeyPattern::ContainsAny(&[
            "diagnostique",
            "ordonnance",
            "bilan",
            "signature",
            "renseignements",
        ]),
        widget: WidgetKind::TextArea,
    },
];

impl WidgetKind {
    pub fn for_key(key: &str) -> Self {
        WIDGET_RULES
            .iter()
            .find(|rule| rule.pattern.matches(key))
            .map_or(Self::Text, |rule| rule.widget)
    }

    /// Input constraint applied while typing; the server stays the authority
    /// on value types.
    pub fn accepts(self, value: char) -> bool {
        match self {
            Self::Date | Self::Number(NumberStep::Whole) => {
                value.is_ascii_digit() || value == '-'
            }
            Self::Number(NumberStep::Tenth) => {
                value.is_ascii_digit() || value == '-' || value == '.'
            }
            Self::Text => !value.is_control(),
            Self::TextArea => !value.is_control() || value == '\n',
        }
    }

    pub const fn hint(self) -> &'static str {
        match self {
            Self::Date => "AAAA-MM-JJ",
            Self::Number(NumberStep::Whole) => "nombre",
            Self::Number(NumberStep::Tenth) => "nombre (0.1)",
            Self::Text => "",
            Self::TextArea => "texte long",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub key: FieldKey,
    pub label: String,
    pub widget: WidgetKind,
    pub required: bool,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitControl {
    pub label: &'static str,
}

/// Field list synthesized from the visible columns. Used for both the
/// create form and the edit form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordForm {
    fields: Vec<FormField>,
    cursor: usize,
    submit: SubmitControl,
}

impl RecordForm {
    pub fn build(config: &ColumnConfig, submit_label: &'static str) -> Self {
        let mut form = Self {
            fields: Vec::new(),
            cursor: 0,
            submit: SubmitControl {
                label: submit_label,
            },
        };
        form.rebuild(config);
        form
    }

    /// Drops every synthesized field and recreates them from `config`. The
    /// submit control is left as is.
    pub fn rebuild(&mut self, config: &ColumnConfig) {
        self.fields.clear();
        self.cursor = 0;
        self.fields.extend(
            config
                .keys()
                .iter()
                .filter(|key| !key.is_server_assigned())
                .map(|key| FormField {
                    key: key.clone(),
                    label: config.label(key.as_str()).to_owned(),
                    widget: WidgetKind::for_key(key.as_str()),
                    required: key.as_str() == NAME_KEY,
                    value: String::new(),
                }),
        );
    }

    /// Fills each field by key lookup from the raw record. Date widgets get
    /// the value normalized to `YYYY-MM-DD`.
    pub fn populate(&mut self, record: &PatientRecord) {
        for field in &mut self.fields {
            let raw = record
                .get(field.key.as_str())
                .map(|value| value.to_input_string())
                .unwrap_or_default();
            field.value = match field.widget {
                WidgetKind::Date => parse_timestamp(&raw).map(format_date).unwrap_or(raw),
                _ => raw,
            };
        }
    }

    pub fn clear(&mut self) {
        for field in &mut self.fields {
            field.value.clear();
        }
        self.cursor = 0;
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn submit(&self) -> SubmitControl {
        self.submit
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&FormField> {
        self.fields.get(self.cursor)
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.fields.is_empty() {
            return;
        }
        let len = self.fields.len() as isize;
        self.cursor = (self.cursor as isize + delta).rem_euclid(len) as usize;
    }

    /// Returns false when the current widget rejects the character.
    pub fn insert_char(&mut self, value: char) -> bool {
        let Some(field) = self.fields.get_mut(self.cursor) else {
            return false;
        };
        if !field.widget.accepts(value) {
            return false;
        }
        field.value.push(value);
        true
    }

    pub fn backspace(&mut self) {
        if let Some(field) = self.fields.get_mut(self.cursor) {
            field.value.pop();
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> bool {
        match self.fields.iter_mut().find(|field| field.key.as_str() == key) {
            Some(field) => {
                field.value = value.to_owned();
                true
            }
            None => false,
        }
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.key.as_str() == key)
            .map(|field| field.value.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        for field in &self.fields {
            if field.required && field.value.trim().is_empty() {
                bail!("{} is required -- fill it in and retry", field.label);
            }
        }
        Ok(())
    }

    /// Every field as a string, the way generic form serialization would post
    /// it. Never contains `id`.
    pub fn payload(&self) -> FieldPayload {
        self.fields
            .iter()
            .map(|field| (field.key.clone(), field.value.clone()))
            .collect()
    }
}
