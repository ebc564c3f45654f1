// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};

use crate::{CREATED_AT_KEY, ColumnDataType, ColumnSpec, FieldKey, ID_KEY, NAME_KEY, Role};

const CLINICIAN_COLUMNS: [&str; 17] = [
    "created_at",
    "name",
    "adresse",
    "phone_number",
    "meeting",
    "new_cases",
    "age",
    "poids",
    "taille",
    "tension_arterielle",
    "temperature",
    "hypothese_de_diagnostique",
    "renseignements_clinique",
    "bilan",
    "resultat_bilan",
    "ordonnance",
    "signature",
];

const NURSE_COLUMNS: [&str; 11] = [
    "created_at",
    "name",
    "adresse",
    "phone_number",
    "meeting",
    "new_cases",
    "age",
    "poids",
    "taille",
    "tension_arterielle",
    "temperature",
];

const FRONT_DESK_COLUMNS: [&str; 7] = [
    "created_at",
    "name",
    "adresse",
    "phone_number",
    "meeting",
    "new_cases",
    "age",
];

const FALLBACK_VISIBILITY: [(&str, &[&str]); 3] = [
    ("medecins", &CLINICIAN_COLUMNS),
    ("infirmiers", &NURSE_COLUMNS),
    ("receptionistes", &FRONT_DESK_COLUMNS),
];

const DEFAULT_LABELS: [(&str, &str); 17] = [
    ("created_at", "Date de création"),
    ("name", "Nom"),
    ("adresse", "Adresse"),
    ("age", "Age"),
    ("poids", "Poids"),
    ("taille", "Taille"),
    ("tension_arterielle", "Tension"),
    ("temperature", "Température"),
    ("hypothese_de_diagnostique", "Hypothèse de diagnostique"),
    ("renseignements_clinique", "Renseignement clinique"),
    ("bilan", "Bilan"),
    ("resultat_bilan", "Conclusion du bilan"),
    ("ordonnance", "Ordonnance"),
    ("signature", "Signature"),
    ("meeting", "Rendez-vous"),
    ("new_cases", "Nouveaux cas"),
    ("phone_number", "Numero de telephone"),
];

/// Columns that can never be hidden from the registry view.
pub const ALWAYS_VISIBLE_COLUMNS: [&str; 2] = [ID_KEY, NAME_KEY];
/// Columns that can never be dropped from the registry schema.
pub const PERMANENT_COLUMNS: [&str; 3] = [ID_KEY, NAME_KEY, CREATED_AT_KEY];

/// Where column configuration comes from. Implemented by the HTTP client.
pub trait ColumnSource {
    fn fetch_columns(&self) -> Result<Vec<ColumnSpec>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigOrigin {
    Remote,
    #[default]
    Fallback,
}

/// Ordered visible columns for one role, plus the labels used to display them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnConfig {
    keys: Vec<FieldKey>,
    labels: BTreeMap<FieldKey, String>,
    origin: ConfigOrigin,
}

impl ColumnConfig {
    /// Resolves the configuration once: remote first, the hardcoded role
    /// table on any failure. Failure is logged and never surfaced.
    pub fn resolve<S: ColumnSource + ?Sized>(source: &S, role: &Role) -> Self {
        match source.fetch_columns() {
            Ok(specs) => {
                let config = Self::from_specs(specs);
                tracing::info!(role = %role, columns = config.len(), "column configuration loaded");
                config
            }
            Err(error) => {
                tracing::warn!(
                    role = %role,
                    "column configuration unavailable, using defaults: {error:#}"
                );
                Self::fallback(role)
            }
        }
    }

    pub fn from_specs(specs: Vec<ColumnSpec>) -> Self {
        let mut seen = BTreeSet::new();
        let mut keys = Vec::with_capacity(specs.len());
        let mut labels = BTreeMap::new();
        for spec in specs {
            if !seen.insert(spec.key.clone()) {
                tracing::debug!(key = %spec.key, "duplicate column ignored");
                continue;
            }
            keys.push(spec.key.clone());
            labels.insert(spec.key, spec.label);
        }
        Self {
            keys,
            labels,
            origin: ConfigOrigin::Remote,
        }
    }

    pub fn fallback(role: &Role) -> Self {
        let keys = FALLBACK_VISIBILITY
            .iter()
            .find(|(name, _)| *name == role.as_str())
            .map(|(_, keys)| keys.iter().map(|key| FieldKey::new(*key)).collect())
            .unwrap_or_default();
        let labels = DEFAULT_LABELS
            .iter()
            .map(|(key, label)| (FieldKey::new(*key), (*label).to_owned()))
            .collect();
        Self {
            keys,
            labels,
            origin: ConfigOrigin::Fallback,
        }
    }

    pub fn keys(&self) -> &[FieldKey] {
        &self.keys
    }

    /// Display label for a key; the key itself when no label is known.
    pub fn label<'a>(&'a self, key: &'a str) -> &'a str {
        self.labels.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn origin(&self) -> ConfigOrigin {
        self.origin
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|candidate| candidate.as_str() == key)
    }
}

/// A column-addition request after client-side validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewColumn {
    pub column_name: FieldKey,
    pub display_name: String,
    pub data_type: ColumnDataType,
}

impl NewColumn {
    pub fn parse(column_name: &str, display_name: &str, data_type: ColumnDataType) -> Result<Self> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            bail!("display name is required -- enter a label for the new column");
        }
        Ok(Self {
            column_name: normalize_column_name(column_name)?,
            display_name: display_name.to_owned(),
            data_type,
        })
    }
}

/// Trims, lowercases and snake-cases a column name, then checks it is a plain
/// identifier.
pub fn normalize_column_name(raw: &str) -> Result<FieldKey> {
    let normalized = raw.trim().to_lowercase().replace(' ', "_");
    if normalized.is_empty() {
        bail!("column name is required");
    }
    let mut chars = normalized.chars();
    let valid_head = chars
        .next()
        .is_some_and(|head| head.is_ascii_alphabetic() || head == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_head || !valid_tail {
        bail!("invalid column name {normalized:?} -- use only letters, numbers, and underscores");
    }
    Ok(FieldKey::new(normalized))
}

pub fn ensure_column_can_hide(key: &str) -> Result<()> {
    if ALWAYS_VISIBLE_COLUMNS.contains(&key) {
        bail!("column {key:?} is essential and cannot be hidden");
    }
    Ok(())
}

pub fn ensure_column_can_remove(key: &str) -> Result<()> {
    if PERMANENT_COLUMNS.contains(&key) {
        bail!("column {key:?} is essential and cannot be removed");
    }
    Ok(())
}
