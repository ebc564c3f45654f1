// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::PatientRecord;

/// Transport-safe snapshot of a record attached to a table row, so row
/// actions never re-fetch or read display-formatted values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPayload(String);

impl RecordPayload {
    pub fn encode(record: &PatientRecord) -> Result<Self> {
        let json = serde_json::to_vec(record).context("serialize record snapshot")?;
        Ok(Self(STANDARD.encode(json)))
    }

    pub fn decode(&self) -> Result<PatientRecord> {
        let json = STANDARD
            .decode(self.0.as_bytes())
            .context("decode record snapshot")?;
        serde_json::from_slice(&json).context("parse record snapshot")
    }

    pub fn from_encoded(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::RecordPayload;
    use crate::{FieldValue, PatientRecord};
    use anyhow::Result;

    #[test]
    fn accented_and_quoted_text_round_trips() -> Result<()> {
        let record = PatientRecord::new()
            .with("id", 42_i64)
            .with("name", "Hélène N'Diaye-Brûlé")
            .with("renseignements_clinique", "toux \"sèche\" depuis 3 jours\nfièvre à 39°C")
            .with("poids", 58.5)
            .with("age", 27_i64)
            .with("bilan", FieldValue::Null)
            .with("new_cases", FieldValue::Bool(false));

        let payload = RecordPayload::encode(&record)?;
        assert!(payload.as_str().is_ascii());
        assert_eq!(payload.decode()?, record);
        Ok(())
    }

    #[test]
    fn corrupted_payload_fails_to_decode() {
        let payload = RecordPayload::from_encoded("not base64 at all!");
        assert!(payload.decode().is_err());
    }
}
