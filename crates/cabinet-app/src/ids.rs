// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned patient identity. Serialized as the bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(i64);

impl PatientId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for PatientId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::PatientId;

    #[test]
    fn patient_id_is_a_bare_integer_on_the_wire() -> serde_json::Result<()> {
        let id = PatientId::new(42);
        assert_eq!(serde_json::to_string(&id)?, "42");
        assert_eq!(serde_json::from_str::<PatientId>("7")?, PatientId::from(7));
        assert_eq!(format!("/update/{id}"), "/update/42");
        Ok(())
    }
}
