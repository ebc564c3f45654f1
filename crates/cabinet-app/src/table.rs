// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::cmp::Ordering;

use crate::{
    BIRTH_DATE_KEY, CREATED_AT_KEY, ColumnConfig, FieldKey, FieldValue, PatientId, PatientRecord,
    RecordPayload, format_date, format_timestamp, parse_timestamp,
};

/// Most recent records shown per render.
pub const PAGE_SIZE: usize = 20;
/// Longer cell text is cut and marked with an ellipsis.
pub const CELL_TEXT_LIMIT: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisplayRule {
    Unit(&'static str),
    Timestamp,
    CalendarDate,
}

const DISPLAY_RULES: [(&str, DisplayRule); 7] = [
    ("age", DisplayRule::Unit("ans")),
    ("poids", DisplayRule::Unit("kg")),
    ("taille", DisplayRule::Unit("cm")),
    ("tension_arterielle", DisplayRule::Unit("mmHg")),
    ("temperature", DisplayRule::Unit("°C")),
    (BIRTH_DATE_KEY, DisplayRule::CalendarDate),
    (CREATED_AT_KEY, DisplayRule::Timestamp),
];

fn display_rule(key: &str) -> Option<DisplayRule> {
    DISPLAY_RULES
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, rule)| *rule)
}

/// Presentation value of one cell. `full` is the untruncated text shown as
/// the tooltip; `text` is what fits in the cell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayCell {
    pub text: String,
    pub full: String,
}

impl DisplayCell {
    pub fn is_truncated(&self) -> bool {
        self.text != self.full
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHeader {
    pub key: FieldKey,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub id: Option<PatientId>,
    pub cells: Vec<DisplayCell>,
    /// Snapshot of the untouched record, or why it could not be encoded.
    pub payload: Result<RecordPayload, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableProjection {
    pub columns: Vec<ColumnHeader>,
    pub rows: Vec<TableRow>,
}

impl TableProjection {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_by_id(&self, id: PatientId) -> Option<&TableRow> {
        self.rows.iter().find(|row| row.id == Some(id))
    }
}

/// Newest first by `created_at`, capped at [`PAGE_SIZE`]. Records without a
/// readable `created_at` go last, in server order.
pub fn order_records(records: &[PatientRecord]) -> Vec<&PatientRecord> {
    let mut ordered: Vec<(&PatientRecord, Option<time::OffsetDateTime>)> = records
        .iter()
        .map(|record| (record, record.created_at()))
        .collect();
    ordered.sort_by(|(_, left), (_, right)| match (left, right) {
        (Some(left), Some(right)) => right.cmp(left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    ordered
        .into_iter()
        .take(PAGE_SIZE)
        .map(|(record, _)| record)
        .collect()
}

/// Builds the full table from scratch. The records are only read.
pub fn project_records(records: &[PatientRecord], config: &ColumnConfig) -> TableProjection {
    let columns = config
        .keys()
        .iter()
        .map(|key| ColumnHeader {
            key: key.clone(),
            label: config.label(key.as_str()).to_owned(),
        })
        .collect::<Vec<_>>();

    let rows = order_records(records)
        .into_iter()
        .map(|record| {
            let cells = columns
                .iter()
                .map(|column| format_cell(column.key.as_str(), record.get(column.key.as_str())))
                .collect();
            let payload = RecordPayload::encode(record).map_err(|error| {
                tracing::warn!(id = ?record.id(), "record snapshot encoding failed: {error:#}");
                format!("{error:#}")
            });
            TableRow {
                id: record.id(),
                cells,
                payload,
            }
        })
        .collect();

    TableProjection { columns, rows }
}

pub fn format_cell(key: &str, value: Option<&FieldValue>) -> DisplayCell {
    let full = match value {
        None => String::new(),
        Some(value) if value.is_blank() => String::new(),
        Some(value) => format_value(key, value),
    };
    DisplayCell {
        text: truncate_cell_text(&full, CELL_TEXT_LIMIT),
        full,
    }
}

fn format_value(key: &str, value: &FieldValue) -> String {
    let raw = value.to_input_string();
    match display_rule(key) {
        Some(DisplayRule::Unit(_)) if value.is_zero() => raw,
        Some(DisplayRule::Unit(unit)) => format!("{raw} {unit}"),
        Some(DisplayRule::Timestamp) => parse_timestamp(&raw).map_or(raw, format_timestamp),
        Some(DisplayRule::CalendarDate) => parse_timestamp(&raw).map_or(raw, format_date),
        None => raw,
    }
}

pub fn truncate_cell_text(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{truncated}…")
    } else {
        truncated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Edit,
    Delete,
    Detail,
    Invoice,
}

impl RowAction {
    pub const ALL: [Self; 4] = [Self::Edit, Self::Delete, Self::Detail, Self::Invoice];

    pub const fn key(self) -> char {
        match self {
            Self::Edit => 'e',
            Self::Delete => 'd',
            Self::Detail => 'v',
            Self::Invoice => 'f',
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Edit => "Modifier",
            Self::Delete => "Supprimer",
            Self::Detail => "Détails",
            Self::Invoice => "Facture",
        }
    }

    pub fn for_key(key: char) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.key() == key)
    }
}

/// At most one action strip is open at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionStrip {
    open_row: Option<PatientId>,
}

impl ActionStrip {
    /// Opens the strip for `id`, closing any other; closes it if `id` was
    /// already open. Returns whether `id` is open afterwards.
    pub fn toggle(&mut self, id: PatientId) -> bool {
        if self.open_row == Some(id) {
            self.open_row = None;
            false
        } else {
            self.open_row = Some(id);
            true
        }
    }

    pub fn open_row(&self) -> Option<PatientId> {
        self.open_row
    }

    pub fn is_open(&self, id: PatientId) -> bool {
        self.open_row == Some(id)
    }

    pub fn close(&mut self) {
        self.open_row = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ActionStrip, PAGE_SIZE, RowAction, format_cell, order_records, project_records,
        truncate_cell_text,
    };
    use crate::{ColumnConfig, ColumnSpec, FieldValue, PatientId, PatientRecord};

    fn record(id: i64, created_at: &str) -> PatientRecord {
        PatientRecord::new()
            .with("id", id)
            .with("name", format!("Patient {id}").as_str())
            .with("created_at", created_at)
    }

    fn day(n: i64) -> String {
        format!("2025-03-{:02}T08:00:00Z", n)
    }

    #[test]
    fn ordering_is_newest_first_and_capped() {
        let records: Vec<PatientRecord> = (1..=28).map(|n| record(n, &day(n))).collect();
        let ordered = order_records(&records);
        assert_eq!(ordered.len(), PAGE_SIZE);
        let ids: Vec<i64> = ordered
            .iter()
            .filter_map(|record| record.id())
            .map(PatientId::get)
            .collect();
        assert_eq!(ids.first(), Some(&28));
        assert_eq!(ids.last(), Some(&9));
        assert!(ids.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[test]
    fn ordering_ignores_server_order() {
        let records = vec![
            record(1, "Mon, 03 Mar 2025 08:00:00 GMT"),
            record(2, "2025-03-05 08:00:00"),
            record(3, "2025-03-04T08:00:00Z"),
        ];
        let ids: Vec<i64> = order_records(&records)
            .iter()
            .filter_map(|record| record.id())
            .map(PatientId::get)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn undated_records_sort_last() {
        let records = vec![
            PatientRecord::new().with("id", 1_i64),
            record(2, &day(2)),
            PatientRecord::new().with("id", 3_i64).with("created_at", "soon"),
            record(4, &day(1)),
        ];
        let ids: Vec<i64> = order_records(&records)
            .iter()
            .filter_map(|record| record.id())
            .map(PatientId::get)
            .collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);
    }

    #[test]
    fn units_are_appended_for_display_only() {
        assert_eq!(format_cell("age", Some(&FieldValue::Integer(31))).text, "31 ans");
        assert_eq!(format_cell("poids", Some(&FieldValue::Decimal(72.0))).text, "72 kg");
        assert_eq!(format_cell("taille", Some(&FieldValue::Decimal(170.5))).text, "170.5 cm");
        assert_eq!(
            format_cell("tension_arterielle", Some(&"12/8".into())).text,
            "12/8 mmHg"
        );
        assert_eq!(format_cell("temperature", Some(&FieldValue::Decimal(38.2))).text, "38.2 °C");
        assert_eq!(format_cell("age", Some(&FieldValue::Null)).text, "");
        assert_eq!(format_cell("poids", None).text, "");
    }

    #[test]
    fn zero_measurements_carry_no_unit() {
        assert_eq!(format_cell("age", Some(&FieldValue::Integer(0))).text, "0");
        assert_eq!(format_cell("poids", Some(&FieldValue::Decimal(0.0))).text, "0");
        assert_eq!(format_cell("taille", Some(&"0".into())).text, "0 cm");
    }

    #[test]
    fn dates_are_truncated_to_the_second() {
        let created = format_cell(
            "created_at",
            Some(&"Tue, 14 Oct 2025 09:30:05 GMT".into()),
        );
        assert_eq!(created.text, "2025-10-14 09:30:05");
        let birth = format_cell("date_of_birth", Some(&"1990-05-12T00:00:00Z".into()));
        assert_eq!(birth.text, "1990-05-12");
        let unreadable = format_cell("created_at", Some(&"hier".into()));
        assert_eq!(unreadable.text, "hier");
    }

    #[test]
    fn long_text_is_truncated_with_full_tooltip() {
        let note = "Douleurs abdominales récurrentes depuis deux semaines";
        let cell = format_cell("renseignements_clinique", Some(&note.into()));
        assert!(cell.is_truncated());
        assert_eq!(cell.text.chars().count(), 31);
        assert!(cell.text.ends_with('…'));
        assert_eq!(cell.full, note);

        assert_eq!(truncate_cell_text("exactly thirty characters long", 30).len(), 30);
    }

    #[test]
    fn projection_leaves_records_untouched() -> anyhow::Result<()> {
        let config = ColumnConfig::from_specs(vec![
            ColumnSpec::new("name", "Nom"),
            ColumnSpec::new("poids", "Poids"),
        ]);
        let records = vec![record(5, &day(5)).with("poids", 72.0)];
        let before = records.clone();
        let projection = project_records(&records, &config);
        assert_eq!(records, before);

        let row = &projection.rows[0];
        assert_eq!(row.cells[1].text, "72 kg");
        let payload = row.payload.as_ref().map_err(|e| anyhow::anyhow!("{e}"))?;
        let snapshot = payload.decode()?;
        assert_eq!(snapshot.get("poids"), Some(&FieldValue::Decimal(72.0)));
        Ok(())
    }

    #[test]
    fn projection_never_exceeds_page_size() {
        let config = ColumnConfig::from_specs(vec![ColumnSpec::new("name", "Nom")]);
        let records: Vec<PatientRecord> = (0..250).map(|n| record(n, &day(n % 28 + 1))).collect();
        assert_eq!(project_records(&records, &config).row_count(), PAGE_SIZE);
        assert_eq!(project_records(&records[..3], &config).row_count(), 3);
    }

    #[test]
    fn action_strip_keeps_one_row_open() {
        let mut strip = ActionStrip::default();
        assert!(strip.toggle(PatientId::new(1)));
        assert!(strip.toggle(PatientId::new(2)));
        assert_eq!(strip.open_row(), Some(PatientId::new(2)));
        assert!(!strip.is_open(PatientId::new(1)));
        assert!(!strip.toggle(PatientId::new(2)));
        assert_eq!(strip.open_row(), None);
    }

    #[test]
    fn row_actions_map_to_keys() {
        assert_eq!(RowAction::for_key('f'), Some(RowAction::Invoice));
        assert_eq!(RowAction::for_key('x'), None);
    }
}
