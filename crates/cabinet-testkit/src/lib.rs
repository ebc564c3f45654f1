// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use cabinet_app::{FieldValue, PatientRecord, format_date, format_timestamp};
use std::io::Read;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;
use time::{Date, Duration, Month, OffsetDateTime, Time};
use tiny_http::{Header, Response, Server};

const GIVEN_NAMES: [&str; 16] = [
    "Awa", "Moussa", "Fatou", "Jean", "Mariam", "Ibrahima", "Claire", "Seydou", "Aminata",
    "Hélène", "Ousmane", "Béatrice", "Koffi", "Nadia", "Paul", "Aïcha",
];
const SURNAMES: [&str; 14] = [
    "Diallo", "Traoré", "Koné", "Dupont", "Ndiaye", "Kouassi", "Mbaye", "Lefèvre", "Camara",
    "Sow", "Yao", "Bamba", "N'Guessan", "Diop",
];
const NEIGHBOURHOODS: [&str; 10] = [
    "Cocody",
    "Plateau",
    "Yopougon",
    "Marcory",
    "Treichville",
    "Adjamé",
    "Riviera",
    "Koumassi",
    "Abobo",
    "Bingerville",
];
const COMPLAINTS: [&str; 8] = [
    "Fièvre depuis trois jours",
    "Toux sèche persistante",
    "Douleurs abdominales",
    "Céphalées récurrentes",
    "Contrôle de grossesse",
    "Suivi hypertension",
    "Éruption cutanée",
    "Fatigue chronique",
];
const HYPOTHESES: [&str; 6] = [
    "Paludisme simple",
    "Infection respiratoire",
    "Gastro-entérite",
    "Hypertension artérielle",
    "Anémie",
    "Dermatite",
];
const PRESCRIPTIONS: [&str; 5] = [
    "Paracétamol 1g x3/j pendant 5 jours",
    "Amoxicilline 500mg x3/j pendant 7 jours",
    "Artéméther-luméfantrine selon protocole",
    "Amlodipine 5mg x1/j",
    "Fer + acide folique x1/j",
];
const LAB_WORK: [&str; 4] = ["NFS", "Goutte épaisse", "Glycémie à jeun", "Créatininémie"];

const REFERENCE_YEAR: i32 = 2025;

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn bool(&mut self) -> bool {
        (self.next_u64() & 1) == 1
    }
}

/// Deterministic generator of realistic registry rows.
#[derive(Debug, Clone)]
pub struct PatientFaker {
    rng: DeterministicRng,
    next_id: i64,
}

impl PatientFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
            next_id: 1,
        }
    }

    pub fn full_name(&mut self) -> String {
        let given = self.pick(&GIVEN_NAMES);
        let surname = self.pick(&SURNAMES);
        if self.rng.int_n(4) == 0 {
            let second = self.pick(&GIVEN_NAMES);
            format!("{given} {second} {surname}")
        } else {
            format!("{given} {surname}")
        }
    }

    /// A front-desk row: identity, contact and scheduling fields only.
    pub fn front_desk_record(&mut self) -> PatientRecord {
        let id = self.next_id;
        self.next_id += 1;
        let created_at = self.datetime_in_year(REFERENCE_YEAR);
        let meeting = created_at + Duration::days(self.int_range(1, 30));
        let birth_year = self.int_range(1940, 2020) as i32;
        let born = self.datetime_in_year(birth_year);
        let phone = format!(
            "+225 07 {:02} {:02} {:02}",
            self.int_n(100),
            self.int_n(100),
            self.int_n(100)
        );

        PatientRecord::new()
            .with("id", id)
            .with("created_at", format_timestamp(created_at).as_str())
            .with("name", self.full_name().as_str())
            .with(
                "adresse",
                format!("{}, lot {}", self.pick(&NEIGHBOURHOODS), self.int_range(1, 400)).as_str(),
            )
            .with("phone_number", phone.as_str())
            .with("meeting", format_timestamp(meeting).as_str())
            .with("new_cases", FieldValue::Bool(self.rng.bool()))
            .with("age", i64::from(REFERENCE_YEAR - born.year()))
            .with("date_of_birth", format_date(born).as_str())
    }

    /// A full clinical row with vitals and consultation notes.
    pub fn clinical_record(&mut self) -> PatientRecord {
        let record = self.front_desk_record();
        let systolic = self.int_range(10, 17);
        let diastolic = self.int_range(6, 10);
        record
            .with("poids", self.tenths(450, 1100))
            .with("taille", self.tenths(1500, 1950))
            .with("tension_arterielle", format!("{systolic}/{diastolic}").as_str())
            .with("temperature", self.tenths(360, 400))
            .with("renseignements_clinique", self.pick(&COMPLAINTS))
            .with("hypothese_de_diagnostique", self.pick(&HYPOTHESES))
            .with("bilan", self.pick(&LAB_WORK))
            .with("resultat_bilan", FieldValue::Null)
            .with("ordonnance", self.pick(&PRESCRIPTIONS))
            .with("signature", "Dr. Koné")
    }

    pub fn clinical_records(&mut self, count: usize) -> Vec<PatientRecord> {
        (0..count).map(|_| self.clinical_record()).collect()
    }

    fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }

    fn int_range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = max - min + 1;
        min + (self.rng.next_u64() % (span as u64)) as i64
    }

    fn tenths(&mut self, min: i64, max: i64) -> f64 {
        self.int_range(min, max) as f64 / 10.0
    }

    fn datetime_in_year(&mut self, year: i32) -> OffsetDateTime {
        let start = midnight_utc(year, Month::January, 1);
        start + Duration::seconds(self.int_range(0, 364 * 86_400))
    }
}

fn midnight_utc(year: i32, month: Month, day: u8) -> OffsetDateTime {
    Date::from_calendar_date(year, month, day)
        .unwrap_or(Date::MIN)
        .with_time(Time::MIDNIGHT)
        .assume_utc()
}

pub fn fixture_datetime() -> &'static str {
    "Wed, 19 Feb 2025 12:34:56 GMT"
}

/// Renders records as the JSON array the search endpoint returns.
pub fn records_json(records: &[PatientRecord]) -> Result<String> {
    serde_json::to_string(records).context("serialize fixture records")
}

/// One scripted reply of a [`MockServer`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    body: Vec<u8>,
    content_type: &'static str,
}

impl MockResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into().into_bytes(),
            content_type: "application/json",
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into().into_bytes(),
            content_type: "text/plain; charset=utf-8",
        }
    }

    pub fn pdf(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            content_type: "application/pdf",
        }
    }
}

/// What the mock server saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub body: String,
    pub cookie: Option<String>,
}

impl RecordedRequest {
    pub fn json_body(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.body)
            .with_context(|| format!("parse body of {} {}", self.method, self.url))
    }
}

/// A tiny_http server that answers a fixed script of requests in order, then
/// stops.
pub struct MockServer {
    base_url: String,
    handle: JoinHandle<Result<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub fn start(script: Vec<MockResponse>) -> Result<Self> {
        let server =
            Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
        let base_url = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || serve_script(&server, script));
        Ok(Self { base_url, handle })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Waits for the whole script to be consumed and returns the requests.
    pub fn finish(self) -> Result<Vec<RecordedRequest>> {
        self.handle
            .join()
            .map_err(|_| anyhow!("mock server thread panicked"))?
    }
}

fn serve_script(server: &Server, script: Vec<MockResponse>) -> Result<Vec<RecordedRequest>> {
    let mut recorded = Vec::with_capacity(script.len());
    for reply in script {
        let Some(mut request) = server
            .recv_timeout(StdDuration::from_secs(5))
            .context("receive request")?
        else {
            bail!(
                "mock server timed out after {} of the scripted requests",
                recorded.len()
            );
        };

        let mut body = String::new();
        request
            .as_reader()
            .read_to_string(&mut body)
            .context("read request body")?;
        let cookie = request
            .headers()
            .iter()
            .find(|header| header.field.equiv("Cookie"))
            .map(|header| header.value.as_str().to_owned());
        recorded.push(RecordedRequest {
            method: request.method().as_str().to_owned(),
            url: request.url().to_owned(),
            body,
            cookie,
        });

        let header = Header::from_bytes("Content-Type", reply.content_type)
            .map_err(|()| anyhow!("invalid content type {}", reply.content_type))?;
        let response = Response::from_data(reply.body)
            .with_status_code(reply.status)
            .with_header(header);
        request.respond(response).context("send mock response")?;
    }
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::{PatientFaker, records_json};
    use cabinet_app::{FieldValue, PatientId, parse_timestamp};

    #[test]
    fn new_deterministic_seed() {
        let mut left = PatientFaker::new(42);
        let mut right = PatientFaker::new(42);
        assert_eq!(left.clinical_record(), right.clinical_record());
    }

    #[test]
    fn records_get_sequential_ids() {
        let mut faker = PatientFaker::new(7);
        let ids: Vec<Option<PatientId>> = faker
            .clinical_records(3)
            .iter()
            .map(|record| record.id())
            .collect();
        assert_eq!(
            ids,
            vec![
                Some(PatientId::new(1)),
                Some(PatientId::new(2)),
                Some(PatientId::new(3)),
            ]
        );
    }

    #[test]
    fn clinical_record_has_vitals_and_timestamp() {
        let mut faker = PatientFaker::new(1);
        let record = faker.clinical_record();

        assert!(!record.full_name().is_empty());
        assert!(record.created_at().is_some());
        let born = record
            .get("date_of_birth")
            .and_then(FieldValue::as_text)
            .and_then(parse_timestamp);
        assert!(born.is_some());
        match record.get("temperature") {
            Some(FieldValue::Decimal(value)) => assert!((36.0..=40.0).contains(value)),
            other => panic!("temperature should be decimal, got {other:?}"),
        }
    }

    #[test]
    fn front_desk_record_has_no_clinical_notes() {
        let mut faker = PatientFaker::new(3);
        let record = faker.front_desk_record();
        assert!(record.get("ordonnance").is_none());
        assert!(record.get("phone_number").is_some());
    }

    #[test]
    fn records_serialize_as_array() -> anyhow::Result<()> {
        let mut faker = PatientFaker::new(9);
        let json = records_json(&faker.clinical_records(2))?;
        let parsed: serde_json::Value = serde_json::from_str(&json)?;
        assert_eq!(parsed.as_array().map(Vec::len), Some(2));
        Ok(())
    }
}
