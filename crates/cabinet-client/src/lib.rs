// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, bail};
use cabinet_app::{
    ColumnDefinition, ColumnSource, ColumnSpec, FieldKey, FieldPayload, InvoiceRequest, NewColumn,
    PatientId, PatientRecord,
};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::COOKIE;
use reqwest::{Method, StatusCode, redirect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(
        "cannot reach {base_url} -- check [server].base_url and that the registry is running ({source})"
    )]
    Unreachable {
        base_url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("{message}")]
    Rejected { message: String },
    #[error("patient not found: {message}")]
    NotFound { message: String },
    #[error("decode {what}: {message}")]
    Decode { what: &'static str, message: String },
}

impl ClientError {
    fn decode(what: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Decode {
            what,
            message: error.to_string(),
        }
    }
}

/// Acknowledgement body returned by mutation endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ack {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl Ack {
    const ACCEPTED: [&'static str; 3] = ["success", "deleted", "ok"];

    pub fn is_success(&self) -> bool {
        Self::ACCEPTED.contains(&self.status.as_str())
    }

    fn into_result(self) -> Result<Self, ClientError> {
        if self.is_success() {
            return Ok(self);
        }
        let message = self
            .message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("server reported status {:?}", self.status));
        Err(ClientError::Rejected { message })
    }
}

/// Both column listings served by the configuration endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ColumnsResponse {
    pub visible_columns: Vec<ColumnEntry>,
    #[serde(default)]
    pub all_columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnEntry {
    pub column_name: FieldKey,
    pub display_name: String,
}

impl From<ColumnEntry> for ColumnSpec {
    fn from(entry: ColumnEntry) -> Self {
        Self {
            key: entry.column_name,
            label: entry.display_name,
        }
    }
}

/// Blocking client for the registry server.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    timeout: Duration,
    session_cookie: Option<String>,
    http: HttpClient,
}

impl Client {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        session_cookie: Option<&str>,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            bail!("server.base_url must not be empty");
        }
        Url::parse(&base_url).with_context(|| format!("parse server.base_url {base_url:?}"))?;

        let http = HttpClient::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            timeout,
            session_cookie: session_cookie
                .map(str::trim)
                .filter(|cookie| !cookie.is_empty())
                .map(str::to_owned),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Address of the server-rendered detail page for one patient.
    pub fn detail_url(&self, id: PatientId) -> String {
        format!("{}/patient/{id}", self.base_url)
    }

    pub fn columns(&self) -> Result<ColumnsResponse, ClientError> {
        let response = self.send(self.request(Method::GET, "/api/columns"))?;
        response
            .json()
            .map_err(|error| ClientError::decode("column configuration", error))
    }

    pub fn column_catalog(&self) -> Result<Vec<ColumnDefinition>, ClientError> {
        let mut columns = self.columns()?.all_columns;
        columns.sort_by_key(|column| column.display_order);
        Ok(columns)
    }

    /// Lists records matching `query`; an empty query lists everything.
    pub fn search(&self, query: &str) -> Result<Vec<PatientRecord>, ClientError> {
        let mut url = Url::parse(&format!("{}/search", self.base_url))
            .map_err(|error| ClientError::decode("search url", error))?;
        url.query_pairs_mut().append_pair("q", query);
        tracing::debug!(method = "GET", path = "/search", query, "registry request");
        let builder = self.authorize(self.http.get(url));
        let response = self.send(builder)?;
        response
            .json()
            .map_err(|error| ClientError::decode("search results", error))
    }

    /// Fetches one record. Any error status or error-shaped body is NotFound.
    pub fn fetch_one(&self, id: PatientId) -> Result<PatientRecord, ClientError> {
        let response = match self.send(self.request(Method::GET, &format!("/get_patient/{id}"))) {
            Ok(response) => response,
            Err(ClientError::Status { message, .. }) => {
                return Err(ClientError::NotFound { message });
            }
            Err(error) => return Err(error),
        };
        let body: serde_json::Value = response
            .json()
            .map_err(|error| ClientError::decode("patient record", error))?;
        if let Some(status) = body.get("status").and_then(serde_json::Value::as_str)
            && status == "error"
        {
            let message = body
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("patient {id} does not exist"));
            return Err(ClientError::NotFound { message });
        }
        serde_json::from_value(body).map_err(|error| ClientError::decode("patient record", error))
    }

    pub fn create(&self, fields: &FieldPayload) -> Result<Ack, ClientError> {
        let builder = self.request(Method::POST, "/add").json(fields);
        self.acknowledge(builder)
    }

    /// Sends every field except the identity key.
    pub fn update(&self, id: PatientId, fields: &FieldPayload) -> Result<Ack, ClientError> {
        let body: BTreeMap<&FieldKey, &String> =
            fields.iter().filter(|(key, _)| !key.is_identity()).collect();
        let builder = self
            .request(Method::PUT, &format!("/update/{id}"))
            .json(&body);
        self.acknowledge(builder)
    }

    pub fn delete(&self, id: PatientId) -> Result<Ack, ClientError> {
        self.acknowledge(self.request(Method::DELETE, &format!("/delete/{id}")))
    }

    /// Returns the rendered PDF bytes.
    pub fn generate_invoice(
        &self,
        id: PatientId,
        invoice: &InvoiceRequest,
    ) -> Result<Vec<u8>, ClientError> {
        let builder = self
            .request(Method::POST, &format!("/generate_invoice/{id}"))
            .json(invoice);
        let response = self.send(builder)?;
        let bytes = response
            .bytes()
            .map_err(|error| ClientError::decode("invoice document", error))?;
        if bytes.is_empty() {
            return Err(ClientError::decode("invoice document", "empty response body"));
        }
        Ok(bytes.to_vec())
    }

    pub fn add_column(&self, column: &NewColumn) -> Result<Ack, ClientError> {
        let body = AddColumnRequest {
            column_name: column.column_name.as_str(),
            display_name: &column.display_name,
            data_type: column.data_type.as_str(),
        };
        let builder = self.request(Method::POST, "/api/add_column").json(&body);
        self.acknowledge(builder)
    }

    pub fn toggle_column(&self, key: &FieldKey, visible: bool) -> Result<Ack, ClientError> {
        let builder = self
            .request(Method::POST, &format!("/api/toggle_column/{key}"))
            .json(&ToggleColumnRequest {
                is_visible: visible,
            });
        self.acknowledge(builder)
    }

    pub fn remove_column(&self, key: &FieldKey) -> Result<Ack, ClientError> {
        self.acknowledge(self.request(Method::DELETE, &format!("/api/remove_column/{key}")))
    }

    /// Plain-text registry summary.
    pub fn stats(&self) -> Result<String, ClientError> {
        let response = self.send(self.request(Method::GET, "/stat"))?;
        let text = response
            .text()
            .map_err(|error| ClientError::decode("statistics", error))?;
        Ok(text.trim().to_owned())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        tracing::debug!(%method, path, "registry request");
        self.authorize(
            self.http
                .request(method, format!("{}{path}", self.base_url)),
        )
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.session_cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder
            .send()
            .map_err(|source| ClientError::Unreachable {
                base_url: self.base_url.clone(),
                source,
            })?;
        let status = response.status();
        if status.is_redirection() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: "redirected to the login page -- set [server].session_cookie".to_owned(),
            });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }
        Ok(response)
    }

    fn acknowledge(&self, builder: RequestBuilder) -> Result<Ack, ClientError> {
        let response = self.send(builder)?;
        let ack: Ack = response
            .json()
            .map_err(|error| ClientError::decode("acknowledgement", error))?;
        ack.into_result()
    }
}

impl ColumnSource for Client {
    fn fetch_columns(&self) -> anyhow::Result<Vec<ColumnSpec>> {
        let columns = self.columns()?;
        Ok(columns
            .visible_columns
            .into_iter()
            .map(ColumnSpec::from)
            .collect())
    }
}

fn clean_error_response(status: StatusCode, body: &str) -> ClientError {
    let status = status.as_u16();
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(message) = parsed.message.or(parsed.error)
        && !message.is_empty()
    {
        return ClientError::Status { status, message };
    }

    let body = body.trim();
    if !body.is_empty() && body.len() < 100 && !body.contains('<') && !body.contains('{') {
        return ClientError::Status {
            status,
            message: body.to_owned(),
        };
    }

    ClientError::Status {
        status,
        message: format!("server returned {status}"),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddColumnRequest<'a> {
    column_name: &'a str,
    display_name: &'a str,
    data_type: &'a str,
}

#[derive(Debug, Serialize)]
struct ToggleColumnRequest {
    is_visible: bool,
}

#[cfg(test)]
mod tests {
    use super::{Ack, Client, ClientError, clean_error_response};
    use reqwest::StatusCode;
    use std::time::Duration;

    #[test]
    fn ack_statuses() {
        let ok = Ack {
            status: "deleted".to_owned(),
            message: None,
        };
        assert!(ok.is_success());

        let rejected = Ack {
            status: "error".to_owned(),
            message: Some("Nom requis".to_owned()),
        }
        .into_result();
        assert!(matches!(
            rejected,
            Err(ClientError::Rejected { ref message }) if message == "Nom requis"
        ));

        let silent = Ack {
            status: "failed".to_owned(),
            message: Some("  ".to_owned()),
        }
        .into_result();
        assert!(matches!(
            silent,
            Err(ClientError::Rejected { ref message }) if message.contains("\"failed\"")
        ));
    }

    #[test]
    fn error_bodies_are_cleaned() {
        let json = clean_error_response(
            StatusCode::BAD_REQUEST,
            r#"{"status":"error","message":"Invalid column name"}"#,
        );
        assert_eq!(json.to_string(), "server error (400): Invalid column name");

        let text = clean_error_response(StatusCode::NOT_FOUND, "no such patient");
        assert_eq!(text.to_string(), "server error (404): no such patient");

        let html = clean_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "<!doctype html><title>500 Internal Server Error</title>",
        );
        assert_eq!(html.to_string(), "server error (500): server returned 500");
    }

    #[test]
    fn base_url_is_normalized() -> anyhow::Result<()> {
        let client = Client::new("http://localhost:5000///", Duration::from_secs(1), Some(" "))?;
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert_eq!(
            client.detail_url(cabinet_app::PatientId::new(12)),
            "http://localhost:5000/patient/12"
        );
        assert!(Client::new("  ", Duration::from_secs(1), None).is_err());
        assert!(Client::new("not a url", Duration::from_secs(1), None).is_err());
        Ok(())
    }
}
