// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use cabinet_app::{
    ColumnConfig, ColumnDefinition, FieldKey, FieldPayload, InvoiceMeta, InvoiceRequest,
    NewColumn, PatientId, PatientRecord, Role, invoice_file_name,
};
use cabinet_client::Client;
use cabinet_tui::{AppRuntime, InternalEvent, SearchEvent};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread;
use time::{Date, OffsetDateTime};

pub struct ClientRuntime {
    client: Client,
    role: Role,
    download_dir: PathBuf,
}

impl ClientRuntime {
    pub fn new(client: Client, role: Role, download_dir: PathBuf) -> Self {
        Self {
            client,
            role,
            download_dir,
        }
    }
}

/// Writes a rendered invoice under `dir`, creating it when missing.
pub fn save_invoice(dir: &Path, meta: &InvoiceMeta, date: Date, pdf: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| {
        format!(
            "create invoice directory {} -- set [invoice].download_dir",
            dir.display()
        )
    })?;
    let path = dir.join(invoice_file_name(meta, date));
    fs::write(&path, pdf).with_context(|| format!("write invoice {}", path.display()))?;
    Ok(path)
}

impl AppRuntime for ClientRuntime {
    fn resolve_columns(&mut self) -> ColumnConfig {
        ColumnConfig::resolve(&self.client, &self.role)
    }

    fn column_catalog(&mut self) -> Result<Vec<ColumnDefinition>> {
        Ok(self.client.column_catalog()?)
    }

    fn search(&mut self, query: &str) -> Result<Vec<PatientRecord>> {
        Ok(self.client.search(query)?)
    }

    /// Runs the request off the UI thread. Responses may arrive out of order;
    /// the request id lets the UI drop the stale ones.
    fn spawn_search(
        &mut self,
        request_id: u64,
        query: &str,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let client = self.client.clone();
        let query = query.to_owned();
        thread::Builder::new()
            .name(format!("search-{request_id}"))
            .spawn(move || {
                let event = match client.search(&query) {
                    Ok(records) => SearchEvent::Completed {
                        request_id,
                        records,
                    },
                    Err(error) => SearchEvent::Failed {
                        request_id,
                        error: error.to_string(),
                    },
                };
                let _ = tx.send(InternalEvent::Search(event));
            })
            .context("spawn search worker")?;
        Ok(())
    }

    fn fetch_patient(&mut self, id: PatientId) -> Result<PatientRecord> {
        Ok(self.client.fetch_one(id)?)
    }

    fn create_patient(&mut self, fields: &FieldPayload) -> Result<()> {
        self.client.create(fields)?;
        tracing::info!(fields = fields.len(), "patient created");
        Ok(())
    }

    fn update_patient(&mut self, id: PatientId, fields: &FieldPayload) -> Result<()> {
        self.client.update(id, fields)?;
        tracing::info!(%id, "patient updated");
        Ok(())
    }

    fn delete_patient(&mut self, id: PatientId) -> Result<()> {
        self.client.delete(id)?;
        tracing::info!(%id, "patient deleted");
        Ok(())
    }

    fn generate_invoice(&mut self, id: PatientId, invoice: &InvoiceRequest) -> Result<PathBuf> {
        let pdf = self.client.generate_invoice(id, invoice)?;
        let today = OffsetDateTime::now_utc().date();
        let path = save_invoice(&self.download_dir, &invoice.meta, today, &pdf)?;
        tracing::info!(%id, path = %path.display(), bytes = pdf.len(), "invoice saved");
        Ok(path)
    }

    fn add_column(&mut self, column: &NewColumn) -> Result<()> {
        self.client.add_column(column)?;
        tracing::info!(column = %column.column_name, "column added");
        Ok(())
    }

    fn toggle_column(&mut self, key: &FieldKey, visible: bool) -> Result<()> {
        self.client.toggle_column(key, visible)?;
        tracing::info!(column = %key, visible, "column visibility changed");
        Ok(())
    }

    fn remove_column(&mut self, key: &FieldKey) -> Result<()> {
        self.client.remove_column(key)?;
        tracing::info!(column = %key, "column removed");
        Ok(())
    }

    fn load_stats(&mut self) -> Result<String> {
        Ok(self.client.stats()?)
    }

    fn detail_url(&self, id: PatientId) -> String {
        self.client.detail_url(id)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientRuntime, save_invoice};
    use anyhow::Result;
    use cabinet_app::{
        ArticleDraft, ConfigOrigin, InvoiceDraft, InvoiceMeta, PatientId, Role, SectionDraft,
    };
    use cabinet_client::Client;
    use cabinet_testkit::{MockResponse, MockServer, PatientFaker, records_json};
    use cabinet_tui::{AppRuntime, InternalEvent, SearchEvent};
    use std::sync::mpsc;
    use std::time::Duration;
    use time::macros::date;

    fn runtime_for(server: &MockServer, download_dir: &std::path::Path) -> Result<ClientRuntime> {
        let client = Client::new(server.base_url(), Duration::from_secs(2), None)?;
        Ok(ClientRuntime::new(
            client,
            Role::new("medecins"),
            download_dir.to_path_buf(),
        ))
    }

    #[test]
    fn spawned_search_reports_back_with_its_request_id() -> Result<()> {
        let records = PatientFaker::new(3).clinical_records(2);
        let server = MockServer::start(vec![MockResponse::json(200, records_json(&records)?)])?;
        let temp = tempfile::tempdir()?;
        let mut runtime = runtime_for(&server, temp.path())?;

        let (tx, rx) = mpsc::channel();
        runtime.spawn_search(7, "awa", tx)?;
        let event = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(
            event,
            InternalEvent::Search(SearchEvent::Completed {
                request_id: 7,
                records,
            })
        );

        let requests = server.finish()?;
        assert_eq!(requests[0].url, "/search?q=awa");
        Ok(())
    }

    #[test]
    fn failed_search_is_reported_not_raised() -> Result<()> {
        let server = MockServer::start(vec![MockResponse::text(500, "boom")])?;
        let temp = tempfile::tempdir()?;
        let mut runtime = runtime_for(&server, temp.path())?;

        let (tx, rx) = mpsc::channel();
        runtime.spawn_search(2, "", tx)?;
        match rx.recv_timeout(Duration::from_secs(5))? {
            InternalEvent::Search(SearchEvent::Failed { request_id, error }) => {
                assert_eq!(request_id, 2);
                assert!(error.contains("500"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        server.finish()?;
        Ok(())
    }

    #[test]
    fn column_resolution_falls_back_when_server_errors() -> Result<()> {
        let server = MockServer::start(vec![MockResponse::text(500, "boom")])?;
        let temp = tempfile::tempdir()?;
        let mut runtime = runtime_for(&server, temp.path())?;

        let config = runtime.resolve_columns();
        assert_eq!(config.origin(), ConfigOrigin::Fallback);
        assert!(config.contains("hypothese_de_diagnostique"));
        server.finish()?;
        Ok(())
    }

    #[test]
    fn generated_invoice_is_written_to_download_dir() -> Result<()> {
        let pdf = b"%PDF-1.4\n%cabinet\n".to_vec();
        let server = MockServer::start(vec![MockResponse::pdf(pdf.clone())])?;
        let temp = tempfile::tempdir()?;
        let download_dir = temp.path().join("factures");
        let mut runtime = runtime_for(&server, &download_dir)?;

        let request = InvoiceDraft {
            meta: InvoiceMeta {
                nom: "Diallo".to_owned(),
                prenom: "Awa".to_owned(),
                ..InvoiceMeta::default()
            },
            sections: vec![SectionDraft {
                titre: "Consultation".to_owned(),
                articles: vec![ArticleDraft {
                    libelle: "Visite".to_owned(),
                    quantite: "1".to_owned(),
                    montant: "15000".to_owned(),
                }],
            }],
        }
        .validate()?;

        let path = runtime.generate_invoice(PatientId::new(4), &request)?;
        assert_eq!(path.parent(), Some(download_dir.as_path()));
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        assert!(name.starts_with("facture_Diallo_Awa_"), "got {name}");
        assert!(name.ends_with(".pdf"));
        assert_eq!(std::fs::read(&path)?, pdf);

        let requests = server.finish()?;
        assert_eq!(requests[0].url, "/generate_invoice/4");
        Ok(())
    }

    #[test]
    fn save_invoice_uses_the_dated_file_name() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let meta = InvoiceMeta {
            nom: "N'Diaye".to_owned(),
            prenom: "Hélène".to_owned(),
            ..InvoiceMeta::default()
        };
        let path = save_invoice(temp.path(), &meta, date!(2025 - 03 - 04), b"%PDF")?;
        assert_eq!(
            path,
            temp.path().join("facture_N'Diaye_Hélène_2025-03-04.pdf")
        );
        Ok(())
    }
}
