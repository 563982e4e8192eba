//! Tabular export of everything currently in the store.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::model::OrganizationRecord;
use crate::store::{EntityStore, StoreError};

pub const EXPORT_FILENAME: &str = "startup_data.csv";

pub const HEADER: [&str; 5] = ["Company Name", "Domain", "Emails", "Technologies", "LinkedIn"];

const LIST_SEPARATOR: &str = ";";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read organizations: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV output was not valid UTF-8: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub name: String,
    pub domain: String,
    /// Sorted
    pub emails: Vec<String>,
    /// Sorted technology tokens
    pub technologies: Vec<String>,
    pub linkedin: Option<String>,
}

impl ReportRow {
    fn from_record(record: OrganizationRecord) -> Self {
        let mut emails: Vec<String> = record.contacts.into_iter().map(|c| c.email).collect();
        emails.sort();
        emails.dedup();

        let mut technologies: Vec<String> =
            record.technologies.into_iter().map(|t| t.token).collect();
        technologies.sort();
        technologies.dedup();

        Self {
            name: record.organization.name,
            domain: record.organization.domain,
            emails,
            technologies,
            linkedin: record.organization.linkedin,
        }
    }

    /// Cells in [`HEADER`] order.
    pub fn cells(&self) -> [String; 5] {
        [
            self.name.clone(),
            self.domain.clone(),
            self.emails.join(LIST_SEPARATOR),
            self.technologies.join(LIST_SEPARATOR),
            self.linkedin.clone().unwrap_or_default(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub header: [&'static str; 5],
    /// One row per organization, ordered by id
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn to_csv(&self) -> Result<String, ReportError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.header)?;
        for row in &self.rows {
            writer.write_record(row.cells())?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ReportError::Csv(e.into_error().into()))?;
        String::from_utf8(bytes).map_err(|e| ReportError::Encoding(e.to_string()))
    }
}

/// Read-only view over the store. Safe to call while a job is running;
/// it sees whatever has been committed so far.
pub struct ReportExporter {
    store: Arc<dyn EntityStore>,
}

impl ReportExporter {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn export(&self) -> Result<Report, ReportError> {
        let mut records = self.store.list_all().await?;
        records.sort_by_key(|r| r.organization.id);

        let rows: Vec<ReportRow> = records.into_iter().map(ReportRow::from_record).collect();
        debug!(rows = rows.len(), "Exported organizations");

        Ok(Report {
            header: HEADER,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateOrganization, ContactSource, SourceId, TechCategory, TechnologySignal};
    use crate::store::MemoryEntityStore;

    #[tokio::test]
    async fn test_empty_store_exports_header_only() {
        let exporter = ReportExporter::new(Arc::new(MemoryEntityStore::new()));
        let report = exporter.export().await.unwrap();

        assert!(report.rows.is_empty());
        assert_eq!(
            report.to_csv().unwrap(),
            "Company Name,Domain,Emails,Technologies,LinkedIn\n"
        );
    }

    #[tokio::test]
    async fn test_rows_join_lists_with_semicolons() {
        let store = Arc::new(MemoryEntityStore::new());
        let acme = store
            .upsert_organization(
                &CandidateOrganization::new("Acme, Inc", "https://acme.io", SourceId::CodeForge)
                    .with_linkedin("acme-hq"),
            )
            .await
            .unwrap()
            .id;
        store
            .upsert_organization(&CandidateOrganization::new("Beta", "beta.io", SourceId::SocialFeed))
            .await
            .unwrap();
        store
            .add_contacts(
                acme,
                &["sales@acme.io".to_string(), "info@acme.io".to_string()],
                ContactSource::Contact,
            )
            .await
            .unwrap();
        store
            .add_technology_signals(
                acme,
                &[
                    TechnologySignal::new(TechCategory::Hosting, "aws"),
                    TechnologySignal::new(TechCategory::Framework, "react"),
                ],
            )
            .await
            .unwrap();

        let report = ReportExporter::new(store).export().await.unwrap();
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].emails, vec!["info@acme.io", "sales@acme.io"]);

        let csv = report.to_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[1],
            "\"Acme, Inc\",acme.io,info@acme.io;sales@acme.io,aws;react,acme-hq"
        );
        assert_eq!(lines[2], "Beta,beta.io,,,");
    }
}
