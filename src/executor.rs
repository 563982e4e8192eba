use crate::enrich::EnrichmentWorker;
use crate::model::OrganizationId;
use crate::store::{EntityStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("Semaphore error: {0}")]
    Semaphore(String),
    #[error("Failed to persist enrichment: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentOutcome {
    pub contacts_added: usize,
    pub signals_added: usize,
}

/// Runs enrichment for stored organizations with bounded concurrency and
/// attaches the results to the organization that was probed.
pub struct EnrichmentExecutor {
    semaphore: Arc<Semaphore>,
    worker: Arc<EnrichmentWorker>,
    store: Arc<dyn EntityStore>,
}

impl EnrichmentExecutor {
    pub fn new(
        worker: Arc<EnrichmentWorker>,
        store: Arc<dyn EntityStore>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            worker,
            store,
        }
    }

    #[instrument(skip(self, cancel))]
    pub async fn execute(
        &self,
        organization_id: OrganizationId,
        domain: String,
        cancel: CancellationToken,
    ) -> Result<EnrichmentOutcome, EnrichmentError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| EnrichmentError::Semaphore(e.to_string()))?;

        info!("Starting enrichment for {}", domain);

        let result = self.worker.enrich(&domain, &cancel).await;

        let mut outcome = EnrichmentOutcome::default();
        for (source, emails) in result.emails_by_source().into_values() {
            outcome.contacts_added += self
                .store
                .add_contacts(organization_id, &emails, source)
                .await?;
        }
        let signals: Vec<_> = result.signals.into_iter().collect();
        outcome.signals_added = self
            .store
            .add_technology_signals(organization_id, &signals)
            .await?;

        info!(
            contacts = outcome.contacts_added,
            signals = outcome.signals_added,
            "Finished enrichment for {}",
            domain
        );
        Ok(outcome)
    }
}
