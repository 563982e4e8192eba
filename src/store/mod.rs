//! Entity storage for harvested organizations.
//!
//! The [`EntityStore`] trait is the single seam every collector task writes
//! through. Implementations must make normalize-then-upsert atomic per
//! domain: two concurrent upserts for the same normalized domain yield one
//! organization, with the first writer's name retained.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    CandidateOrganization, ContactSource, OrganizationId, OrganizationRecord, TechnologySignal,
    UpsertOutcome,
};

pub use memory::MemoryEntityStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEntityStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Domain was empty or unusable after normalization
    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),

    /// Referenced organization does not exist
    #[error("Organization {0} not found")]
    NotFound(OrganizationId),

    /// Backing store unavailable or rejected the operation
    #[error("Store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Inserts the candidate or merges it into the organization sharing its
    /// normalized domain (first-writer-wins on name, fill-if-empty on linkedin).
    async fn upsert_organization(
        &self,
        candidate: &CandidateOrganization,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Attaches emails not already stored for the organization. Returns the
    /// number of new rows; empty input is a no-op.
    async fn add_contacts(
        &self,
        organization_id: OrganizationId,
        emails: &[String],
        source: ContactSource,
    ) -> Result<usize, StoreError>;

    /// Attaches signals whose token is not already stored for the organization.
    async fn add_technology_signals(
        &self,
        organization_id: OrganizationId,
        signals: &[TechnologySignal],
    ) -> Result<usize, StoreError>;

    async fn get_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<OrganizationRecord>, StoreError>;

    /// Point-in-time snapshot of every organization, ordered by id.
    async fn list_all(&self) -> Result<Vec<OrganizationRecord>, StoreError>;

    /// Removes the organization together with its contacts and signals.
    async fn delete_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<bool, StoreError>;
}

/// Display name to store for a candidate; falls back to the domain so no
/// organization is ever persisted without a name.
pub(crate) fn candidate_name(candidate: &CandidateOrganization, domain: &str) -> String {
    let name = candidate.name.trim();
    if name.is_empty() {
        domain.to_string()
    } else {
        name.to_string()
    }
}

pub(crate) fn candidate_linkedin(candidate: &CandidateOrganization) -> Option<String> {
    candidate
        .linkedin
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}
