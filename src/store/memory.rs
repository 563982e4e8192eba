//! In-memory entity store.
//!
//! A single `RwLock` guards all state, so every write (including the
//! normalize-then-upsert sequence) is one critical section and every read
//! observes fully-written organizations only.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use super::{candidate_linkedin, candidate_name, EntityStore, StoreError};
use crate::domain::normalize_domain;
use crate::model::{
    CandidateOrganization, ContactEmail, ContactSource, Organization, OrganizationId,
    OrganizationRecord, TechnologySignal, UpsertOutcome,
};

#[derive(Default)]
struct State {
    next_id: OrganizationId,
    records: BTreeMap<OrganizationId, OrganizationRecord>,
    by_domain: HashMap<String, OrganizationId>,
}

impl State {
    fn record_mut(&mut self, id: OrganizationId) -> Result<&mut OrganizationRecord, StoreError> {
        self.records.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

/// Process-local store. Data is lost on restart.
#[derive(Default)]
pub struct MemoryEntityStore {
    state: RwLock<State>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn organization_count(&self) -> usize {
        self.state.read().await.records.len()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn upsert_organization(
        &self,
        candidate: &CandidateOrganization,
    ) -> Result<UpsertOutcome, StoreError> {
        let domain = normalize_domain(&candidate.domain)?;
        let linkedin = candidate_linkedin(candidate);

        let mut state = self.state.write().await;

        if let Some(&id) = state.by_domain.get(&domain) {
            let record = state.record_mut(id)?;
            if record.organization.linkedin.is_none() && linkedin.is_some() {
                debug!(domain = %domain, "Filling empty linkedin handle");
                record.organization.linkedin = linkedin;
            }
            return Ok(UpsertOutcome { id, was_new: false });
        }

        state.next_id += 1;
        let id = state.next_id;
        let organization = Organization {
            id,
            name: candidate_name(candidate, &domain),
            domain: domain.clone(),
            linkedin,
            created_at: Utc::now(),
        };
        state.records.insert(
            id,
            OrganizationRecord {
                organization,
                contacts: Vec::new(),
                technologies: Vec::new(),
            },
        );
        state.by_domain.insert(domain, id);

        Ok(UpsertOutcome { id, was_new: true })
    }

    async fn add_contacts(
        &self,
        organization_id: OrganizationId,
        emails: &[String],
        source: ContactSource,
    ) -> Result<usize, StoreError> {
        if emails.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write().await;
        let record = state.record_mut(organization_id)?;

        let mut added = 0;
        for email in emails {
            let email = email.trim().to_lowercase();
            if email.is_empty() || record.contacts.iter().any(|c| c.email == email) {
                continue;
            }
            record.contacts.push(ContactEmail { email, source });
            added += 1;
        }
        Ok(added)
    }

    async fn add_technology_signals(
        &self,
        organization_id: OrganizationId,
        signals: &[TechnologySignal],
    ) -> Result<usize, StoreError> {
        if signals.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write().await;
        let record = state.record_mut(organization_id)?;

        let mut added = 0;
        for signal in signals {
            if record.technologies.iter().any(|t| t.token == signal.token) {
                continue;
            }
            record.technologies.push(signal.clone());
            added += 1;
        }
        Ok(added)
    }

    async fn get_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<OrganizationRecord>, StoreError> {
        Ok(self.state.read().await.records.get(&organization_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<OrganizationRecord>, StoreError> {
        Ok(self.state.read().await.records.values().cloned().collect())
    }

    async fn delete_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.records.remove(&organization_id) {
            Some(record) => {
                state.by_domain.remove(&record.organization.domain);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceId, TechCategory};
    use std::sync::Arc;

    fn candidate(name: &str, domain: &str) -> CandidateOrganization {
        CandidateOrganization::new(name, domain, SourceId::CodeForge)
    }

    #[tokio::test]
    async fn test_upsert_normalizes_and_dedups() {
        let store = MemoryEntityStore::new();

        let first = store
            .upsert_organization(&candidate("Acme", "http://acme.io/page"))
            .await
            .unwrap();
        let second = store
            .upsert_organization(&candidate("Acme Corp", "ACME.io"))
            .await
            .unwrap();

        assert!(first.was_new);
        assert!(!second.was_new);
        assert_eq!(first.id, second.id);

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].organization.domain, "acme.io");
        assert_eq!(all[0].organization.name, "Acme");
    }

    #[tokio::test]
    async fn test_concurrent_upserts_yield_single_row() {
        let store = Arc::new(MemoryEntityStore::new());

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let domain = if i % 2 == 0 { "https://acme.io" } else { "acme.io/about" };
                let name = format!("Acme {i}");
                let outcome = store
                    .upsert_organization(&candidate(&name, domain))
                    .await
                    .unwrap();
                (name, outcome)
            }));
        }

        let mut winners = Vec::new();
        let mut ids = Vec::new();
        for handle in handles {
            let (name, outcome) = handle.await.unwrap();
            ids.push(outcome.id);
            if outcome.was_new {
                winners.push(name);
            }
        }

        assert_eq!(winners.len(), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.organization_count().await, 1);

        let stored = store.get_organization(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.organization.name, winners[0]);
    }

    #[tokio::test]
    async fn test_linkedin_fill_if_empty() {
        let store = MemoryEntityStore::new();
        let id = store
            .upsert_organization(&candidate("Acme", "acme.io"))
            .await
            .unwrap()
            .id;

        store
            .upsert_organization(&candidate("Acme", "acme.io").with_linkedin("acme-hq"))
            .await
            .unwrap();
        store
            .upsert_organization(&candidate("Acme", "acme.io").with_linkedin("  "))
            .await
            .unwrap();
        store
            .upsert_organization(&candidate("Acme", "acme.io").with_linkedin("other"))
            .await
            .unwrap();

        let record = store.get_organization(id).await.unwrap().unwrap();
        assert_eq!(record.organization.linkedin.as_deref(), Some("acme-hq"));
    }

    #[tokio::test]
    async fn test_invalid_domain_is_not_stored() {
        let store = MemoryEntityStore::new();
        let result = store.upsert_organization(&candidate("Nobody", "https://")).await;

        assert!(matches!(result, Err(StoreError::InvalidDomain(_))));
        assert_eq!(store.organization_count().await, 0);
    }

    #[tokio::test]
    async fn test_blank_name_falls_back_to_domain() {
        let store = MemoryEntityStore::new();
        let id = store
            .upsert_organization(&candidate("   ", "acme.io"))
            .await
            .unwrap()
            .id;

        let record = store.get_organization(id).await.unwrap().unwrap();
        assert_eq!(record.organization.name, "acme.io");
    }

    #[tokio::test]
    async fn test_contact_and_signal_dedup() {
        let store = MemoryEntityStore::new();
        let id = store
            .upsert_organization(&candidate("Acme", "acme.io"))
            .await
            .unwrap()
            .id;

        let emails = vec!["hello@acme.io".to_string(), "HELLO@acme.io".to_string()];
        assert_eq!(
            store.add_contacts(id, &emails, ContactSource::Root).await.unwrap(),
            1
        );
        assert_eq!(
            store
                .add_contacts(id, &["hello@acme.io".to_string()], ContactSource::About)
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.add_contacts(id, &[], ContactSource::Root).await.unwrap(), 0);

        let signals = vec![
            TechnologySignal::new(TechCategory::Framework, "react"),
            TechnologySignal::new(TechCategory::Framework, "react"),
            TechnologySignal::new(TechCategory::Hosting, "aws"),
        ];
        assert_eq!(store.add_technology_signals(id, &signals).await.unwrap(), 2);

        let record = store.get_organization(id).await.unwrap().unwrap();
        assert_eq!(record.contacts.len(), 1);
        assert_eq!(record.contacts[0].source, ContactSource::Root);
        assert_eq!(record.technologies.len(), 2);
    }

    #[tokio::test]
    async fn test_contacts_for_unknown_organization() {
        let store = MemoryEntityStore::new();
        let result = store
            .add_contacts(42, &["a@b.io".to_string()], ContactSource::Root)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(42))));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_frees_domain() {
        let store = MemoryEntityStore::new();
        let id = store
            .upsert_organization(&candidate("Acme", "acme.io"))
            .await
            .unwrap()
            .id;
        store
            .add_contacts(id, &["hi@acme.io".to_string()], ContactSource::Contact)
            .await
            .unwrap();

        assert!(store.delete_organization(id).await.unwrap());
        assert!(!store.delete_organization(id).await.unwrap());
        assert!(store.get_organization(id).await.unwrap().is_none());

        let again = store
            .upsert_organization(&candidate("Acme Two", "acme.io"))
            .await
            .unwrap();
        assert!(again.was_new);
        assert_ne!(again.id, id);
    }
}
