//! SQLite entity store.
//!
//! Uniqueness lives in the schema: `organizations.domain`,
//! `(organization_id, email)` and `(organization_id, token)` are all unique,
//! so concurrent writers can race freely and still never produce duplicates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use std::collections::HashMap;
use std::str::FromStr;

use super::{candidate_linkedin, candidate_name, EntityStore, StoreError};
use crate::domain::normalize_domain;
use crate::model::{
    CandidateOrganization, ContactEmail, ContactSource, Organization, OrganizationId,
    OrganizationRecord, TechCategory, TechnologySignal, UpsertOutcome,
};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    /// Connects and creates the schema if missing.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://startups.db` - File-based database, created if missing
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(backend)?
            .create_if_missing(true)
            .foreign_keys(true);

        // A single connection keeps `sqlite::memory:` databases shared.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::new("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS organizations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                domain TEXT NOT NULL UNIQUE,
                linkedin TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                organization_id INTEGER NOT NULL
                    REFERENCES organizations(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                source TEXT NOT NULL,
                UNIQUE (organization_id, email)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS technologies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                organization_id INTEGER NOT NULL
                    REFERENCES organizations(id) ON DELETE CASCADE,
                category TEXT NOT NULL,
                token TEXT NOT NULL,
                UNIQUE (organization_id, token)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn ensure_exists(&self, organization_id: OrganizationId) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT 1 FROM organizations WHERE id = ?")
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|_| ()).ok_or(StoreError::NotFound(organization_id))
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct OrganizationRow {
    id: i64,
    name: String,
    domain: String,
    linkedin: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: row.id,
            name: row.name,
            domain: row.domain,
            linkedin: row.linkedin,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ContactRow {
    organization_id: i64,
    email: String,
    source: String,
}

#[derive(Debug, FromRow)]
struct TechnologyRow {
    organization_id: i64,
    category: String,
    token: String,
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn upsert_organization(
        &self,
        candidate: &CandidateOrganization,
    ) -> Result<UpsertOutcome, StoreError> {
        let domain = normalize_domain(&candidate.domain)?;
        let linkedin = candidate_linkedin(candidate);

        let inserted = sqlx::query(
            r#"
            INSERT INTO organizations (name, domain, linkedin, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(domain) DO NOTHING
            "#,
        )
        .bind(candidate_name(candidate, &domain))
        .bind(&domain)
        .bind(&linkedin)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if inserted.rows_affected() == 1 {
            return Ok(UpsertOutcome {
                id: inserted.last_insert_rowid(),
                was_new: true,
            });
        }

        if linkedin.is_some() {
            sqlx::query(
                r#"
                UPDATE organizations
                SET linkedin = ?
                WHERE domain = ? AND (linkedin IS NULL OR linkedin = '')
                "#,
            )
            .bind(&linkedin)
            .bind(&domain)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        }

        let row = sqlx::query("SELECT id FROM organizations WHERE domain = ?")
            .bind(&domain)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        Ok(UpsertOutcome {
            id: row.get("id"),
            was_new: false,
        })
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
        self.ensure_exists(organization_id).await?;

        let mut added = 0;
        for email in emails {
            let email = email.trim().to_lowercase();
            if email.is_empty() {
                continue;
            }
            let result = sqlx::query(
                r#"
                INSERT INTO contacts (organization_id, email, source)
                VALUES (?, ?, ?)
                ON CONFLICT(organization_id, email) DO NOTHING
                "#,
            )
            .bind(organization_id)
            .bind(&email)
            .bind(source.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            added += result.rows_affected() as usize;
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
        self.ensure_exists(organization_id).await?;

        let mut added = 0;
        for signal in signals {
            let result = sqlx::query(
                r#"
                INSERT INTO technologies (organization_id, category, token)
                VALUES (?, ?, ?)
                ON CONFLICT(organization_id, token) DO NOTHING
                "#,
            )
            .bind(organization_id)
            .bind(signal.category.as_str())
            .bind(&signal.token)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            added += result.rows_affected() as usize;
        }
        Ok(added)
    }

    async fn get_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<OrganizationRecord>, StoreError> {
        let row: Option<OrganizationRow> = sqlx::query_as(
            "SELECT id, name, domain, linkedin, created_at FROM organizations WHERE id = ?",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let contacts: Vec<ContactRow> = sqlx::query_as(
            "SELECT organization_id, email, source FROM contacts WHERE organization_id = ? ORDER BY id",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let technologies: Vec<TechnologyRow> = sqlx::query_as(
            "SELECT organization_id, category, token FROM technologies WHERE organization_id = ? ORDER BY id",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(Some(OrganizationRecord {
            organization: row.into(),
            contacts: contacts.into_iter().filter_map(contact_from_row).collect(),
            technologies: technologies
                .into_iter()
                .filter_map(technology_from_row)
                .collect(),
        }))
    }

    async fn list_all(&self) -> Result<Vec<OrganizationRecord>, StoreError> {
        // One read transaction so the three queries observe the same state.
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let organizations: Vec<OrganizationRow> = sqlx::query_as(
            "SELECT id, name, domain, linkedin, created_at FROM organizations ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        let contacts: Vec<ContactRow> =
            sqlx::query_as("SELECT organization_id, email, source FROM contacts ORDER BY id")
                .fetch_all(&mut *tx)
                .await
                .map_err(backend)?;

        let technologies: Vec<TechnologyRow> = sqlx::query_as(
            "SELECT organization_id, category, token FROM technologies ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;

        let mut contacts_by_org: HashMap<i64, Vec<ContactEmail>> = HashMap::new();
        for row in contacts {
            let org = row.organization_id;
            if let Some(contact) = contact_from_row(row) {
                contacts_by_org.entry(org).or_default().push(contact);
            }
        }

        let mut tech_by_org: HashMap<i64, Vec<TechnologySignal>> = HashMap::new();
        for row in technologies {
            let org = row.organization_id;
            if let Some(signal) = technology_from_row(row) {
                tech_by_org.entry(org).or_default().push(signal);
            }
        }

        Ok(organizations
            .into_iter()
            .map(|row| {
                let id = row.id;
                OrganizationRecord {
                    organization: row.into(),
                    contacts: contacts_by_org.remove(&id).unwrap_or_default(),
                    technologies: tech_by_org.remove(&id).unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn delete_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = ?")
            .bind(organization_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

fn contact_from_row(row: ContactRow) -> Option<ContactEmail> {
    Some(ContactEmail {
        email: row.email,
        source: ContactSource::parse(&row.source)?,
    })
}

fn technology_from_row(row: TechnologyRow) -> Option<TechnologySignal> {
    Some(TechnologySignal {
        category: TechCategory::parse(&row.category)?,
        token: row.token,
    })
}
