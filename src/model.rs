use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type OrganizationId = i64;

/// Identifies one external source a collector harvests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    #[serde(rename = "maps")]
    MapsSearch,
    #[serde(rename = "github")]
    CodeForge,
    #[serde(rename = "reddit")]
    SocialFeed,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::MapsSearch => "maps",
            SourceId::CodeForge => "github",
            SourceId::SocialFeed => "reddit",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_filter: Option<String>,
}

impl SearchCriteria {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            role_filter: None,
        }
    }

    pub fn with_role_filter(mut self, role: impl Into<String>) -> Self {
        self.role_filter = Some(role.into());
        self
    }

    /// Trimmed role filter, `None` when absent or blank.
    pub fn role(&self) -> Option<&str> {
        self.role_filter
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

/// Unvalidated organization record produced by a collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOrganization {
    pub name: String,
    pub domain: String, // raw, normalized at the store boundary
    pub linkedin: Option<String>,
    pub source: SourceId,
}

impl CandidateOrganization {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, source: SourceId) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            linkedin: None,
            source,
        }
    }

    pub fn with_linkedin(mut self, handle: impl Into<String>) -> Self {
        self.linkedin = Some(handle.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub domain: String, // normalized, unique
    pub linkedin: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Page an email address was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContactSource {
    Root,
    About,
    Contact,
    ContactUs,
    Careers,
}

impl ContactSource {
    /// Probe order used by enrichment.
    pub const ALL: [ContactSource; 5] = [
        ContactSource::Root,
        ContactSource::About,
        ContactSource::Contact,
        ContactSource::ContactUs,
        ContactSource::Careers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactSource::Root => "root",
            ContactSource::About => "about",
            ContactSource::Contact => "contact",
            ContactSource::ContactUs => "contact-us",
            ContactSource::Careers => "careers",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            ContactSource::Root => "/",
            ContactSource::About => "/about",
            ContactSource::Contact => "/contact",
            ContactSource::ContactUs => "/contact-us",
            ContactSource::Careers => "/careers",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactEmail {
    pub email: String,
    pub source: ContactSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechCategory {
    Framework,
    Hosting,
    Ecommerce,
}

impl TechCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechCategory::Framework => "framework",
            TechCategory::Hosting => "hosting",
            TechCategory::Ecommerce => "ecommerce",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "framework" => Some(TechCategory::Framework),
            "hosting" => Some(TechCategory::Hosting),
            "ecommerce" => Some(TechCategory::Ecommerce),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TechnologySignal {
    pub category: TechCategory,
    pub token: String, // e.g. "react", "shopify"
}

impl TechnologySignal {
    pub fn new(category: TechCategory, token: impl Into<String>) -> Self {
        Self {
            category,
            token: token.into(),
        }
    }
}

/// An organization together with everything attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub organization: Organization,
    pub contacts: Vec<ContactEmail>,
    pub technologies: Vec<TechnologySignal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: OrganizationId,
    pub was_new: bool,
}
