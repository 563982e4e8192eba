//! Best-effort enrichment of a stored organization's website.
//!
//! Probes a fixed list of well-known pages for contact emails and scans the
//! jobs page for technology signatures. Probe failures only shrink the
//! result; enrichment itself never fails.

use futures::future::join_all;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{ContactSource, TechCategory, TechnologySignal};
use crate::traits::{FetchRequest, PageFetcher};

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+").unwrap()
});

/// Asset-looking matches such as `logo@2x.png`.
const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

pub const JOBS_PATH: &str = "/jobs";

pub const SIGNATURES: &[(TechCategory, &[&str])] = &[
    (
        TechCategory::Framework,
        &["react", "vue", "angular", "django", "flask", "rails"],
    ),
    (
        TechCategory::Hosting,
        &["heroku", "aws", "azure", "firebase", "netlify"],
    ),
    (
        TechCategory::Ecommerce,
        &["shopify", "woocommerce", "bigcommerce"],
    ),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentResult {
    /// Lowercased email -> page it was first seen on (in probe order)
    pub emails: BTreeMap<String, ContactSource>,
    pub signals: BTreeSet<TechnologySignal>,
}

impl EnrichmentResult {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.signals.is_empty()
    }

    /// Emails grouped by the page they were attributed to.
    pub fn emails_by_source(&self) -> BTreeMap<&'static str, (ContactSource, Vec<String>)> {
        let mut grouped: BTreeMap<&'static str, (ContactSource, Vec<String>)> = BTreeMap::new();
        for (email, source) in &self.emails {
            grouped
                .entry(source.as_str())
                .or_insert_with(|| (*source, Vec::new()))
                .1
                .push(email.clone());
        }
        grouped
    }
}

/// Extracts syntactically valid emails, lowercased and deduplicated.
pub fn extract_emails(body: &str) -> BTreeSet<String> {
    RE_EMAIL
        .find_iter(body)
        .map(|m| m.as_str().trim_end_matches(['.', '-']).to_lowercase())
        .filter(|email| !ASSET_SUFFIXES.iter().any(|ext| email.ends_with(ext)))
        .collect()
}

/// Case-insensitive substring match of the signature table.
pub fn detect_technologies(body: &str) -> BTreeSet<TechnologySignal> {
    let text = body.to_lowercase();
    SIGNATURES
        .iter()
        .flat_map(|(category, tokens)| {
            tokens
                .iter()
                .filter(|token| text.contains(*token))
                .map(|token| TechnologySignal::new(*category, *token))
        })
        .collect()
}

pub struct EnrichmentWorker {
    fetcher: Arc<dyn PageFetcher>,
    probe_timeout: Duration,
    scheme: String,
}

impl EnrichmentWorker {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            probe_timeout: Duration::from_secs(10),
            scheme: "https".to_string(),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Overrides the URL scheme, e.g. `http` for local test servers.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    async fn probe(&self, domain: &str, path: &str, cancel: &CancellationToken) -> Option<String> {
        let url = format!("{}://{}{}", self.scheme, domain, path);
        let request = FetchRequest::new(&url, self.probe_timeout).with_cancel(cancel.clone());
        match self.fetcher.fetch(request).await {
            Ok(response) => Some(response.body),
            Err(e) => {
                warn!(domain = %domain, path = %path, error = %e, "Enrichment probe failed");
                None
            }
        }
    }

    pub async fn enrich(&self, domain: &str, cancel: &CancellationToken) -> EnrichmentResult {
        let contact_probes = ContactSource::ALL
            .iter()
            .map(|source| self.probe(domain, source.path(), cancel));
        let (bodies, jobs_body) = tokio::join!(
            join_all(contact_probes),
            self.probe(domain, JOBS_PATH, cancel)
        );

        let mut result = EnrichmentResult::default();
        for (source, body) in ContactSource::ALL.iter().zip(bodies) {
            let Some(body) = body else { continue };
            for email in extract_emails(&body) {
                result.emails.entry(email).or_insert(*source);
            }
        }
        if let Some(body) = jobs_body {
            result.signals = detect_technologies(&body);
        }

        debug!(
            domain = %domain,
            emails = result.emails.len(),
            signals = result.signals.len(),
            "Enrichment finished"
        );
        result
    }
}
