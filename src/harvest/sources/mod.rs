//! Source collector implementations.
//!
//! One [`SourceCollector`](crate::harvest::SourceCollector) per external source:
//! - `maps` - map search results rendered by a browser-capable fetcher
//! - `forge` - code-forge user search with profile lookups
//! - `social` - social feed listing of a location's startup community

pub mod forge;
pub mod maps;
pub mod social;

pub use forge::CodeForgeCollector;
pub use maps::MapsSearchCollector;
pub use social::SocialFeedCollector;

use std::sync::Arc;
use std::time::Duration;

use crate::config::HarvesterConfig;
use crate::harvest::traits::SourceCollector;
use crate::traits::PageFetcher;

/// Request pacing shared by every collector.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Timeout applied to each outbound request
    pub request_timeout: Duration,

    /// Upper bound on pages requested from a paginated source
    pub max_pages: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_pages: 3,
        }
    }
}

impl From<&HarvesterConfig> for SourceSettings {
    fn from(config: &HarvesterConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            max_pages: config.max_pages,
        }
    }
}

/// Builds the standard collector set: maps-search through `browser`, the
/// other sources through `fetcher`.
pub fn default_collectors(
    fetcher: Arc<dyn PageFetcher>,
    browser: Arc<dyn PageFetcher>,
    config: &HarvesterConfig,
) -> Vec<Arc<dyn SourceCollector>> {
    let settings = SourceSettings::from(config);

    let mut forge = CodeForgeCollector::new(fetcher.clone(), settings.clone());
    if let Some(token) = &config.github_token {
        forge = forge.with_token(token.clone());
    }

    vec![
        Arc::new(MapsSearchCollector::new(browser, settings.clone())),
        Arc::new(forge),
        Arc::new(SocialFeedCollector::new(fetcher, settings)),
    ]
}

/// `application/x-www-form-urlencoded` encoding (spaces become `+`).
pub(crate) fn encode_query(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.trim().as_bytes()).collect()
}
