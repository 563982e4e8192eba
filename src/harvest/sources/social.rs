use async_stream::stream;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SourceSettings;
use crate::harvest::traits::{CandidateStream, CollectError, SourceCollector};
use crate::model::{CandidateOrganization, SearchCriteria, SourceId};
use crate::traits::{FetchRequest, PageFetcher, ParseError};

const PAGE_LIMIT: usize = 100;
const MAX_NAME_CHARS: usize = 255;

/// Hosts whose links point at media or back into the feed itself.
const SKIPPED_HOSTS: &[&str] = &["reddit.com", "redd.it", "imgur.com"];

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    is_self: bool,
}

/// Newest link posts from a location's startup community feed.
pub struct SocialFeedCollector {
    fetcher: Arc<dyn PageFetcher>,
    settings: SourceSettings,
    base_url: String,
}

impl SocialFeedCollector {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: SourceSettings) -> Self {
        Self {
            fetcher,
            settings,
            base_url: "https://www.reddit.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn listing_url(&self, criteria: &SearchCriteria, after: Option<&str>) -> String {
        let mut url = format!(
            "{}/r/{}/new.json?limit={}",
            self.base_url,
            community_name(&criteria.location),
            PAGE_LIMIT
        );
        if let Some(after) = after {
            url.push_str("&after=");
            url.push_str(after);
        }
        url
    }
}

/// `"New York"` -> `"newyorkstartups"`.
pub fn community_name(location: &str) -> String {
    let mut name: String = location
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    name.push_str("startups");
    name
}

fn to_candidate(post: Post, role: Option<&str>) -> Result<Option<CandidateOrganization>, ParseError> {
    if post.is_self {
        return Ok(None);
    }
    if let Some(role) = role {
        if !post.title.to_lowercase().contains(&role.to_lowercase()) {
            return Ok(None);
        }
    }

    let link = post
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ParseError::MissingField("url".to_string()))?;
    let parsed = url::Url::parse(&link).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ParseError::MissingField("host".to_string()))?;
    if SKIPPED_HOSTS
        .iter()
        .any(|skip| host == *skip || host.ends_with(&format!(".{skip}")))
    {
        return Ok(None);
    }

    let name: String = post.title.trim().chars().take(MAX_NAME_CHARS).collect();
    Ok(Some(CandidateOrganization::new(name, link, SourceId::SocialFeed)))
}

impl SourceCollector for SocialFeedCollector {
    fn source_id(&self) -> SourceId {
        SourceId::SocialFeed
    }

    fn collect<'a>(
        &'a self,
        criteria: &'a SearchCriteria,
        cancel: CancellationToken,
    ) -> CandidateStream<'a> {
        Box::pin(stream! {
            let role = criteria.role();
            let mut after: Option<String> = None;
            let mut yielded = 0usize;

            for _ in 0..self.settings.max_pages {
                let url = self.listing_url(criteria, after.as_deref());
                let request = FetchRequest::new(&url, self.settings.request_timeout)
                    .with_cancel(cancel.clone());

                let body = match self.fetcher.fetch(request).await {
                    Ok(response) => response.body,
                    Err(e) => {
                        warn!(source = "reddit", url = %url, error = %e, "Feed request failed");
                        yield Err(CollectError::from(e));
                        return;
                    }
                };

                let listing: Listing = match serde_json::from_str(&body) {
                    Ok(listing) => listing,
                    Err(e) => {
                        warn!(source = "reddit", url = %url, error = %e, "Malformed feed listing");
                        yield Err(CollectError::from(ParseError::from(e)));
                        return;
                    }
                };

                for child in listing.data.children {
                    match to_candidate(child.data, role) {
                        Ok(Some(candidate)) => {
                            yielded += 1;
                            yield Ok(candidate);
                        }
                        Ok(None) => {}
                        Err(e) => debug!(source = "reddit", error = %e, "Skipping post"),
                    }
                }

                match listing.data.after {
                    Some(next) if !next.is_empty() => after = Some(next),
                    _ => break,
                }
            }

            info!(source = "reddit", candidates = yielded, "Feed listing finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::tests::StubFetcher;
    use futures::StreamExt;
    use std::collections::HashMap;

    fn post(title: &str, url: &str, is_self: bool) -> String {
        format!(r#"{{"data":{{"title":"{title}","url":"{url}","is_self":{is_self}}}}}"#)
    }

    fn listing(children: &[String], after: Option<&str>) -> String {
        let after = after.map(|a| format!("\"{a}\"")).unwrap_or("null".to_string());
        format!(
            r#"{{"data":{{"after":{after},"children":[{}]}}}}"#,
            children.join(",")
        )
    }

    #[test]
    fn test_community_name() {
        assert_eq!(community_name("New York"), "newyorkstartups");
        assert_eq!(community_name("berlin"), "berlinstartups");
    }

    #[tokio::test]
    async fn test_collect_follows_pages_and_filters_posts() {
        let base = "https://www.reddit.com/r/berlinstartups/new.json?limit=100";
        let pages = HashMap::from([
            (
                base.to_string(),
                listing(
                    &[
                        post("Acme launches", "https://acme.io/launch", false),
                        post("Ask: hiring?", "https://www.reddit.com/r/x", true),
                        post("Screenshot", "https://i.imgur.com/abc.png", false),
                    ],
                    Some("t3_next"),
                ),
            ),
            (
                format!("{base}&after=t3_next"),
                listing(&[post("Beta Labs", "http://beta-labs.de", false)], None),
            ),
        ]);
        let collector =
            SocialFeedCollector::new(Arc::new(StubFetcher { pages }), SourceSettings::default());

        let criteria = SearchCriteria::new("Berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        let domains: Vec<_> = items
            .iter()
            .map(|i| i.as_ref().unwrap().domain.clone())
            .collect();
        assert_eq!(domains, vec!["https://acme.io/launch", "http://beta-labs.de"]);
    }

    #[tokio::test]
    async fn test_role_filter_matches_titles() {
        let base = "https://www.reddit.com/r/berlinstartups/new.json?limit=100";
        let pages = HashMap::from([(
            base.to_string(),
            listing(
                &[
                    post("Fintech startup Acme", "https://acme.io", false),
                    post("Gaming studio Beta", "https://beta.gg", false),
                ],
                None,
            ),
        )]);
        let collector =
            SocialFeedCollector::new(Arc::new(StubFetcher { pages }), SourceSettings::default());

        let criteria = SearchCriteria::new("berlin").with_role_filter("FINTECH");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().name, "Fintech startup Acme");
    }

    #[tokio::test]
    async fn test_partial_results_survive_later_failure() {
        let base = "https://www.reddit.com/r/berlinstartups/new.json?limit=100";
        let pages = HashMap::from([(
            base.to_string(),
            listing(&[post("Acme", "https://acme.io", false)], Some("t3_gone")),
        )]);
        let collector =
            SocialFeedCollector::new(Arc::new(StubFetcher { pages }), SourceSettings::default());

        let criteria = SearchCriteria::new("berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(CollectError::Fetch(_))));
    }
}
