use async_stream::stream;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{encode_query, SourceSettings};
use crate::harvest::traits::{CandidateStream, CollectError, SourceCollector};
use crate::model::{CandidateOrganization, SearchCriteria, SourceId};
use crate::traits::{FetchRequest, PageFetcher, ParseError};

const RESULT_MARKER: &str = "section-result-text-content";
const DEFAULT_QUERY: &str = "startups";

static RE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<h3[^>]*>(.*?)</h3>").unwrap());
static RE_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["'](https?://[^"']+)["']"#).unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Map search results for "{query} in {location}".
///
/// The page is script-rendered, so this collector expects a browser-capable
/// fetcher; it issues a single request.
pub struct MapsSearchCollector {
    fetcher: Arc<dyn PageFetcher>,
    settings: SourceSettings,
    base_url: String,
}

impl MapsSearchCollector {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: SourceSettings) -> Self {
        Self {
            fetcher,
            settings,
            base_url: "https://www.google.com/maps/search".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn search_url(&self, criteria: &SearchCriteria) -> String {
        let query = criteria.role().unwrap_or(DEFAULT_QUERY);
        format!(
            "{}/{}+in+{}",
            self.base_url,
            encode_query(query),
            encode_query(&criteria.location)
        )
    }
}

/// Splits a results page into per-result candidates. Results without a
/// name or an outbound website come back as `ParseError`.
pub fn parse_results(body: &str) -> Vec<Result<CandidateOrganization, ParseError>> {
    body.split(RESULT_MARKER)
        .skip(1)
        .map(|block| {
            let name = RE_HEADING
                .captures(block)
                .map(|c| RE_TAG.replace_all(&c[1], "").trim().to_string())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ParseError::MissingField("h3 name".to_string()))?;

            let website = RE_HREF
                .captures_iter(block)
                .map(|c| c[1].to_string())
                .find(|href| !is_google_link(href))
                .ok_or_else(|| ParseError::MissingField(format!("website for {name}")))?;

            Ok(CandidateOrganization::new(
                html_unescape(&name),
                website,
                SourceId::MapsSearch,
            ))
        })
        .collect()
}

fn is_google_link(href: &str) -> bool {
    url::Url::parse(href)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.contains("google.") || h.ends_with("gstatic.com")))
        .unwrap_or(true)
}

fn html_unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

impl SourceCollector for MapsSearchCollector {
    fn source_id(&self) -> SourceId {
        SourceId::MapsSearch
    }

    fn high_volume(&self) -> bool {
        true
    }

    fn collect<'a>(
        &'a self,
        criteria: &'a SearchCriteria,
        cancel: CancellationToken,
    ) -> CandidateStream<'a> {
        Box::pin(stream! {
            let url = self.search_url(criteria);
            let request = FetchRequest::new(&url, self.settings.request_timeout).with_cancel(cancel);

            let body = match self.fetcher.fetch(request).await {
                Ok(response) => response.body,
                Err(e) => {
                    warn!(source = "maps", url = %url, error = %e, "Map search fetch failed");
                    yield Err(CollectError::from(e));
                    return;
                }
            };

            let mut yielded = 0usize;
            for result in parse_results(&body) {
                match result {
                    Ok(candidate) => {
                        yielded += 1;
                        yield Ok(candidate);
                    }
                    Err(e) => debug!(source = "maps", error = %e, "Skipping map result"),
                }
            }
            info!(source = "maps", candidates = yielded, "Map search finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::tests::StubFetcher;
    use futures::StreamExt;
    use std::collections::HashMap;

    const PAGE: &str = r#"
        <div class="section-result-text-content"><h3 class="t"><span>Acme &amp; Co</span></h3>
          <a href="https://www.google.com/maps/place/acme">map</a>
          <a href="https://acme.io/?utm=maps">website</a></div>
        <div class="section-result-text-content"><h3>No Site Bakery</h3>
          <a href="https://maps.google.com/x">map</a></div>
        <div class="section-result-text-content"><h3>Beta Labs</h3>
          <a href='http://beta-labs.de'>site</a></div>
    "#;

    #[test]
    fn test_parse_results() {
        let results = parse_results(PAGE);
        assert_eq!(results.len(), 3);

        let acme = results[0].as_ref().unwrap();
        assert_eq!(acme.name, "Acme & Co");
        assert_eq!(acme.domain, "https://acme.io/?utm=maps");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().domain, "http://beta-labs.de");
    }

    #[test]
    fn test_search_url_uses_role_filter() {
        let collector = MapsSearchCollector::new(
            Arc::new(StubFetcher { pages: HashMap::new() }),
            SourceSettings::default(),
        );

        let plain = SearchCriteria::new("new york");
        assert_eq!(
            collector.search_url(&plain),
            "https://www.google.com/maps/search/startups+in+new+york"
        );

        let filtered = SearchCriteria::new("berlin").with_role_filter("fintech");
        assert!(collector.search_url(&filtered).ends_with("/fintech+in+berlin"));
    }

    #[tokio::test]
    async fn test_collect_yields_parsed_candidates() {
        let url = "https://www.google.com/maps/search/startups+in+berlin".to_string();
        let collector = MapsSearchCollector::new(
            Arc::new(StubFetcher {
                pages: HashMap::from([(url, PAGE.to_string())]),
            }),
            SourceSettings::default(),
        );

        let criteria = SearchCriteria::new("berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.is_ok()));
    }

    #[tokio::test]
    async fn test_fetch_failure_ends_stream_with_error() {
        let collector = MapsSearchCollector::new(
            Arc::new(StubFetcher { pages: HashMap::new() }),
            SourceSettings::default(),
        );

        let criteria = SearchCriteria::new("berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(CollectError::Fetch(_))));
    }
}
