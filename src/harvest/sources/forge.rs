use async_stream::stream;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{encode_query, SourceSettings};
use crate::harvest::traits::{CandidateStream, CollectError, SourceCollector};
use crate::model::{CandidateOrganization, SearchCriteria, SourceId};
use crate::traits::{FetchError, FetchRequest, PageFetcher, ParseError};

const DEFAULT_ROLE: &str = "founder";
const PER_PAGE: usize = 30;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    login: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Profile {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    blog: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SocialAccount {
    provider: String,
    url: String,
}

/// Code-forge user search: people in a location matching a role, whose
/// profile links a website.
pub struct CodeForgeCollector {
    fetcher: Arc<dyn PageFetcher>,
    settings: SourceSettings,
    api_base: String,
    token: Option<String>,
}

impl CodeForgeCollector {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: SourceSettings) -> Self {
        Self {
            fetcher,
            settings,
            api_base: "https://api.github.com".to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn search_url(&self, criteria: &SearchCriteria, page: usize) -> String {
        let role = criteria.role().unwrap_or(DEFAULT_ROLE);
        let query = format!("location:{} {}", criteria.location.trim(), role);
        format!(
            "{}/search/users?q={}&per_page={}&page={}",
            self.api_base,
            encode_query(&query),
            PER_PAGE,
            page
        )
    }

    fn request(&self, url: &str, cancel: &CancellationToken) -> FetchRequest {
        let mut request = FetchRequest::new(url, self.settings.request_timeout)
            .with_header("Accept", "application/vnd.github+json")
            .with_cancel(cancel.clone());
        if let Some(token) = &self.token {
            request = request.with_header("Authorization", format!("Bearer {token}"));
        }
        request
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Result<T, ParseError>, FetchError> {
        let response = self.fetcher.fetch(self.request(url, cancel)).await?;
        Ok(serde_json::from_str(&response.body).map_err(ParseError::from))
    }

    /// LinkedIn handle from the user's social accounts. `Ok(None)` when the
    /// user has none or the lookup failed for a non rate-limit reason.
    async fn linkedin_handle(
        &self,
        login: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, FetchError> {
        let url = format!("{}/users/{}/social_accounts", self.api_base, login);
        match self.get_json::<Vec<SocialAccount>>(&url, cancel).await {
            Ok(Ok(accounts)) => Ok(accounts
                .into_iter()
                .find(|a| a.provider.eq_ignore_ascii_case("linkedin"))
                .and_then(|a| linkedin_handle_from_url(&a.url))),
            Ok(Err(e)) => {
                debug!(login = %login, error = %e, "Unreadable social accounts");
                Ok(None)
            }
            Err(e) if e.is_rate_limited() => Err(e),
            Err(e) => {
                debug!(login = %login, error = %e, "Social account lookup failed");
                Ok(None)
            }
        }
    }
}

/// Last non-empty path segment of a profile URL, e.g.
/// `https://www.linkedin.com/company/acme-hq/` -> `acme-hq`.
pub fn linkedin_handle_from_url(profile_url: &str) -> Option<String> {
    let parsed = url::Url::parse(profile_url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

fn website(blog: Option<&str>) -> Option<&str> {
    blog.map(str::trim)
        .filter(|b| b.starts_with("http://") || b.starts_with("https://"))
}

impl SourceCollector for CodeForgeCollector {
    fn source_id(&self) -> SourceId {
        SourceId::CodeForge
    }

    fn collect<'a>(
        &'a self,
        criteria: &'a SearchCriteria,
        cancel: CancellationToken,
    ) -> CandidateStream<'a> {
        Box::pin(stream! {
            let mut yielded = 0usize;

            for page in 1..=self.settings.max_pages {
                let url = self.search_url(criteria, page);
                let results = match self.get_json::<SearchPage>(&url, &cancel).await {
                    Ok(Ok(results)) => results,
                    Ok(Err(e)) => {
                        warn!(source = "github", url = %url, error = %e, "Malformed search page");
                        yield Err(CollectError::from(e));
                        return;
                    }
                    Err(e) => {
                        warn!(source = "github", url = %url, error = %e, "Search request failed");
                        yield Err(CollectError::from(e));
                        return;
                    }
                };

                let hits = results.items.len();
                for item in results.items {
                    let profile = match self.get_json::<Profile>(&item.url, &cancel).await {
                        Ok(Ok(profile)) => profile,
                        Ok(Err(e)) => {
                            debug!(login = %item.login, error = %e, "Skipping unreadable profile");
                            continue;
                        }
                        Err(e) => {
                            warn!(source = "github", login = %item.login, error = %e, "Profile request failed");
                            yield Err(CollectError::from(e));
                            return;
                        }
                    };

                    let Some(site) = website(profile.blog.as_deref()) else {
                        debug!(login = %profile.login, "Profile has no website");
                        continue;
                    };

                    let name = profile
                        .name
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .unwrap_or(&profile.login);
                    let mut candidate = CandidateOrganization::new(name, site, SourceId::CodeForge);

                    match self.linkedin_handle(&profile.login, &cancel).await {
                        Ok(Some(handle)) => candidate = candidate.with_linkedin(handle),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(source = "github", error = %e, "Rate limited during social lookup");
                            yielded += 1;
                            yield Ok(candidate);
                            yield Err(CollectError::from(e));
                            return;
                        }
                    }

                    yielded += 1;
                    yield Ok(candidate);
                }

                if hits < PER_PAGE {
                    break;
                }
            }

            info!(source = "github", candidates = yielded, "Code-forge search finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::tests::StubFetcher;
    use futures::StreamExt;
    use std::collections::HashMap;

    const API: &str = "https://api.github.com";

    fn search_url(page: usize) -> String {
        format!("{API}/search/users?q=location%3Aberlin+founder&per_page=30&page={page}")
    }

    #[test]
    fn test_linkedin_handle_from_url() {
        assert_eq!(
            linkedin_handle_from_url("https://www.linkedin.com/company/acme-hq/").as_deref(),
            Some("acme-hq")
        );
        assert_eq!(
            linkedin_handle_from_url("https://linkedin.com/in/jane").as_deref(),
            Some("jane")
        );
        assert_eq!(linkedin_handle_from_url("not a url"), None);
    }

    #[tokio::test]
    async fn test_collect_profiles_with_websites() {
        let pages = HashMap::from([
            (
                search_url(1),
                format!(
                    r#"{{"total_count":2,"items":[
                        {{"login":"jane","url":"{API}/users/jane"}},
                        {{"login":"nosite","url":"{API}/users/nosite"}}
                    ]}}"#
                ),
            ),
            (
                format!("{API}/users/jane"),
                r#"{"login":"jane","name":"Acme","blog":"https://acme.io/blog"}"#.to_string(),
            ),
            (
                format!("{API}/users/nosite"),
                r#"{"login":"nosite","name":null,"blog":""}"#.to_string(),
            ),
            (
                format!("{API}/users/jane/social_accounts"),
                r#"[{"provider":"twitter","url":"https://twitter.com/acme"},
                    {"provider":"linkedin","url":"https://www.linkedin.com/company/acme-hq"}]"#
                    .to_string(),
            ),
        ]);
        let collector =
            CodeForgeCollector::new(Arc::new(StubFetcher { pages }), SourceSettings::default());

        let criteria = SearchCriteria::new("berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        let acme = items[0].as_ref().unwrap();
        assert_eq!(acme.name, "Acme");
        assert_eq!(acme.domain, "https://acme.io/blog");
        assert_eq!(acme.linkedin.as_deref(), Some("acme-hq"));
    }

    #[tokio::test]
    async fn test_search_failure_ends_stream() {
        let collector = CodeForgeCollector::new(
            Arc::new(StubFetcher { pages: HashMap::new() }),
            SourceSettings::default(),
        );

        let criteria = SearchCriteria::new("berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_malformed_search_page_is_parse_error() {
        let pages = HashMap::from([(search_url(1), "<html>oops</html>".to_string())]);
        let collector =
            CodeForgeCollector::new(Arc::new(StubFetcher { pages }), SourceSettings::default());

        let criteria = SearchCriteria::new("berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert!(matches!(items.as_slice(), [Err(CollectError::Parse(_))]));
    }

    // Answers 429 for every social-account lookup
    struct SocialLookupLimited(StubFetcher);

    #[async_trait::async_trait]
    impl PageFetcher for SocialLookupLimited {
        async fn fetch(
            &self,
            request: FetchRequest,
        ) -> Result<crate::traits::FetchResponse, FetchError> {
            if request.url.ends_with("/social_accounts") {
                return Err(FetchError::from_status(request.url, 429));
            }
            self.0.fetch(request).await
        }
    }

    #[tokio::test]
    async fn test_rate_limited_social_lookup_ends_stream_after_candidate() {
        let pages = HashMap::from([
            (
                search_url(1),
                format!(
                    r#"{{"items":[
                        {{"login":"jane","url":"{API}/users/jane"}},
                        {{"login":"bob","url":"{API}/users/bob"}}
                    ]}}"#
                ),
            ),
            (
                format!("{API}/users/jane"),
                r#"{"login":"jane","name":"Acme","blog":"https://acme.io"}"#.to_string(),
            ),
            (
                format!("{API}/users/bob"),
                r#"{"login":"bob","name":"Beta","blog":"https://beta.io"}"#.to_string(),
            ),
        ]);
        let collector = CodeForgeCollector::new(
            Arc::new(SocialLookupLimited(StubFetcher { pages })),
            SourceSettings::default(),
        );

        let criteria = SearchCriteria::new("berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        let acme = items[0].as_ref().unwrap();
        assert_eq!(acme.domain, "https://acme.io");
        assert_eq!(acme.linkedin, None);
        assert!(items[1].as_ref().unwrap_err().is_rate_limited());
    }

    #[tokio::test]
    async fn test_rate_limited_search_stops_immediately() {
        let collector = CodeForgeCollector::new(Arc::new(RateLimitAll), SourceSettings::default());

        let criteria = SearchCriteria::new("berlin");
        let items: Vec<_> = collector
            .collect(&criteria, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap_err().is_rate_limited());
    }

    struct RateLimitAll;

    #[async_trait::async_trait]
    impl PageFetcher for RateLimitAll {
        async fn fetch(
            &self,
            request: FetchRequest,
        ) -> Result<crate::traits::FetchResponse, FetchError> {
            Err(FetchError::from_status(request.url, 403))
        }
    }
}
