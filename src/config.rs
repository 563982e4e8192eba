use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Runtime configuration, loaded from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub bind_addr: String,
    pub port: u16,
    /// `sqlite:` URL selects the SQLite store (feature `sqlite`); otherwise in-memory
    pub database_url: Option<String>,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub max_pages: usize,
    pub enrich: bool,
    pub enrich_concurrency: usize,
    pub github_token: Option<String>,
    pub tor_control_addr: Option<String>,
    pub tor_control_password: Option<String>,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5000,
            database_url: None,
            user_agent: "OrgHarvester/1.0".to_string(),
            request_timeout: Duration::from_secs(10),
            max_pages: 3,
            enrich: true,
            enrich_concurrency: 4,
            github_token: None,
            tor_control_addr: None,
            tor_control_password: None,
        }
    }
}

impl HarvesterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parse_or(get("PORT"), "PORT", "port number", defaults.port)?,
            database_url: get("DATABASE_URL"),
            user_agent: get("HARVESTER_USER_AGENT").unwrap_or(defaults.user_agent),
            request_timeout: Duration::from_secs(parse_or(
                get("HARVESTER_REQUEST_TIMEOUT_SECS"),
                "HARVESTER_REQUEST_TIMEOUT_SECS",
                "number of seconds",
                defaults.request_timeout.as_secs(),
            )?),
            max_pages: parse_or(
                get("HARVESTER_MAX_PAGES"),
                "HARVESTER_MAX_PAGES",
                "page count",
                defaults.max_pages,
            )?,
            enrich: parse_flag(get("HARVESTER_ENRICH"), defaults.enrich)?,
            enrich_concurrency: parse_or(
                get("HARVESTER_ENRICH_CONCURRENCY"),
                "HARVESTER_ENRICH_CONCURRENCY",
                "task count",
                defaults.enrich_concurrency,
            )?,
            github_token: get("GITHUB_TOKEN"),
            tor_control_addr: get("TOR_CONTROL_ADDR"),
            tor_control_password: get("TOR_CONTROL_PASSWORD"),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_enrichment(mut self, enabled: bool) -> Self {
        self.enrich = enabled;
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value,
        }),
    }
}

fn parse_flag(value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref() {
        None => Ok(default),
        Some("1" | "true" | "TRUE" | "True" | "yes") => Ok(true),
        Some("0" | "false" | "FALSE" | "False" | "no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            var: "HARVESTER_ENRICH",
            expected: "boolean",
            value: other.to_string(),
        }),
    }
}
