//! Engine configuration.
//!
//! Every setting has a documented default and most can be overridden from the
//! environment. Invalid overrides are reported as [`ScoutError::Config`]
//! rather than silently ignored.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::advisor::AdvisorPolicy;
use crate::error::ScoutError;
use crate::generator::GeneratorBounds;
use crate::store::JsonRegistryStore;
use crate::validator::ValidatorSettings;

/// Provider models overview page.
pub const DEFAULT_DOCS_URL: &str = "https://docs.anthropic.com/en/docs/about-claude/models/overview";
/// Provider API release notes page.
pub const DEFAULT_CHANGELOG_URL: &str = "https://docs.anthropic.com/en/release-notes/api";
/// Provider API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";
/// Prefix every harvested identifier must start with.
pub const DEFAULT_IDENTIFIER_PREFIX: &str = "claude";

/// Settings for a [`Scout`](crate::Scout) engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutConfig {
    /// Where the registry is persisted.
    pub registry_path: PathBuf,
    /// How long a positive probe keeps an entry verified.
    pub freshness_hours: u64,
    /// Wall-clock budget for a whole discovery run.
    pub deadline_secs: u64,
    /// Timeout for fetching one page.
    pub fetch_timeout_secs: u64,
    /// Probe concurrency, rate limit and backoff.
    pub validator: ValidatorSettings,
    /// Pattern generator bounds.
    pub generator: GeneratorBounds,
    /// Model documentation pages.
    pub docs_urls: Vec<String>,
    /// Release notes pages.
    pub changelog_urls: Vec<String>,
    /// Prefix harvested identifiers must start with.
    pub identifier_prefix: String,
    /// Provider API base URL, used by the HTTP probe.
    pub api_base_url: String,
    /// Identifier the host currently runs, if known.
    pub current_identifier: Option<String>,
    /// Which entries the advisor may recommend.
    pub advisor: AdvisorPolicy,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            registry_path: JsonRegistryStore::default_path(),
            freshness_hours: 24,
            deadline_secs: 300,
            fetch_timeout_secs: 10,
            validator: ValidatorSettings::default(),
            generator: GeneratorBounds::default(),
            docs_urls: vec![DEFAULT_DOCS_URL.to_string()],
            changelog_urls: vec![DEFAULT_CHANGELOG_URL.to_string()],
            identifier_prefix: DEFAULT_IDENTIFIER_PREFIX.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            current_identifier: None,
            advisor: AdvisorPolicy::default(),
        }
    }
}

impl ScoutConfig {
    /// Defaults overridden by process environment variables.
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::Config`] when a variable is set but unusable.
    pub fn from_env() -> Result<Self, ScoutError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    ///
    /// | variable                   | setting                        |
    /// |----------------------------|--------------------------------|
    /// | `SCOUT_REGISTRY_PATH`      | registry file                  |
    /// | `SCOUT_FRESHNESS_HOURS`    | freshness window               |
    /// | `SCOUT_CONCURRENCY`        | probes in flight               |
    /// | `SCOUT_RATE_PER_MINUTE`    | sustained probe rate           |
    /// | `SCOUT_RATE_BURST`         | probe burst                    |
    /// | `SCOUT_PROBE_TIMEOUT_SECS` | per-probe timeout              |
    /// | `SCOUT_FETCH_TIMEOUT_SECS` | per-page timeout               |
    /// | `SCOUT_DEADLINE_SECS`      | run deadline                   |
    /// | `SCOUT_MAX_RETRIES`        | retries while rate limited     |
    /// | `SCOUT_MAX_CANDIDATES`     | generator limit                |
    /// | `SCOUT_DOCS_URLS`          | comma separated docs pages     |
    /// | `SCOUT_CHANGELOG_URLS`     | comma separated notes pages    |
    /// | `SCOUT_IDENTIFIER_PREFIX`  | harvested identifier prefix    |
    /// | `SCOUT_API_BASE_URL`       | provider API base URL          |
    /// | `ANTHROPIC_MODEL`          | current identifier             |
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::Config`] when a value does not parse or is zero
    /// where zero makes no sense.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScoutError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(path) = get("SCOUT_REGISTRY_PATH") {
            config.registry_path = PathBuf::from(path);
        }
        if let Some(v) = get("SCOUT_FRESHNESS_HOURS") {
            config.freshness_hours = positive("SCOUT_FRESHNESS_HOURS", &v)?;
        }
        if let Some(v) = get("SCOUT_CONCURRENCY") {
            config.validator.concurrency = positive("SCOUT_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("SCOUT_RATE_PER_MINUTE") {
            config.validator.rate_per_minute = positive("SCOUT_RATE_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("SCOUT_RATE_BURST") {
            config.validator.burst = positive("SCOUT_RATE_BURST", &v)?;
        }
        if let Some(v) = get("SCOUT_PROBE_TIMEOUT_SECS") {
            config.validator.probe_timeout =
                Duration::from_secs(positive("SCOUT_PROBE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("SCOUT_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout_secs = positive("SCOUT_FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("SCOUT_DEADLINE_SECS") {
            config.deadline_secs = positive("SCOUT_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = get("SCOUT_MAX_RETRIES") {
            config.validator.retry.max_retries = parse("SCOUT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("SCOUT_MAX_CANDIDATES") {
            config.generator.max_candidates = positive("SCOUT_MAX_CANDIDATES", &v)?;
        }
        if let Some(v) = get("SCOUT_DOCS_URLS") {
            config.docs_urls = url_list(&v);
        }
        if let Some(v) = get("SCOUT_CHANGELOG_URLS") {
            config.changelog_urls = url_list(&v);
        }
        if let Some(v) = get("SCOUT_IDENTIFIER_PREFIX") {
            config.identifier_prefix = v.to_ascii_lowercase();
        }
        if let Some(v) = get("SCOUT_API_BASE_URL") {
            config.api_base_url = v.trim_end_matches('/').to_string();
        }
        config.current_identifier = get("ANTHROPIC_MODEL");

        Ok(config)
    }

    /// Freshness window as a signed duration for timestamp arithmetic.
    pub fn freshness(&self) -> TimeDelta {
        i64::try_from(self.freshness_hours)
            .ok()
            .and_then(TimeDelta::try_hours)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Run deadline.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Per-page fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ScoutError> {
    value
        .parse()
        .map_err(|_| ScoutError::Config(format!("{name}: '{value}' is not a valid number")))
}

fn positive<T>(name: &str, value: &str) -> Result<T, ScoutError>
where
    T: FromStr + PartialEq + Default,
{
    let parsed: T = parse(name, value)?;
    if parsed == T::default() {
        return Err(ScoutError::Config(format!("{name} must be greater than zero")));
    }
    Ok(parsed)
}

fn url_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ScoutConfig::default();
        assert_eq!(config.freshness(), TimeDelta::hours(24));
        assert_eq!(config.deadline(), Duration::from_secs(300));
        assert_eq!(config.validator.concurrency, 5);
        assert_eq!(config.validator.rate_per_minute, 50);
        assert_eq!(config.validator.retry.max_retries, 3);
        assert_eq!(config.generator.max_candidates, 10_000);
        assert_eq!(config.identifier_prefix, "claude");
        assert!(config.registry_path.ends_with("scout/registry.json"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = ScoutConfig::from_lookup(lookup(&[
            ("SCOUT_REGISTRY_PATH", "/tmp/reg.json"),
            ("SCOUT_CONCURRENCY", "8"),
            ("SCOUT_DOCS_URLS", "https://a.test/x, https://b.test/y,"),
            ("SCOUT_API_BASE_URL", "http://localhost:9999/"),
            ("SCOUT_MAX_RETRIES", "0"),
            ("ANTHROPIC_MODEL", "claude-sonnet-4-20250514"),
        ]))
        .unwrap();

        assert_eq!(config.registry_path, PathBuf::from("/tmp/reg.json"));
        assert_eq!(config.validator.concurrency, 8);
        assert_eq!(config.docs_urls, vec!["https://a.test/x", "https://b.test/y"]);
        assert_eq!(config.api_base_url, "http://localhost:9999");
        assert_eq!(config.validator.retry.max_retries, 0);
        assert_eq!(
            config.current_identifier.as_deref(),
            Some("claude-sonnet-4-20250514")
        );
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = ScoutConfig::from_lookup(lookup(&[("SCOUT_CONCURRENCY", "  ")])).unwrap();
        assert_eq!(config.validator.concurrency, 5);
    }

    #[test]
    fn garbage_is_a_config_error() {
        let err = ScoutConfig::from_lookup(lookup(&[("SCOUT_RATE_PER_MINUTE", "fast")]))
            .unwrap_err();
        assert!(matches!(err, ScoutError::Config(ref msg) if msg.contains("SCOUT_RATE_PER_MINUTE")));
    }

    #[test]
    fn zero_is_rejected_where_meaningless() {
        let err = ScoutConfig::from_lookup(lookup(&[("SCOUT_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, ScoutError::Config(_)));
    }
}
