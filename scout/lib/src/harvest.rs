//! Extraction of candidate identifiers from documentation and release notes.
//!
//! A [`Harvester`] owns a list of pages and a set of [`ExtractionRule`]s. It
//! fetches each page through a [`PageFetcher`], flattens HTML to text, runs
//! every rule over the text and keeps only matches that satisfy the
//! identifier grammar. Failures never escape: they become diagnostics, and a
//! harvester whose every page failed to fetch reports itself unavailable.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::{debug, info, warn};

use crate::error::{FetchError, PageError, ScoutError};
use crate::identifier::{self, ParsedIdentifier};
use crate::types::{Candidate, Diagnostic, DiagnosticKind, RunStage, Source};

/// Largest page body the harvester will parse.
pub const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;

static MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:[a-zA-Z][a-zA-Z0-9]*|!|/)").expect("markup pattern is valid"));

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\r\f\v]+").expect("whitespace pattern is valid"));

/// Fetches the body of a page.
///
/// Implemented by [`HttpPageFetcher`](crate::http::HttpPageFetcher) for real
/// traffic and by stubs in tests.
pub trait PageFetcher: Send + Sync {
    /// Returns the body of `url` as text, or fails within `timeout`.
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// A named pattern that pulls identifier-shaped substrings out of text.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    name: String,
    pattern: Regex,
    group: usize,
}

impl ExtractionRule {
    /// Compiles a rule. `group` selects the capture group holding the
    /// identifier (0 for the whole match).
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::InvalidRule`] if the pattern does not compile.
    ///
    /// ## Examples
    ///
    /// ```
    /// use scout_lib::ExtractionRule;
    ///
    /// let rule = ExtractionRule::new("quoted", r"`(fam-[a-z0-9.-]+)`", 1).unwrap();
    /// let found: Vec<&str> = rule.extract("use `fam-a-1-20250101` today").collect();
    /// assert_eq!(found, vec!["fam-a-1-20250101"]);
    /// ```
    pub fn new(name: impl Into<String>, pattern: &str, group: usize) -> Result<Self, ScoutError> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|source| ScoutError::InvalidRule {
            name: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            pattern,
            group,
        })
    }

    /// Rule name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Yields every substring captured by this rule.
    pub fn extract<'t>(&self, text: &'t str) -> impl Iterator<Item = &'t str> {
        let group = self.group;
        self.pattern
            .captures_iter(text)
            .filter_map(move |caps| caps.get(group).map(|m| m.as_str()))
    }
}

fn identifier_pattern(prefix: &str) -> String {
    format!(r"({}(?:-[a-z0-9.]+)*?-\d{{8}})\b", regex::escape(prefix))
}

/// Default rules for model documentation pages: any identifier-shaped token
/// starting with `prefix`.
///
/// ## Errors
///
/// Returns [`ScoutError::InvalidRule`] if `prefix` yields an invalid pattern.
pub fn docs_rules(prefix: &str) -> Result<Vec<ExtractionRule>, ScoutError> {
    Ok(vec![ExtractionRule::new(
        "docs-identifier",
        &format!(r"(?i)\b{}", identifier_pattern(prefix)),
        1,
    )?])
}

/// Default rules for release notes: identifiers near an announcement verb,
/// and identifiers in markdown headings.
///
/// ## Errors
///
/// Returns [`ScoutError::InvalidRule`] if `prefix` yields an invalid pattern.
pub fn changelog_rules(prefix: &str) -> Result<Vec<ExtractionRule>, ScoutError> {
    let id = identifier_pattern(prefix);
    Ok(vec![
        ExtractionRule::new(
            "changelog-announcement",
            &format!(
                r"(?i)\b(?:release[ds]?|releasing|announc(?:e|ed|es|ing)|available|launch(?:ed|es|ing)?|introduc(?:e|ed|es|ing))\b[^\n]{{0,160}}?\b{id}"
            ),
            1,
        )?,
        ExtractionRule::new(
            "changelog-heading",
            &format!(r"(?im)^\s*#{{1,6}}[^\n]*?\b{id}"),
            1,
        )?,
    ])
}

/// Flattens a fetched page into plain text.
///
/// HTML is parsed with `scraper` and reduced to its text nodes; anything
/// else is treated as plain text or markdown.
///
/// ## Errors
///
/// - [`PageError::TooLarge`] when the body exceeds [`MAX_PAGE_BYTES`]
/// - [`PageError::Empty`] for blank bodies
/// - [`PageError::Binary`] when the body contains NUL bytes
pub fn page_text(body: &str) -> Result<String, PageError> {
    if body.len() > MAX_PAGE_BYTES {
        return Err(PageError::TooLarge(body.len()));
    }
    if body.trim().is_empty() {
        return Err(PageError::Empty);
    }
    if body.contains('\0') {
        return Err(PageError::Binary);
    }

    if !MARKUP.is_match(body) {
        return Ok(body.to_string());
    }

    let document = Html::parse_document(body);
    let mut text = String::with_capacity(body.len() / 2);
    for fragment in document.root_element().text() {
        text.push_str(fragment);
        text.push(' ');
    }
    let text = WHITESPACE.replace_all(&text, " ").into_owned();
    if text.trim().is_empty() {
        return Err(PageError::Empty);
    }
    Ok(text)
}

/// What a single harvester produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestOutcome {
    /// At least one page was fetched.
    Harvested {
        /// Harvester source tag.
        source: Source,
        /// Grammar-valid candidates, deduplicated, in identifier order.
        candidates: Vec<Candidate>,
        /// Failures on individual pages.
        diagnostics: Vec<Diagnostic>,
    },
    /// No page could be fetched.
    Unavailable {
        /// Harvester source tag.
        source: Source,
        /// Why each page failed.
        diagnostics: Vec<Diagnostic>,
    },
}

impl HarvestOutcome {
    /// Source tag of the harvester that produced this outcome.
    pub fn source(&self) -> Source {
        match self {
            HarvestOutcome::Harvested { source, .. } | HarvestOutcome::Unavailable { source, .. } => {
                *source
            }
        }
    }

    /// Candidates found, empty when unavailable.
    pub fn candidates(&self) -> &[Candidate] {
        match self {
            HarvestOutcome::Harvested { candidates, .. } => candidates,
            HarvestOutcome::Unavailable { .. } => &[],
        }
    }

    /// Diagnostics recorded while harvesting.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            HarvestOutcome::Harvested { diagnostics, .. }
            | HarvestOutcome::Unavailable { diagnostics, .. } => diagnostics,
        }
    }

    /// Returns `true` when no page could be fetched.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, HarvestOutcome::Unavailable { .. })
    }
}

/// Scrapes a fixed list of pages for candidate identifiers.
#[derive(Debug, Clone)]
pub struct Harvester {
    source: Source,
    urls: Vec<String>,
    rules: Vec<ExtractionRule>,
    fetch_timeout: Duration,
}

impl Harvester {
    /// Creates a harvester with custom rules.
    pub fn new(
        source: Source,
        urls: Vec<String>,
        rules: Vec<ExtractionRule>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            urls,
            rules,
            fetch_timeout,
        }
    }

    /// A documentation harvester with the default rules.
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::InvalidRule`] if `prefix` yields an invalid pattern.
    pub fn docs(urls: Vec<String>, prefix: &str, fetch_timeout: Duration) -> Result<Self, ScoutError> {
        Ok(Self::new(Source::DocsScrape, urls, docs_rules(prefix)?, fetch_timeout))
    }

    /// A release-notes harvester with the default rules.
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::InvalidRule`] if `prefix` yields an invalid pattern.
    pub fn changelog(
        urls: Vec<String>,
        prefix: &str,
        fetch_timeout: Duration,
    ) -> Result<Self, ScoutError> {
        Ok(Self::new(
            Source::ChangelogScrape,
            urls,
            changelog_rules(prefix)?,
            fetch_timeout,
        ))
    }

    /// Source tag attached to every candidate this harvester emits.
    pub fn source(&self) -> Source {
        self.source
    }

    /// Pages this harvester reads.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Fetches every page and extracts candidates.
    ///
    /// Never fails. Page-level problems are recorded as diagnostics; if no
    /// page could be fetched at all, the outcome is
    /// [`HarvestOutcome::Unavailable`].
    #[tracing::instrument(skip(self, fetcher), fields(source = %self.source))]
    pub async fn harvest<F: PageFetcher>(
        &self,
        fetcher: &F,
        discovered_at: DateTime<Utc>,
    ) -> HarvestOutcome {
        let mut found: BTreeMap<String, Candidate> = BTreeMap::new();
        let mut diagnostics = Vec::new();
        let mut fetched_any = false;

        for url in &self.urls {
            let body = match fetcher.fetch(url, self.fetch_timeout).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %url, error = %e, "page fetch failed");
                    diagnostics.push(Diagnostic::new(
                        RunStage::Harvesting,
                        DiagnosticKind::SourceUnavailable,
                        url,
                        e.to_string(),
                    ));
                    continue;
                }
            };
            fetched_any = true;

            let text = match page_text(&body) {
                Ok(text) => text,
                Err(e) => {
                    warn!(url = %url, error = %e, "page could not be parsed");
                    diagnostics.push(Diagnostic::new(
                        RunStage::Harvesting,
                        DiagnosticKind::PageParse,
                        url,
                        e.to_string(),
                    ));
                    continue;
                }
            };

            for rule in &self.rules {
                for raw in rule.extract(&text) {
                    let candidate = identifier::normalize(raw);
                    match ParsedIdentifier::parse(&candidate) {
                        Ok(_) => {
                            found.entry(candidate.clone()).or_insert_with(|| {
                                Candidate::new(candidate, self.source, discovered_at)
                            });
                        }
                        Err(reason) => {
                            debug!(rule = rule.name(), raw, %reason, "discarded match");
                        }
                    }
                }
            }
        }

        if !fetched_any {
            return HarvestOutcome::Unavailable {
                source: self.source,
                diagnostics,
            };
        }

        info!(candidates = found.len(), "harvest complete");
        HarvestOutcome::Harvested {
            source: self.source,
            candidates: found.into_values().collect(),
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct StubFetcher {
        pages: HashMap<String, Result<String, FetchError>>,
    }

    impl StubFetcher {
        fn new(pages: &[(&str, Result<&str, FetchError>)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.clone().map(str::to_string)))
                    .collect(),
            }
        }
    }

    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
            self.pages
                .get(url)
                .cloned()
                .unwrap_or(Err(FetchError::Http { status: 404 }))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn ids(outcome: &HarvestOutcome) -> Vec<&str> {
        outcome
            .candidates()
            .iter()
            .map(|c| c.identifier.as_str())
            .collect()
    }

    #[test]
    fn page_text_flattens_html() {
        let text = page_text("<html><body><h1>Models</h1><p>fam-a-1-20250101</p></body></html>")
            .unwrap();
        assert!(text.contains("Models"));
        assert!(text.contains("fam-a-1-20250101"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn page_text_keeps_markdown() {
        let text = page_text("# Release notes\n\nfam-a-1-20250101 is out").unwrap();
        assert!(text.starts_with("# Release notes"));
    }

    #[test]
    fn page_text_rejects_empty_and_binary() {
        assert_eq!(page_text("  \n"), Err(PageError::Empty));
        assert_eq!(page_text("abc\0def"), Err(PageError::Binary));
    }

    #[test]
    fn docs_rule_finds_identifiers_in_prose() {
        let rules = docs_rules("claude").unwrap();
        let text = "Use claude-sonnet-4-20250514 or Claude-Opus-4-1-20250805. Not claude-latest.";
        let found: Vec<&str> = rules[0].extract(text).collect();
        assert_eq!(found, vec!["claude-sonnet-4-20250514", "Claude-Opus-4-1-20250805"]);
    }

    #[test]
    fn changelog_rules_need_an_announcement_or_heading() {
        let rules = changelog_rules("fam").unwrap();
        let text = "## fam-b-3-20250301\nWe released fam-a-2-20250601 today.\nfam-c-1-20250101 mentioned.";
        let mut found: Vec<&str> = rules.iter().flat_map(|r| r.extract(text)).collect();
        found.sort();
        assert_eq!(found, vec!["fam-a-2-20250601", "fam-b-3-20250301"]);
    }

    #[test]
    fn invalid_rule_is_reported() {
        let err = ExtractionRule::new("broken", "(unclosed", 1).unwrap_err();
        assert!(matches!(err, ScoutError::InvalidRule { ref name, .. } if name == "broken"));
    }

    #[tokio::test]
    async fn harvest_dedupes_and_drops_malformed_matches() {
        let fetcher = StubFetcher::new(&[(
            "https://docs.test/models",
            Ok("<p>fam-a-2-20250601, fam-a-2-20250601 and fam-a-3-20251399</p>"),
        )]);
        let harvester = Harvester::docs(
            vec!["https://docs.test/models".into()],
            "fam",
            Duration::from_secs(1),
        )
        .unwrap();

        let outcome = harvester.harvest(&fetcher, now()).await;
        assert_eq!(ids(&outcome), vec!["fam-a-2-20250601"]);
        assert_eq!(outcome.candidates()[0].source, Source::DocsScrape);
        assert!(outcome.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn all_pages_failing_is_unavailable() {
        let fetcher = StubFetcher::new(&[(
            "https://docs.test/a",
            Err(FetchError::Timeout(Duration::from_secs(1))),
        )]);
        let harvester = Harvester::docs(
            vec!["https://docs.test/a".into(), "https://docs.test/b".into()],
            "fam",
            Duration::from_secs(1),
        )
        .unwrap();

        let outcome = harvester.harvest(&fetcher, now()).await;
        assert!(outcome.is_unavailable());
        assert_eq!(outcome.diagnostics().len(), 2);
        assert!(
            outcome
                .diagnostics()
                .iter()
                .all(|d| d.kind == DiagnosticKind::SourceUnavailable)
        );
    }

    #[tokio::test]
    async fn one_good_page_keeps_harvester_available() {
        let fetcher = StubFetcher::new(&[
            ("https://docs.test/a", Err(FetchError::Http { status: 500 })),
            ("https://docs.test/b", Ok("see fam-a-1-20250101")),
        ]);
        let harvester = Harvester::docs(
            vec!["https://docs.test/a".into(), "https://docs.test/b".into()],
            "fam",
            Duration::from_secs(1),
        )
        .unwrap();

        let outcome = harvester.harvest(&fetcher, now()).await;
        assert!(!outcome.is_unavailable());
        assert_eq!(ids(&outcome), vec!["fam-a-1-20250101"]);
        assert_eq!(outcome.diagnostics().len(), 1);
    }

    #[tokio::test]
    async fn unparseable_page_is_a_diagnostic_not_unavailability() {
        let fetcher = StubFetcher::new(&[("https://docs.test/a", Ok("   "))]);
        let harvester =
            Harvester::changelog(vec!["https://docs.test/a".into()], "fam", Duration::from_secs(1))
                .unwrap();

        let outcome = harvester.harvest(&fetcher, now()).await;
        assert!(!outcome.is_unavailable());
        assert!(outcome.candidates().is_empty());
        assert_eq!(outcome.diagnostics()[0].kind, DiagnosticKind::PageParse);
    }
}
