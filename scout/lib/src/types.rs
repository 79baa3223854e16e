//! Core data types for model discovery.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a candidate identifier came from.
///
/// The declaration order is the canonical order used when provenance sets are
/// serialized or displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Enumerated by the candidate generator from naming templates.
    Pattern,
    /// Extracted from the provider's model documentation.
    DocsScrape,
    /// Extracted from the provider's release notes.
    ChangelogScrape,
    /// Part of the built-in known-good seed list.
    KnownList,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Source::Pattern => "pattern",
            Source::DocsScrape => "docs",
            Source::ChangelogScrape => "changelog",
            Source::KnownList => "known",
        };
        f.write_str(label)
    }
}

/// An unverified identifier proposed by a single source.
///
/// Candidates are ephemeral: every discovery run recreates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// The proposed model identifier.
    pub identifier: String,
    /// Which source proposed it.
    pub source: Source,
    /// When the source proposed it.
    pub discovered_at: DateTime<Utc>,
}

impl Candidate {
    /// Creates a new candidate.
    ///
    /// ## Examples
    ///
    /// ```
    /// use scout_lib::{Candidate, Source};
    /// use chrono::Utc;
    ///
    /// let candidate = Candidate::new("claude-sonnet-4-20250514", Source::DocsScrape, Utc::now());
    /// assert_eq!(candidate.source, Source::DocsScrape);
    /// ```
    pub fn new(identifier: impl Into<String>, source: Source, discovered_at: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            source,
            discovered_at,
        }
    }
}

/// Why a probe produced no authoritative answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider kept rate limiting after every retry was spent.
    RateLimited,
    /// Any other transport failure. Never retried.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RateLimited => f.write_str("rate limited"),
            ErrorKind::Unknown => f.write_str("unknown"),
        }
    }
}

/// The outcome of probing one identifier against the live service.
///
/// A result with `error_kind == None` is authoritative: `verified` is a fact.
/// A result carrying an error kind says nothing about existence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The probed identifier.
    pub identifier: String,
    /// Whether the service confirmed the identifier exists.
    pub verified: bool,
    /// When the probe completed.
    pub checked_at: DateTime<Utc>,
    /// Round trip latency of the final attempt.
    pub latency: Duration,
    /// Present when the probe failed without an authoritative answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ValidationResult {
    /// The service confirmed the identifier exists.
    pub fn verified(identifier: impl Into<String>, checked_at: DateTime<Utc>, latency: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            verified: true,
            checked_at,
            latency,
            error_kind: None,
        }
    }

    /// The service answered that the identifier does not exist.
    pub fn not_found(identifier: impl Into<String>, checked_at: DateTime<Utc>, latency: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            verified: false,
            checked_at,
            latency,
            error_kind: None,
        }
    }

    /// The probe failed without an answer.
    pub fn failed(
        identifier: impl Into<String>,
        checked_at: DateTime<Utc>,
        latency: Duration,
        kind: ErrorKind,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            verified: false,
            checked_at,
            latency,
            error_kind: Some(kind),
        }
    }

    /// Returns `true` when the result is a confident answer (found or not found).
    pub fn is_authoritative(&self) -> bool {
        self.error_kind.is_none()
    }
}

/// A persisted record for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// The model identifier.
    pub identifier: String,
    /// Every source that independently proposed this identifier.
    pub sources: BTreeSet<Source>,
    /// Confirmed by a fresh, positive probe at the time of the last merge.
    pub verified: bool,
    /// Trust score in `[0, 1]`.
    pub confidence: f64,
    /// When any source first proposed this identifier.
    pub first_seen: DateTime<Utc>,
    /// Time of the latest positive probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,
    /// Time of the latest authoritative probe, positive or negative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    /// Creates an unverified entry with no sources.
    pub fn new(identifier: impl Into<String>, first_seen: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            sources: BTreeSet::new(),
            verified: false,
            confidence: 0.0,
            first_seen,
            last_verified: None,
            last_checked: None,
        }
    }

    /// Returns `true` when the latest authoritative probe was positive.
    pub fn last_probe_positive(&self) -> bool {
        matches!((self.last_verified, self.last_checked), (Some(v), Some(c)) if v == c)
    }
}

/// Identifier → entry mapping, persisted across runs.
///
/// Backed by a `BTreeMap` so iteration and serialization order are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    /// Entries keyed by identifier.
    pub entries: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry, keyed by its identifier.
    pub fn insert(&mut self, entry: RegistryEntry) {
        self.entries.insert(entry.identifier.clone(), entry);
    }

    /// Looks up an entry by identifier.
    pub fn get(&self, identifier: &str) -> Option<&RegistryEntry> {
        self.entries.get(identifier)
    }

    /// Returns `true` if the registry holds the identifier.
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    /// Iterates only verified entries.
    pub fn verified(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values().filter(|e| e.verified)
    }
}

impl FromIterator<RegistryEntry> for Registry {
    fn from_iter<I: IntoIterator<Item = RegistryEntry>>(iter: I) -> Self {
        let mut registry = Registry::new();
        for entry in iter {
            registry.insert(entry);
        }
        registry
    }
}

/// Stages of a discovery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// No run in progress.
    #[default]
    Idle,
    /// Enumerating pattern candidates.
    Generating,
    /// Fetching documentation and release notes.
    Harvesting,
    /// Probing candidates against the live service.
    Validating,
    /// Folding results into the registry.
    Merging,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStage::Idle => "idle",
            RunStage::Generating => "generating",
            RunStage::Harvesting => "harvesting",
            RunStage::Validating => "validating",
            RunStage::Merging => "merging",
        };
        f.write_str(label)
    }
}

/// Category of an absorbed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A page could not be fetched.
    SourceUnavailable,
    /// A fetched page could not be parsed.
    PageParse,
    /// A probe failed with a transport error.
    ProbeError,
    /// A probe stayed rate limited after every retry.
    RateLimited,
    /// The run deadline expired before the stage finished.
    DeadlineExpired,
    /// The run was cancelled before the stage finished.
    Cancelled,
    /// The merged registry could not be written.
    Persistence,
}

/// A failure that was recovered locally and recorded instead of propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stage that observed the failure.
    pub stage: RunStage,
    /// What the failure is about: a URL, an identifier or a file path.
    pub subject: String,
    /// Failure category.
    pub kind: DiagnosticKind,
    /// Human readable detail.
    pub message: String,
}

impl Diagnostic {
    /// Creates a diagnostic.
    pub fn new(
        stage: RunStage,
        kind: DiagnosticKind,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            subject: subject.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.subject, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn source_order_is_declaration_order() {
        let set: BTreeSet<Source> = [Source::KnownList, Source::Pattern, Source::DocsScrape]
            .into_iter()
            .collect();
        let ordered: Vec<Source> = set.into_iter().collect();
        assert_eq!(
            ordered,
            vec![Source::Pattern, Source::DocsScrape, Source::KnownList]
        );
    }

    #[test]
    fn source_serializes_snake_case() {
        let json = serde_json::to_string(&Source::ChangelogScrape).unwrap();
        assert_eq!(json, "\"changelog_scrape\"");
    }

    #[test]
    fn failed_results_are_not_authoritative() {
        let ok = ValidationResult::not_found("fam-a-1-20250101", at(1), Duration::ZERO);
        let err = ValidationResult::failed(
            "fam-a-1-20250101",
            at(1),
            Duration::ZERO,
            ErrorKind::Unknown,
        );
        assert!(ok.is_authoritative());
        assert!(!ok.verified);
        assert!(!err.is_authoritative());
    }

    #[test]
    fn last_probe_positive_tracks_latest_check() {
        let mut entry = RegistryEntry::new("fam-a-1-20250101", at(0));
        assert!(!entry.last_probe_positive());

        entry.last_verified = Some(at(1));
        entry.last_checked = Some(at(1));
        assert!(entry.last_probe_positive());

        entry.last_checked = Some(at(2));
        assert!(!entry.last_probe_positive());
    }

    #[test]
    fn registry_round_trips_through_json() {
        let mut entry = RegistryEntry::new("fam-a-1-20250101", at(0));
        entry.sources.insert(Source::Pattern);
        entry.confidence = 0.3;
        let registry: Registry = [entry].into_iter().collect();

        let json = serde_json::to_string(&registry).unwrap();
        let back: Registry = serde_json::from_str(&json).unwrap();
        assert_eq!(registry, back);
    }

    #[test]
    fn verified_filters_entries() {
        let mut a = RegistryEntry::new("fam-a-1-20250101", at(0));
        a.verified = true;
        let b = RegistryEntry::new("fam-a-2-20250101", at(0));
        let registry: Registry = [a, b].into_iter().collect();

        let verified: Vec<&str> = registry.verified().map(|e| e.identifier.as_str()).collect();
        assert_eq!(verified, vec!["fam-a-1-20250101"]);
    }
}
