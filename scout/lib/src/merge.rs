//! Folding candidates and validation results into the registry.
//!
//! [`merge`] is a pure function of its inputs: no I/O, no clock reads. Given
//! the same existing registry, candidates, results and `now`, it always
//! produces the same registry, regardless of the order of candidates or
//! results, and regardless of how the results are split across calls.
//!
//! Rules:
//!
//! - Error results never change an entry. They carry no information about
//!   existence.
//! - Sources only grow. An entry's provenance is the union of every source
//!   that ever proposed it.
//! - The latest authoritative result decides `last_checked`. Ties on
//!   `checked_at` are broken in favor of the positive answer. The latest
//!   positive result decides `last_verified`, even when a later negative
//!   answer supersedes it.
//! - Every candidate and every authoritative result yields an entry. A probe
//!   answer is evidence on its own, even when no candidate accompanies it.
//!   `first_seen` is the earliest sighting by either.
//! - `verified` and `confidence` are recomputed at `now` only for entries the
//!   merge actually changed. Untouched entries keep their stored values, so
//!   `merge(existing, [], [])` is `existing`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::{Candidate, Registry, RegistryEntry, Source, ValidationResult};

/// Confidence contributed by the first source, in tenths.
const FIRST_SOURCE_TENTHS: u32 = 3;
/// Confidence contributed by each additional source, in tenths.
const EXTRA_SOURCE_TENTHS: u32 = 3;
/// Confidence contributed by a fresh positive probe, in tenths.
const VERIFIED_TENTHS: u32 = 4;

/// Trust score for an entry.
///
/// Corroboration by more independent sources raises the score; a fresh
/// positive probe raises it further. The result is clamped to `[0, 1]` and
/// computed in tenths so equal inputs always compare equal.
///
/// ## Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use scout_lib::{confidence, Source};
///
/// let one: BTreeSet<Source> = [Source::Pattern].into_iter().collect();
/// let two: BTreeSet<Source> = [Source::Pattern, Source::DocsScrape].into_iter().collect();
///
/// assert_eq!(confidence(&one, false), 0.3);
/// assert_eq!(confidence(&two, false), 0.6);
/// assert_eq!(confidence(&two, true), 1.0);
/// ```
pub fn confidence(sources: &BTreeSet<Source>, fresh_verified: bool) -> f64 {
    let mut tenths = match sources.len() as u32 {
        0 => 0,
        n => FIRST_SOURCE_TENTHS + EXTRA_SOURCE_TENTHS * (n - 1),
    };
    if fresh_verified {
        tenths += VERIFIED_TENTHS;
    }
    f64::from(tenths.min(10)) / 10.0
}

/// Orders authoritative results: later first, then positive over negative.
fn result_key(result: &ValidationResult) -> (DateTime<Utc>, bool) {
    (result.checked_at, result.verified)
}

/// Folds `candidates` and `results` into a copy of `existing`.
///
/// `freshness` is how long a positive probe keeps an entry verified; `now`
/// is the clock reading the caller takes once per run.
#[tracing::instrument(
    skip_all,
    fields(existing = existing.len(), candidates = candidates.len(), results = results.len())
)]
pub fn merge(
    existing: &Registry,
    candidates: &[Candidate],
    results: &[ValidationResult],
    now: DateTime<Utc>,
    freshness: TimeDelta,
) -> Registry {
    // Provenance per identifier.
    let mut provenance: BTreeMap<&str, BTreeSet<Source>> = BTreeMap::new();
    for candidate in candidates {
        provenance
            .entry(candidate.identifier.as_str())
            .or_default()
            .insert(candidate.source);
    }

    // Latest authoritative result per identifier.
    let authoritative = || results.iter().filter(|r| r.is_authoritative());
    let mut latest: BTreeMap<&str, &ValidationResult> = BTreeMap::new();
    for result in authoritative() {
        latest
            .entry(result.identifier.as_str())
            .and_modify(|current| {
                if result_key(result) > result_key(current) {
                    *current = result;
                }
            })
            .or_insert(result);
    }

    // Latest positive answer per identifier, which may predate `latest`.
    let mut latest_positive: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
    for result in authoritative().filter(|r| r.verified) {
        latest_positive
            .entry(result.identifier.as_str())
            .and_modify(|at| *at = (*at).max(result.checked_at))
            .or_insert(result.checked_at);
    }

    // Earliest sighting, by a source or by an answering probe.
    let mut sighted: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
    let sightings = candidates
        .iter()
        .map(|c| (c.identifier.as_str(), c.discovered_at))
        .chain(authoritative().map(|r| (r.identifier.as_str(), r.checked_at)));
    for (identifier, at) in sightings {
        sighted
            .entry(identifier)
            .and_modify(|first| *first = (*first).min(at))
            .or_insert(at);
    }

    let mut merged = existing.clone();
    let mut touched: BTreeSet<String> = BTreeSet::new();

    for (identifier, first_seen) in &sighted {
        let sources = provenance.get(identifier);
        match merged.entries.get_mut(*identifier) {
            Some(entry) => {
                let before = entry.sources.len();
                if let Some(sources) = sources {
                    entry.sources.extend(sources.iter().copied());
                }
                if *first_seen < entry.first_seen {
                    entry.first_seen = *first_seen;
                    touched.insert(identifier.to_string());
                }
                if entry.sources.len() != before {
                    touched.insert(identifier.to_string());
                }
            }
            None => {
                let mut entry = RegistryEntry::new(*identifier, *first_seen);
                entry.sources = sources.cloned().unwrap_or_default();
                merged.insert(entry);
                touched.insert(identifier.to_string());
            }
        }
    }

    for (identifier, result) in &latest {
        let Some(entry) = merged.entries.get_mut(*identifier) else {
            continue;
        };
        let stored = entry
            .last_checked
            .map(|checked| (checked, entry.last_probe_positive()));
        let mut changed = false;

        if stored.is_none_or(|stored| result_key(result) > stored) {
            entry.last_checked = Some(result.checked_at);
            changed = true;
        }
        if let Some(&positive) = latest_positive.get(identifier) {
            if entry.last_verified.is_none_or(|at| positive > at) {
                entry.last_verified = Some(positive);
                changed = true;
            }
        }

        if changed {
            touched.insert(identifier.to_string());
        }
    }

    for identifier in &touched {
        if let Some(entry) = merged.entries.get_mut(identifier) {
            entry.verified = entry.last_probe_positive()
                && entry
                    .last_verified
                    .is_some_and(|at| now.signed_duration_since(at) <= freshness);
            entry.confidence = confidence(&entry.sources, entry.verified);
        }
    }

    tracing::debug!(
        entries = merged.len(),
        touched = touched.len(),
        "merge complete"
    );
    merged
}

/// Rules for dropping entries from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessPolicy {
    /// Age past which an unverified entry is considered stale.
    pub max_age: TimeDelta,
    /// Never drop entries that came from the built-in seed list.
    pub keep_known: bool,
}

impl StalenessPolicy {
    /// Prunes unverified entries older than `max_age`, keeping seed entries.
    pub fn older_than(max_age: TimeDelta) -> Self {
        Self {
            max_age,
            keep_known: true,
        }
    }
}

/// Removes stale, unverified entries.
///
/// An entry is dropped only when all of these hold: it is not verified, its
/// last positive probe (if any) is older than `max_age`, and it was first seen
/// more than `max_age` ago. Seed entries survive when the policy keeps them.
///
/// Returns the pruned registry and the identifiers that were dropped.
pub fn prune(
    registry: &Registry,
    policy: &StalenessPolicy,
    now: DateTime<Utc>,
) -> (Registry, Vec<String>) {
    let is_old = |at: DateTime<Utc>| now.signed_duration_since(at) > policy.max_age;
    let mut kept = Registry::new();
    let mut dropped = Vec::new();

    for entry in registry.iter() {
        let stale = !entry.verified
            && entry.last_verified.is_none_or(is_old)
            && is_old(entry.first_seen)
            && !(policy.keep_known && entry.sources.contains(&Source::KnownList));

        if stale {
            dropped.push(entry.identifier.clone());
        } else {
            kept.insert(entry.clone());
        }
    }

    (kept, dropped)
}
