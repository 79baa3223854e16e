//! Built-in known-good identifiers.
//!
//! The seed registry is what the engine starts from when no usable persisted
//! registry exists. Seed entries carry [`Source::KnownList`] provenance but are
//! not verified until a probe confirms them.

use chrono::{DateTime, Utc};

use crate::merge::confidence;
use crate::types::{Registry, RegistryEntry, Source};

/// Identifiers the provider has published, oldest first.
pub const KNOWN_IDENTIFIERS: &[&str] = &[
    "claude-3-haiku-20240307",
    "claude-3-sonnet-20240229",
    "claude-3-opus-20240229",
    "claude-3-5-sonnet-20240620",
    "claude-3-5-sonnet-20241022",
    "claude-sonnet-4-20250514",
];

/// Builds the seed registry, stamping every entry with `now` as first seen.
///
/// ## Examples
///
/// ```
/// use chrono::Utc;
/// use scout_lib::seed_registry;
///
/// let registry = seed_registry(Utc::now());
/// assert!(registry.contains("claude-sonnet-4-20250514"));
/// assert!(registry.verified().next().is_none());
/// ```
pub fn seed_registry(now: DateTime<Utc>) -> Registry {
    KNOWN_IDENTIFIERS
        .iter()
        .map(|identifier| {
            let mut entry = RegistryEntry::new(*identifier, now);
            entry.sources.insert(Source::KnownList);
            entry.confidence = confidence(&entry.sources, false);
            entry
        })
        .collect()
}
