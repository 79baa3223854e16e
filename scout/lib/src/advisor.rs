//! Upgrade recommendations from the registry.

use std::cmp::Ordering;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::identifier::ParsedIdentifier;
use crate::types::{Registry, RegistryEntry};

/// Which entries may be recommended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorPolicy {
    /// Only recommend identifiers in the current identifier's family.
    pub same_family_only: bool,
}

impl Default for AdvisorPolicy {
    fn default() -> Self {
        Self {
            same_family_only: true,
        }
    }
}

/// Advice for a host that currently uses `current`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// The identifier the host uses today.
    pub current: String,
    /// A verified, strictly newer identifier, if one exists.
    pub recommended: Option<String>,
    /// Why this recommendation was (or was not) made.
    pub reason: String,
    /// The recommended entry's last confirmation is older than the
    /// freshness window. Entries only lose `verified` when a later run
    /// checks them again.
    #[serde(default)]
    pub stale: bool,
}

impl Recommendation {
    /// Returns `true` when an upgrade is available.
    pub fn has_upgrade(&self) -> bool {
        self.recommended.is_some()
    }
}

/// Recommends an upgrade for `current` using the default policy.
///
/// ## Examples
///
/// ```
/// use chrono::Utc;
/// use scout_lib::{advise, Registry, RegistryEntry};
///
/// let mut entry = RegistryEntry::new("fam-a-2-20250601", Utc::now());
/// entry.verified = true;
/// let registry: Registry = [entry].into_iter().collect();
///
/// let advice = advise(&registry, "fam-a-1-20250101");
/// assert_eq!(advice.recommended.as_deref(), Some("fam-a-2-20250601"));
/// ```
pub fn advise(registry: &Registry, current: &str) -> Recommendation {
    advise_with(registry, current, AdvisorPolicy::default())
}

/// Recommends the newest verified identifier that is strictly newer than
/// `current`.
///
/// Newer means a greater version, or the same version with a later release
/// date. Among equally new entries, higher confidence wins, then the more
/// recent verification, then identifier order. Unverified entries are never
/// recommended. When `current` does not parse, no baseline exists and
/// nothing is recommended.
#[tracing::instrument(skip(registry))]
pub fn advise_with(registry: &Registry, current: &str, policy: AdvisorPolicy) -> Recommendation {
    let Ok(baseline) = ParsedIdentifier::parse(current) else {
        return Recommendation {
            current: current.to_string(),
            recommended: None,
            reason: format!("'{current}' is not a recognized model identifier"),
            stale: false,
        };
    };

    let best = registry
        .verified()
        .filter(|entry| entry.identifier != current)
        .filter_map(|entry| {
            ParsedIdentifier::parse(&entry.identifier)
                .ok()
                .map(|parsed| (entry, parsed))
        })
        .filter(|(_, parsed)| !policy.same_family_only || parsed.family == baseline.family)
        .filter(|(_, parsed)| parsed.recency_cmp(&baseline) == Ordering::Greater)
        .max_by(|a, b| rank(a, b));

    match best {
        Some((entry, parsed)) => Recommendation {
            current: current.to_string(),
            recommended: Some(entry.identifier.clone()),
            reason: format!(
                "{} is verified and newer (version {}, released {}, confidence {:.2})",
                entry.identifier,
                parsed.version_label(),
                parsed.date,
                entry.confidence
            ),
            stale: false,
        },
        None => Recommendation {
            current: current.to_string(),
            recommended: None,
            reason: if policy.same_family_only {
                format!(
                    "no verified {} identifier is newer than {current}",
                    baseline.family
                )
            } else {
                format!("no verified identifier is newer than {current}")
            },
            stale: false,
        },
    }
}

/// Like [`advise_with`], but marks the recommendation stale when the chosen
/// entry was last confirmed more than `freshness` before `now`.
pub fn advise_as_of(
    registry: &Registry,
    current: &str,
    policy: AdvisorPolicy,
    now: DateTime<Utc>,
    freshness: TimeDelta,
) -> Recommendation {
    let mut advice = advise_with(registry, current, policy);
    let confirmed = advice
        .recommended
        .as_deref()
        .and_then(|id| registry.get(id))
        .and_then(|entry| entry.last_verified);
    if let Some(at) = confirmed {
        if now.signed_duration_since(at) > freshness {
            advice.stale = true;
            advice.reason.push_str(&format!(
                "; verification is stale (last confirmed {}), run discovery to recheck",
                at.format("%Y-%m-%d %H:%M UTC")
            ));
        }
    }
    advice
}

fn rank(
    (a, pa): &(&RegistryEntry, ParsedIdentifier),
    (b, pb): &(&RegistryEntry, ParsedIdentifier),
) -> Ordering {
    pa.recency_cmp(pb)
        .then_with(|| a.confidence.total_cmp(&b.confidence))
        .then_with(|| a.last_verified.cmp(&b.last_verified))
        // Lower identifier wins the final tie, so reverse for max_by.
        .then_with(|| b.identifier.cmp(&a.identifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Source;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn entry(id: &str, verified: bool, confidence: f64) -> RegistryEntry {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut entry = RegistryEntry::new(id, at);
        entry.sources.insert(Source::Pattern);
        entry.verified = verified;
        entry.confidence = confidence;
        if verified {
            entry.last_verified = Some(at);
            entry.last_checked = Some(at);
        }
        entry
    }

    #[test]
    fn recommends_newest_verified_in_family() {
        let registry: Registry = [
            entry("fam-a-1-20250101", true, 0.7),
            entry("fam-a-2-20250601", true, 1.0),
            entry("fam-a-3-20250901", false, 0.6),
            entry("fam-b-9-20250901", true, 1.0),
        ]
        .into_iter()
        .collect();

        let advice = advise(&registry, "fam-a-1-20250101");
        assert_eq!(advice.recommended.as_deref(), Some("fam-a-2-20250601"));
        assert!(advice.reason.contains("version 2"));
    }

    #[test]
    fn cross_family_allowed_when_policy_permits() {
        let registry: Registry = [
            entry("fam-a-1-20250101", true, 0.7),
            entry("fam-b-9-20250901", true, 1.0),
        ]
        .into_iter()
        .collect();

        let policy = AdvisorPolicy {
            same_family_only: false,
        };
        let advice = advise_with(&registry, "fam-a-1-20250101", policy);
        assert_eq!(advice.recommended.as_deref(), Some("fam-b-9-20250901"));
    }

    #[test]
    fn nothing_newer_means_no_recommendation() {
        let registry: Registry = [entry("fam-a-1-20250101", true, 0.7)].into_iter().collect();
        let advice = advise(&registry, "fam-a-1-20250101");
        assert!(!advice.has_upgrade());
        assert!(advice.reason.contains("fam-a"));
    }

    #[test]
    fn same_version_later_date_is_newer() {
        let registry: Registry = [entry("fam-a-1-20250601", true, 0.7)].into_iter().collect();
        let advice = advise(&registry, "fam-a-1-20250101");
        assert_eq!(advice.recommended.as_deref(), Some("fam-a-1-20250601"));
    }

    #[test]
    fn equal_recency_prefers_confidence() {
        // Both layouts parse to family fam-a, version [2], same date.
        let registry: Registry = [
            entry("fam-a-2-20250601", true, 0.7),
            entry("fam-2-a-20250601", true, 1.0),
        ]
        .into_iter()
        .collect();
        let advice = advise(&registry, "fam-a-1-20250101");
        assert_eq!(advice.recommended.as_deref(), Some("fam-2-a-20250601"));
    }

    #[test]
    fn unparsable_current_gets_no_recommendation() {
        let registry: Registry = [entry("fam-a-2-20250601", true, 1.0)].into_iter().collect();
        let advice = advise(&registry, "my-custom-model");
        assert!(!advice.has_upgrade());
        assert!(advice.reason.contains("not a recognized"));
    }

    #[test]
    fn old_confirmation_is_flagged_stale() {
        let registry: Registry = [entry("fam-a-2-20250601", true, 1.0)].into_iter().collect();
        let confirmed = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let fresh = advise_as_of(
            &registry,
            "fam-a-1-20250101",
            AdvisorPolicy::default(),
            confirmed + TimeDelta::hours(2),
            TimeDelta::hours(24),
        );
        assert_eq!(fresh.recommended.as_deref(), Some("fam-a-2-20250601"));
        assert!(!fresh.stale);
        assert!(!fresh.reason.contains("stale"));

        let stale = advise_as_of(
            &registry,
            "fam-a-1-20250101",
            AdvisorPolicy::default(),
            confirmed + TimeDelta::days(10),
            TimeDelta::hours(24),
        );
        assert_eq!(stale.recommended.as_deref(), Some("fam-a-2-20250601"));
        assert!(stale.stale);
        assert!(stale.reason.contains("verification is stale (last confirmed 2025-06-01"));
    }

    #[test]
    fn no_recommendation_is_never_stale() {
        let registry: Registry = [entry("fam-a-1-20250101", true, 1.0)].into_iter().collect();
        let far = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let advice = advise_as_of(
            &registry,
            "fam-a-1-20250101",
            AdvisorPolicy::default(),
            far,
            TimeDelta::hours(24),
        );
        assert!(!advice.has_upgrade());
        assert!(!advice.stale);
    }

    proptest! {
        #[test]
        fn never_recommends_unverified_or_older(
            flags in proptest::collection::vec((1u32..5, any::<bool>()), 0..8),
            current in 1u32..5,
        ) {
            let registry: Registry = flags
                .iter()
                .map(|(v, verified)| entry(&format!("fam-a-{v}-20250101"), *verified, 0.5))
                .collect();
            let current_id = format!("fam-a-{current}-20250101");
            let advice = advise(&registry, &current_id);

            if let Some(id) = advice.recommended {
                let chosen = registry.get(&id).unwrap();
                prop_assert!(chosen.verified);
                let parsed = ParsedIdentifier::parse(&id).unwrap();
                prop_assert!(parsed.version[0] > current);
            }
        }
    }
}
