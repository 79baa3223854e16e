//! Bounded enumeration of pattern candidates.
//!
//! The generator renders a naming template over the Cartesian product of
//! families × versions × years × months × probe days. The product is computed
//! up front and checked against a hard limit, so a misconfigured bound fails
//! loudly instead of flooding the validator.
//!
//! Sequences are lazy and restartable: [`CandidateSequence::iter`] can be
//! called any number of times and always yields the same identifiers in the
//! same order.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScoutError;
use crate::types::{Candidate, Source};

/// Default naming template.
pub const DEFAULT_TEMPLATE: &str = "{family}-{version}-{date}";

/// Default upper limit on the number of generated candidates.
pub const DEFAULT_MAX_CANDIDATES: u64 = 10_000;

static FAMILY_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]+(?:-[a-z]+)*$").expect("family pattern is valid"));

/// Bounds for the pattern generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorBounds {
    /// Model families, e.g. `claude-sonnet`. Alphabetic tokens only.
    pub families: Vec<String>,
    /// Lowest major version to enumerate.
    pub version_min: u32,
    /// Highest major version to enumerate (inclusive).
    pub version_max: u32,
    /// First release year to enumerate.
    pub year_min: i32,
    /// Last release year to enumerate (inclusive).
    pub year_max: i32,
    /// Days of the month to probe in every month.
    pub probe_days: Vec<u32>,
    /// Template with `{family}`, `{version}` and `{date}` placeholders.
    pub template: String,
    /// Hard limit on the product size.
    pub max_candidates: u64,
}

impl Default for GeneratorBounds {
    fn default() -> Self {
        Self {
            families: vec![
                "claude-sonnet".to_string(),
                "claude-opus".to_string(),
                "claude-haiku".to_string(),
            ],
            version_min: 4,
            version_max: 6,
            year_min: 2025,
            year_max: 2026,
            probe_days: vec![15],
            template: DEFAULT_TEMPLATE.to_string(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl GeneratorBounds {
    /// Number of candidates these bounds describe, without validating them.
    pub fn product_size(&self) -> u128 {
        let versions = span(i64::from(self.version_min), i64::from(self.version_max));
        let years = span(i64::from(self.year_min), i64::from(self.year_max));
        self.families.len() as u128 * versions * years * 12 * self.probe_days.len() as u128
    }

    /// Checks that the bounds describe a finite, duplicate-free product within
    /// `max_candidates`.
    ///
    /// ## Errors
    ///
    /// - [`ScoutError::InvalidBounds`] for empty dimensions, inverted ranges,
    ///   malformed families, duplicate values, days outside `1..=31`, or a
    ///   template missing a placeholder.
    /// - [`ScoutError::BoundsExceeded`] when the product is over the limit.
    pub fn validate(&self) -> Result<(), ScoutError> {
        if self.families.is_empty() {
            return Err(invalid("at least one family is required"));
        }
        let mut seen = BTreeSet::new();
        for family in &self.families {
            if !FAMILY_SHAPE.is_match(family) {
                return Err(invalid(format!(
                    "family '{family}' must be lowercase alphabetic tokens joined by '-'"
                )));
            }
            if !seen.insert(family.as_str()) {
                return Err(invalid(format!("family '{family}' is listed twice")));
            }
        }

        if self.version_min > self.version_max {
            return Err(invalid(format!(
                "version range {}..={} is empty",
                self.version_min, self.version_max
            )));
        }
        if self.year_min > self.year_max {
            return Err(invalid(format!(
                "year range {}..={} is empty",
                self.year_min, self.year_max
            )));
        }
        if !(1000..=9999).contains(&self.year_min) || !(1000..=9999).contains(&self.year_max) {
            return Err(invalid("years must have four digits"));
        }

        if self.probe_days.is_empty() {
            return Err(invalid("at least one probe day is required"));
        }
        let mut days = BTreeSet::new();
        for &day in &self.probe_days {
            if !(1..=31).contains(&day) {
                return Err(invalid(format!("probe day {day} is outside 1..=31")));
            }
            if !days.insert(day) {
                return Err(invalid(format!("probe day {day} is listed twice")));
            }
        }

        for placeholder in ["{family}", "{version}", "{date}"] {
            if self.template.matches(placeholder).count() != 1 {
                return Err(invalid(format!(
                    "template must contain {placeholder} exactly once"
                )));
            }
        }

        let size = self.product_size();
        if size > u128::from(self.max_candidates) {
            return Err(ScoutError::BoundsExceeded {
                size,
                limit: self.max_candidates,
            });
        }

        Ok(())
    }
}

fn span(min: i64, max: i64) -> u128 {
    if max < min { 0 } else { (max - min + 1) as u128 }
}

fn invalid(message: impl Into<String>) -> ScoutError {
    ScoutError::InvalidBounds(message.into())
}

/// A validated, restartable sequence of pattern candidates.
#[derive(Debug, Clone)]
pub struct CandidateSequence {
    bounds: GeneratorBounds,
    discovered_at: DateTime<Utc>,
    len: usize,
}

impl CandidateSequence {
    /// Number of candidates in the sequence.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the sequence yields nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Starts a fresh pass over the sequence.
    pub fn iter(&self) -> CandidateIter<'_> {
        CandidateIter {
            sequence: self,
            next: 0,
        }
    }

    // Index layout, outermost first: family, version, year, month, day.
    fn render(&self, index: usize) -> Candidate {
        let b = &self.bounds;
        let days = b.probe_days.len();
        let months = 12;
        let years = (b.year_max - b.year_min + 1) as usize;
        let versions = (b.version_max - b.version_min + 1) as usize;

        let mut rest = index;
        let day = b.probe_days[rest % days];
        rest /= days;
        let month = rest % months + 1;
        rest /= months;
        let year = b.year_min + (rest % years) as i32;
        rest /= years;
        let version = b.version_min + (rest % versions) as u32;
        rest /= versions;
        let family = &b.families[rest];

        let identifier = b
            .template
            .replace("{family}", family)
            .replace("{version}", &version.to_string())
            .replace("{date}", &format!("{year:04}{month:02}{day:02}"));

        Candidate::new(identifier, Source::Pattern, self.discovered_at)
    }
}

impl<'a> IntoIterator for &'a CandidateSequence {
    type Item = Candidate;
    type IntoIter = CandidateIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`CandidateSequence`].
#[derive(Debug, Clone)]
pub struct CandidateIter<'a> {
    sequence: &'a CandidateSequence,
    next: usize,
}

impl Iterator for CandidateIter<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.sequence.len {
            return None;
        }
        let candidate = self.sequence.render(self.next);
        self.next += 1;
        Some(candidate)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sequence.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CandidateIter<'_> {}

/// Validates `bounds` and returns the candidate sequence they describe.
///
/// Every candidate is tagged [`Source::Pattern`] and stamped with
/// `discovered_at`.
///
/// ## Errors
///
/// Returns [`ScoutError::BoundsExceeded`] or [`ScoutError::InvalidBounds`]
/// without producing any candidate.
///
/// ## Examples
///
/// ```
/// use chrono::Utc;
/// use scout_lib::{generate, GeneratorBounds};
///
/// let bounds = GeneratorBounds {
///     families: vec!["fam-a".into()],
///     version_min: 1,
///     version_max: 2,
///     year_min: 2025,
///     year_max: 2025,
///     probe_days: vec![1],
///     ..GeneratorBounds::default()
/// };
/// let sequence = generate(&bounds, Utc::now()).unwrap();
/// assert_eq!(sequence.len(), 24);
/// assert_eq!(sequence.iter().next().unwrap().identifier, "fam-a-1-20250101");
/// ```
#[tracing::instrument(skip(bounds), fields(families = bounds.families.len()))]
pub fn generate(
    bounds: &GeneratorBounds,
    discovered_at: DateTime<Utc>,
) -> Result<CandidateSequence, ScoutError> {
    bounds.validate()?;
    // validate() caps the product at a u64 limit, well within usize here.
    let len = bounds.product_size() as usize;
    tracing::debug!(candidates = len, "generated pattern candidates");
    Ok(CandidateSequence {
        bounds: bounds.clone(),
        discovered_at,
        len,
    })
}
