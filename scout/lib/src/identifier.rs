//! Identifier grammar and structured parsing.
//!
//! Harvested text is only admitted as a candidate when it matches this
//! grammar:
//!
//! ```text
//! identifier := alpha ("-" token)* "-" date
//! token      := alpha | number
//! alpha      := [a-z]+
//! number     := [0-9]{1,3} ("." [0-9]{1,3})?
//! date       := [0-9]{8}          (a real calendar date, YYYYMMDD)
//! ```
//!
//! At least one `number` token must be present and the whole identifier is
//! capped at [`MAX_IDENTIFIER_LEN`] bytes.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest identifier the grammar accepts.
pub const MAX_IDENTIFIER_LEN: usize = 64;

static IDENTIFIER_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]+(?:-(?:[a-z]+|[0-9]{1,3}(?:\.[0-9]{1,3})?))*-[0-9]{8}$")
        .expect("identifier shape pattern is valid")
});

/// Why a string is not a well-formed identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Longer than [`MAX_IDENTIFIER_LEN`].
    TooLong(usize),
    /// Does not match the token grammar.
    Shape,
    /// Has no version number.
    MissingVersion,
    /// The trailing eight digits are not a calendar date.
    InvalidDate(String),
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierError::TooLong(len) => {
                write!(f, "identifier is {len} bytes, limit is {MAX_IDENTIFIER_LEN}")
            }
            IdentifierError::Shape => f.write_str("expected family-version-YYYYMMDD"),
            IdentifierError::MissingVersion => f.write_str("identifier has no version number"),
            IdentifierError::InvalidDate(raw) => write!(f, "'{raw}' is not a calendar date"),
        }
    }
}

impl std::error::Error for IdentifierError {}

/// An identifier split into family, version and release date.
///
/// The family is every alphabetic token joined by `-`, in order. The version
/// is every numeric component in order, so `claude-3-5-sonnet-20240620` and
/// `claude-sonnet-3.5-20240620` both carry version `[3, 5]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedIdentifier {
    /// Alphabetic tokens joined by `-`.
    pub family: String,
    /// Numeric components, most significant first.
    pub version: Vec<u32>,
    /// Release date encoded in the suffix.
    pub date: NaiveDate,
}

impl ParsedIdentifier {
    /// Parses an identifier according to the grammar.
    ///
    /// ## Errors
    ///
    /// Returns an [`IdentifierError`] describing the first violated rule.
    ///
    /// ## Examples
    ///
    /// ```
    /// use scout_lib::ParsedIdentifier;
    ///
    /// let parsed = ParsedIdentifier::parse("claude-sonnet-4-5-20250929").unwrap();
    /// assert_eq!(parsed.family, "claude-sonnet");
    /// assert_eq!(parsed.version, vec![4, 5]);
    /// assert_eq!(parsed.date.to_string(), "2025-09-29");
    /// ```
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong(value.len()));
        }
        if !IDENTIFIER_SHAPE.is_match(value) {
            return Err(IdentifierError::Shape);
        }

        // The shape match guarantees a trailing `-YYYYMMDD`.
        let (head, raw_date) = value.split_at(value.len() - 8);
        let head = head.trim_end_matches('-');
        let date = NaiveDate::parse_from_str(raw_date, "%Y%m%d")
            .map_err(|_| IdentifierError::InvalidDate(raw_date.to_string()))?;

        let mut family = Vec::new();
        let mut version = Vec::new();
        for token in head.split('-') {
            if token.starts_with(|c: char| c.is_ascii_digit()) {
                for component in token.split('.') {
                    // At most three digits, so this cannot overflow.
                    version.push(component.parse::<u32>().map_err(|_| IdentifierError::Shape)?);
                }
            } else {
                family.push(token);
            }
        }

        if version.is_empty() {
            return Err(IdentifierError::MissingVersion);
        }

        Ok(Self {
            family: family.join("-"),
            version,
            date,
        })
    }

    /// Compares by version, then release date. Family is ignored.
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.date.cmp(&other.date))
    }

    /// Renders the version as dotted components, e.g. `4.5`.
    pub fn version_label(&self) -> String {
        self.version
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Returns `true` if `value` satisfies the identifier grammar.
///
/// ## Examples
///
/// ```
/// use scout_lib::is_well_formed;
///
/// assert!(is_well_formed("claude-opus-4-1-20250805"));
/// assert!(!is_well_formed("claude-opus-latest"));
/// assert!(!is_well_formed("claude-opus-4-20251399"));
/// ```
pub fn is_well_formed(value: &str) -> bool {
    ParsedIdentifier::parse(value).is_ok()
}

/// Release date encoded in an identifier's suffix, if it parses.
pub fn release_date(value: &str) -> Option<NaiveDate> {
    ParsedIdentifier::parse(value).ok().map(|p| p.date)
}

/// Lowercases a raw match and strips trailing punctuation picked up from prose.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', '-', ',', ';', ':'])
        .to_ascii_lowercase()
}
