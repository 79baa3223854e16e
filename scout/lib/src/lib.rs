//! Model identifier discovery and validation.
//!
//! This library finds model identifiers a provider actually serves, keeps a
//! persistent registry of what it has learned, and recommends upgrades from
//! that registry.
//!
//! ## Discovery Pipeline
//!
//! - [`generate`] - Enumerates plausible identifiers within [`GeneratorBounds`]
//! - [`Harvester`] - Extracts identifiers from documentation and release notes
//! - [`Validator`] - Probes identifiers under a rate limit with backoff
//! - [`merge`] - Folds candidates and probe results into the [`Registry`]
//! - [`Scout`] - Runs the whole pipeline under a deadline
//!
//! ## Registry
//!
//! - [`RegistryEntry`] - What is known about one identifier
//! - [`RegistryStore`] - Trait for registry storage backends
//! - [`JsonRegistryStore`] - Schema-versioned JSON file with file locking
//! - [`seed_registry`] - Known identifiers used when nothing is persisted
//!
//! ## Advice
//!
//! - [`advise`] - Newest verified identifier in the same family
//! - [`StatusReport`] - Registry contents and advice for operators
//!
//! ## Identifiers
//!
//! - [`ParsedIdentifier`] - Family, version and release date of an identifier
//! - [`is_well_formed`] - Grammar check used by every harvester

mod advisor;
mod cancel;
mod config;
mod engine;
mod error;
mod generator;
mod harvest;
mod http;
mod identifier;
mod merge;
mod report;
mod retry;
mod seed;
mod store;
mod types;
mod validator;

pub use advisor::{AdvisorPolicy, Recommendation, advise, advise_as_of, advise_with};
pub use cancel::CancelFlag;
pub use config::{
    DEFAULT_API_BASE_URL, DEFAULT_CHANGELOG_URL, DEFAULT_DOCS_URL, DEFAULT_IDENTIFIER_PREFIX,
    ScoutConfig,
};
pub use engine::Scout;
pub use error::{FetchError, PageError, ProbeError, ScoutError, StoreError};
pub use generator::{
    CandidateIter, CandidateSequence, DEFAULT_MAX_CANDIDATES, DEFAULT_TEMPLATE, GeneratorBounds,
    generate,
};
pub use harvest::{
    ExtractionRule, HarvestOutcome, Harvester, MAX_PAGE_BYTES, PageFetcher, changelog_rules,
    docs_rules, page_text,
};
pub use http::{ANTHROPIC_VERSION, HttpModelProbe, HttpPageFetcher};
pub use identifier::{
    IdentifierError, MAX_IDENTIFIER_LEN, ParsedIdentifier, is_well_formed, normalize, release_date,
};
pub use merge::{StalenessPolicy, confidence, merge, prune};
pub use report::{HarvestSummary, RunReport, StatusReport, registry_table};
pub use retry::{RetryPolicy, with_backoff};
pub use seed::{KNOWN_IDENTIFIERS, seed_registry};
pub use store::{
    JsonRegistryStore, RegistryOrigin, RegistryStore, SCHEMA_VERSION, SeedReason, load_or_seed,
};
pub use types::{
    Candidate, Diagnostic, DiagnosticKind, ErrorKind, Registry, RegistryEntry, RunStage, Source,
    ValidationResult,
};
pub use validator::{ModelProbe, ProbeResponse, ValidationBatch, Validator, ValidatorSettings};
