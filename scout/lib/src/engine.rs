//! The discovery engine.
//!
//! A [`Scout`] owns the in-memory registry and drives discovery runs through
//! their stages:
//!
//! ```text
//! Idle → Generating → Harvesting → Validating → Merging → Idle
//! ```
//!
//! Only one run is in flight at a time. Reads (`advise_upgrade`, `report`,
//! `registry`) never wait for a run: they see the registry as of the last
//! completed merge. Every run is bounded by a wall-clock deadline and can be
//! cancelled through a shared [`CancelFlag`]; either way, whatever was
//! gathered so far is still merged.
//!
//! ## Examples
//!
//! ```no_run
//! use scout_lib::{HttpModelProbe, HttpPageFetcher, Scout, ScoutConfig};
//!
//! # async fn example() -> Result<(), scout_lib::ScoutError> {
//! let config = ScoutConfig::from_env()?;
//! let probe = HttpModelProbe::with_base_url("sk-...", config.api_base_url.clone());
//! let scout = Scout::new(config, HttpPageFetcher::new(), probe)?;
//!
//! let run = scout.discover().await?;
//! println!("{run}");
//!
//! let advice = scout.advise_upgrade("claude-sonnet-4-20250514").await;
//! println!("{:?}", advice.recommended);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::advisor::{Recommendation, advise_as_of};
use crate::cancel::CancelFlag;
use crate::config::ScoutConfig;
use crate::error::{ScoutError, StoreError};
use crate::generator::generate;
use crate::harvest::{HarvestOutcome, Harvester, PageFetcher};
use crate::merge::{StalenessPolicy, merge, prune};
use crate::report::{HarvestSummary, RunReport, StatusReport};
use crate::seed::seed_registry;
use crate::store::{JsonRegistryStore, RegistryOrigin, RegistryStore, SeedReason, load_or_seed};
use crate::types::{Candidate, Diagnostic, DiagnosticKind, ErrorKind, Registry, RunStage};
use crate::validator::{ModelProbe, Validator};

struct EngineState {
    registry: Registry,
    origin: RegistryOrigin,
    last_run: Option<RunReport>,
    /// The in-memory registry differs from what the store holds.
    unsaved: bool,
}

impl EngineState {
    fn fail_closed(&self) -> Result<(), ScoutError> {
        match self.origin {
            RegistryOrigin::Seeded(SeedReason::SchemaMismatch { found, expected }) => {
                Err(ScoutError::SchemaMismatch { found, expected })
            }
            _ => Ok(()),
        }
    }
}

/// Publishes stage transitions and drops back to idle when the run ends,
/// however it ends.
struct StageGuard<'a> {
    tx: &'a watch::Sender<RunStage>,
    cancel: &'a CancelFlag,
}

impl<'a> StageGuard<'a> {
    fn new(tx: &'a watch::Sender<RunStage>, cancel: &'a CancelFlag) -> Self {
        Self { tx, cancel }
    }

    fn enter(&self, stage: RunStage) {
        info!(%stage, "entering stage");
        self.tx.send_replace(stage);
    }
}

// A cancel requested before or during a run applies to that run and is
// cleared once it ends, whichever way it ends.
impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.cancel.reset();
        self.tx.send_replace(RunStage::Idle);
    }
}

/// Discovery engine handle.
pub struct Scout<F, P> {
    config: ScoutConfig,
    fetcher: F,
    validator: Validator<P>,
    harvesters: Vec<Harvester>,
    store: Box<dyn RegistryStore>,
    state: RwLock<EngineState>,
    run_lock: Mutex<()>,
    stage_tx: watch::Sender<RunStage>,
    cancel: CancelFlag,
}

impl<F, P> std::fmt::Debug for Scout<F, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scout")
            .field("config", &self.config)
            .field("harvesters", &self.harvesters)
            .finish_non_exhaustive()
    }
}

impl<F: PageFetcher, P: ModelProbe> Scout<F, P> {
    /// Creates an engine persisting to `config.registry_path`.
    ///
    /// ## Errors
    ///
    /// Returns an error when the generator bounds, validator settings or
    /// extraction rules in `config` are unusable. A missing or unreadable
    /// registry is not an error: the engine starts from the seed list.
    pub fn new(config: ScoutConfig, fetcher: F, probe: P) -> Result<Self, ScoutError> {
        let store = JsonRegistryStore::new(config.registry_path.clone());
        Self::with_store(config, fetcher, probe, store)
    }

    /// Creates an engine with a custom store.
    ///
    /// ## Errors
    ///
    /// Same as [`Scout::new`].
    pub fn with_store<S>(config: ScoutConfig, fetcher: F, probe: P, store: S) -> Result<Self, ScoutError>
    where
        S: RegistryStore + 'static,
    {
        config.generator.validate()?;
        let validator = Validator::new(probe, config.validator.clone())?;

        let mut harvesters = Vec::new();
        if !config.docs_urls.is_empty() {
            harvesters.push(Harvester::docs(
                config.docs_urls.clone(),
                &config.identifier_prefix,
                config.fetch_timeout(),
            )?);
        }
        if !config.changelog_urls.is_empty() {
            harvesters.push(Harvester::changelog(
                config.changelog_urls.clone(),
                &config.identifier_prefix,
                config.fetch_timeout(),
            )?);
        }

        let (registry, origin) = load_or_seed(&store, Utc::now());
        let last_run = store.load_last_run().unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable last run record");
            None
        });
        let unsaved = matches!(
            origin,
            RegistryOrigin::Seeded(SeedReason::Missing | SeedReason::Unreadable { .. })
        );
        let (stage_tx, _) = watch::channel(RunStage::Idle);

        Ok(Self {
            config,
            fetcher,
            validator,
            harvesters,
            store: Box::new(store),
            state: RwLock::new(EngineState {
                registry,
                origin,
                last_run,
                unsaved,
            }),
            run_lock: Mutex::new(()),
            stage_tx,
            cancel: CancelFlag::new(),
        })
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &ScoutConfig {
        &self.config
    }

    /// Current run stage.
    pub fn stage(&self) -> RunStage {
        *self.stage_tx.borrow()
    }

    /// Watches stage transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunStage> {
        self.stage_tx.subscribe()
    }

    /// Flag that cancels the in-flight run when set.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Snapshot of the registry as of the last completed merge.
    pub async fn registry(&self) -> Registry {
        self.state.read().await.registry.clone()
    }

    /// Where the registry was loaded from.
    pub async fn origin(&self) -> RegistryOrigin {
        self.state.read().await.origin.clone()
    }

    /// Runs one discovery pass and merges the results into the registry.
    ///
    /// Source and probe failures are absorbed and listed in the returned
    /// report's diagnostics. When every harvester is unavailable and no probe
    /// produced an authoritative answer, the registry is left exactly as it
    /// was.
    ///
    /// ## Errors
    ///
    /// - [`ScoutError::BoundsExceeded`] / [`ScoutError::InvalidBounds`] when
    ///   the generator bounds are unusable
    /// - [`ScoutError::SchemaMismatch`] when the persisted registry uses
    ///   another schema version and has not been reset
    #[tracing::instrument(skip(self))]
    pub async fn discover(&self) -> Result<RunReport, ScoutError> {
        let _run = self.run_lock.lock().await;
        let stage = StageGuard::new(&self.stage_tx, &self.cancel);
        self.state.read().await.fail_closed()?;

        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.deadline();
        let mut report = RunReport::new(started_at);

        stage.enter(RunStage::Generating);
        let sequence = generate(&self.config.generator, started_at)?;
        report.generated = sequence.len();

        stage.enter(RunStage::Harvesting);
        let outcomes = self.harvest_all(started_at, deadline).await;
        let mut candidates: Vec<Candidate> = Vec::with_capacity(sequence.len());
        for outcome in &outcomes {
            report.harvests.push(HarvestSummary {
                source: outcome.source(),
                available: !outcome.is_unavailable(),
                candidates: outcome.candidates().len(),
            });
            report.diagnostics.extend_from_slice(outcome.diagnostics());
            candidates.extend_from_slice(outcome.candidates());
        }
        candidates.extend(sequence.iter());

        stage.enter(RunStage::Validating);
        let existing = self.state.read().await.registry.clone();
        // Known entries first, then harvested, then pattern guesses, so an
        // expiring deadline cuts the least valuable probes.
        let mut seen = HashSet::new();
        let queue: Vec<String> = existing
            .entries
            .keys()
            .chain(candidates.iter().map(|c| &c.identifier))
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let batch = self
            .validator
            .validate_all(queue, Some(deadline), &self.cancel)
            .await;
        for result in &batch.results {
            match result.error_kind {
                None if result.verified => report.verified += 1,
                None => report.not_found += 1,
                Some(kind) => {
                    report.errors += 1;
                    let diagnostic_kind = match kind {
                        ErrorKind::RateLimited => DiagnosticKind::RateLimited,
                        ErrorKind::Unknown => DiagnosticKind::ProbeError,
                    };
                    report.diagnostics.push(Diagnostic::new(
                        RunStage::Validating,
                        diagnostic_kind,
                        &result.identifier,
                        format!("probe failed: {kind}"),
                    ));
                }
            }
        }
        report.probed = batch.results.len();
        report.skipped = batch.skipped.len();
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            report.diagnostics.push(Diagnostic::new(
                RunStage::Validating,
                DiagnosticKind::Cancelled,
                "run",
                format!("cancelled with {} probes outstanding", batch.skipped.len()),
            ));
        } else if Instant::now() >= deadline {
            report.deadline_expired = true;
            warn!(skipped = batch.skipped.len(), "run deadline expired");
            report.diagnostics.push(Diagnostic::new(
                RunStage::Validating,
                DiagnosticKind::DeadlineExpired,
                "run",
                format!("deadline expired with {} probes outstanding", batch.skipped.len()),
            ));
        }

        stage.enter(RunStage::Merging);
        let now = Utc::now();
        let all_unavailable = outcomes.iter().all(HarvestOutcome::is_unavailable);
        let merged = if all_unavailable && batch.authoritative_count() == 0 {
            warn!("every source failed and no probe answered, keeping registry");
            report.fallback_applied = true;
            merge(&existing, &[], &[], now, self.config.freshness())
        } else {
            merge(
                &existing,
                &candidates,
                &batch.results,
                now,
                self.config.freshness(),
            )
        };

        report.added = merged
            .entries
            .keys()
            .filter(|id| !existing.contains(id))
            .cloned()
            .collect();
        report.newly_verified = merged
            .verified()
            .filter(|e| !existing.get(&e.identifier).is_some_and(|old| old.verified))
            .map(|e| e.identifier.clone())
            .collect();
        report.registry_changed = merged != existing;

        let mut state = self.state.write().await;
        if report.registry_changed || state.unsaved {
            match self.store.save(&merged) {
                Ok(()) => {
                    report.persisted = true;
                    state.unsaved = false;
                    state.origin = RegistryOrigin::Persisted;
                }
                Err(e) => {
                    warn!(error = %e, "failed to save registry, keeping it in memory");
                    state.unsaved = true;
                    report.diagnostics.push(Diagnostic::new(
                        RunStage::Merging,
                        DiagnosticKind::Persistence,
                        self.config.registry_path.display().to_string(),
                        e.to_string(),
                    ));
                }
            }
        }
        state.registry = merged;
        report.finished_at = Utc::now();
        if let Err(e) = self.store.save_last_run(&report) {
            warn!(error = %e, "failed to record run summary");
        }
        state.last_run = Some(report.clone());

        info!(
            entries = state.registry.len(),
            verified = report.verified,
            added = report.added.len(),
            diagnostics = report.diagnostics.len(),
            "discovery run complete"
        );
        Ok(report)
    }

    async fn harvest_all(&self, discovered_at: DateTime<Utc>, deadline: Instant) -> Vec<HarvestOutcome> {
        let runs = self.harvesters.iter().map(|harvester| async move {
            let source = harvester.source();
            tokio::select! {
                outcome = tokio::time::timeout_at(deadline, harvester.harvest(&self.fetcher, discovered_at)) => {
                    outcome.unwrap_or_else(|_| {
                        warn!(%source, "deadline expired during harvest");
                        HarvestOutcome::Unavailable {
                            source,
                            diagnostics: vec![Diagnostic::new(
                                RunStage::Harvesting,
                                DiagnosticKind::DeadlineExpired,
                                source.to_string(),
                                "deadline expired before harvest finished",
                            )],
                        }
                    })
                }
                _ = self.cancel.cancelled() => HarvestOutcome::Unavailable {
                    source,
                    diagnostics: vec![Diagnostic::new(
                        RunStage::Harvesting,
                        DiagnosticKind::Cancelled,
                        source.to_string(),
                        "cancelled before harvest finished",
                    )],
                },
            }
        });
        join_all(runs).await
    }

    /// Recommends an upgrade for `current` from the registry as of the last
    /// completed merge. Never waits for an in-flight run.
    pub async fn advise_upgrade(&self, current: &str) -> Recommendation {
        let state = self.state.read().await;
        advise_as_of(
            &state.registry,
            current,
            self.config.advisor,
            Utc::now(),
            self.config.freshness(),
        )
    }

    /// Registry contents, advice for the configured current identifier and
    /// the last run's summary.
    pub async fn report(&self) -> StatusReport {
        let state = self.state.read().await;
        let recommendation = self
            .config
            .current_identifier
            .as_deref()
            .map(|current| {
                advise_as_of(
                    &state.registry,
                    current,
                    self.config.advisor,
                    Utc::now(),
                    self.config.freshness(),
                )
            });
        StatusReport::build(
            &state.registry,
            state.origin.clone(),
            recommendation,
            state.last_run.clone(),
        )
    }

    /// Drops stale, unverified entries and persists the result.
    ///
    /// Returns the identifiers that were removed.
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::Store`] when the store is fail-closed or the
    /// write fails. The in-memory registry is only updated after a
    /// successful write.
    #[tracing::instrument(skip(self))]
    pub async fn prune(&self, policy: &StalenessPolicy) -> Result<Vec<String>, ScoutError> {
        let _run = self.run_lock.lock().await;
        let mut state = self.state.write().await;
        if state.fail_closed().is_err() {
            return Err(ScoutError::Store(StoreError::FailClosed));
        }

        let (pruned, dropped) = prune(&state.registry, policy, Utc::now());
        if !dropped.is_empty() {
            self.store.save(&pruned)?;
            state.registry = pruned;
            state.unsaved = false;
            info!(dropped = dropped.len(), "pruned registry");
        }
        Ok(dropped)
    }

    /// Replaces the registry (in memory and on disk) with the seed list.
    ///
    /// This is the way out of a schema mismatch.
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::Store`] if the write fails.
    #[tracing::instrument(skip(self))]
    pub async fn reset(&self) -> Result<(), ScoutError> {
        let _run = self.run_lock.lock().await;
        let seed = seed_registry(Utc::now());
        self.store.save(&seed)?;

        let mut state = self.state.write().await;
        state.registry = seed;
        state.origin = RegistryOrigin::Persisted;
        state.unsaved = false;
        info!("registry reset to seed list");
        Ok(())
    }

    /// Flushes any registry changes a failed save left in memory.
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::Store`] if the final write fails.
    pub async fn shutdown(self) -> Result<(), ScoutError> {
        let state = self.state.into_inner();
        if state.unsaved && state.fail_closed().is_ok() {
            self.store.save(&state.registry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, ProbeError};
    use crate::generator::GeneratorBounds;
    use crate::validator::{ProbeResponse, ValidatorSettings};
    use crate::retry::RetryPolicy;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    struct NoPages;

    impl PageFetcher for NoPages {
        async fn fetch(&self, _url: &str, timeout: Duration) -> Result<String, FetchError> {
            Err(FetchError::Timeout(timeout))
        }
    }

    struct Finds(&'static [&'static str]);

    impl ModelProbe for Finds {
        async fn probe(&self, identifier: &str) -> Result<ProbeResponse, ProbeError> {
            let found = self.0.contains(&identifier);
            Ok(ProbeResponse {
                success: found,
                status: if found { 200 } else { 404 },
                latency: Duration::from_millis(1),
            })
        }
    }

    struct Down;

    impl ModelProbe for Down {
        async fn probe(&self, _identifier: &str) -> Result<ProbeResponse, ProbeError> {
            Err(ProbeError::Transport("connection reset".into()))
        }
    }

    fn config(dir: &TempDir) -> ScoutConfig {
        ScoutConfig {
            registry_path: dir.path().join("registry.json"),
            generator: GeneratorBounds {
                families: vec!["fam-a".into()],
                version_min: 1,
                version_max: 1,
                year_min: 2025,
                year_max: 2025,
                probe_days: vec![1],
                ..GeneratorBounds::default()
            },
            docs_urls: vec!["https://docs.test/models".into()],
            changelog_urls: vec![],
            identifier_prefix: "fam".into(),
            validator: ValidatorSettings {
                rate_per_minute: 60_000,
                burst: 100,
                retry: RetryPolicy {
                    initial_delay: Duration::from_millis(1),
                    ..RetryPolicy::default()
                },
                ..ValidatorSettings::default()
            },
            ..ScoutConfig::default()
        }
    }

    #[tokio::test]
    async fn stage_returns_to_idle_after_run() {
        let dir = TempDir::new().unwrap();
        let scout = Scout::new(config(&dir), NoPages, Finds(&["fam-a-1-20250101"])).unwrap();
        assert_eq!(scout.stage(), RunStage::Idle);

        let run = scout.discover().await.unwrap();
        assert_eq!(scout.stage(), RunStage::Idle);
        assert_eq!(run.generated, 12);
        assert!(run.newly_verified.contains(&"fam-a-1-20250101".to_string()));
        assert!(run.persisted);
    }

    #[tokio::test]
    async fn schema_mismatch_fails_closed_until_reset() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(&cfg.registry_path, r#"{"schema_version": 7, "registry": {}}"#).unwrap();

        let scout = Scout::new(cfg.clone(), NoPages, Finds(&[])).unwrap();
        assert!(matches!(
            scout.discover().await,
            Err(ScoutError::SchemaMismatch { found: 7, .. })
        ));
        assert!(matches!(
            scout.prune(&StalenessPolicy::older_than(chrono::TimeDelta::days(1))).await,
            Err(ScoutError::Store(StoreError::FailClosed))
        ));
        let untouched = std::fs::read_to_string(&cfg.registry_path).unwrap();
        assert!(untouched.contains("\"schema_version\": 7"));

        scout.reset().await.unwrap();
        assert!(scout.discover().await.is_ok());
    }

    #[tokio::test]
    async fn oversized_bounds_are_rejected_up_front() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.generator.max_candidates = 1;
        assert!(matches!(
            Scout::new(cfg, NoPages, Finds(&[])),
            Err(ScoutError::BoundsExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_before_run_applies_to_that_run_only() {
        let dir = TempDir::new().unwrap();
        let scout = Scout::new(config(&dir), NoPages, Finds(&[])).unwrap();
        scout.cancel_flag().cancel();

        let run = scout.discover().await.unwrap();
        assert!(run.cancelled);
        assert_eq!(run.probed, 0);
        assert!(!scout.cancel_flag().is_cancelled());

        let run = scout.discover().await.unwrap();
        assert!(!run.cancelled);
        assert_eq!(run.probed + run.skipped, run.generated + crate::seed::KNOWN_IDENTIFIERS.len());
    }

    #[tokio::test]
    async fn cancel_is_cleared_when_run_fails_closed() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(&cfg.registry_path, r#"{"schema_version": 42}"#).unwrap();
        let scout = Scout::new(cfg, NoPages, Finds(&[])).unwrap();
        scout.cancel_flag().cancel();

        assert!(scout.discover().await.is_err());
        assert!(!scout.cancel_flag().is_cancelled());
    }

    #[tokio::test]
    #[traced_test]
    async fn total_failure_warns_and_keeps_registry() {
        let dir = TempDir::new().unwrap();
        let scout = Scout::new(config(&dir), NoPages, Down).unwrap();
        let before = scout.registry().await;

        let run = scout.discover().await.unwrap();
        assert!(run.fallback_applied);
        assert_eq!(scout.registry().await, before);
        assert!(run.diagnostics.iter().any(|d| d.kind == DiagnosticKind::SourceUnavailable));
        assert!(run.diagnostics.iter().any(|d| d.kind == DiagnosticKind::ProbeError));
        assert!(logs_contain("every source failed"));
    }

    #[tokio::test]
    async fn report_includes_configured_current_identifier() {
        let dir = TempDir::new().unwrap();
        let cfg = ScoutConfig {
            current_identifier: Some("fam-a-0-20240101".into()),
            ..config(&dir)
        };
        let scout = Scout::new(cfg, NoPages, Finds(&["fam-a-1-20250101"])).unwrap();
        scout.discover().await.unwrap();

        let status = scout.report().await;
        let advice = status.recommendation.unwrap();
        assert_eq!(advice.recommended.as_deref(), Some("fam-a-1-20250101"));
        assert!(status.last_run.is_some());
    }
}
