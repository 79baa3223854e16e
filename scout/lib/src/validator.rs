//! Confirmation of candidates against the live service.
//!
//! Every probe goes through a shared token bucket (`governor`) so the rate
//! limit holds across all in-flight probes, and concurrency is capped by
//! `buffer_unordered`. Rate-limited probes back off and retry; every other
//! failure is reported as an error result without retrying.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::{FutureExt, StreamExt, stream};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancelFlag;
use crate::error::{ProbeError, ScoutError};
use crate::retry::{RetryPolicy, with_backoff};
use crate::types::{Candidate, ErrorKind, ValidationResult};

/// Status a probe reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    /// Whether the service accepted the identifier.
    pub success: bool,
    /// HTTP status, or an equivalent code.
    pub status: u16,
    /// Round trip latency.
    pub latency: Duration,
}

/// Issues a minimal request that only succeeds for existing identifiers.
pub trait ModelProbe: Send + Sync {
    /// Probes `identifier` once.
    fn probe(
        &self,
        identifier: &str,
    ) -> impl Future<Output = Result<ProbeResponse, ProbeError>> + Send;
}

/// Validator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSettings {
    /// Most probes in flight at once.
    pub concurrency: usize,
    /// Sustained probe rate.
    pub rate_per_minute: u32,
    /// Probes allowed back to back before the rate applies.
    pub burst: u32,
    /// Timeout for a single probe attempt.
    pub probe_timeout: Duration,
    /// Backoff for rate-limited probes.
    pub retry: RetryPolicy,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_per_minute: 50,
            burst: 5,
            probe_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// One probe attempt, before it is turned into a [`ValidationResult`].
#[derive(Debug, Clone, PartialEq)]
enum Attempt {
    Found(Duration),
    NotFound(Duration),
    RateLimited(Duration),
    Failed(Duration, String),
}

impl Attempt {
    fn from_response(response: ProbeResponse) -> Self {
        match response.status {
            _ if response.success => Attempt::Found(response.latency),
            404 => Attempt::NotFound(response.latency),
            429 => Attempt::RateLimited(response.latency),
            status => Attempt::Failed(response.latency, format!("unexpected status {status}")),
        }
    }
}

/// Results of a batch, plus how much of the batch never ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationBatch {
    /// One result per identifier that was probed.
    pub results: Vec<ValidationResult>,
    /// Identifiers left unprobed because the deadline expired or the run was
    /// cancelled.
    pub skipped: Vec<String>,
}

impl ValidationBatch {
    /// Number of authoritative results (verified or not found).
    pub fn authoritative_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_authoritative()).count()
    }

    /// Number of verified results.
    pub fn verified_count(&self) -> usize {
        self.results.iter().filter(|r| r.verified).count()
    }
}

/// Probes identifiers under a shared rate limit.
pub struct Validator<P> {
    probe: P,
    limiter: Arc<DefaultDirectRateLimiter>,
    settings: ValidatorSettings,
}

impl<P> std::fmt::Debug for Validator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<P: ModelProbe> Validator<P> {
    /// Creates a validator.
    ///
    /// ## Errors
    ///
    /// Returns [`ScoutError::Config`] when concurrency, rate or burst is zero.
    pub fn new(probe: P, settings: ValidatorSettings) -> Result<Self, ScoutError> {
        if settings.concurrency == 0 {
            return Err(ScoutError::Config("probe concurrency must be at least 1".into()));
        }
        let rate = NonZeroU32::new(settings.rate_per_minute)
            .ok_or_else(|| ScoutError::Config("probe rate must be at least 1 per minute".into()))?;
        let burst = NonZeroU32::new(settings.burst)
            .ok_or_else(|| ScoutError::Config("probe burst must be at least 1".into()))?;

        let quota = Quota::per_minute(rate).allow_burst(burst);
        Ok(Self {
            probe,
            limiter: Arc::new(RateLimiter::direct(quota)),
            settings,
        })
    }

    /// Settings this validator was built with.
    pub fn settings(&self) -> &ValidatorSettings {
        &self.settings
    }

    /// Probes one candidate.
    ///
    /// Validating the same candidate twice against an unchanged service gives
    /// the same `verified` value and error kind.
    pub async fn validate(&self, candidate: &Candidate) -> ValidationResult {
        self.validate_identifier(&candidate.identifier).await
    }

    /// Probes one identifier, retrying while rate limited.
    #[tracing::instrument(skip(self))]
    pub async fn validate_identifier(&self, identifier: &str) -> ValidationResult {
        let (attempt, attempts) = with_backoff(
            &self.settings.retry,
            identifier,
            move || self.attempt(identifier),
            |a| matches!(a, Attempt::RateLimited(_)),
        )
        .await;
        let checked_at = Utc::now();

        match attempt {
            Attempt::Found(latency) => {
                debug!(attempts, "verified");
                ValidationResult::verified(identifier, checked_at, latency)
            }
            Attempt::NotFound(latency) => {
                debug!(attempts, "not found");
                ValidationResult::not_found(identifier, checked_at, latency)
            }
            Attempt::RateLimited(latency) => {
                info!(attempts, "still rate limited after retries");
                ValidationResult::failed(identifier, checked_at, latency, ErrorKind::RateLimited)
            }
            Attempt::Failed(latency, reason) => {
                debug!(attempts, %reason, "probe failed");
                ValidationResult::failed(identifier, checked_at, latency, ErrorKind::Unknown)
            }
        }
    }

    async fn attempt(&self, identifier: &str) -> Attempt {
        self.limiter.until_ready().await;
        let started = Instant::now();
        match tokio::time::timeout(self.settings.probe_timeout, self.probe.probe(identifier)).await
        {
            Ok(Ok(response)) => Attempt::from_response(response),
            Ok(Err(e)) => Attempt::Failed(started.elapsed(), e.to_string()),
            Err(_) => Attempt::Failed(
                started.elapsed(),
                format!("probe timed out after {:?}", self.settings.probe_timeout),
            ),
        }
    }

    /// Probes every identifier with bounded concurrency.
    ///
    /// Stops scheduling new probes once `deadline` passes or `cancel` fires;
    /// whatever finished by then is returned and the rest is listed in
    /// [`ValidationBatch::skipped`]. Probes are started in input order.
    #[tracing::instrument(skip_all, fields(identifiers = identifiers.len()))]
    pub async fn validate_all(
        &self,
        identifiers: Vec<String>,
        deadline: Option<tokio::time::Instant>,
        cancel: &CancelFlag,
    ) -> ValidationBatch {
        let stop = async move {
            match deadline {
                Some(at) => tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = cancel.cancelled() => {}
                },
                None => cancel.cancelled().await,
            }
        }
        .boxed();

        let results: Vec<ValidationResult> = stream::iter(identifiers.iter())
            .map(|id| self.validate_identifier(id))
            .buffer_unordered(self.settings.concurrency)
            .take_until(stop)
            .collect()
            .await;

        let skipped = if results.len() < identifiers.len() {
            let done: std::collections::HashSet<&str> =
                results.iter().map(|r| r.identifier.as_str()).collect();
            identifiers
                .iter()
                .filter(|id| !done.contains(id.as_str()))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        info!(
            probed = results.len(),
            verified = results.iter().filter(|r| r.verified).count(),
            skipped = skipped.len(),
            "validation finished"
        );
        ValidationBatch { results, skipped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedProbe {
        found: Vec<&'static str>,
        /// Statuses returned in order before falling back to `found`.
        script: Mutex<HashMap<String, Vec<u16>>>,
        calls: Mutex<Vec<String>>,
        fail_with: Option<ProbeError>,
        delay: Option<Duration>,
    }

    impl ModelProbe for ScriptedProbe {
        async fn probe(&self, identifier: &str) -> Result<ProbeResponse, ProbeError> {
            self.calls.lock().unwrap().push(identifier.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            let scripted = self
                .script
                .lock()
                .unwrap()
                .get_mut(identifier)
                .and_then(|statuses| (!statuses.is_empty()).then(|| statuses.remove(0)));
            let status = scripted.unwrap_or(if self.found.contains(&identifier) { 200 } else { 404 });
            Ok(ProbeResponse {
                success: status == 200,
                status,
                latency: Duration::from_millis(5),
            })
        }
    }

    /// Records when each probe started and how many ran at once.
    #[derive(Default)]
    struct MeteredProbe {
        delay: Duration,
        started: Mutex<Vec<std::time::Instant>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ModelProbe for MeteredProbe {
        async fn probe(&self, _identifier: &str) -> Result<ProbeResponse, ProbeError> {
            self.started.lock().unwrap().push(std::time::Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ProbeResponse {
                success: false,
                status: 404,
                latency: self.delay,
            })
        }
    }

    fn fast_settings() -> ValidatorSettings {
        ValidatorSettings {
            concurrency: 4,
            rate_per_minute: 60_000,
            burst: 100,
            probe_timeout: Duration::from_secs(1),
            retry: RetryPolicy {
                max_retries: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                multiplier: 2.0,
                jitter: 0.0,
            },
        }
    }

    #[tokio::test]
    async fn found_and_not_found_are_authoritative() {
        let probe = ScriptedProbe {
            found: vec!["fam-a-1-20250101"],
            ..Default::default()
        };
        let validator = Validator::new(probe, fast_settings()).unwrap();

        let hit = validator.validate_identifier("fam-a-1-20250101").await;
        assert!(hit.verified);
        assert!(hit.is_authoritative());

        let miss = validator.validate_identifier("fam-a-9-20991231").await;
        assert!(!miss.verified);
        assert!(miss.is_authoritative());
    }

    #[tokio::test]
    async fn rate_limit_is_retried_until_answer() {
        let probe = ScriptedProbe {
            found: vec!["fam-a-1-20250101"],
            script: Mutex::new(HashMap::from([(
                "fam-a-1-20250101".to_string(),
                vec![429, 429],
            )])),
            ..Default::default()
        };
        let validator = Validator::new(probe, fast_settings()).unwrap();

        let result = validator.validate_identifier("fam-a-1-20250101").await;
        assert!(result.verified);
        assert_eq!(validator.probe.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn persistent_rate_limit_becomes_error() {
        let probe = ScriptedProbe {
            script: Mutex::new(HashMap::from([("fam-a-1-20250101".to_string(), vec![429; 10])])),
            ..Default::default()
        };
        let validator = Validator::new(probe, fast_settings()).unwrap();

        let result = validator.validate_identifier("fam-a-1-20250101").await;
        assert_eq!(result.error_kind, Some(ErrorKind::RateLimited));
        assert!(!result.verified);
        assert_eq!(validator.probe.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let probe = ScriptedProbe {
            fail_with: Some(ProbeError::Transport("connection reset".into())),
            ..Default::default()
        };
        let validator = Validator::new(probe, fast_settings()).unwrap();

        let result = validator.validate_identifier("fam-a-1-20250101").await;
        assert_eq!(result.error_kind, Some(ErrorKind::Unknown));
        assert_eq!(validator.probe.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_error_is_unknown() {
        let probe = ScriptedProbe {
            script: Mutex::new(HashMap::from([("fam-a-1-20250101".to_string(), vec![500])])),
            ..Default::default()
        };
        let validator = Validator::new(probe, fast_settings()).unwrap();
        let result = validator.validate_identifier("fam-a-1-20250101").await;
        assert_eq!(result.error_kind, Some(ErrorKind::Unknown));
    }

    #[tokio::test]
    async fn slow_probe_times_out() {
        let probe = ScriptedProbe {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let settings = ValidatorSettings {
            probe_timeout: Duration::from_millis(20),
            ..fast_settings()
        };
        let validator = Validator::new(probe, settings).unwrap();
        let result = validator.validate_identifier("fam-a-1-20250101").await;
        assert_eq!(result.error_kind, Some(ErrorKind::Unknown));
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let probe = ScriptedProbe {
            found: vec!["fam-a-1-20250101"],
            ..Default::default()
        };
        let validator = Validator::new(probe, fast_settings()).unwrap();
        let candidate = Candidate::new("fam-a-1-20250101", crate::Source::Pattern, Utc::now());

        let first = validator.validate(&candidate).await;
        let second = validator.validate(&candidate).await;
        assert_eq!(first.verified, second.verified);
        assert_eq!(first.error_kind, second.error_kind);
    }

    #[tokio::test]
    async fn batch_probes_everything_once() {
        let probe = ScriptedProbe {
            found: vec!["fam-a-2-20250101"],
            ..Default::default()
        };
        let validator = Validator::new(probe, fast_settings()).unwrap();
        let ids: Vec<String> = (1..=6).map(|v| format!("fam-a-{v}-20250101")).collect();

        let batch = validator.validate_all(ids, None, &CancelFlag::new()).await;
        assert_eq!(batch.results.len(), 6);
        assert!(batch.skipped.is_empty());
        assert_eq!(batch.verified_count(), 1);
        assert_eq!(batch.authoritative_count(), 6);
    }

    #[tokio::test]
    async fn batch_never_exceeds_concurrency_cap() {
        let probe = MeteredProbe {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let settings = ValidatorSettings {
            concurrency: 3,
            ..fast_settings()
        };
        let validator = Validator::new(probe, settings).unwrap();
        let ids: Vec<String> = (1..=12).map(|v| format!("fam-a-{v}-20250101")).collect();

        let batch = validator.validate_all(ids, None, &CancelFlag::new()).await;
        assert_eq!(batch.results.len(), 12);
        assert_eq!(validator.probe.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn calls_past_the_burst_wait_for_tokens() {
        let probe = MeteredProbe::default();
        // One token every 100ms after an initial burst of two.
        let settings = ValidatorSettings {
            concurrency: 5,
            rate_per_minute: 600,
            burst: 2,
            ..fast_settings()
        };
        let validator = Validator::new(probe, settings).unwrap();
        let ids: Vec<String> = (1..=5).map(|v| format!("fam-a-{v}-20250101")).collect();
        let start = std::time::Instant::now();

        let batch = validator.validate_all(ids, None, &CancelFlag::new()).await;
        assert_eq!(batch.results.len(), 5);

        let mut started = validator.probe.started.lock().unwrap().clone();
        started.sort();
        let offsets: Vec<Duration> = started.iter().map(|at| at.duration_since(start)).collect();
        assert!(offsets[1] < Duration::from_millis(80), "{offsets:?}");
        assert!(offsets[2] >= Duration::from_millis(80), "{offsets:?}");
        assert!(offsets[4] >= Duration::from_millis(250), "{offsets:?}");
    }

    #[tokio::test]
    async fn expired_deadline_skips_remaining() {
        let probe = ScriptedProbe {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let settings = ValidatorSettings {
            concurrency: 1,
            ..fast_settings()
        };
        let validator = Validator::new(probe, settings).unwrap();
        let ids: Vec<String> = (1..=20).map(|v| format!("fam-a-{v}-20250101")).collect();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(120);

        let batch = validator.validate_all(ids, Some(deadline), &CancelFlag::new()).await;
        assert!(batch.results.len() < 20);
        assert_eq!(batch.results.len() + batch.skipped.len(), 20);
    }

    #[tokio::test]
    async fn cancelled_batch_stops_early() {
        let probe = ScriptedProbe::default();
        let validator = Validator::new(probe, fast_settings()).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let ids: Vec<String> = (1..=5).map(|v| format!("fam-a-{v}-20250101")).collect();
        let batch = validator.validate_all(ids, None, &cancel).await;
        assert_eq!(batch.skipped.len() + batch.results.len(), 5);
        assert!(batch.results.len() < 5);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let settings = ValidatorSettings {
            rate_per_minute: 0,
            ..fast_settings()
        };
        assert!(matches!(
            Validator::new(ScriptedProbe::default(), settings),
            Err(ScoutError::Config(_))
        ));
    }
}
