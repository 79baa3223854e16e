//! Run summaries and registry status for operators.

use std::fmt;

use chrono::{DateTime, Utc};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};
use serde::{Deserialize, Serialize};

use crate::advisor::Recommendation;
use crate::identifier::release_date;
use crate::store::RegistryOrigin;
use crate::types::{Diagnostic, Registry, RegistryEntry, Source};

/// What one harvester contributed to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestSummary {
    /// Harvester source tag.
    pub source: Source,
    /// Whether at least one page was fetched.
    pub available: bool,
    /// Grammar-valid candidates extracted.
    pub candidates: usize,
}

/// Outcome of one discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Pattern candidates generated.
    pub generated: usize,
    /// Per-harvester results.
    pub harvests: Vec<HarvestSummary>,
    /// Probes that completed.
    pub probed: usize,
    /// Probes that confirmed existence.
    pub verified: usize,
    /// Probes that denied existence.
    pub not_found: usize,
    /// Probes without an authoritative answer.
    pub errors: usize,
    /// Identifiers never probed because the run stopped early.
    pub skipped: usize,
    /// Every source failed and no probe answered, so the registry was kept as is.
    pub fallback_applied: bool,
    /// The run deadline expired before every stage finished.
    pub deadline_expired: bool,
    /// The run was cancelled.
    pub cancelled: bool,
    /// Identifiers added to the registry by this run.
    pub added: Vec<String>,
    /// Identifiers that became verified during this run.
    pub newly_verified: Vec<String>,
    /// Whether the registry differs from before the run.
    pub registry_changed: bool,
    /// Whether the merged registry was written to the store.
    pub persisted: bool,
    /// Failures absorbed along the way.
    pub diagnostics: Vec<Diagnostic>,
}

impl RunReport {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            generated: 0,
            harvests: Vec::new(),
            probed: 0,
            verified: 0,
            not_found: 0,
            errors: 0,
            skipped: 0,
            fallback_applied: false,
            deadline_expired: false,
            cancelled: false,
            added: Vec::new(),
            newly_verified: Vec::new(),
            registry_changed: false,
            persisted: false,
            diagnostics: Vec::new(),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at.signed_duration_since(self.started_at);
        writeln!(
            f,
            "Discovery run {} ({:.1}s)",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            elapsed.num_milliseconds() as f64 / 1000.0
        )?;
        writeln!(f, "  pattern candidates: {}", self.generated)?;
        for harvest in &self.harvests {
            if harvest.available {
                writeln!(f, "  {} harvest: {} candidates", harvest.source, harvest.candidates)?;
            } else {
                writeln!(f, "  {} harvest: unavailable", harvest.source)?;
            }
        }
        writeln!(
            f,
            "  probes: {} verified, {} not found, {} errors, {} skipped",
            self.verified, self.not_found, self.errors, self.skipped
        )?;

        if self.fallback_applied {
            writeln!(f, "  every source failed; registry left unchanged")?;
        }
        if self.deadline_expired {
            writeln!(f, "  deadline expired before the run finished")?;
        }
        if self.cancelled {
            writeln!(f, "  run was cancelled")?;
        }
        if !self.added.is_empty() {
            writeln!(f, "  added: {}", self.added.join(", "))?;
        }
        if !self.newly_verified.is_empty() {
            writeln!(f, "  newly verified: {}", self.newly_verified.join(", "))?;
        }
        match (self.registry_changed, self.persisted) {
            (false, _) => writeln!(f, "  registry unchanged")?,
            (true, true) => writeln!(f, "  registry updated and saved")?,
            (true, false) => writeln!(f, "  registry updated in memory only")?,
        }

        if !self.diagnostics.is_empty() {
            writeln!(f, "  diagnostics ({}):", self.diagnostics.len())?;
            for diagnostic in &self.diagnostics {
                writeln!(f, "    {diagnostic}")?;
            }
        }
        Ok(())
    }
}

/// Registry status, upgrade advice and the last run, for `scout report`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Where the registry was loaded from.
    pub origin: RegistryOrigin,
    /// Every entry, in identifier order.
    pub entries: Vec<RegistryEntry>,
    /// Number of verified entries.
    pub verified: usize,
    /// Advice for the configured current identifier, if one is set.
    pub recommendation: Option<Recommendation>,
    /// The most recent recorded run, if any.
    pub last_run: Option<RunReport>,
}

impl StatusReport {
    pub(crate) fn build(
        registry: &Registry,
        origin: RegistryOrigin,
        recommendation: Option<Recommendation>,
        last_run: Option<RunReport>,
    ) -> Self {
        Self {
            origin,
            entries: registry.iter().cloned().collect(),
            verified: registry.verified().count(),
            recommendation,
            last_run,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} entries, {} verified, {} unverified",
            self.entries.len(),
            self.verified,
            self.entries.len() - self.verified
        )?;
        match &self.origin {
            RegistryOrigin::Persisted => {}
            RegistryOrigin::Seeded(reason) => {
                writeln!(f, "registry started from the seed list ({reason:?})")?;
            }
        }
        writeln!(f, "{}", registry_table(&self.entries))?;

        if let Some(advice) = &self.recommendation {
            writeln!(f, "current: {}", advice.current)?;
            match &advice.recommended {
                Some(id) => writeln!(f, "upgrade available: {id}")?,
                None => writeln!(f, "no upgrade available")?,
            }
            writeln!(f, "  {}", advice.reason)?;
        }

        if let Some(run) = &self.last_run {
            write!(f, "{run}")?;
        }
        Ok(())
    }
}

/// Renders entries as a table.
pub fn registry_table(entries: &[RegistryEntry]) -> String {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_BORDERS_ONLY);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Identifier",
        "Verified",
        "Confidence",
        "Sources",
        "Released",
        "Last verified",
    ]);

    for entry in entries {
        let sources = entry
            .sources
            .iter()
            .map(Source::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let released = release_date(&entry.identifier)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let last_verified = entry
            .last_verified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        table.add_row(vec![
            Cell::new(&entry.identifier),
            Cell::new(if entry.verified { "yes" } else { "no" }),
            Cell::new(format!("{:.2}", entry.confidence)).set_alignment(CellAlignment::Right),
            Cell::new(sources),
            Cell::new(released),
            Cell::new(last_verified),
        ]);
    }

    table.to_string()
}
