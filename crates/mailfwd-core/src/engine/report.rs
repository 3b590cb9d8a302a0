//! Outcome of one reconciliation pass

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Structured result of a run
///
/// A run that finishes without aborting still fails when any domain was
/// skipped, a route could not be applied or a domain did not verify.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Nothing was mutated
    pub dry_run: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished; unset while in progress
    pub finished_at: Option<DateTime<Utc>>,
    /// Domains left out of the run, with the reason
    pub skipped_domains: BTreeMap<String, String>,
    /// Non-fatal notes for the operator
    pub warnings: Vec<String>,
    /// Routing-service domains that are no longer configured
    pub stale_domains: Vec<String>,
    /// Domains deleted from the routing service
    pub removed_domains: Vec<String>,
    /// Domains that did not verify within the polling budget
    pub unverified_domains: Vec<String>,
    /// Hosted zones created
    pub zones_created: Vec<String>,
    /// DNS changes applied (or planned, in a dry run)
    pub dns_changes: usize,
    /// One line per DNS change, `ACTION TYPE name (zone)`
    pub change_log: Vec<String>,
    /// Routes created (or planned)
    pub routes_created: usize,
    /// Routes deleted (or planned)
    pub routes_deleted: usize,
    /// Route operations that failed
    pub route_failures: Vec<String>,
}

impl RunReport {
    /// Empty report
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            started_at: Utc::now(),
            ..Self::default()
        }
    }

    /// Leave a domain out of the rest of the run
    pub fn skip(&mut self, domain: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!("Skipping domain {}: {}", domain, reason);
        self.skipped_domains
            .entry(domain.to_string())
            .or_insert(reason);
    }

    /// Whether a domain has been skipped
    pub fn is_skipped(&self, domain: &str) -> bool {
        self.skipped_domains.contains_key(domain)
    }

    /// Record a warning
    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Whether every domain converged and every change went through
    pub fn is_success(&self) -> bool {
        self.skipped_domains.is_empty()
            && self.route_failures.is_empty()
            && self.unverified_domains.is_empty()
    }

    /// Total number of mutations applied or planned
    pub fn total_changes(&self) -> usize {
        self.dns_changes
            + self.routes_created
            + self.routes_deleted
            + self.removed_domains.len()
            + self.zones_created.len()
    }
}
