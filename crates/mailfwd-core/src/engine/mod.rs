//! Reconciliation engine
//!
//! The Reconciler drives the DNS provider and the mail-routing service
//! toward the declared configuration in one pass:
//!
//! ```text
//! ValidateGraph
//!   └─ per domain: EnsureDomainRegistered → ConfigureAuthentication → PlanDns
//!        └─ ApplyDns (zones in parallel, each zone sequential)
//!             └─ RemoveStaleDomains
//!                  └─ ApplyRoutes
//!                       └─ AwaitDomainConvergence → Done
//! ```
//!
//! ## Failure semantics
//!
//! - A forwarding cycle aborts before any mutation
//! - A domain that cannot be registered aborts the run ([`Error::FatalSetup`])
//! - Any other failure skips the domain concerned and is reported in the
//!   [`RunReport`]; the remaining domains still converge
//! - Polling is always bounded; exhaustion is reported, never looped on
//!
//! Every suspension point (retry backoff, poll interval, per-domain loop)
//! observes the cancellation token.

mod convergence;
mod dns;
mod registration;
mod report;
mod routes;
mod teardown;

pub use report::RunReport;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ForwardingConfig;
use crate::error::{Error, Result};
use crate::graph;
use crate::retry::RetryingCaller;
use crate::traits::{DnsProvider, MailRoutingService};

use registration::Registration;

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Run started
    Started {
        domains: usize,
        dry_run: bool,
    },

    /// Forwarding graph has no cycles
    GraphValidated {
        addresses: usize,
    },

    /// Domain is registered at the routing service
    DomainReady {
        domain: String,
        created: bool,
    },

    /// Domain left out of the rest of the run
    DomainSkipped {
        domain: String,
        reason: String,
    },

    /// Hosted zone created
    ZoneCreated {
        zone: String,
        name_servers: Vec<String>,
    },

    /// A zone's changes were applied and settled
    DnsChangesApplied {
        zone: String,
        changes: usize,
    },

    /// A routing domain that is no longer configured
    StaleDomain {
        domain: String,
        removed: bool,
    },

    /// Route changes applied
    RoutesApplied {
        created: usize,
        deleted: usize,
    },

    /// Domain verified
    DomainVerified {
        domain: String,
    },

    /// Run finished
    Finished {
        success: bool,
    },
}

/// Reconciliation engine
///
/// ## Lifecycle
///
/// 1. Create with [`Reconciler::new()`]
/// 2. Call [`Reconciler::run()`], [`Reconciler::reconcile_routes()`] or
///    [`Reconciler::teardown()`]
/// 3. Inspect the returned [`RunReport`]
///
/// The Reconciler holds no state between runs; everything is read fresh
/// from the providers.
pub struct Reconciler {
    /// DNS provider
    dns: Arc<dyn DnsProvider>,

    /// Mail-routing service
    routing: Arc<dyn MailRoutingService>,

    /// Normalized configuration
    config: ForwardingConfig,

    /// Retry wrapper for every provider call
    caller: RetryingCaller,

    /// Run-wide cancellation
    cancel: CancellationToken,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new Reconciler
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields
    /// reconcile events
    pub fn new(
        dns: Arc<dyn DnsProvider>,
        routing: Arc<dyn MailRoutingService>,
        config: ForwardingConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.settings.event_channel_capacity);
        let caller = RetryingCaller::new(config.settings.retry, cancel.clone());

        let reconciler = Self {
            dns,
            routing,
            config,
            caller,
            cancel,
            event_tx: tx,
        };

        Ok((reconciler, rx))
    }

    /// The configuration this reconciler drives toward
    pub fn config(&self) -> &ForwardingConfig {
        &self.config
    }

    /// Run a full reconciliation pass
    ///
    /// # Returns
    ///
    /// - `Ok(RunReport)`: the pass completed; check [`RunReport::is_success`]
    /// - `Err(Error)`: the pass aborted (cycle, fatal setup, cancellation,
    ///   or the providers could not be listed at all)
    pub async fn run(&self) -> Result<RunReport> {
        let settings = &self.config.settings;
        let mut report = RunReport::new(settings.dry_run);

        self.emit_event(ReconcileEvent::Started {
            domains: self.config.domains.len(),
            dry_run: settings.dry_run,
        });

        self.validate_graph()?;

        let existing = self
            .caller
            .call("list routing domains", || self.routing.list_domains())
            .await?;
        let mut zones = self
            .caller
            .call("list hosted zones", || self.dns.list_zones())
            .await?;

        let mut ready = Vec::new();
        for domain in &self.config.domains {
            self.check_cancelled()?;

            match self.ensure_registered(domain, &mut report).await? {
                Registration::Ready { routing, created } => {
                    self.emit_event(ReconcileEvent::DomainReady {
                        domain: domain.name.clone(),
                        created,
                    });
                    ready.push((domain, routing));
                }
                Registration::Planned => {}
                Registration::Skipped => self.emit_skipped(&domain.name, &report),
            }
        }

        let batches = self.plan_dns(&ready, &mut zones, &mut report).await?;
        self.apply_dns(batches, &mut report).await?;

        for (domain, _) in &ready {
            if report.is_skipped(&domain.name) {
                self.emit_skipped(&domain.name, &report);
            }
        }

        self.remove_stale_domains(&existing, &mut report).await?;
        self.apply_routes(&mut report).await?;

        if settings.dry_run {
            info!("Dry run: skipping domain verification");
        } else {
            let pending: Vec<_> = ready
                .iter()
                .filter(|(domain, routing)| {
                    !report.is_skipped(&domain.name) && !routing.state.is_verified()
                })
                .map(|(domain, _)| domain.name.clone())
                .collect();
            self.await_convergence(pending, &mut report).await?;
        }

        self.finish(&mut report);
        Ok(report)
    }

    /// Reconcile routes only
    ///
    /// With `force_route_deletion` every route is removed first and the
    /// removal is confirmed before the desired routes are created.
    pub async fn reconcile_routes(&self) -> Result<RunReport> {
        let settings = &self.config.settings;
        let mut report = RunReport::new(settings.dry_run);

        self.validate_graph()?;

        if settings.force_route_deletion {
            self.delete_all_routes(&mut report).await?;
        }
        self.apply_routes(&mut report).await?;

        self.finish(&mut report);
        Ok(report)
    }

    fn validate_graph(&self) -> Result<()> {
        graph::validate(&self.config.mappings, &self.config.domain_defaults())?;
        self.emit_event(ReconcileEvent::GraphValidated {
            addresses: self.config.mappings.len(),
        });
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn finish(&self, report: &mut RunReport) {
        report.finished_at = Some(chrono::Utc::now());
        let success = report.is_success();
        if success {
            info!(
                "Run finished: {} change(s){}",
                report.total_changes(),
                if report.dry_run { " planned" } else { "" }
            );
        } else {
            warn!(
                "Run finished with problems: {} skipped domain(s), {} route failure(s), {} unverified domain(s)",
                report.skipped_domains.len(),
                report.route_failures.len(),
                report.unverified_domains.len()
            );
        }
        self.emit_event(ReconcileEvent::Finished { success });
    }

    fn emit_skipped(&self, domain: &str, report: &RunReport) {
        if let Some(reason) = report.skipped_domains.get(domain) {
            self.emit_event(ReconcileEvent::DomainSkipped {
                domain: domain.to_string(),
                reason: reason.clone(),
            });
        }
    }

    /// Emit a reconcile event
    fn emit_event(&self, event: ReconcileEvent) {
        emit(&self.event_tx, event);
    }
}

/// Send an event, dropping it with a warning when the channel is full
fn emit(tx: &mpsc::Sender<ReconcileEvent>, event: ReconcileEvent) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event) {
        warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_events() {
        let (tx, mut rx) = mpsc::channel(1);
        emit(&tx, ReconcileEvent::Finished { success: true });
        emit(&tx, ReconcileEvent::Finished { success: false });

        assert_eq!(rx.try_recv().unwrap(), ReconcileEvent::Finished { success: true });
        assert!(rx.try_recv().is_err());
    }
}
