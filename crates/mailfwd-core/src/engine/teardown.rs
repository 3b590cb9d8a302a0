//! Removing everything a deployment created

use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ReconcileEvent, Reconciler, RunReport};
use crate::dns::{RecordDiff, ZoneBatch, resolve_zone, teardown_changes, verification_record};
use crate::error::{Error, Result};
use crate::poll::poll_until;
use crate::traits::ObservedRecord;

impl Reconciler {
    /// Tear down the managed records, routes and routing domains
    ///
    /// Records are removed for configured domains only; routes and
    /// routing domains are removed wholesale. Zones are left in place.
    pub async fn teardown(&self) -> Result<RunReport> {
        let settings = &self.config.settings;
        let mut report = RunReport::new(settings.dry_run);

        self.emit_event(ReconcileEvent::Started {
            domains: self.config.domains.len(),
            dry_run: settings.dry_run,
        });

        let zones = self
            .caller
            .call("list hosted zones", || self.dns.list_zones())
            .await?;

        let mut batches: IndexMap<String, ZoneBatch> = IndexMap::new();
        let mut observed: HashMap<String, Vec<ObservedRecord>> = HashMap::new();

        for domain in &self.config.domains {
            self.check_cancelled()?;
            if !domain.setup_dns {
                continue;
            }
            let Some(zone) = resolve_zone(&zones, domain.zone_name()) else {
                debug!("No hosted zone for {}; nothing to remove", domain.name);
                continue;
            };

            if !observed.contains_key(&zone.id) {
                let zone_id = zone.id.as_str();
                match self
                    .caller
                    .call("list records", || self.dns.list_records(zone_id))
                    .await
                {
                    Ok(records) => {
                        observed.insert(zone.id.clone(), records);
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        report.skip(&domain.name, format!("listing zone {} failed: {}", zone.name, e));
                        continue;
                    }
                }
            }
            let current = observed.get(&zone.id).map(Vec::as_slice).unwrap_or_default();

            let name = domain.name.as_str();
            let mut extra_names = Vec::new();
            match self
                .caller
                .call("get routing domain", || self.routing.get_domain(name))
                .await
            {
                Ok(routing) => {
                    if let Some((record_name, _)) = verification_record(&routing) {
                        extra_names.push(record_name);
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => report.warn(format!(
                    "{}: DKIM record name unknown, it is left in place: {}",
                    name, e
                )),
            }
            if domain.dmarc.is_some() {
                extra_names.push(format!("_dmarc.{}", name));
            }

            let cleanup = teardown_changes(name, &extra_names, current);
            if cleanup.is_empty() {
                continue;
            }
            batches
                .entry(zone.id.clone())
                .or_insert_with(|| ZoneBatch::new(zone))
                .absorb(
                    name,
                    RecordDiff {
                        cleanup,
                        setup: Vec::new(),
                    },
                );
        }

        self.apply_dns(batches.into_values().collect(), &mut report)
            .await?;

        match self.delete_all_routes(&mut report).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => report.route_failures.push(format!("route removal failed: {}", e)),
        }

        self.remove_all_domains(&mut report).await?;

        self.finish(&mut report);
        Ok(report)
    }

    async fn remove_all_domains(&self, report: &mut RunReport) -> Result<()> {
        let existing = self
            .caller
            .call("list routing domains", || self.routing.list_domains())
            .await?;
        if existing.is_empty() {
            return Ok(());
        }

        if self.config.settings.dry_run {
            report
                .change_log
                .extend(existing.iter().map(|d| format!("DELETE domain {}", d.name)));
            return Ok(());
        }

        for summary in &existing {
            self.check_cancelled()?;
            match self
                .caller
                .call("delete routing domain", || self.routing.delete_domain(&summary.name))
                .await
            {
                Ok(()) => {
                    info!("Deleted domain {}", summary.name);
                    report.removed_domains.push(summary.name.clone());
                }
                Err(e) if e.is_not_found() => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => report.skip(&summary.name, format!("deletion failed: {}", e)),
            }
        }

        let outcome = poll_until(
            &self.config.settings.deletion_poll,
            &self.cancel,
            "domain removal",
            move || {
                self.caller
                    .call("list routing domains", move || self.routing.list_domains())
            },
            |remaining| remaining.is_empty(),
        )
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                report.warn(format!("routing domains still listed: {}", e));
                Ok(())
            }
        }
    }
}
