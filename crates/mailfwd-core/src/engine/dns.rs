//! DNS planning and zone-parallel application

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ReconcileEvent, Reconciler, RunReport, emit};
use crate::apply::ApplyOrder;
use crate::config::DomainSpec;
use crate::dns::{RecordDiff, ZoneBatch, desired_records, diff_records, resolve_zone};
use crate::error::{Error, Result};
use crate::poll::{PollPolicy, poll_until};
use crate::retry::RetryingCaller;
use crate::traits::{
    Change, ChangeId, ChangeStatus, DnsProvider, HostedZone, ObservedRecord, RoutingDomain,
};

impl Reconciler {
    /// Diff every ready domain against its zone and group the changes
    ///
    /// Domains whose zone or records cannot be read are skipped.
    pub(super) async fn plan_dns(
        &self,
        ready: &[(&DomainSpec, RoutingDomain)],
        zones: &mut Vec<HostedZone>,
        report: &mut RunReport,
    ) -> Result<Vec<ZoneBatch>> {
        let settings = &self.config.settings;
        let mut batches: IndexMap<String, ZoneBatch> = IndexMap::new();
        let mut observed: HashMap<String, Vec<ObservedRecord>> = HashMap::new();

        for (domain, routing) in ready {
            self.check_cancelled()?;

            if !domain.setup_dns {
                debug!("DNS management disabled for {}", domain.name);
                continue;
            }

            let zone = match self.ensure_zone(domain, zones, report).await {
                Ok(Some(zone)) => zone,
                Ok(None) => continue,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    report.skip(&domain.name, format!("hosted zone setup failed: {}", e));
                    continue;
                }
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

            let desired = desired_records(domain, routing, &zone.id, settings);
            for warning in desired.warnings {
                report.warn(warning);
            }

            let diff = diff_records(&desired.records, current);
            if diff.is_empty() {
                debug!("DNS records for {} are up to date", domain.name);
                continue;
            }
            debug!("{} DNS change(s) planned for {}", diff.len(), domain.name);
            batches
                .entry(zone.id.clone())
                .or_insert_with(|| ZoneBatch::new(&zone))
                .absorb(&domain.name, diff);
        }

        Ok(batches.into_values().collect())
    }

    /// Resolve the zone of `domain`, creating it when missing
    ///
    /// Returns `None` in a dry run when the zone does not exist yet.
    async fn ensure_zone(
        &self,
        domain: &DomainSpec,
        zones: &mut Vec<HostedZone>,
        report: &mut RunReport,
    ) -> Result<Option<HostedZone>> {
        let zone_name = domain.zone_name();
        if let Some(zone) = resolve_zone(zones, zone_name) {
            return Ok(Some(zone.clone()));
        }

        if self.config.settings.dry_run {
            report.change_log.push(format!("CREATE zone {}", zone_name));
            report.warn(format!(
                "{}: hosted zone {} does not exist yet, DNS changes cannot be planned in a dry run",
                domain.name, zone_name
            ));
            return Ok(None);
        }

        info!("Creating hosted zone {}", zone_name);
        let creation = self
            .caller
            .call("create hosted zone", || self.dns.create_zone(zone_name))
            .await?;
        await_change(
            self.dns.as_ref(),
            &self.caller,
            &self.config.settings.change_poll,
            &self.cancel,
            &creation.change_id,
            &format!("creation of zone {}", zone_name),
        )
        .await?;

        info!(
            "Created hosted zone {}; delegate to: {}",
            zone_name,
            creation.name_servers.join(", ")
        );
        report.zones_created.push(creation.zone.name.clone());
        self.emit_event(ReconcileEvent::ZoneCreated {
            zone: creation.zone.name.clone(),
            name_servers: creation.name_servers.clone(),
        });
        zones.push(creation.zone.clone());
        Ok(Some(creation.zone))
    }

    /// Apply zone batches, different zones in parallel
    ///
    /// A failing zone skips every domain that contributed to it.
    pub(super) async fn apply_dns(&self, batches: Vec<ZoneBatch>, report: &mut RunReport) -> Result<()> {
        let settings = &self.config.settings;

        if settings.dry_run {
            for batch in &batches {
                report.dns_changes += batch.change_count();
                report.change_log.extend(describe(batch));
            }
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(settings.zone_concurrency));
        let mut tasks = JoinSet::new();
        for batch in batches {
            let dns = Arc::clone(&self.dns);
            let caller = self.caller.clone();
            let cancel = self.cancel.clone();
            let poll = settings.change_poll;
            let tx = self.event_tx.clone();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome =
                    apply_zone_batch(dns.as_ref(), &caller, &poll, &cancel, &tx, &batch).await;
                (batch, outcome)
            });
        }

        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            let (batch, outcome) =
                joined.map_err(|e| Error::Other(format!("zone task failed: {}", e)))?;
            match outcome {
                Ok(applied) => {
                    report.dns_changes += applied;
                    report.change_log.extend(describe(&batch));
                }
                Err(Error::Cancelled) => cancelled = true,
                Err(e) => {
                    for domain in &batch.domains {
                        report.skip(
                            domain,
                            format!("DNS changes for zone {} failed: {}", batch.zone_name, e),
                        );
                    }
                }
            }
        }

        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

fn describe(batch: &ZoneBatch) -> Vec<String> {
    batch
        .cleanup
        .iter()
        .chain(batch.setup.iter())
        .map(|change| {
            format!(
                "{} {} {} ({})",
                change.action, change.record.record_type, change.record.name, batch.zone_name
            )
        })
        .collect()
}

/// Submit one zone's changes in [`RecordDiff::ORDER`], each half settled
/// before the next is sent
async fn apply_zone_batch(
    dns: &dyn DnsProvider,
    caller: &RetryingCaller,
    poll: &PollPolicy,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<ReconcileEvent>,
    batch: &ZoneBatch,
) -> Result<usize> {
    let (first, second): (&[Change], &[Change]) = match RecordDiff::ORDER {
        ApplyOrder::DeleteFirst => (&batch.cleanup, &batch.setup),
        ApplyOrder::CreateFirst => (&batch.setup, &batch.cleanup),
    };

    let mut applied = 0;
    for changes in [first, second] {
        if changes.is_empty() {
            continue;
        }
        let zone_id = batch.zone_id.as_str();
        let change_id = caller
            .call("apply DNS changes", move || dns.apply_changes(zone_id, changes))
            .await?;
        await_change(
            dns,
            caller,
            poll,
            cancel,
            &change_id,
            &format!("DNS changes in zone {}", batch.zone_name),
        )
        .await?;
        applied += changes.len();
    }

    info!("Applied {} DNS change(s) to zone {}", applied, batch.zone_name);
    emit(
        tx,
        ReconcileEvent::DnsChangesApplied {
            zone: batch.zone_name.clone(),
            changes: applied,
        },
    );
    Ok(applied)
}

/// Poll a change batch until the provider reports it settled
async fn await_change(
    dns: &dyn DnsProvider,
    caller: &RetryingCaller,
    poll: &PollPolicy,
    cancel: &CancellationToken,
    change_id: &ChangeId,
    what: &str,
) -> Result<()> {
    poll_until(
        poll,
        cancel,
        what,
        move || caller.call("get change status", move || dns.change_status(change_id)),
        |status| *status == ChangeStatus::Settled,
    )
    .await?;
    Ok(())
}
