//! Waiting for newly configured domains to verify

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use super::{ReconcileEvent, Reconciler, RunReport};
use crate::error::{Error, Result};
use crate::poll::poll_until;

impl Reconciler {
    /// Trigger verification of `pending` domains until all are active
    ///
    /// Each polling round triggers a check for every unverified domain,
    /// spaced to stay under the service's rate limit, then re-reads the
    /// domain list. Domains still unverified when the budget runs out are
    /// reported, not retried.
    pub(super) async fn await_convergence(
        &self,
        pending: Vec<String>,
        report: &mut RunReport,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        info!("Waiting for {} domain(s) to verify", pending.len());

        let unverified_set: Mutex<BTreeSet<String>> = Mutex::new(pending.into_iter().collect());
        let notes_log: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let (unverified, notes) = (&unverified_set, &notes_log);
        let spacing = Duration::from_millis(self.config.settings.verify_trigger_spacing_ms);

        let outcome = poll_until(
            &self.config.settings.verification_poll,
            &self.cancel,
            "domain verification",
            move || async move {
                let round: Vec<String> = lock(unverified).iter().cloned().collect();
                for name in &round {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(spacing) => {}
                    }
                    match self
                        .caller
                        .call("verify domain", || self.routing.verify_domain(name))
                        .await
                    {
                        Ok(state) if state.is_verified() => {
                            self.confirm(name, unverified);
                        }
                        Ok(state) => debug!("Domain {} is {:?}", name, state),
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(e) => lock(notes).push(format!("verification of {} failed: {}", name, e)),
                    }
                }

                let listed = self
                    .caller
                    .call("list routing domains", || self.routing.list_domains())
                    .await?;
                for summary in listed.iter().filter(|summary| summary.state.is_verified()) {
                    self.confirm(&summary.name, unverified);
                }
                Ok(lock(unverified).len())
            },
            |remaining| *remaining == 0,
        )
        .await;

        for note in notes_log.into_inner().unwrap_or_else(PoisonError::into_inner) {
            report.warn(note);
        }
        let remaining = unverified_set.into_inner().unwrap_or_else(PoisonError::into_inner);

        match outcome {
            Ok(_) => {
                info!("All domains verified");
                Ok(())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                report.warn(format!(
                    "{} domain(s) not verified: {}",
                    remaining.len(),
                    e
                ));
                report.unverified_domains.extend(remaining);
                Ok(())
            }
        }
    }

    fn confirm(&self, name: &str, unverified: &Mutex<BTreeSet<String>>) {
        if lock(unverified).remove(name) {
            info!("Domain {} verified", name);
            self.emit_event(ReconcileEvent::DomainVerified {
                domain: name.to_string(),
            });
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
