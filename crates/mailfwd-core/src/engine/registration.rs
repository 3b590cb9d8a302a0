//! Domain registration at the mail-routing service

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

use super::{ReconcileEvent, Reconciler, RunReport};
use crate::config::{DomainSpec, ReconcilerSettings};
use crate::error::{Error, Result};
use crate::poll::poll_until;
use crate::retry::RetryPolicy;
use crate::traits::{DomainRegistration, DomainSummary, RoutingDomain};

/// Pause between domain creation attempts (milliseconds)
const DOMAIN_SETUP_DELAY_MS: u64 = 500;

/// Outcome of ensuring a domain exists
pub(super) enum Registration {
    /// Registered; DNS requirements known
    Ready {
        routing: RoutingDomain,
        created: bool,
    },
    /// Would be created (dry run)
    Planned,
    /// Left out of the run
    Skipped,
}

fn replacement_reason(
    domain: &DomainSpec,
    current: &RoutingDomain,
    settings: &ReconcilerSettings,
) -> Option<String> {
    if domain.force_recreate {
        Some("force_recreate is set".to_string())
    } else if settings.replace_existing_domains {
        Some("replace_existing_domains is set".to_string())
    } else if current.spam_action != domain.spam_policy {
        Some(format!(
            "spam action is {}, want {}",
            current.spam_action, domain.spam_policy
        ))
    } else {
        None
    }
}

impl Reconciler {
    /// Make sure `domain` is registered with the declared settings
    ///
    /// Lookup and deletion failures skip the domain. Creation failures
    /// abort the run with [`Error::FatalSetup`].
    pub(super) async fn ensure_registered(
        &self,
        domain: &DomainSpec,
        report: &mut RunReport,
    ) -> Result<Registration> {
        let settings = &self.config.settings;
        let name = domain.name.as_str();

        let existing = match self
            .caller
            .call("get routing domain", || self.routing.get_domain(name))
            .await
        {
            Ok(current) => Some(current),
            Err(e) if e.is_not_found() => None,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                report.skip(name, format!("lookup failed: {}", e));
                return Ok(Registration::Skipped);
            }
        };

        let previous_selector = match existing {
            Some(current) => {
                let Some(reason) = replacement_reason(domain, &current, settings) else {
                    debug!("Domain {} already registered", name);
                    return Ok(Registration::Ready {
                        routing: current,
                        created: false,
                    });
                };

                if settings.dry_run {
                    report
                        .change_log
                        .push(format!("RECREATE domain {} ({})", name, reason));
                    return Ok(Registration::Ready {
                        routing: current,
                        created: false,
                    });
                }

                info!("Recreating domain {}: {}", name, reason);
                let selector = current.dkim_selector();
                match self.remove_domain(name).await {
                    Ok(()) => {}
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        report.skip(name, format!("removal before recreate failed: {}", e));
                        return Ok(Registration::Skipped);
                    }
                }
                selector
            }
            None => {
                if settings.dry_run {
                    report.change_log.push(format!("CREATE domain {}", name));
                    report.warn(format!(
                        "{}: not registered yet, DNS changes cannot be planned in a dry run",
                        name
                    ));
                    return Ok(Registration::Planned);
                }
                None
            }
        };

        let mut routing = self.create_domain(domain, report).await?;

        if let Some(selector) = previous_selector.filter(|_| settings.preserve_dkim_selector) {
            if routing.dkim_selector().as_deref() != Some(selector.as_str()) {
                match self
                    .caller
                    .call("set DKIM selector", || {
                        self.routing.set_authentication_selector(name, &selector)
                    })
                    .await
                {
                    Ok(()) => {
                        info!("Restored DKIM selector {} for {}", selector, name);
                        routing.apply_dkim_selector(&selector);
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => report.warn(format!(
                        "{}: could not restore DKIM selector {}: {}",
                        name, selector, e
                    )),
                }
            }
        }

        self.create_credentials(domain, report).await?;

        Ok(Registration::Ready {
            routing,
            created: true,
        })
    }

    /// Delete a domain and wait until it is no longer visible
    pub(super) async fn remove_domain(&self, name: &str) -> Result<()> {
        self.caller
            .call("delete routing domain", || self.routing.delete_domain(name))
            .await?;

        poll_until(
            &self.config.settings.deletion_poll,
            &self.cancel,
            &format!("deletion of {}", name),
            || async move {
                match self
                    .caller
                    .call("get routing domain", || self.routing.get_domain(name))
                    .await
                {
                    Ok(_) => Ok(false),
                    Err(e) if e.is_not_found() => Ok(true),
                    Err(e) => Err(e),
                }
            },
            |gone| *gone,
        )
        .await?;
        Ok(())
    }

    async fn create_domain(&self, domain: &DomainSpec, report: &mut RunReport) -> Result<RoutingDomain> {
        let settings = &self.config.settings;
        let registration = DomainRegistration {
            name: domain.name.clone(),
            spam_action: domain.spam_policy,
            smtp_password: domain.usable_smtp_password().map(str::to_string),
        };
        if domain.smtp_password.is_some() && registration.smtp_password.is_none() {
            report.warn(format!(
                "{}: smtp_password ignored, it must be 5 to 32 characters",
                domain.name
            ));
        }

        // A create whose response was lost may still have landed, so every
        // attempt after the first looks the domain up before posting again.
        let policy = RetryPolicy::fixed(DOMAIN_SETUP_DELAY_MS, settings.domain_setup_attempts);
        let attempts = &AtomicU32::new(0);
        let registration = &registration;
        let name = domain.name.as_str();
        let created = self
            .caller
            .call_with(
                "create routing domain",
                &policy,
                |e| !e.is_fatal() && !matches!(e, Error::Authentication(_)),
                move || async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                        match self
                            .caller
                            .call("get routing domain", || self.routing.get_domain(name))
                            .await
                        {
                            Ok(existing) => {
                                debug!("Domain {} exists after an earlier attempt", name);
                                return Ok(existing);
                            }
                            Err(e) if e.is_not_found() => {}
                            Err(e) => return Err(e),
                        }
                    }
                    self.caller
                        .call("create routing domain", || {
                            self.routing.create_domain(registration)
                        })
                        .await
                },
            )
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                e => Error::fatal_setup(&domain.name, e.to_string()),
            })?;

        info!("Registered domain {} ({:?})", domain.name, created.state);
        Ok(created)
    }

    async fn create_credentials(&self, domain: &DomainSpec, report: &mut RunReport) -> Result<()> {
        for credential in &domain.credentials {
            if !credential.is_valid() {
                report.warn(format!(
                    "{}: credential '{}' skipped, login needs 3+ characters and password 5 to 32",
                    domain.name, credential.login
                ));
                continue;
            }

            match self
                .caller
                .call("create SMTP credential", || {
                    self.routing.create_credential(&domain.name, credential)
                })
                .await
            {
                Ok(()) => info!("Created SMTP login {} for {}", credential.login, domain.name),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => report.warn(format!(
                    "{}: could not create SMTP login {}: {}",
                    domain.name, credential.login, e
                )),
            }
        }
        Ok(())
    }

    /// Handle routing domains that are not configured any more
    pub(super) async fn remove_stale_domains(
        &self,
        existing: &[DomainSummary],
        report: &mut RunReport,
    ) -> Result<()> {
        let settings = &self.config.settings;
        let configured: HashSet<&str> = self
            .config
            .domains
            .iter()
            .map(|domain| domain.name.as_str())
            .collect();

        for stale in existing
            .iter()
            .filter(|summary| !configured.contains(summary.name.as_str()))
        {
            self.check_cancelled()?;
            report.stale_domains.push(stale.name.clone());

            if !settings.remove_missing_domains {
                info!("Domain {} is no longer configured; leaving it in place", stale.name);
                self.emit_event(ReconcileEvent::StaleDomain {
                    domain: stale.name.clone(),
                    removed: false,
                });
                continue;
            }

            if settings.dry_run {
                report.change_log.push(format!("DELETE domain {}", stale.name));
                continue;
            }

            match self
                .caller
                .call("delete stale domain", || self.routing.delete_domain(&stale.name))
                .await
            {
                Ok(()) => {
                    info!("Removed stale domain {}", stale.name);
                    report.removed_domains.push(stale.name.clone());
                    self.emit_event(ReconcileEvent::StaleDomain {
                        domain: stale.name.clone(),
                        removed: true,
                    });
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => report.warn(format!("could not remove stale domain {}: {}", stale.name, e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DomainState, SpamAction};

    fn registered(spam_action: SpamAction) -> RoutingDomain {
        RoutingDomain {
            name: "example.com".into(),
            state: DomainState::Active,
            spam_action,
            sending_records: Vec::new(),
            receiving_records: Vec::new(),
        }
    }

    #[test]
    fn unchanged_domain_is_reused() {
        let domain = DomainSpec::new("example.com");
        let settings = ReconcilerSettings::default();
        assert!(replacement_reason(&domain, &registered(SpamAction::Disabled), &settings).is_none());
    }

    #[test]
    fn spam_policy_change_forces_replacement() {
        let mut domain = DomainSpec::new("example.com");
        domain.spam_policy = SpamAction::Block;
        let settings = ReconcilerSettings::default();
        let reason = replacement_reason(&domain, &registered(SpamAction::Disabled), &settings);
        assert!(reason.unwrap().contains("block"));
    }

    #[test]
    fn force_flags_force_replacement() {
        let mut domain = DomainSpec::new("example.com");
        domain.force_recreate = true;
        let settings = ReconcilerSettings::default();
        assert!(replacement_reason(&domain, &registered(SpamAction::Disabled), &settings).is_some());

        let domain = DomainSpec::new("example.com");
        let settings = ReconcilerSettings {
            replace_existing_domains: true,
            ..ReconcilerSettings::default()
        };
        assert!(replacement_reason(&domain, &registered(SpamAction::Disabled), &settings).is_some());
    }
}
