//! Route reconciliation

use tracing::{debug, info};

use super::{ReconcileEvent, Reconciler, RunReport};
use crate::apply::ApplyOrder;
use crate::error::{Error, Result};
use crate::poll::poll_until;
use crate::routes::{ObservedRoute, RouteDiff, RouteRule, desired_routes, diff_routes};

impl Reconciler {
    /// Bring the routing rules in line with the mappings
    ///
    /// Individual route failures are recorded, never fatal.
    pub(super) async fn apply_routes(&self, report: &mut RunReport) -> Result<()> {
        let desired = desired_routes(&self.config.mappings, &self.config.domains);

        let observed = match self
            .caller
            .call("list routes", || self.routing.list_routes())
            .await
        {
            Ok(routes) => routes,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                report.route_failures.push(format!("listing routes failed: {}", e));
                return Ok(());
            }
        };

        let diff = diff_routes(&desired, &observed);
        if diff.is_empty() {
            debug!("{} route(s) up to date", desired.len());
            return Ok(());
        }

        if self.config.settings.dry_run {
            report.routes_created += diff.to_create.len();
            report.routes_deleted += diff.to_delete.len();
            report.change_log.extend(
                diff.to_create
                    .iter()
                    .map(|rule| format!("CREATE route {}", rule.expression)),
            );
            report.change_log.extend(
                diff.to_delete
                    .iter()
                    .map(|route| format!("DELETE route {} ({})", route.rule.expression, route.id)),
            );
            return Ok(());
        }

        let (created, deleted) = match RouteDiff::ORDER {
            ApplyOrder::CreateFirst => {
                let created = self.create_routes(&diff.to_create, report).await?;
                let deleted = self.delete_routes(&diff.to_delete, report).await?;
                (created, deleted)
            }
            ApplyOrder::DeleteFirst => {
                let deleted = self.delete_routes(&diff.to_delete, report).await?;
                let created = self.create_routes(&diff.to_create, report).await?;
                (created, deleted)
            }
        };

        info!("Routes: {} created, {} deleted", created, deleted);
        self.emit_event(ReconcileEvent::RoutesApplied { created, deleted });
        Ok(())
    }

    async fn create_routes(&self, rules: &[RouteRule], report: &mut RunReport) -> Result<usize> {
        let mut created = 0;
        for rule in rules {
            self.check_cancelled()?;
            match self
                .caller
                .call("create route", || self.routing.create_route(rule))
                .await
            {
                Ok(id) => {
                    debug!("Created route {} ({})", rule.expression, id);
                    report.routes_created += 1;
                    created += 1;
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => report
                    .route_failures
                    .push(format!("create {}: {}", rule.expression, e)),
            }
        }
        Ok(created)
    }

    async fn delete_routes(&self, routes: &[ObservedRoute], report: &mut RunReport) -> Result<usize> {
        let mut deleted = 0;
        for route in routes {
            self.check_cancelled()?;
            match self
                .caller
                .call("delete route", || self.routing.delete_route(&route.id))
                .await
            {
                Ok(()) => {
                    debug!("Deleted route {} ({})", route.rule.expression, route.id);
                    report.routes_deleted += 1;
                    deleted += 1;
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => report
                    .route_failures
                    .push(format!("delete {} ({}): {}", route.rule.expression, route.id, e)),
            }
        }
        Ok(deleted)
    }

    /// Remove every route and wait until the service lists none
    pub(super) async fn delete_all_routes(&self, report: &mut RunReport) -> Result<()> {
        let observed = self
            .caller
            .call("list routes", || self.routing.list_routes())
            .await?;
        if observed.is_empty() {
            return Ok(());
        }

        if self.config.settings.dry_run {
            report.routes_deleted += observed.len();
            report.change_log.extend(
                observed
                    .iter()
                    .map(|route| format!("DELETE route {} ({})", route.rule.expression, route.id)),
            );
            return Ok(());
        }

        info!("Deleting all {} route(s)", observed.len());
        let deleted = self.delete_routes(&observed, report).await?;
        if deleted < observed.len() {
            return Err(Error::provider(
                self.routing.service_name(),
                format!("{} route(s) could not be deleted", observed.len() - deleted),
            ));
        }

        poll_until(
            &self.config.settings.deletion_poll,
            &self.cancel,
            "route deletion",
            move || self.caller.call("list routes", move || self.routing.list_routes()),
            |routes| routes.is_empty(),
        )
        .await?;
        self.emit_event(ReconcileEvent::RoutesApplied {
            created: 0,
            deleted,
        });
        Ok(())
    }
}
