//! Architectural Contract Test: Route Reconciliation
//!
//! Routes are matched by content, so unchanged rules are never touched and
//! foreign or duplicate rules are removed.
//!
//! Constraints verified:
//! - Missing rules are created and unknown ones deleted
//! - Duplicate copies of a desired rule are pruned
//! - force_route_deletion rebuilds the whole rule set
//! - Command targets never become routes

mod common;

use common::*;
use mailfwd_core::config::Target;
use mailfwd_core::routes::{MatchExpression, RouteAction, RouteRule};

fn foreign_rule() -> RouteRule {
    RouteRule::new(
        &MatchExpression::Recipient("legacy@example.com".into()),
        &[RouteAction::Forward(vec!["old@gmail.com".into()]), RouteAction::Stop],
        10,
    )
}

#[tokio::test]
async fn routes_converge_to_mappings() {
    let harness = Harness::new();
    harness.zones(&["example.com"]).await;
    let foreign = harness.routing.insert_route(foreign_rule()).await;

    let (reconciler, mut rx) = harness.reconciler(single_domain_config("example.com"));
    let report = reconciler.run().await.unwrap();

    assert_eq!(report.routes_created, 9);
    assert_eq!(report.routes_deleted, 1);
    let routes = harness.routing.routes().await;
    assert_eq!(routes.len(), 9);
    assert!(routes.iter().all(|route| route.id != foreign));
    assert!(drain(&mut rx).iter().any(|event| matches!(
        event,
        mailfwd_core::ReconcileEvent::RoutesApplied { created: 9, deleted: 1 }
    )));
}

#[tokio::test]
async fn duplicate_routes_are_pruned() {
    let harness = Harness::new();
    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    reconciler.reconcile_routes().await.unwrap();

    let copy = harness.routing.routes().await[0].rule.clone();
    harness.routing.insert_route(copy).await;

    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    let report = reconciler.reconcile_routes().await.unwrap();

    assert_eq!(report.routes_created, 0);
    assert_eq!(report.routes_deleted, 1);
    assert_eq!(harness.routing.routes().await.len(), 9);
}

#[tokio::test]
async fn forced_deletion_rebuilds_routes() {
    let harness = Harness::new();
    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    reconciler.reconcile_routes().await.unwrap();
    let before: Vec<String> = harness
        .routing
        .routes()
        .await
        .into_iter()
        .map(|route| route.id)
        .collect();

    let mut config = single_domain_config("example.com");
    config.settings.force_route_deletion = true;
    let (reconciler, _rx) = harness.reconciler(config);
    let report = reconciler.reconcile_routes().await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.routes_deleted, 9);
    assert_eq!(report.routes_created, 9);
    let after = harness.routing.routes().await;
    assert_eq!(after.len(), 9);
    assert!(after.iter().all(|route| !before.contains(&route.id)));
}

#[tokio::test]
async fn command_targets_are_not_routed() {
    let mut config = domains_config(&["example.com"]);
    config.mappings.merge(
        "tickets@example.com",
        vec![Target::Command {
            command: "create-ticket".into(),
            host: "helpdesk".into(),
            credentials: None,
        }],
    );
    config
        .mappings
        .merge("info@example.com", vec![Target::email("alice@gmail.com")]);

    let harness = Harness::new();
    let (reconciler, _rx) = harness.reconciler(config);
    reconciler.reconcile_routes().await.unwrap();

    let routes = harness.routing.routes().await;
    assert_eq!(routes.len(), 3, "recipient, Cc and Bcc rules");
    assert!(
        routes
            .iter()
            .all(|route| route.rule.expression.contains("info@example.com"))
    );
}

#[tokio::test]
async fn dry_run_routes_only_counts() {
    let harness = Harness::new();
    let mut config = single_domain_config("example.com");
    config.settings.dry_run = true;
    let (reconciler, _rx) = harness.reconciler(config);
    let report = reconciler.reconcile_routes().await.unwrap();

    assert_eq!(report.routes_created, 9);
    assert!(harness.routing.routes().await.is_empty());
    assert_eq!(harness.mutations(), 0);
}
