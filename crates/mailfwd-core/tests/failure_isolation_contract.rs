//! Architectural Contract Test: Failure Isolation
//!
//! One broken domain must not stop the others from converging, while a
//! domain that cannot be registered at all must stop the run.
//!
//! Constraints verified:
//! - Lookup failures skip only the affected domain
//! - A rejected zone batch skips every domain in that zone
//! - Exhausted domain registration aborts with FatalSetup
//! - A create that landed without a response is picked up, not repeated
//! - Authentication failures are not retried
//! - Stale domains are reported, and removed only when asked to

mod common;

use common::*;
use mailfwd_core::traits::RecordType;
use mailfwd_core::{Error, ReconcileEvent};

#[tokio::test]
async fn lookup_failure_skips_only_that_domain() {
    let harness = Harness::new();
    let zones = harness.zones(&["a.com", "b.com"]).await;
    harness.routing.fail_lookup("a.com").await;

    let (reconciler, mut rx) = harness.reconciler(domains_config(&["a.com", "b.com"]));
    let report = reconciler.run().await.expect("run completes");

    assert!(!report.is_success());
    assert!(report.is_skipped("a.com"));
    assert!(!report.is_skipped("b.com"));
    assert!(harness.dns.records(&zones[0].id).await.is_empty());
    assert!(
        harness
            .dns
            .records(&zones[1].id)
            .await
            .iter()
            .any(|set| set.record_type == RecordType::Mx)
    );

    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        ReconcileEvent::DomainSkipped { domain, .. } if domain == "a.com"
    )));
    assert_eq!(events.last(), Some(&ReconcileEvent::Finished { success: false }));
}

#[tokio::test]
async fn rejected_zone_batch_skips_its_domains() {
    let harness = Harness::new();
    let zones = harness.zones(&["a.com", "b.com"]).await;
    harness.dns.fail_zone(&zones[0].id).await;

    let (reconciler, _rx) = harness.reconciler(domains_config(&["a.com", "b.com"]));
    let report = reconciler.run().await.unwrap();

    assert!(report.is_skipped("a.com"));
    assert!(report.skipped_domains["a.com"].contains("a.com"));
    assert!(!report.is_skipped("b.com"));
    assert!(!harness.dns.records(&zones[1].id).await.is_empty());
    assert!(report.unverified_domains.is_empty());
}

#[tokio::test]
async fn subdomains_share_a_zone_batch() {
    let harness = Harness::new();
    let zones = harness.zones(&["example.com"]).await;

    let (reconciler, _rx) =
        harness.reconciler(domains_config(&["mail.example.com", "lists.example.com"]));
    let report = reconciler.run().await.unwrap();

    assert!(report.is_success(), "{:?}", report);
    let names: Vec<String> = harness
        .dns
        .records(&zones[0].id)
        .await
        .into_iter()
        .filter(|set| set.record_type == RecordType::Mx)
        .map(|set| set.name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"mail.example.com".to_string()));
    assert!(names.contains(&"lists.example.com".to_string()));
}

#[tokio::test]
async fn exhausted_registration_is_fatal() {
    let harness = Harness::new();
    harness.zones(&["a.com", "b.com"]).await;
    harness.routing.fail_create("a.com").await;

    let config = domains_config(&["a.com", "b.com"]);
    let attempts = config.settings.domain_setup_attempts as usize;
    let (reconciler, _rx) = harness.reconciler(config);

    match reconciler.run().await {
        Err(Error::FatalSetup { domain, .. }) => assert_eq!(domain, "a.com"),
        other => panic!("expected FatalSetup, got {:?}", other),
    }
    assert_eq!(harness.routing.create_domain_calls(), attempts);
    assert!(harness.routing.domain("b.com").await.is_none());
    assert_eq!(harness.dns.mutation_count(), 0);
}

#[tokio::test]
async fn registration_survives_a_lost_create_response() {
    let harness = Harness::new();
    harness.zones(&["a.com"]).await;
    harness.routing.lose_create_response("a.com").await;

    let (reconciler, _rx) = harness.reconciler(domains_config(&["a.com"]));
    let report = reconciler.run().await.expect("registration recovers");

    assert!(report.is_success(), "{:?}", report);
    assert_eq!(harness.routing.create_domain_calls(), 1);
    assert!(harness.routing.domain("a.com").await.is_some());
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let harness = Harness::new();
    harness.zones(&["a.com"]).await;
    harness.routing.deny_create("a.com").await;

    let (reconciler, _rx) = harness.reconciler(domains_config(&["a.com"]));
    match reconciler.run().await {
        Err(Error::FatalSetup { domain, .. }) => assert_eq!(domain, "a.com"),
        other => panic!("expected FatalSetup, got {:?}", other),
    }
    assert_eq!(harness.routing.create_domain_calls(), 1);
}

#[tokio::test]
async fn missing_zone_is_created() {
    let harness = Harness::new();

    let (reconciler, mut rx) = harness.reconciler(domains_config(&["fresh.org"]));
    let report = reconciler.run().await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.zones_created, vec!["fresh.org".to_string()]);
    let zone = harness.dns.zone("fresh.org").await.expect("zone created");
    assert!(!harness.dns.records(&zone.id).await.is_empty());
    assert!(
        drain(&mut rx)
            .iter()
            .any(|event| matches!(event, ReconcileEvent::ZoneCreated { zone, .. } if zone == "fresh.org"))
    );
}

#[tokio::test]
async fn stale_domains_are_reported_and_optionally_removed() {
    let harness = Harness::new();
    harness.zones(&["a.com", "old.com"]).await;

    let (reconciler, _rx) = harness.reconciler(domains_config(&["a.com", "old.com"]));
    reconciler.run().await.unwrap();

    let (reconciler, _rx) = harness.reconciler(domains_config(&["a.com"]));
    let report = reconciler.run().await.unwrap();
    assert_eq!(report.stale_domains, vec!["old.com".to_string()]);
    assert!(report.removed_domains.is_empty());
    assert!(harness.routing.domain("old.com").await.is_some());

    let mut config = domains_config(&["a.com"]);
    config.settings.remove_missing_domains = true;
    let (reconciler, _rx) = harness.reconciler(config);
    let report = reconciler.run().await.unwrap();
    assert_eq!(report.removed_domains, vec!["old.com".to_string()]);
    assert!(harness.routing.domain("old.com").await.is_none());
}
