//! Architectural Contract Test: DKIM Selector Preservation
//!
//! Recreating a routing domain must not rotate its DKIM selector unless
//! asked to, so published keys stay valid.
//!
//! Constraints verified:
//! - force_recreate keeps the previous selector by default
//! - The DNS key record follows the selector in use
//! - With preservation off the service's new selector is published

mod common;

use common::*;
use mailfwd_core::traits::{RecordType, SpamAction};

async fn dkim_names(harness: &Harness, zone_id: &str) -> Vec<String> {
    harness
        .dns
        .records(zone_id)
        .await
        .into_iter()
        .filter(|set| set.record_type == RecordType::Txt && set.name.contains("._domainkey."))
        .map(|set| set.name)
        .collect()
}

#[tokio::test]
async fn recreate_keeps_selector() {
    let harness = Harness::new();
    let zones = harness.zones(&["example.com"]).await;

    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    reconciler.run().await.unwrap();
    let original = harness
        .routing
        .domain("example.com")
        .await
        .and_then(|domain| domain.dkim_selector())
        .expect("selector assigned");

    let mut config = single_domain_config("example.com");
    config.domains[0].force_recreate = true;
    let (reconciler, _rx) = harness.reconciler(config);
    let report = reconciler.run().await.unwrap();

    assert!(report.is_success(), "{:?}", report);
    assert_eq!(harness.routing.delete_domain_calls(), 1);
    assert_eq!(harness.routing.create_domain_calls(), 2);
    assert_eq!(harness.routing.selector_calls(), 1);

    let current = harness.routing.domain("example.com").await.unwrap();
    assert_eq!(current.dkim_selector(), Some(original.clone()));
    assert_eq!(
        dkim_names(&harness, &zones[0].id).await,
        vec![format!("{}._domainkey.example.com", original)]
    );
}

#[tokio::test]
async fn recreate_without_preservation_publishes_new_selector() {
    let harness = Harness::new();
    let zones = harness.zones(&["example.com"]).await;

    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    reconciler.run().await.unwrap();
    let original = dkim_names(&harness, &zones[0].id).await;

    let mut config = single_domain_config("example.com");
    config.domains[0].force_recreate = true;
    config.settings.preserve_dkim_selector = false;
    let (reconciler, _rx) = harness.reconciler(config);
    reconciler.run().await.unwrap();

    assert_eq!(harness.routing.selector_calls(), 0);
    let rotated = dkim_names(&harness, &zones[0].id).await;
    assert!(rotated.iter().any(|name| !original.contains(name)));
}

#[tokio::test]
async fn spam_policy_change_recreates_domain() {
    let harness = Harness::new();
    harness.zones(&["example.com"]).await;

    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    reconciler.run().await.unwrap();

    let mut config = single_domain_config("example.com");
    config.domains[0].spam_policy = SpamAction::Block;
    let (reconciler, _rx) = harness.reconciler(config);
    reconciler.run().await.unwrap();

    let domain = harness.routing.domain("example.com").await.unwrap();
    assert_eq!(domain.spam_action, SpamAction::Block);
    assert_eq!(harness.routing.delete_domain_calls(), 1);
}
