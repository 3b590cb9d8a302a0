//! Architectural Contract Test: Retry Architecture
//!
//! Providers make exactly one API call per method; throttling is absorbed
//! by the engine's retry wrapper.
//!
//! Constraints verified:
//! - Throttled calls are retried and the run still converges
//! - A throttle that outlasts the retry budget surfaces as Throttled
//! - Non-throttle errors are not retried by the generic wrapper

mod common;

use common::*;
use mailfwd_core::Error;

#[tokio::test]
async fn throttled_calls_are_retried() {
    let harness = Harness::new();
    harness.zones(&["example.com"]).await;
    harness.dns.throttle_next(2);
    harness.routing.throttle_next(3);

    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    let report = reconciler.run().await.expect("throttling is absorbed");

    assert!(report.is_success(), "{:?}", report);
    assert!(harness.routing.domain("example.com").await.is_some());
}

#[tokio::test]
async fn persistent_throttling_surfaces() {
    let harness = Harness::new();
    harness.routing.throttle_next(1_000);

    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    let err = reconciler.run().await.unwrap_err();

    assert!(err.is_throttled(), "expected Throttled, got {:?}", err);
    assert_eq!(harness.mutations(), 0);
}

#[tokio::test]
async fn lookup_errors_are_not_retried() {
    let harness = Harness::new();
    harness.zones(&["example.com"]).await;
    harness.routing.fail_lookup("example.com").await;

    let (reconciler, _rx) = harness.reconciler(single_domain_config("example.com"));
    let report = reconciler.run().await.unwrap();

    assert!(report.is_skipped("example.com"));
    assert_eq!(harness.routing.create_domain_calls(), 0);
    assert!(!matches!(
        report.skipped_domains.get("example.com"),
        Some(reason) if reason.contains("Throttled")
    ));
}

#[tokio::test]
async fn registration_retries_transient_failures() {
    let harness = Harness::new();
    harness.zones(&["example.com"]).await;
    harness.routing.fail_create("example.com").await;

    let mut config = single_domain_config("example.com");
    config.settings.domain_setup_attempts = 2;
    let (reconciler, _rx) = harness.reconciler(config);

    assert!(matches!(
        reconciler.run().await,
        Err(Error::FatalSetup { .. })
    ));
    assert_eq!(harness.routing.create_domain_calls(), 2);
}
